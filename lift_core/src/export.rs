//! CSV export of logged exercises.
//!
//! One row per exercise-log entry. A session linked to a placement is dated
//! by the placement; an ad-hoc session by the day it started.

use std::collections::HashMap;
use std::fs::File;
use std::ops::RangeInclusive;
use std::path::Path;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::store::WorkoutStore;
use crate::{ExerciseLogEntry, Result};

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    date: String,
    session_id: String,
    template: String,
    position: u32,
    exercise: String,
    sets: u32,
    reps: String,
    load: String,
    duration_seconds: Option<u32>,
    superset_group: Option<String>,
    rpe: Option<u8>,
}

impl CsvRow {
    fn new(date: NaiveDate, template: &str, entry: &ExerciseLogEntry) -> Self {
        CsvRow {
            date: date.to_string(),
            session_id: entry.session_id.to_string(),
            template: template.to_string(),
            position: entry.position,
            exercise: entry.name.clone(),
            sets: entry.values.sets,
            reps: entry.values.reps.clone(),
            load: entry.values.load.to_string(),
            duration_seconds: entry.values.duration_seconds,
            superset_group: entry.superset_group.map(|g| g.to_string()),
            rpe: entry.rpe,
        }
    }
}

/// Write every entry logged by `owner` within `range` to `path`.
///
/// The file is replaced, written with headers and synced to disk before
/// returning the number of rows.
pub async fn export_logs_csv(
    store: &dyn WorkoutStore,
    owner: &str,
    range: RangeInclusive<NaiveDate>,
    path: &Path,
) -> Result<usize> {
    // Every placement, not only those in range: a session completing an
    // older placement still belongs to that placement's date.
    let placement_dates: HashMap<Uuid, NaiveDate> = store
        .get_schedule_placements(owner, NaiveDate::MIN..=NaiveDate::MAX)
        .await?
        .into_iter()
        .filter_map(|p| p.session.map(|s| (s, p.date)))
        .collect();

    let mut titles: HashMap<Uuid, String> = HashMap::new();
    let mut rows = Vec::new();

    for session in store.list_sessions(owner).await? {
        let date = match placement_dates.get(&session.id) {
            Some(date) => *date,
            None => session.started_at.date_naive(),
        };
        if !range.contains(&date) {
            continue;
        }

        let template = match session.template_id {
            Some(template_id) => match titles.get(&template_id) {
                Some(title) => title.clone(),
                None => {
                    let title = store
                        .get_template(template_id)
                        .await
                        .map(|t| t.title)
                        .unwrap_or_default();
                    titles.insert(template_id, title.clone());
                    title
                }
            },
            None => String::new(),
        };

        for entry in store.get_exercise_logs(session.id).await? {
            rows.push(CsvRow::new(date, &template, &entry));
        }
    }

    rows.sort_by(|a, b| {
        (a.date.as_str(), a.session_id.as_str(), a.position)
            .cmp(&(b.date.as_str(), b.session_id.as_str(), b.position))
    });

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    for row in &rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Exported {} exercise logs to {:?}", rows.len(), path);
    Ok(rows.len())
}
