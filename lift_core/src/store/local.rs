//! In-process store with optional JSON snapshot persistence.
//!
//! `LocalStore` keeps every table in memory behind a tokio `RwLock`. When
//! opened on a path, each mutation reloads the snapshot under an exclusive
//! lock on a sidecar `.lock` file, applies the change and rewrites the
//! snapshot atomically (temp file + rename). Concurrent CLI invocations
//! therefore keep each other's writes and never see a half-written file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{StoreEvent, StoreOp, WorkoutStore};
use crate::order::is_dense;
use crate::{
    Error, ExerciseLogEntry, ExerciseSpec, NewExerciseLog, NewPlacement, NewSession, Placement,
    PlacementPatch, Result, Session, Template,
};

const EVENT_CAPACITY: usize = 64;

/// All stored records
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub templates: HashMap<Uuid, Template>,
    #[serde(default)]
    pub placements: HashMap<Uuid, Placement>,
    #[serde(default)]
    pub sessions: HashMap<Uuid, Session>,
    #[serde(default)]
    pub exercise_logs: HashMap<Uuid, ExerciseLogEntry>,
}

impl Tables {
    fn logs_of(&self, session_id: Uuid) -> Vec<ExerciseLogEntry> {
        let mut logs: Vec<_> = self
            .exercise_logs
            .values()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        logs.sort_by_key(|e| e.position);
        logs
    }

    fn require_session(&self, session_id: Uuid) -> Result<&Session> {
        self.sessions
            .get(&session_id)
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    /// Load tables from a snapshot file with shared locking
    ///
    /// A missing file yields empty tables. A corrupted file is an error:
    /// silently starting over would drop the user's history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No store snapshot at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let tables: Tables = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded store snapshot from {:?} ({} placements, {} sessions)",
            path,
            tables.placements.len(),
            tables.sessions.len()
        );
        Ok(tables)
    }

    /// Save tables atomically: temp file, fsync, rename over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "snapshot path missing parent")
        })?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved store snapshot to {:?}", path);
        Ok(())
    }

    /// Load, modify and save the snapshot while holding the writer lock
    ///
    /// Writers serialize on `<path>.lock` for the whole read-modify-write,
    /// so concurrent processes never overwrite each other's changes.
    pub fn update<T, F>(path: &Path, f: F) -> Result<(Self, T)>
    where
        F: FnOnce(&mut Tables) -> Result<T>,
    {
        let lock = open_lock_file(path)?;
        lock.lock_exclusive()?;

        // Released when `lock` is dropped, on every path.
        let mut tables = Self::load(path)?;
        let out = f(&mut tables)?;
        tables.save(path)?;
        Ok((tables, out))
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(PathBuf::from(name))?;
    Ok(file)
}

/// Memory-backed [`WorkoutStore`] with change feed and failure injection
pub struct LocalStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
    failures: Mutex<HashMap<StoreOp, usize>>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Create an empty, purely in-memory store
    pub fn new() -> Self {
        Self::with_tables(Tables::default(), None)
    }

    /// Open a store persisted at `path`, loading the existing snapshot if any
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = Tables::load(&path)?;
        Ok(Self::with_tables(tables, Some(path)))
    }

    fn with_tables(tables: Tables, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tables: RwLock::new(tables),
            path,
            events,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next call of `op` fail with a transport error
    pub fn fail_next(&self, op: StoreOp) {
        self.fail_next_n(op, 1);
    }

    /// Make the next `n` calls of `op` fail with a transport error
    pub fn fail_next_n(&self, op: StoreOp, n: usize) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        *failures.entry(op).or_insert(0) += n;
    }

    /// Copy of every table, for inspection and export
    pub async fn snapshot(&self) -> Tables {
        self.tables.read().await.clone()
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        tracing::debug!(op = %op, "store call");
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                tracing::debug!(op = %op, "injected store failure");
                Err(Error::Transport(format!("injected failure in {}", op)))
            }
            _ => Ok(()),
        }
    }

    /// Apply `f` to a copy of the tables and keep the copy once it is saved.
    ///
    /// With a snapshot path the copy is reloaded from disk under the writer
    /// lock, so changes made by other processes since `open` are kept. An
    /// error from `f` or from the save leaves memory and disk untouched.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T>,
    {
        let mut tables = self.tables.write().await;
        let (updated, out) = match &self.path {
            Some(path) => Tables::update(path, f)?,
            None => {
                let mut draft = tables.clone();
                let out = f(&mut draft)?;
                (draft, out)
            }
        };
        *tables = updated;
        Ok(out)
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WorkoutStore for LocalStore {
    async fn create_template(&self, template: Template) -> Result<Template> {
        self.check(StoreOp::CreateTemplate)?;
        if template.title.trim().is_empty() {
            return Err(Error::Validation("template title is empty".into()));
        }
        if let Some(spec) = template.exercises.iter().find(|s| s.name.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "template exercise {} has no name",
                spec.id
            )));
        }

        self.mutate(|tables| {
            if tables.templates.contains_key(&template.id) {
                return Err(Error::Validation(format!(
                    "template {} already exists",
                    template.id
                )));
            }
            tables.templates.insert(template.id, template.clone());
            Ok(())
        })
        .await?;
        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> Result<Template> {
        self.check(StoreOp::GetTemplate)?;
        let tables = self.tables.read().await;
        tables
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("template", id))
    }

    async fn delete_template(&self, id: Uuid) -> Result<()> {
        self.check(StoreOp::DeleteTemplate)?;
        self.mutate(|tables| {
            if !tables.templates.contains_key(&id) {
                return Err(Error::not_found("template", id));
            }
            if let Some(p) = tables.placements.values().find(|p| p.template_id == id) {
                return Err(Error::Validation(format!(
                    "template {} is scheduled on {}",
                    id, p.date
                )));
            }
            tables.templates.remove(&id);
            Ok(())
        })
        .await
    }

    async fn get_template_exercises(&self, template_id: Uuid) -> Result<Vec<ExerciseSpec>> {
        self.check(StoreOp::GetTemplateExercises)?;
        let tables = self.tables.read().await;
        tables
            .templates
            .get(&template_id)
            .map(|t| t.exercises.clone())
            .ok_or_else(|| Error::not_found("template", template_id))
    }

    async fn get_schedule_placements(
        &self,
        owner: &str,
        range: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<Placement>> {
        self.check(StoreOp::GetSchedulePlacements)?;
        let tables = self.tables.read().await;
        let mut placements: Vec<_> = tables
            .placements
            .values()
            .filter(|p| p.owner == owner && range.contains(&p.date))
            .cloned()
            .collect();
        placements.sort_by_key(|p| p.date);
        Ok(placements)
    }

    async fn create_placement(&self, placement: NewPlacement) -> Result<Placement> {
        self.check(StoreOp::CreatePlacement)?;
        let created = Placement {
            id: Uuid::new_v4(),
            owner: placement.owner,
            template_id: placement.template_id,
            date: placement.date,
            is_completed: false,
            session: None,
            completed_at: None,
        };

        self.mutate(|tables| {
            if !tables.templates.contains_key(&created.template_id) {
                return Err(Error::not_found("template", created.template_id));
            }
            if tables
                .placements
                .values()
                .any(|p| p.owner == created.owner && p.date == created.date)
            {
                return Err(Error::Validation(format!(
                    "{} already has a workout scheduled on {}",
                    created.owner, created.date
                )));
            }
            tables.placements.insert(created.id, created.clone());
            Ok(())
        })
        .await?;

        self.publish(StoreEvent::PlacementChanged {
            owner: created.owner.clone(),
            date: created.date,
        });
        Ok(created)
    }

    async fn update_placement(&self, id: Uuid, patch: PlacementPatch) -> Result<Placement> {
        self.check(StoreOp::UpdatePlacement)?;
        let updated = self
            .mutate(|tables| {
                if let Some(Some(session_id)) = patch.session {
                    if !tables.sessions.contains_key(&session_id) {
                        return Err(Error::Validation(format!(
                            "cannot link placement {} to unknown session {}",
                            id, session_id
                        )));
                    }
                }
                let placement = tables
                    .placements
                    .get_mut(&id)
                    .ok_or_else(|| Error::not_found("placement", id))?;
                placement.apply(&patch);
                Ok(placement.clone())
            })
            .await?;

        self.publish(StoreEvent::PlacementChanged {
            owner: updated.owner.clone(),
            date: updated.date,
        });
        Ok(updated)
    }

    async fn create_session(&self, session: NewSession) -> Result<Session> {
        self.check(StoreOp::CreateSession)?;
        let created = Session {
            id: Uuid::new_v4(),
            owner: session.owner,
            template_id: session.template_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            rating: None,
            notes: None,
            calories: None,
        };

        self.mutate(|tables| {
            tables.sessions.insert(created.id, created.clone());
            Ok(())
        })
        .await?;

        self.publish(StoreEvent::SessionChanged {
            owner: created.owner.clone(),
            session_id: created.id,
        });
        Ok(created)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.check(StoreOp::GetSession)?;
        let tables = self.tables.read().await;
        tables.require_session(id).cloned()
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>> {
        self.check(StoreOp::ListSessions)?;
        let tables = self.tables.read().await;
        let mut sessions: Vec<_> = tables
            .sessions
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.check(StoreOp::DeleteSession)?;
        let removed = self
            .mutate(|tables| {
                let removed = tables
                    .sessions
                    .remove(&id)
                    .ok_or_else(|| Error::not_found("session", id))?;
                tables.exercise_logs.retain(|_, e| e.session_id != id);
                Ok(removed)
            })
            .await?;

        self.publish(StoreEvent::SessionChanged {
            owner: removed.owner,
            session_id: id,
        });
        Ok(())
    }

    async fn get_exercise_logs(&self, session_id: Uuid) -> Result<Vec<ExerciseLogEntry>> {
        self.check(StoreOp::GetExerciseLogs)?;
        let tables = self.tables.read().await;
        tables.require_session(session_id)?;
        Ok(tables.logs_of(session_id))
    }

    async fn replace_exercise_logs(
        &self,
        session_id: Uuid,
        entries: Vec<NewExerciseLog>,
    ) -> Result<Vec<ExerciseLogEntry>> {
        self.check(StoreOp::ReplaceExerciseLogs)?;
        if !is_dense(entries.iter().map(|e| e.position)) {
            return Err(Error::Validation(format!(
                "positions for session {} are not dense",
                session_id
            )));
        }

        let stored = self
            .mutate(|tables| {
                tables.require_session(session_id)?;
                tables.exercise_logs.retain(|_, e| e.session_id != session_id);

                for entry in entries {
                    let stored = ExerciseLogEntry {
                        id: entry.id.unwrap_or_else(Uuid::new_v4),
                        session_id,
                        name: entry.name,
                        values: entry.values,
                        position: entry.position,
                        superset_group: entry.superset_group,
                        rpe: entry.rpe,
                    };
                    tables.exercise_logs.insert(stored.id, stored);
                }
                Ok(tables.logs_of(session_id))
            })
            .await?;

        self.publish(StoreEvent::ExerciseLogsChanged { session_id });
        Ok(stored)
    }

    async fn delete_exercise_logs(&self, session_id: Uuid) -> Result<()> {
        self.check(StoreOp::DeleteExerciseLogs)?;
        self.mutate(|tables| {
            tables.require_session(session_id)?;
            tables.exercise_logs.retain(|_, e| e.session_id != session_id);
            Ok(())
        })
        .await?;

        self.publish(StoreEvent::ExerciseLogsChanged { session_id });
        Ok(())
    }

    async fn reorder_exercise_logs(
        &self,
        session_id: Uuid,
        positions: Vec<(Uuid, u32)>,
    ) -> Result<()> {
        self.check(StoreOp::ReorderExerciseLogs)?;
        self.mutate(|tables| {
            tables.require_session(session_id)?;

            let current = tables.logs_of(session_id);
            let covers_session = positions.len() == current.len()
                && current.iter().all(|e| positions.iter().any(|(id, _)| *id == e.id));
            if !covers_session || !is_dense(positions.iter().map(|(_, p)| *p)) {
                return Err(Error::Validation(format!(
                    "reorder of session {} must assign positions 0..{} to every entry",
                    session_id,
                    current.len()
                )));
            }

            for (id, position) in positions {
                if let Some(entry) = tables.exercise_logs.get_mut(&id) {
                    entry.position = position;
                }
            }
            Ok(())
        })
        .await?;

        self.publish(StoreEvent::ExerciseLogsChanged { session_id });
        Ok(())
    }

    async fn group_superset(
        &self,
        session_id: Uuid,
        exercise_ids: Vec<Uuid>,
        group: Uuid,
    ) -> Result<()> {
        self.check(StoreOp::GroupSuperset)?;
        if exercise_ids.len() < 2 {
            return Err(Error::Validation(
                "a superset needs at least two entries".into(),
            ));
        }

        self.mutate(|tables| {
            tables.require_session(session_id)?;
            for id in &exercise_ids {
                match tables.exercise_logs.get(id) {
                    Some(entry) if entry.session_id == session_id => {}
                    _ => return Err(Error::not_found("exercise log", id)),
                }
            }
            for id in &exercise_ids {
                if let Some(entry) = tables.exercise_logs.get_mut(id) {
                    entry.superset_group = Some(group);
                }
            }
            Ok(())
        })
        .await?;

        self.publish(StoreEvent::ExerciseLogsChanged { session_id });
        Ok(())
    }

    async fn ungroup_superset(&self, exercise_id: Uuid) -> Result<()> {
        self.check(StoreOp::UngroupSuperset)?;
        let session_id = self
            .mutate(|tables| {
                let entry = tables
                    .exercise_logs
                    .get_mut(&exercise_id)
                    .ok_or_else(|| Error::not_found("exercise log", exercise_id))?;
                entry.superset_group = None;
                Ok(entry.session_id)
            })
            .await?;

        self.publish(StoreEvent::ExerciseLogsChanged { session_id });
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        Some(self.events.subscribe())
    }
}
