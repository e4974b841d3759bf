//! Merge engine: resolves a date into its effective workout.
//!
//! The effective view is the template's exercises in template order, each
//! marked completed when the day's session holds an entry of the same name,
//! followed by the session's entries that match no template exercise (these
//! come from voice logging). The view is rebuilt on every read and never
//! stored.
//!
//! Before merging, the placement is checked against the completion
//! invariant and repaired in place when a previous reconciliation was
//! interrupted (see [`resolve_placement`]).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::store::{StoreEvent, WorkoutStore};
use crate::{
    Baseline, EffectiveExercise, EffectiveWorkout, Error, ExerciseLogEntry, ExerciseSpec,
    Placement, PlacementPatch, PlannedExercise, Result, VoiceExercise,
};

/// Placement for `(owner, date)`, if one exists
pub async fn find_placement(
    store: &dyn WorkoutStore,
    owner: &str,
    date: NaiveDate,
) -> Result<Option<Placement>> {
    let placements = store.get_schedule_placements(owner, date..=date).await?;
    Ok(placements.into_iter().next())
}

/// Resolve the effective workout for `(owner, date)`.
///
/// Returns `Ok(None)` when nothing is scheduled on that date.
pub async fn resolve_effective_workout(
    store: &dyn WorkoutStore,
    owner: &str,
    date: NaiveDate,
) -> Result<Option<EffectiveWorkout>> {
    match find_placement(store, owner, date).await? {
        Some(placement) => resolve_placement(store, placement).await.map(Some),
        None => {
            tracing::debug!(owner, %date, "no workout scheduled");
            Ok(None)
        }
    }
}

/// Resolve the effective workout of a known placement.
///
/// A template that the placement references but the store no longer has is
/// a `DataIntegrity` error. A session left without entries or already gone,
/// or a completion flag that disagrees with the session, is repaired and
/// the corrected view returned.
pub async fn resolve_placement(
    store: &dyn WorkoutStore,
    mut placement: Placement,
) -> Result<EffectiveWorkout> {
    let template = store
        .get_template(placement.template_id)
        .await
        .map_err(|e| missing_as_integrity(e, &placement, "template"))?;
    let specs = store
        .get_template_exercises(template.id)
        .await
        .map_err(|e| missing_as_integrity(e, &placement, "template"))?;

    let logs = heal_placement(store, &mut placement).await?;
    let exercises = merge_exercises(&specs, &logs);

    tracing::debug!(
        placement_id = %placement.id,
        planned = specs.len(),
        logged = logs.len(),
        "resolved effective workout"
    );

    Ok(EffectiveWorkout {
        placement,
        template_title: template.title,
        exercises,
    })
}

fn missing_as_integrity(e: Error, placement: &Placement, what: &str) -> Error {
    match e {
        Error::NotFound { id, .. } => Error::DataIntegrity(format!(
            "placement {} references missing {} {}",
            placement.id, what, id
        )),
        other => other,
    }
}

/// Bring a placement back in line with its session, returning the session's entries.
async fn heal_placement(
    store: &dyn WorkoutStore,
    placement: &mut Placement,
) -> Result<Vec<ExerciseLogEntry>> {
    let logs = match placement.session {
        Some(session_id) => match store.get_exercise_logs(session_id).await {
            Ok(logs) => logs,
            // The orphan was already deleted but the placement never cleared.
            Err(Error::NotFound { .. }) => {
                tracing::warn!(
                    placement_id = %placement.id,
                    session_id = %session_id,
                    "placement references a deleted session; clearing"
                );
                *placement = store
                    .update_placement(placement.id, PlacementPatch::cleared())
                    .await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        },
        None => Vec::new(),
    };

    if placement.is_consistent_with(logs.len()) {
        return Ok(logs);
    }

    match placement.session {
        Some(session_id) if logs.is_empty() => {
            tracing::warn!(
                placement_id = %placement.id,
                session_id = %session_id,
                "session has no exercise logs; deleting orphaned session"
            );
            match store.delete_session(session_id).await {
                Ok(()) | Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            *placement = store
                .update_placement(placement.id, PlacementPatch::cleared())
                .await?;
        }
        Some(session_id) => {
            tracing::warn!(
                placement_id = %placement.id,
                session_id = %session_id,
                "placement has logged exercises but is not marked completed; repairing"
            );
            let patch = PlacementPatch {
                is_completed: Some(true),
                completed_at: Some(Some(placement.completed_at.unwrap_or_else(Utc::now))),
                ..Default::default()
            };
            *placement = store.update_placement(placement.id, patch).await?;
        }
        None => {
            tracing::warn!(
                placement_id = %placement.id,
                "placement marked completed without a session; clearing"
            );
            *placement = store
                .update_placement(placement.id, PlacementPatch::cleared())
                .await?;
        }
    }

    Ok(logs)
}

/// Merge planned specs with logged entries.
///
/// Names match exactly (case-sensitive). When a template lists the same
/// name twice, one entry of that name satisfies both.
pub fn merge_exercises(specs: &[ExerciseSpec], logs: &[ExerciseLogEntry]) -> Vec<EffectiveExercise> {
    let mut by_name: HashMap<&str, &ExerciseLogEntry> = HashMap::new();
    for entry in logs {
        by_name.entry(entry.name.as_str()).or_insert(entry);
    }

    let mut exercises: Vec<EffectiveExercise> = specs
        .iter()
        .map(|spec| {
            let logged = by_name.get(spec.name.as_str());
            EffectiveExercise::Planned(PlannedExercise {
                id: spec.id,
                name: spec.name.clone(),
                baseline: Baseline::new(spec.values.clone()),
                values: logged
                    .map(|e| e.values.clone())
                    .unwrap_or_else(|| spec.values.clone()),
                completed: logged.is_some(),
                log_id: logged.map(|e| e.id),
                superset_group: logged.and_then(|e| e.superset_group),
            })
        })
        .collect();

    let planned_names: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    let mut extra: Vec<&ExerciseLogEntry> = logs
        .iter()
        .filter(|e| !planned_names.contains(e.name.as_str()))
        .collect();
    extra.sort_by_key(|e| e.position);

    exercises.extend(extra.into_iter().map(|e| {
        EffectiveExercise::Voice(VoiceExercise {
            id: e.id,
            name: e.name.clone(),
            values: e.values.clone(),
            completed: true,
            superset_group: e.superset_group,
        })
    }));

    exercises
}

/// Re-resolve `(owner, date)` whenever the store reports a change.
///
/// Store events are only triggers; every message on the returned channel is
/// a freshly resolved view. Returns `None` when the store publishes no
/// change feed. The background task ends when `cancel` fires, the store's
/// feed closes, or the receiver is dropped.
pub fn watch_effective_workout(
    store: Arc<dyn WorkoutStore>,
    owner: String,
    date: NaiveDate,
    cancel: CancellationToken,
) -> Option<mpsc::Receiver<Result<Option<EffectiveWorkout>>>> {
    let mut events = store.subscribe()?;
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) if !concerns(&event, &owner) => continue,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change feed lagged; re-resolving");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            let view = resolve_effective_workout(store.as_ref(), &owner, date).await;
            if tx.send(view).await.is_err() {
                break;
            }
        }
        tracing::debug!(owner = %owner, %date, "stopped watching workout");
    });

    Some(rx)
}

fn concerns(event: &StoreEvent, owner: &str) -> bool {
    match event {
        StoreEvent::PlacementChanged { owner: o, .. } => o == owner,
        StoreEvent::SessionChanged { owner: o, .. } => o == owner,
        StoreEvent::ExerciseLogsChanged { .. } => true,
    }
}
