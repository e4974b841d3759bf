//! Completion reconciler.
//!
//! Toggling one exercise recomputes the whole completed set and rewrites
//! the placement's session to match it exactly:
//!
//! ```text
//! session?  completed set   action
//! yes       non-empty       delete entries, insert completed set
//! yes       empty           delete entries, delete session, clear placement
//! no        non-empty       create session, insert set, link + complete placement
//! no        empty           nothing
//! ```
//!
//! The store offers no atomicity across these steps. If entries are deleted
//! but the insert fails, the session is left empty. If the session is
//! deleted but the placement cannot be cleared, the placement points at
//! nothing. The merge engine repairs both on the next read.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::store::WorkoutStore;
use crate::{
    EffectiveExercise, Error, ExerciseLogEntry, NewExerciseLog, NewSession, Placement,
    PlacementPatch, Result,
};

/// Stored state after a successful reconciliation
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileOutcome {
    pub placement: Placement,
    pub entries: Vec<ExerciseLogEntry>,
}

/// Project the completed exercises of a view into the entries to store.
///
/// Positions follow the view's order. Log ids are carried over so callers
/// keep valid references, and a superset group is dropped when fewer than
/// two of its members are still completed.
pub fn completed_set(exercises: &[EffectiveExercise]) -> Vec<NewExerciseLog> {
    let mut used_ids = HashSet::new();
    let mut entries: Vec<NewExerciseLog> = exercises
        .iter()
        .filter(|e| e.is_completed())
        .enumerate()
        .map(|(position, exercise)| NewExerciseLog {
            id: exercise.log_id().filter(|id| used_ids.insert(*id)),
            name: exercise.name().to_string(),
            values: exercise.values().clone(),
            position: position as u32,
            superset_group: exercise.superset_group(),
            rpe: None,
        })
        .collect();

    let mut group_sizes: HashMap<Uuid, usize> = HashMap::new();
    for group in entries.iter().filter_map(|e| e.superset_group) {
        *group_sizes.entry(group).or_insert(0) += 1;
    }
    for entry in entries.iter_mut() {
        if let Some(group) = entry.superset_group {
            if group_sizes.get(&group).copied().unwrap_or(0) < 2 {
                entry.superset_group = None;
            }
        }
    }

    entries
}

/// Set one exercise's completion flag and reconcile the placement.
///
/// `current` is the caller's effective list; it is not modified.
pub async fn toggle_exercise_completion(
    store: &dyn WorkoutStore,
    placement: &Placement,
    exercise_id: Uuid,
    desired_completed: bool,
    current: &[EffectiveExercise],
) -> Result<ReconcileOutcome> {
    let mut next = current.to_vec();
    let exercise = next
        .iter_mut()
        .find(|e| e.id() == exercise_id)
        .ok_or_else(|| Error::not_found("exercise", exercise_id))?;
    exercise.set_completed(desired_completed);

    tracing::info!(
        placement_id = %placement.id,
        exercise_id = %exercise_id,
        completed = desired_completed,
        "toggling exercise completion"
    );

    reconcile_placement(store, placement, &next).await
}

/// Rewrite the placement's stored session so it holds exactly the completed
/// exercises of `exercises`.
pub async fn reconcile_placement(
    store: &dyn WorkoutStore,
    placement: &Placement,
    exercises: &[EffectiveExercise],
) -> Result<ReconcileOutcome> {
    let entries = completed_set(exercises);

    match placement.session {
        Some(session_id) => {
            store.delete_exercise_logs(session_id).await?;

            if entries.is_empty() {
                store.delete_session(session_id).await?;
                let updated = store
                    .update_placement(placement.id, PlacementPatch::cleared())
                    .await?;
                tracing::info!(
                    placement_id = %placement.id,
                    session_id = %session_id,
                    "last exercise removed; session deleted"
                );
                return Ok(ReconcileOutcome {
                    placement: updated,
                    entries: Vec::new(),
                });
            }

            let stored = store.replace_exercise_logs(session_id, entries).await?;
            let placement = if placement.is_completed {
                placement.clone()
            } else {
                store
                    .update_placement(placement.id, PlacementPatch::completed(session_id, Utc::now()))
                    .await?
            };
            tracing::debug!(session_id = %session_id, entries = stored.len(), "replaced exercise logs");
            Ok(ReconcileOutcome {
                placement,
                entries: stored,
            })
        }
        None if entries.is_empty() => {
            tracing::debug!(placement_id = %placement.id, "nothing completed and no session; no-op");
            Ok(ReconcileOutcome {
                placement: placement.clone(),
                entries: Vec::new(),
            })
        }
        None => {
            let now = Utc::now();
            let session = store
                .create_session(NewSession {
                    owner: placement.owner.clone(),
                    template_id: Some(placement.template_id),
                    started_at: now,
                    ended_at: now,
                })
                .await?;

            let linked = async {
                let stored = store.replace_exercise_logs(session.id, entries).await?;
                let updated = store
                    .update_placement(placement.id, PlacementPatch::completed(session.id, now))
                    .await?;
                Ok::<_, Error>((stored, updated))
            }
            .await;

            match linked {
                Ok((stored, updated)) => {
                    tracing::info!(
                        placement_id = %placement.id,
                        session_id = %session.id,
                        entries = stored.len(),
                        "started session"
                    );
                    Ok(ReconcileOutcome {
                        placement: updated,
                        entries: stored,
                    })
                }
                Err(e) => {
                    if let Err(cleanup) = store.delete_session(session.id).await {
                        tracing::warn!(
                            session_id = %session.id,
                            error = %cleanup,
                            "could not remove session after failed start"
                        );
                    }
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Baseline, ExerciseValues, Load, PlannedExercise, VoiceExercise};

    fn planned(name: &str, completed: bool, group: Option<Uuid>) -> EffectiveExercise {
        let values = ExerciseValues::new(4, "8-10", Load::Kilograms(60.0));
        EffectiveExercise::Planned(PlannedExercise {
            id: Uuid::new_v4(),
            name: name.into(),
            baseline: Baseline::new(values.clone()),
            values,
            completed,
            log_id: None,
            superset_group: group,
        })
    }

    #[test]
    fn test_completed_set_positions_follow_view_order() {
        let view = vec![
            planned("A", true, None),
            planned("B", false, None),
            planned("C", true, None),
        ];
        let set = completed_set(&view);

        assert_eq!(set.len(), 2);
        assert_eq!((set[0].name.as_str(), set[0].position), ("A", 0));
        assert_eq!((set[1].name.as_str(), set[1].position), ("C", 1));
    }

    #[test]
    fn test_completed_set_keeps_voice_log_ids() {
        let log_id = Uuid::new_v4();
        let view = vec![EffectiveExercise::Voice(VoiceExercise {
            id: log_id,
            name: "Push-ups".into(),
            values: ExerciseValues::new(3, "15", Load::Bodyweight),
            completed: true,
            superset_group: None,
        })];

        assert_eq!(completed_set(&view)[0].id, Some(log_id));
    }

    #[test]
    fn test_completed_set_drops_singleton_groups() {
        let kept = Uuid::new_v4();
        let broken = Uuid::new_v4();
        let view = vec![
            planned("A", true, Some(kept)),
            planned("B", true, Some(kept)),
            planned("C", true, Some(broken)),
            planned("D", false, Some(broken)),
        ];
        let set = completed_set(&view);

        assert_eq!(set[0].superset_group, Some(kept));
        assert_eq!(set[1].superset_group, Some(kept));
        assert_eq!(set[2].superset_group, None);
    }

    #[test]
    fn test_completed_set_never_repeats_an_id() {
        let shared = Uuid::new_v4();
        let mut a = planned("Curl", true, None);
        let mut b = planned("Curl", true, None);
        for e in [&mut a, &mut b] {
            if let EffectiveExercise::Planned(p) = e {
                p.log_id = Some(shared);
            }
        }
        let set = completed_set(&[a, b]);

        assert_eq!(set[0].id, Some(shared));
        assert_eq!(set[1].id, None);
    }
}
