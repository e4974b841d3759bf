//! Ordering and superset grouping of a session's exercise-log entries.
//!
//! Positions within a session are always the dense range `0..N-1`. A
//! superset group is meaningful only while at least two entries share it.
//! Every mutation is applied to the caller's [`SessionLog`] first and undone
//! if the store rejects it.

use std::collections::HashSet;

use uuid::Uuid;

use crate::command::OptimisticCommand;
use crate::store::WorkoutStore;
use crate::{Error, ExerciseLogEntry, Result};

/// True when the positions are exactly `0..N-1` with no gaps or duplicates
pub fn is_dense(positions: impl IntoIterator<Item = u32>) -> bool {
    let mut positions: Vec<u32> = positions.into_iter().collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(index, position)| *position as usize == index)
}

/// Renumber entries to `0..N-1`, keeping their current relative order
pub fn normalize_positions(entries: &mut [ExerciseLogEntry]) {
    entries.sort_by_key(|e| e.position);
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = index as u32;
    }
}

/// The caller's in-memory, position-ordered list of a session's entries
#[derive(Clone, Debug, PartialEq)]
pub struct SessionLog {
    pub session_id: Uuid,
    pub entries: Vec<ExerciseLogEntry>,
}

impl SessionLog {
    pub fn new(session_id: Uuid, mut entries: Vec<ExerciseLogEntry>) -> Self {
        normalize_positions(&mut entries);
        Self {
            session_id,
            entries,
        }
    }

    /// Read a session's entries from the store
    pub async fn load(store: &dyn WorkoutStore, session_id: Uuid) -> Result<Self> {
        let entries = store.get_exercise_logs(session_id).await?;
        Ok(Self::new(session_id, entries))
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn positions(&self) -> Vec<(Uuid, u32)> {
        self.entries.iter().map(|e| (e.id, e.position)).collect()
    }

    pub fn get(&self, exercise_id: Uuid) -> Option<&ExerciseLogEntry> {
        self.entries.iter().find(|e| e.id == exercise_id)
    }

    fn get_mut(&mut self, exercise_id: Uuid) -> Option<&mut ExerciseLogEntry> {
        self.entries.iter_mut().find(|e| e.id == exercise_id)
    }

    /// Ids of the entries stamped with `group`, in position order
    pub fn group_members(&self, group: Uuid) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|e| e.superset_group == Some(group))
            .map(|e| e.id)
            .collect()
    }
}

/// Persist a new order for the session's entries.
///
/// `new_order` must name every entry exactly once. On a store failure the
/// log is restored to its pre-reorder order and the error returned.
pub async fn reorder(
    store: &dyn WorkoutStore,
    log: &mut SessionLog,
    new_order: &[Uuid],
) -> Result<()> {
    validate_permutation(log, new_order)?;

    let cmd = OptimisticCommand::apply("reorder", log, |log| {
        let mut reordered = Vec::with_capacity(log.entries.len());
        for (position, id) in new_order.iter().enumerate() {
            if let Some(entry) = log.entries.iter().find(|e| e.id == *id) {
                let mut entry = entry.clone();
                entry.position = position as u32;
                reordered.push(entry);
            }
        }
        log.entries = reordered;
    });

    let session_id = cmd.state().session_id;
    let positions = cmd.state().positions();
    cmd.commit(store.reorder_exercise_logs(session_id, positions))
        .await?;

    tracing::info!(session_id = %session_id, entries = new_order.len(), "reordered session");
    Ok(())
}

fn validate_permutation(log: &SessionLog, new_order: &[Uuid]) -> Result<()> {
    if new_order.len() != log.entries.len() {
        return Err(Error::InvalidOrder(format!(
            "expected {} exercises, got {}",
            log.entries.len(),
            new_order.len()
        )));
    }
    let mut seen = HashSet::new();
    for id in new_order {
        if !seen.insert(*id) {
            return Err(Error::InvalidOrder(format!("exercise {} listed twice", id)));
        }
        if log.get(*id).is_none() {
            return Err(Error::InvalidOrder(format!(
                "exercise {} is not part of session {}",
                id, log.session_id
            )));
        }
    }
    Ok(())
}

/// Group two or more entries into a new superset.
///
/// Fewer than two distinct ids is rejected before anything is written.
pub async fn group_as_superset(
    store: &dyn WorkoutStore,
    log: &mut SessionLog,
    exercise_ids: &[Uuid],
) -> Result<Uuid> {
    let mut seen = HashSet::new();
    let members: Vec<Uuid> = exercise_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    if members.len() < 2 {
        return Err(Error::InvalidGroup(members.len()));
    }
    if let Some(missing) = members.iter().find(|id| log.get(**id).is_none()) {
        return Err(Error::not_found("exercise log", missing));
    }

    let group = Uuid::new_v4();
    let cmd = OptimisticCommand::apply("group_superset", log, |log| {
        for entry in log.entries.iter_mut() {
            if members.contains(&entry.id) {
                entry.superset_group = Some(group);
            }
        }
    });

    let session_id = cmd.state().session_id;
    cmd.commit(store.group_superset(session_id, members.clone(), group))
        .await?;

    tracing::info!(session_id = %session_id, group = %group, members = members.len(), "grouped superset");
    Ok(group)
}

/// Remove one entry from its superset.
///
/// When `dissolve_singletons` is set and only one member of the group would
/// remain, that member is released as well.
pub async fn ungroup(
    store: &dyn WorkoutStore,
    log: &mut SessionLog,
    exercise_id: Uuid,
    dissolve_singletons: bool,
) -> Result<()> {
    let entry = log
        .get(exercise_id)
        .ok_or_else(|| Error::not_found("exercise log", exercise_id))?;
    let Some(group) = entry.superset_group else {
        tracing::debug!(exercise_id = %exercise_id, "exercise is not in a superset");
        return Ok(());
    };

    let cmd = OptimisticCommand::apply("ungroup_superset", log, |log| {
        if let Some(entry) = log.get_mut(exercise_id) {
            entry.superset_group = None;
        }
    });
    cmd.commit(store.ungroup_superset(exercise_id)).await?;

    let remaining = log.group_members(group);
    if dissolve_singletons && remaining.len() == 1 {
        let sole = remaining[0];
        let cmd = OptimisticCommand::apply("dissolve_superset", log, |log| {
            if let Some(entry) = log.get_mut(sole) {
                entry.superset_group = None;
            }
        });
        cmd.commit(store.ungroup_superset(sole)).await?;
        tracing::info!(group = %group, "dissolved superset left with one member");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOp;
    use crate::{ExerciseValues, Load, LocalStore, NewExerciseLog, NewSession};
    use chrono::Utc;

    async fn seeded(names: &[&str]) -> (LocalStore, SessionLog) {
        let store = LocalStore::new();
        let session = store
            .create_session(NewSession {
                owner: "u1".into(),
                template_id: None,
                started_at: Utc::now(),
                ended_at: Utc::now(),
            })
            .await
            .unwrap();
        let entries = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                NewExerciseLog::new(
                    *name,
                    ExerciseValues::new(3, "10", Load::Kilograms(20.0)),
                    i as u32,
                )
            })
            .collect();
        store
            .replace_exercise_logs(session.id, entries)
            .await
            .unwrap();
        let log = SessionLog::load(&store, session.id).await.unwrap();
        (store, log)
    }

    fn names(log: &SessionLog) -> Vec<String> {
        log.entries.iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_is_dense() {
        assert!(is_dense(vec![]));
        assert!(is_dense(vec![2, 0, 1]));
        assert!(!is_dense(vec![0, 2]));
        assert!(!is_dense(vec![0, 0, 1]));
    }

    #[tokio::test]
    async fn test_reorder_moves_last_to_first() {
        let (store, mut log) = seeded(&["e0", "e1", "e2", "e3"]).await;
        let ids = log.ids();
        let new_order = vec![ids[3], ids[0], ids[1], ids[2]];

        reorder(&store, &mut log, &new_order).await.unwrap();

        assert_eq!(names(&log), vec!["e3", "e0", "e1", "e2"]);
        let stored = store.get_exercise_logs(log.session_id).await.unwrap();
        let stored_names: Vec<_> = stored.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(stored_names, vec!["e3", "e0", "e1", "e2"]);
        assert!(is_dense(stored.iter().map(|e| e.position)));
    }

    #[tokio::test]
    async fn test_reorder_failure_reverts_view() {
        let (store, mut log) = seeded(&["e0", "e1", "e2", "e3"]).await;
        let before = log.clone();
        let ids = log.ids();
        store.fail_next(StoreOp::ReorderExerciseLogs);

        let err = reorder(&store, &mut log, &[ids[3], ids[0], ids[1], ids[2]])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(log, before);
        assert_eq!(
            log.positions().iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_reorder_rejects_non_permutation() {
        let (store, mut log) = seeded(&["e0", "e1"]).await;
        let ids = log.ids();

        let err = reorder(&store, &mut log, &[ids[0], ids[0]])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOrder(_)));

        let err = reorder(&store, &mut log, &[ids[0]]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOrder(_)));
    }

    #[tokio::test]
    async fn test_group_with_one_id_is_rejected() {
        let (store, mut log) = seeded(&["e0", "e1"]).await;
        let ids = log.ids();
        let before = log.clone();

        let err = group_as_superset(&store, &mut log, &[ids[0]])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGroup(1)));
        assert_eq!(log, before);

        // Duplicates don't count as two members.
        let err = group_as_superset(&store, &mut log, &[ids[1], ids[1]])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGroup(1)));

        let stored = store.get_exercise_logs(log.session_id).await.unwrap();
        assert!(stored.iter().all(|e| e.superset_group.is_none()));
    }

    #[tokio::test]
    async fn test_group_stamps_members() {
        let (store, mut log) = seeded(&["e0", "e1", "e2"]).await;
        let ids = log.ids();

        let group = group_as_superset(&store, &mut log, &[ids[0], ids[2]])
            .await
            .unwrap();

        assert_eq!(log.group_members(group), vec![ids[0], ids[2]]);
        let stored = SessionLog::load(&store, log.session_id).await.unwrap();
        assert_eq!(stored.group_members(group), vec![ids[0], ids[2]]);
        assert_eq!(stored.get(ids[1]).unwrap().superset_group, None);
    }

    #[tokio::test]
    async fn test_ungroup_keeps_sole_member_when_not_dissolving() {
        let (store, mut log) = seeded(&["e0", "e1"]).await;
        let ids = log.ids();
        let group = group_as_superset(&store, &mut log, &ids).await.unwrap();

        ungroup(&store, &mut log, ids[0], false).await.unwrap();

        assert_eq!(log.group_members(group), vec![ids[1]]);
        let stored = SessionLog::load(&store, log.session_id).await.unwrap();
        assert_eq!(stored.group_members(group), vec![ids[1]]);
    }

    #[tokio::test]
    async fn test_ungroup_dissolves_singleton_group() {
        let (store, mut log) = seeded(&["e0", "e1", "e2"]).await;
        let ids = log.ids();
        let group = group_as_superset(&store, &mut log, &[ids[0], ids[1]])
            .await
            .unwrap();

        ungroup(&store, &mut log, ids[0], true).await.unwrap();

        assert!(log.group_members(group).is_empty());
        let stored = SessionLog::load(&store, log.session_id).await.unwrap();
        assert!(stored.entries.iter().all(|e| e.superset_group.is_none()));
    }

    #[tokio::test]
    async fn test_ungroup_failure_restores_group() {
        let (store, mut log) = seeded(&["e0", "e1", "e2"]).await;
        let ids = log.ids();
        let group = group_as_superset(&store, &mut log, &ids).await.unwrap();
        store.fail_next(StoreOp::UngroupSuperset);

        let err = ungroup(&store, &mut log, ids[1], true).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(log.group_members(group), ids);
    }
}
