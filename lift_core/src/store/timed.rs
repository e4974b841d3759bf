//! Per-call timeout wrapper for any [`WorkoutStore`].
//!
//! A call that does not finish within the deadline is reported as a
//! transport failure, which callers treat as "not applied" and roll back.

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{StoreEvent, StoreOp, WorkoutStore};
use crate::{
    Error, ExerciseLogEntry, ExerciseSpec, NewExerciseLog, NewPlacement, NewSession, Placement,
    PlacementPatch, Result, Session, Template,
};

/// Store adapter bounding every call with `tokio::time::timeout`
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: WorkoutStore> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn call<T>(&self, op: StoreOp, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op = %op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(Error::Transport(format!(
                    "{} timed out after {}ms",
                    op,
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl<S: WorkoutStore> WorkoutStore for TimedStore<S> {
    async fn create_template(&self, template: Template) -> Result<Template> {
        self.call(StoreOp::CreateTemplate, self.inner.create_template(template))
            .await
    }

    async fn get_template(&self, id: Uuid) -> Result<Template> {
        self.call(StoreOp::GetTemplate, self.inner.get_template(id)).await
    }

    async fn delete_template(&self, id: Uuid) -> Result<()> {
        self.call(StoreOp::DeleteTemplate, self.inner.delete_template(id))
            .await
    }

    async fn get_template_exercises(&self, template_id: Uuid) -> Result<Vec<ExerciseSpec>> {
        self.call(
            StoreOp::GetTemplateExercises,
            self.inner.get_template_exercises(template_id),
        )
        .await
    }

    async fn get_schedule_placements(
        &self,
        owner: &str,
        range: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<Placement>> {
        self.call(
            StoreOp::GetSchedulePlacements,
            self.inner.get_schedule_placements(owner, range),
        )
        .await
    }

    async fn create_placement(&self, placement: NewPlacement) -> Result<Placement> {
        self.call(StoreOp::CreatePlacement, self.inner.create_placement(placement))
            .await
    }

    async fn update_placement(&self, id: Uuid, patch: PlacementPatch) -> Result<Placement> {
        self.call(StoreOp::UpdatePlacement, self.inner.update_placement(id, patch))
            .await
    }

    async fn create_session(&self, session: NewSession) -> Result<Session> {
        self.call(StoreOp::CreateSession, self.inner.create_session(session))
            .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.call(StoreOp::GetSession, self.inner.get_session(id)).await
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>> {
        self.call(StoreOp::ListSessions, self.inner.list_sessions(owner))
            .await
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.call(StoreOp::DeleteSession, self.inner.delete_session(id))
            .await
    }

    async fn get_exercise_logs(&self, session_id: Uuid) -> Result<Vec<ExerciseLogEntry>> {
        self.call(StoreOp::GetExerciseLogs, self.inner.get_exercise_logs(session_id))
            .await
    }

    async fn replace_exercise_logs(
        &self,
        session_id: Uuid,
        entries: Vec<NewExerciseLog>,
    ) -> Result<Vec<ExerciseLogEntry>> {
        self.call(
            StoreOp::ReplaceExerciseLogs,
            self.inner.replace_exercise_logs(session_id, entries),
        )
        .await
    }

    async fn delete_exercise_logs(&self, session_id: Uuid) -> Result<()> {
        self.call(
            StoreOp::DeleteExerciseLogs,
            self.inner.delete_exercise_logs(session_id),
        )
        .await
    }

    async fn reorder_exercise_logs(
        &self,
        session_id: Uuid,
        positions: Vec<(Uuid, u32)>,
    ) -> Result<()> {
        self.call(
            StoreOp::ReorderExerciseLogs,
            self.inner.reorder_exercise_logs(session_id, positions),
        )
        .await
    }

    async fn group_superset(
        &self,
        session_id: Uuid,
        exercise_ids: Vec<Uuid>,
        group: Uuid,
    ) -> Result<()> {
        self.call(
            StoreOp::GroupSuperset,
            self.inner.group_superset(session_id, exercise_ids, group),
        )
        .await
    }

    async fn ungroup_superset(&self, exercise_id: Uuid) -> Result<()> {
        self.call(StoreOp::UngroupSuperset, self.inner.ungroup_superset(exercise_id))
            .await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalStore;
    use chrono::Utc;

    /// A store whose session creation never completes.
    struct HangingStore(LocalStore);

    #[async_trait]
    impl WorkoutStore for HangingStore {
        async fn create_template(&self, template: Template) -> Result<Template> {
            self.0.create_template(template).await
        }
        async fn get_template(&self, id: Uuid) -> Result<Template> {
            self.0.get_template(id).await
        }
        async fn delete_template(&self, id: Uuid) -> Result<()> {
            self.0.delete_template(id).await
        }
        async fn get_template_exercises(&self, id: Uuid) -> Result<Vec<ExerciseSpec>> {
            self.0.get_template_exercises(id).await
        }
        async fn get_schedule_placements(
            &self,
            owner: &str,
            range: RangeInclusive<NaiveDate>,
        ) -> Result<Vec<Placement>> {
            self.0.get_schedule_placements(owner, range).await
        }
        async fn create_placement(&self, p: NewPlacement) -> Result<Placement> {
            self.0.create_placement(p).await
        }
        async fn update_placement(&self, id: Uuid, patch: PlacementPatch) -> Result<Placement> {
            self.0.update_placement(id, patch).await
        }
        async fn create_session(&self, _session: NewSession) -> Result<Session> {
            std::future::pending().await
        }
        async fn get_session(&self, id: Uuid) -> Result<Session> {
            self.0.get_session(id).await
        }
        async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>> {
            self.0.list_sessions(owner).await
        }
        async fn delete_session(&self, id: Uuid) -> Result<()> {
            self.0.delete_session(id).await
        }
        async fn get_exercise_logs(&self, id: Uuid) -> Result<Vec<ExerciseLogEntry>> {
            self.0.get_exercise_logs(id).await
        }
        async fn replace_exercise_logs(
            &self,
            id: Uuid,
            entries: Vec<NewExerciseLog>,
        ) -> Result<Vec<ExerciseLogEntry>> {
            self.0.replace_exercise_logs(id, entries).await
        }
        async fn delete_exercise_logs(&self, id: Uuid) -> Result<()> {
            self.0.delete_exercise_logs(id).await
        }
        async fn reorder_exercise_logs(&self, id: Uuid, p: Vec<(Uuid, u32)>) -> Result<()> {
            self.0.reorder_exercise_logs(id, p).await
        }
        async fn group_superset(&self, id: Uuid, ids: Vec<Uuid>, g: Uuid) -> Result<()> {
            self.0.group_superset(id, ids, g).await
        }
        async fn ungroup_superset(&self, id: Uuid) -> Result<()> {
            self.0.ungroup_superset(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_becomes_transport_error() {
        let store = TimedStore::new(HangingStore(LocalStore::new()), Duration::from_millis(500));
        let err = store
            .create_session(NewSession {
                owner: "u1".into(),
                template_id: None,
                started_at: Utc::now(),
                ended_at: Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(ref msg) if msg.contains("create_session")));
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let store = TimedStore::new(LocalStore::new(), Duration::from_secs(5));
        let sessions = store.list_sessions("nobody").await.unwrap();
        assert!(sessions.is_empty());
        assert!(store.subscribe().is_some());
    }
}
