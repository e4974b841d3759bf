//! Storage collaborator interface.
//!
//! This module defines the [`WorkoutStore`] trait covering the template,
//! schedule, session and exercise-log stores, plus the change feed
//! ([`StoreEvent`]) and the adapters shipped with the crate:
//!
//! ```text
//! WorkoutService
//!     |
//!     v
//! TimedStore<S> --timeout per call--> S: WorkoutStore
//!                                        |
//!                                        +-- LocalStore (memory + JSON snapshot)
//! ```
//!
//! Every call may fail; callers treat any error as "not applied".

pub mod local;
pub mod timed;

use std::fmt;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    ExerciseLogEntry, ExerciseSpec, NewExerciseLog, NewPlacement, NewSession, Placement,
    PlacementPatch, Result, Session, Template,
};

pub use local::LocalStore;
pub use timed::TimedStore;

/// Notification that stored records changed.
///
/// Listeners treat these as triggers to re-read, never as patches to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    PlacementChanged { owner: String, date: NaiveDate },
    SessionChanged { owner: String, session_id: Uuid },
    ExerciseLogsChanged { session_id: Uuid },
}

/// Names of the store operations, used for logging and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateTemplate,
    GetTemplate,
    DeleteTemplate,
    GetTemplateExercises,
    GetSchedulePlacements,
    CreatePlacement,
    UpdatePlacement,
    CreateSession,
    GetSession,
    ListSessions,
    DeleteSession,
    GetExerciseLogs,
    ReplaceExerciseLogs,
    DeleteExerciseLogs,
    ReorderExerciseLogs,
    GroupSuperset,
    UngroupSuperset,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::CreateTemplate => "create_template",
            StoreOp::GetTemplate => "get_template",
            StoreOp::DeleteTemplate => "delete_template",
            StoreOp::GetTemplateExercises => "get_template_exercises",
            StoreOp::GetSchedulePlacements => "get_schedule_placements",
            StoreOp::CreatePlacement => "create_placement",
            StoreOp::UpdatePlacement => "update_placement",
            StoreOp::CreateSession => "create_session",
            StoreOp::GetSession => "get_session",
            StoreOp::ListSessions => "list_sessions",
            StoreOp::DeleteSession => "delete_session",
            StoreOp::GetExerciseLogs => "get_exercise_logs",
            StoreOp::ReplaceExerciseLogs => "replace_exercise_logs",
            StoreOp::DeleteExerciseLogs => "delete_exercise_logs",
            StoreOp::ReorderExerciseLogs => "reorder_exercise_logs",
            StoreOp::GroupSuperset => "group_superset",
            StoreOp::UngroupSuperset => "ungroup_superset",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Async CRUD interface the reconciliation core requires from storage.
///
/// The trait is object-safe so services can hold an `Arc<dyn WorkoutStore>`.
/// None of the operations are atomic with respect to each other.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    async fn create_template(&self, template: Template) -> Result<Template>;

    async fn get_template(&self, id: Uuid) -> Result<Template>;

    /// Delete a template; rejected while any placement references it.
    async fn delete_template(&self, id: Uuid) -> Result<()>;

    /// Exercise specs of a template, in template order.
    async fn get_template_exercises(&self, template_id: Uuid) -> Result<Vec<ExerciseSpec>>;

    /// Placements for `owner` whose date lies in `range`, ordered by date.
    async fn get_schedule_placements(
        &self,
        owner: &str,
        range: RangeInclusive<NaiveDate>,
    ) -> Result<Vec<Placement>>;

    async fn create_placement(&self, placement: NewPlacement) -> Result<Placement>;

    async fn update_placement(&self, id: Uuid, patch: PlacementPatch) -> Result<Placement>;

    async fn create_session(&self, session: NewSession) -> Result<Session>;

    async fn get_session(&self, id: Uuid) -> Result<Session>;

    async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>>;

    /// Delete a session together with all of its exercise-log entries.
    async fn delete_session(&self, id: Uuid) -> Result<()>;

    /// Entries of a session, ordered by position.
    async fn get_exercise_logs(&self, session_id: Uuid) -> Result<Vec<ExerciseLogEntry>>;

    /// Replace the session's entry set with `entries`.
    async fn replace_exercise_logs(
        &self,
        session_id: Uuid,
        entries: Vec<NewExerciseLog>,
    ) -> Result<Vec<ExerciseLogEntry>>;

    async fn delete_exercise_logs(&self, session_id: Uuid) -> Result<()>;

    /// Write `(entry id, position)` pairs.
    async fn reorder_exercise_logs(&self, session_id: Uuid, positions: Vec<(Uuid, u32)>)
        -> Result<()>;

    /// Stamp every entry in `exercise_ids` with `group`.
    async fn group_superset(&self, session_id: Uuid, exercise_ids: Vec<Uuid>, group: Uuid)
        -> Result<()>;

    async fn ungroup_superset(&self, exercise_id: Uuid) -> Result<()>;

    /// Subscribe to change notifications, if the backend publishes them.
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        None
    }
}

// Compile-time assertion: WorkoutStore must be usable as `dyn WorkoutStore`.
const _: () = {
    fn _assert_object_safe(_: &dyn WorkoutStore) {}
};
