//! Core domain types for the Lift session system.
//!
//! This module defines the records linking plan → schedule → log:
//! - Templates and their exercise specs
//! - Calendar placements of templates
//! - Performed sessions and their exercise-log entries
//! - The derived effective workout view and its progress metrics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Exercise values
// ============================================================================

/// Resistance used for an exercise
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Load {
    Kilograms(f64),
    Bodyweight,
}

impl fmt::Display for Load {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Load::Kilograms(kg) => write!(f, "{}kg", kg),
            Load::Bodyweight => write!(f, "BW"),
        }
    }
}

/// The values that describe how an exercise is (or was) performed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseValues {
    pub sets: u32,
    /// Rep scheme, e.g. `"8"` or `"8-10"`
    pub reps: String,
    pub load: Load,
    #[serde(default)]
    pub rest_seconds: u32,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ExerciseValues {
    pub fn new(sets: u32, reps: impl Into<String>, load: Load) -> Self {
        Self {
            sets,
            reps: reps.into(),
            load,
            rest_seconds: 0,
            duration_seconds: None,
            notes: None,
        }
    }

    pub fn with_rest(mut self, rest_seconds: u32) -> Self {
        self.rest_seconds = rest_seconds;
        self
    }
}

impl fmt::Display for ExerciseValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration_seconds {
            Some(secs) if self.reps.is_empty() => write!(f, "{}×{}s", self.sets, secs),
            _ => write!(f, "{}×{}@{}", self.sets, self.reps, self.load),
        }
    }
}

// ============================================================================
// Templates
// ============================================================================

/// Difficulty rating of a template
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

/// One planned exercise within a template
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub values: ExerciseValues,
}

impl ExerciseSpec {
    pub fn new(name: impl Into<String>, values: ExerciseValues) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            values,
        }
    }
}

/// A reusable workout definition
///
/// Documents produced by the plan-generation collaborator deserialize into
/// this type directly; missing ids are assigned on import.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Template {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub target_muscles: Vec<String>,
    pub exercises: Vec<ExerciseSpec>,
}

// ============================================================================
// Placements
// ============================================================================

/// A template scheduled on a calendar date
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    pub id: Uuid,
    pub owner: String,
    pub template_id: Uuid,
    pub date: NaiveDate,
    pub is_completed: bool,
    pub session: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Placement {
    /// Whether the completion flag agrees with the linked session's entry count.
    ///
    /// `entry_count` is the number of log entries of `self.session` (0 when unlinked).
    pub fn is_consistent_with(&self, entry_count: usize) -> bool {
        self.is_completed == (self.session.is_some() && entry_count > 0)
    }

    pub fn apply(&mut self, patch: &PlacementPatch) {
        if let Some(session) = patch.session {
            self.session = session;
        }
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
    }
}

/// Fields needed to schedule a template
#[derive(Clone, Debug)]
pub struct NewPlacement {
    pub owner: String,
    pub template_id: Uuid,
    pub date: NaiveDate,
}

/// Partial update of a placement; `None` leaves the field untouched
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlacementPatch {
    pub session: Option<Option<Uuid>>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl PlacementPatch {
    /// Link a session and mark the placement completed
    pub fn completed(session: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            session: Some(Some(session)),
            is_completed: Some(true),
            completed_at: Some(Some(at)),
        }
    }

    /// Unlink the session and clear the completion state
    pub fn cleared() -> Self {
        Self {
            session: Some(None),
            is_completed: Some(false),
            completed_at: Some(None),
        }
    }
}

// ============================================================================
// Sessions and exercise logs
// ============================================================================

/// The record of an actually performed workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub owner: String,
    pub template_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub calories: Option<u32>,
}

/// Fields needed to open a session
#[derive(Clone, Debug)]
pub struct NewSession {
    pub owner: String,
    pub template_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// One exercise's actually performed data within a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseLogEntry {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub values: ExerciseValues,
    pub position: u32,
    pub superset_group: Option<Uuid>,
    pub rpe: Option<u8>,
}

/// An exercise-log entry before the store has accepted it
///
/// `id` is kept when the entry replaces one that already existed, so callers
/// holding ids across a full-replace keep valid references.
#[derive(Clone, Debug, PartialEq)]
pub struct NewExerciseLog {
    pub id: Option<Uuid>,
    pub name: String,
    pub values: ExerciseValues,
    pub position: u32,
    pub superset_group: Option<Uuid>,
    pub rpe: Option<u8>,
}

impl NewExerciseLog {
    pub fn new(name: impl Into<String>, values: ExerciseValues, position: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            values,
            position,
            superset_group: None,
            rpe: None,
        }
    }
}

// ============================================================================
// Effective workout view
// ============================================================================

/// Where an effective exercise came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseSource {
    Planned,
    Voice,
}

/// The template's planned values for an exercise, kept for undo-to-original
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Baseline(ExerciseValues);

impl Baseline {
    pub fn new(values: ExerciseValues) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &ExerciseValues {
        &self.0
    }
}

/// A template exercise as seen for one date
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PlannedExercise {
    /// Id of the template's exercise spec
    pub id: Uuid,
    pub name: String,
    pub baseline: Baseline,
    pub values: ExerciseValues,
    pub completed: bool,
    /// Id of the log entry satisfying this exercise, if any
    pub log_id: Option<Uuid>,
    pub superset_group: Option<Uuid>,
}

/// A logged exercise whose name matches nothing in the template
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct VoiceExercise {
    /// Id of the underlying log entry
    pub id: Uuid,
    pub name: String,
    pub values: ExerciseValues,
    pub completed: bool,
    pub superset_group: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EffectiveExercise {
    Planned(PlannedExercise),
    Voice(VoiceExercise),
}

impl EffectiveExercise {
    pub fn id(&self) -> Uuid {
        match self {
            EffectiveExercise::Planned(p) => p.id,
            EffectiveExercise::Voice(v) => v.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EffectiveExercise::Planned(p) => &p.name,
            EffectiveExercise::Voice(v) => &v.name,
        }
    }

    pub fn source(&self) -> ExerciseSource {
        match self {
            EffectiveExercise::Planned(_) => ExerciseSource::Planned,
            EffectiveExercise::Voice(_) => ExerciseSource::Voice,
        }
    }

    pub fn values(&self) -> &ExerciseValues {
        match self {
            EffectiveExercise::Planned(p) => &p.values,
            EffectiveExercise::Voice(v) => &v.values,
        }
    }

    pub fn values_mut(&mut self) -> &mut ExerciseValues {
        match self {
            EffectiveExercise::Planned(p) => &mut p.values,
            EffectiveExercise::Voice(v) => &mut v.values,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self {
            EffectiveExercise::Planned(p) => p.completed,
            EffectiveExercise::Voice(v) => v.completed,
        }
    }

    pub fn set_completed(&mut self, completed: bool) {
        match self {
            EffectiveExercise::Planned(p) => p.completed = completed,
            EffectiveExercise::Voice(v) => v.completed = completed,
        }
    }

    /// Id of the log entry backing this exercise, if it has been logged
    pub fn log_id(&self) -> Option<Uuid> {
        match self {
            EffectiveExercise::Planned(p) => p.log_id,
            EffectiveExercise::Voice(v) => Some(v.id),
        }
    }

    pub fn superset_group(&self) -> Option<Uuid> {
        match self {
            EffectiveExercise::Planned(p) => p.superset_group,
            EffectiveExercise::Voice(v) => v.superset_group,
        }
    }
}

/// Completion metrics for a view, always derived on demand
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

impl Progress {
    pub fn of(exercises: &[EffectiveExercise]) -> Self {
        let total = exercises.len();
        let completed = exercises.iter().filter(|e| e.is_completed()).count();
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 * 100.0 / total as f64
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

/// The merged planned + logged view of one date's workout
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EffectiveWorkout {
    pub placement: Placement,
    pub template_title: String,
    pub exercises: Vec<EffectiveExercise>,
}

impl EffectiveWorkout {
    pub fn progress(&self) -> Progress {
        Progress::of(&self.exercises)
    }

    pub fn find(&self, exercise_id: Uuid) -> Option<&EffectiveExercise> {
        self.exercises.iter().find(|e| e.id() == exercise_id)
    }

    pub fn find_mut(&mut self, exercise_id: Uuid) -> Option<&mut EffectiveExercise> {
        self.exercises.iter_mut().find(|e| e.id() == exercise_id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&EffectiveExercise> {
        self.exercises.iter().find(|e| e.name() == name)
    }
}
