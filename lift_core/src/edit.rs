//! Advisory edit tokens.
//!
//! While a value is being edited (a field has focus, a stepper is held) the
//! editor holds an [`EditToken`] for that exercise and field. A second
//! writer asking for the same pair gets [`Error::EditInProgress`] instead of
//! silently overwriting. Tokens release themselves on drop.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::{Error, ExerciseValues, Result};

/// An editable field of an exercise's values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EditField {
    Sets,
    Reps,
    Load,
    Rest,
    Duration,
    Notes,
}

impl EditField {
    pub const ALL: [EditField; 6] = [
        EditField::Sets,
        EditField::Reps,
        EditField::Load,
        EditField::Rest,
        EditField::Duration,
        EditField::Notes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EditField::Sets => "sets",
            EditField::Reps => "reps",
            EditField::Load => "load",
            EditField::Rest => "rest",
            EditField::Duration => "duration",
            EditField::Notes => "notes",
        }
    }

    /// Fields whose value differs between `before` and `after`
    pub fn changed(before: &ExerciseValues, after: &ExerciseValues) -> Vec<EditField> {
        Self::ALL
            .into_iter()
            .filter(|field| match field {
                EditField::Sets => before.sets != after.sets,
                EditField::Reps => before.reps != after.reps,
                EditField::Load => before.load != after.load,
                EditField::Rest => before.rest_seconds != after.rest_seconds,
                EditField::Duration => before.duration_seconds != after.duration_seconds,
                EditField::Notes => before.notes != after.notes,
            })
            .collect()
    }
}

impl fmt::Display for EditField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Held = Arc<Mutex<HashSet<(Uuid, EditField)>>>;

fn lock(held: &Held) -> MutexGuard<'_, HashSet<(Uuid, EditField)>> {
    held.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registry of held edit tokens. Clones share the same registry.
#[derive(Clone, Debug, Default)]
pub struct EditGuard {
    held: Held,
}

impl EditGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `(exercise_id, field)` until the returned token is dropped
    pub fn begin(&self, exercise_id: Uuid, field: EditField) -> Result<EditToken> {
        if !lock(&self.held).insert((exercise_id, field)) {
            return Err(Error::EditInProgress {
                exercise_id,
                field: field.as_str(),
            });
        }
        Ok(EditToken {
            held: Arc::clone(&self.held),
            exercise_id,
            field,
        })
    }

    /// Claim several fields at once; nothing is held if any is taken
    pub fn begin_all(&self, exercise_id: Uuid, fields: &[EditField]) -> Result<Vec<EditToken>> {
        fields
            .iter()
            .map(|field| self.begin(exercise_id, *field))
            .collect()
    }

    pub fn is_held(&self, exercise_id: Uuid, field: EditField) -> bool {
        lock(&self.held).contains(&(exercise_id, field))
    }
}

/// A held claim on one exercise field
#[derive(Debug)]
pub struct EditToken {
    held: Held,
    exercise_id: Uuid,
    field: EditField,
}

impl EditToken {
    pub fn exercise_id(&self) -> Uuid {
        self.exercise_id
    }

    pub fn field(&self) -> EditField {
        self.field
    }
}

impl Drop for EditToken {
    fn drop(&mut self) {
        lock(&self.held).remove(&(self.exercise_id, self.field));
    }
}
