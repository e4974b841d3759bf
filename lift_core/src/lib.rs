#![forbid(unsafe_code)]

//! Core domain model and session reconciliation engine for Lift.
//!
//! This crate provides:
//! - Domain types (templates, placements, sessions, exercise logs)
//! - The store interface with in-process and timeout-wrapped adapters
//! - Merge engine producing the effective workout view of a date
//! - Completion reconciler, ordering and superset management
//! - Rest timers, voice intake and CSV export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod store;
pub mod command;
pub mod order;
pub mod merge;
pub mod reconcile;
pub mod timer;
pub mod edit;
pub mod voice;
pub mod export;
pub mod service;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::{LocalStore, StoreEvent, StoreOp, TimedStore, WorkoutStore};
pub use command::OptimisticCommand;
pub use order::SessionLog;
pub use merge::resolve_effective_workout;
pub use reconcile::{toggle_exercise_completion, ReconcileOutcome};
pub use timer::{RestTimerEvent, RestTimerSupervisor};
pub use edit::{EditField, EditGuard, EditToken};
pub use voice::{read_voice_records, VoiceRecord};
pub use export::export_logs_csv;
pub use service::{VoiceLogOutcome, WorkoutService};
