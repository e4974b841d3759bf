//! Caller-facing API.
//!
//! `WorkoutService` is built once with the store, owner and configuration
//! and then passed wherever workouts are read or changed. Every mutation of
//! a caller-held view goes through an [`OptimisticCommand`]: the view
//! changes at once and reverts if the store refuses.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::command::OptimisticCommand;
use crate::edit::{EditField, EditGuard};
use crate::merge::{self, find_placement};
use crate::order::{self, SessionLog};
use crate::reconcile::{reconcile_placement, ReconcileOutcome};
use crate::store::WorkoutStore;
use crate::timer::{RestTimerEvent, RestTimerSupervisor};
use crate::voice::VoiceRecord;
use crate::{
    Config, EffectiveExercise, EffectiveWorkout, Error, ExerciseLogEntry, ExerciseSource,
    ExerciseSpec, ExerciseValues, NewExerciseLog, NewPlacement, NewSession, Placement, Progress,
    Result, Session, Template, VoiceExercise,
};

/// Where a batch of voice records ended up
#[derive(Clone, Debug, PartialEq)]
pub enum VoiceLogOutcome {
    /// Merged into the day's scheduled workout
    Scheduled(EffectiveWorkout),
    /// Appended to an unscheduled session for the day
    AdHoc(SessionLog),
}

pub struct WorkoutService {
    owner: String,
    store: Arc<dyn WorkoutStore>,
    config: Config,
    edits: EditGuard,
}

impl WorkoutService {
    pub fn new(store: Arc<dyn WorkoutStore>, config: Config) -> Self {
        Self {
            owner: config.user.owner.clone(),
            store,
            config,
            edits: EditGuard::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &dyn WorkoutStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn edit_guard(&self) -> &EditGuard {
        &self.edits
    }

    // ------------------------------------------------------------------
    // Templates and schedule
    // ------------------------------------------------------------------

    pub async fn create_template(
        &self,
        title: impl Into<String>,
        exercises: Vec<ExerciseSpec>,
    ) -> Result<Template> {
        let template = Template {
            id: Uuid::new_v4(),
            owner: self.owner.clone(),
            title: title.into(),
            category: String::new(),
            difficulty: Default::default(),
            target_muscles: Vec::new(),
            exercises,
        };
        self.store_template(template).await
    }

    /// Import a template document produced by the plan generator
    pub async fn import_template(&self, json: &str) -> Result<Template> {
        let mut template: Template = serde_json::from_str(json)?;
        if template.owner.is_empty() {
            template.owner = self.owner.clone();
        } else if template.owner != self.owner {
            return Err(Error::Validation(format!(
                "template belongs to {}, not {}",
                template.owner, self.owner
            )));
        }
        self.store_template(template).await
    }

    async fn store_template(&self, template: Template) -> Result<Template> {
        let template = self.store.create_template(template).await?;
        tracing::info!(
            template_id = %template.id,
            title = %template.title,
            exercises = template.exercises.len(),
            "created template"
        );
        Ok(template)
    }

    /// Place a template on a date. A date holds at most one placement.
    pub async fn schedule_template(&self, template_id: Uuid, date: NaiveDate) -> Result<Placement> {
        let placement = self
            .store
            .create_placement(NewPlacement {
                owner: self.owner.clone(),
                template_id,
                date,
            })
            .await?;
        tracing::info!(placement_id = %placement.id, %date, "scheduled template");
        Ok(placement)
    }

    pub async fn schedule(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Placement>> {
        self.store.get_schedule_placements(&self.owner, from..=to).await
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub async fn resolve_effective_workout(&self, date: NaiveDate) -> Result<Option<EffectiveWorkout>> {
        merge::resolve_effective_workout(self.store.as_ref(), &self.owner, date).await
    }

    /// Like [`resolve_effective_workout`](Self::resolve_effective_workout),
    /// but an unscheduled date is `NotFound`
    pub async fn require_workout(&self, date: NaiveDate) -> Result<EffectiveWorkout> {
        self.resolve_effective_workout(date)
            .await?
            .ok_or_else(|| Error::not_found("placement", date))
    }

    pub fn progress(&self, view: &EffectiveWorkout) -> Progress {
        view.progress()
    }

    /// Stream freshly resolved views of `date` as the store changes
    pub fn watch(
        &self,
        date: NaiveDate,
        cancel: CancellationToken,
    ) -> Option<mpsc::Receiver<Result<Option<EffectiveWorkout>>>> {
        merge::watch_effective_workout(Arc::clone(&self.store), self.owner.clone(), date, cancel)
    }

    pub async fn session_log(&self, session_id: Uuid) -> Result<SessionLog> {
        SessionLog::load(self.store.as_ref(), session_id).await
    }

    /// The session log behind a view, if anything has been logged
    pub async fn session_log_for(&self, view: &EffectiveWorkout) -> Result<Option<SessionLog>> {
        match view.placement.session {
            Some(session_id) => self.session_log(session_id).await.map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Mark one exercise done or not done and reconcile the day's session.
    ///
    /// The view flips immediately. When the store refuses any step the
    /// view is restored and the error returned; the next read repairs any
    /// half-applied state.
    pub async fn toggle_exercise_completion(
        &self,
        view: &mut EffectiveWorkout,
        exercise_id: Uuid,
        desired_completed: bool,
    ) -> Result<()> {
        if view.find(exercise_id).is_none() {
            return Err(Error::not_found("exercise", exercise_id));
        }

        tracing::info!(
            placement_id = %view.placement.id,
            exercise_id = %exercise_id,
            completed = desired_completed,
            "toggling exercise completion"
        );

        self.reconcile_with(view, "toggle_completion", |view| {
            if let Some(exercise) = view.find_mut(exercise_id) {
                exercise.set_completed(desired_completed);
            }
        })
        .await
    }

    /// Apply `forward` to the view, then rewrite the stored session to match
    async fn reconcile_with(
        &self,
        view: &mut EffectiveWorkout,
        label: &'static str,
        forward: impl FnOnce(&mut EffectiveWorkout),
    ) -> Result<()> {
        let cmd = OptimisticCommand::apply(label, view, forward);
        let placement = cmd.state().placement.clone();
        let exercises = cmd.state().exercises.clone();
        let store = self.store.as_ref();

        let outcome = cmd
            .commit(async move { reconcile_placement(store, &placement, &exercises).await })
            .await?;
        apply_outcome(view, outcome);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Change an exercise's values.
    ///
    /// Fails with `EditInProgress` if another editor holds any changed
    /// field. A completed exercise is written through to its log entry.
    pub async fn edit_exercise(
        &self,
        view: &mut EffectiveWorkout,
        exercise_id: Uuid,
        values: ExerciseValues,
    ) -> Result<()> {
        let exercise = view
            .find(exercise_id)
            .ok_or_else(|| Error::not_found("exercise", exercise_id))?;
        let changed = EditField::changed(exercise.values(), &values);
        if changed.is_empty() {
            return Ok(());
        }
        let completed = exercise.is_completed();
        let _tokens = self.edits.begin_all(exercise_id, &changed)?;

        tracing::info!(
            exercise_id = %exercise_id,
            fields = ?changed.iter().map(EditField::as_str).collect::<Vec<_>>(),
            "editing exercise"
        );

        let apply = |view: &mut EffectiveWorkout| {
            if let Some(exercise) = view.find_mut(exercise_id) {
                *exercise.values_mut() = values;
            }
        };

        if completed {
            self.reconcile_with(view, "edit_exercise", apply).await
        } else {
            apply(view);
            Ok(())
        }
    }

    /// Restore a planned exercise to its template values
    pub async fn reset_to_baseline(&self, view: &mut EffectiveWorkout, exercise_id: Uuid) -> Result<()> {
        let baseline = match view.find(exercise_id) {
            Some(EffectiveExercise::Planned(p)) => p.baseline.values().clone(),
            Some(EffectiveExercise::Voice(_)) => {
                return Err(Error::Validation(format!(
                    "exercise {} was logged by voice and has no planned values",
                    exercise_id
                )))
            }
            None => return Err(Error::not_found("exercise", exercise_id)),
        };
        self.edit_exercise(view, exercise_id, baseline).await
    }

    // ------------------------------------------------------------------
    // Ordering and supersets
    // ------------------------------------------------------------------

    pub async fn reorder(&self, log: &mut SessionLog, new_order: &[Uuid]) -> Result<()> {
        order::reorder(self.store.as_ref(), log, new_order).await
    }

    pub async fn group_as_superset(&self, log: &mut SessionLog, exercise_ids: &[Uuid]) -> Result<Uuid> {
        order::group_as_superset(self.store.as_ref(), log, exercise_ids).await
    }

    pub async fn ungroup(&self, log: &mut SessionLog, exercise_id: Uuid) -> Result<()> {
        order::ungroup(
            self.store.as_ref(),
            log,
            exercise_id,
            self.config.supersets.dissolve_singletons,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Rest timers
    // ------------------------------------------------------------------

    pub fn rest_timers(&self) -> (RestTimerSupervisor, mpsc::UnboundedReceiver<RestTimerEvent>) {
        RestTimerSupervisor::new(self.config.timers.tick())
    }

    /// Rest length for an exercise, falling back to the configured default
    pub fn rest_seconds(&self, exercise: &EffectiveExercise) -> u32 {
        match exercise.values().rest_seconds {
            0 => self.config.timers.default_rest_seconds,
            seconds => seconds,
        }
    }

    // ------------------------------------------------------------------
    // Voice intake
    // ------------------------------------------------------------------

    /// Record transcribed exercises against `date`.
    ///
    /// With a placement on that date the records merge into its workout: a
    /// record naming an exercise already in the view completes it with the
    /// spoken values, anything else is appended. Without a placement they
    /// go to the day's unscheduled session.
    pub async fn record_voice_log(
        &self,
        date: NaiveDate,
        records: &[VoiceRecord],
    ) -> Result<VoiceLogOutcome> {
        if records.is_empty() {
            return Err(Error::Validation("no voice records to log".into()));
        }
        for record in records {
            record.validate()?;
        }

        match find_placement(self.store.as_ref(), &self.owner, date).await? {
            Some(placement) => {
                let mut view = merge::resolve_placement(self.store.as_ref(), placement).await?;
                self.reconcile_with(&mut view, "voice_log", |view| merge_voice_records(view, records))
                    .await?;
                tracing::info!(%date, records = records.len(), "recorded voice log");
                Ok(VoiceLogOutcome::Scheduled(view))
            }
            None => self.record_ad_hoc(date, records).await.map(VoiceLogOutcome::AdHoc),
        }
    }

    async fn record_ad_hoc(&self, date: NaiveDate, records: &[VoiceRecord]) -> Result<SessionLog> {
        let (session, created) = match self.ad_hoc_session(date).await? {
            Some(session) => (session, false),
            None => {
                let started_at = date.and_time(NaiveTime::MIN).and_utc();
                let session = self
                    .store
                    .create_session(NewSession {
                        owner: self.owner.clone(),
                        template_id: None,
                        started_at,
                        ended_at: Utc::now().max(started_at),
                    })
                    .await?;
                (session, true)
            }
        };

        let existing = self.store.get_exercise_logs(session.id).await?;
        let offset = existing.len() as u32;
        let mut entries: Vec<NewExerciseLog> = existing.into_iter().map(carry_over).collect();
        entries.extend(
            records
                .iter()
                .enumerate()
                .map(|(i, record)| record.to_log(offset + i as u32)),
        );

        match self.store.replace_exercise_logs(session.id, entries).await {
            Ok(stored) => {
                tracing::info!(
                    session_id = %session.id,
                    %date,
                    records = records.len(),
                    "recorded unscheduled voice log"
                );
                Ok(SessionLog::new(session.id, stored))
            }
            Err(e) => {
                if created {
                    if let Err(cleanup) = self.store.delete_session(session.id).await {
                        tracing::warn!(
                            session_id = %session.id,
                            error = %cleanup,
                            "could not remove empty voice session"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// The owner's unscheduled session started on `date`, if any
    async fn ad_hoc_session(&self, date: NaiveDate) -> Result<Option<Session>> {
        let sessions = self.store.list_sessions(&self.owner).await?;
        Ok(sessions
            .into_iter()
            .find(|s| s.template_id.is_none() && s.started_at.date_naive() == date))
    }
}

fn carry_over(entry: ExerciseLogEntry) -> NewExerciseLog {
    NewExerciseLog {
        id: Some(entry.id),
        name: entry.name,
        values: entry.values,
        position: entry.position,
        superset_group: entry.superset_group,
        rpe: entry.rpe,
    }
}

fn merge_voice_records(view: &mut EffectiveWorkout, records: &[VoiceRecord]) {
    for record in records {
        let name = record.exercise.trim();
        let values = record.values();
        let mut matched = false;
        for exercise in view.exercises.iter_mut().filter(|e| e.name() == name) {
            *exercise.values_mut() = values.clone();
            exercise.set_completed(true);
            matched = true;
        }
        if !matched {
            view.exercises.push(EffectiveExercise::Voice(VoiceExercise {
                id: Uuid::new_v4(),
                name: name.to_string(),
                values,
                completed: true,
                superset_group: None,
            }));
        }
    }
}

/// Bring a view's log references in line with what the store accepted
fn apply_outcome(view: &mut EffectiveWorkout, outcome: ReconcileOutcome) {
    view.placement = outcome.placement;
    // A voice item only exists through its log entry.
    view.exercises
        .retain(|e| e.is_completed() || e.source() != ExerciseSource::Voice);

    let mut by_name: HashMap<&str, &ExerciseLogEntry> = HashMap::new();
    for entry in &outcome.entries {
        by_name.entry(entry.name.as_str()).or_insert(entry);
    }

    for exercise in view.exercises.iter_mut() {
        match exercise {
            EffectiveExercise::Planned(p) => {
                let logged = if p.completed {
                    by_name.get(p.name.as_str()).copied()
                } else {
                    None
                };
                p.log_id = logged.map(|e| e.id);
                p.superset_group = logged.and_then(|e| e.superset_group);
            }
            EffectiveExercise::Voice(v) => {
                v.superset_group = outcome
                    .entries
                    .iter()
                    .find(|e| e.id == v.id)
                    .and_then(|e| e.superset_group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Load, LocalStore};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    async fn scheduled() -> (WorkoutService, EffectiveWorkout) {
        crate::logging::init_test();
        let service = WorkoutService::new(Arc::new(LocalStore::new()), Config::default());
        let template = service
            .create_template(
                "Upper",
                vec![
                    ExerciseSpec::new("Bench Press", ExerciseValues::new(4, "8", Load::Kilograms(60.0))),
                    ExerciseSpec::new("Row", ExerciseValues::new(4, "10", Load::Kilograms(50.0))),
                ],
            )
            .await
            .unwrap();
        service.schedule_template(template.id, day()).await.unwrap();
        let view = service.require_workout(day()).await.unwrap();
        (service, view)
    }

    #[tokio::test]
    async fn test_toggle_updates_view_references() {
        let (service, mut view) = scheduled().await;
        let bench = view.exercises[0].id();

        service
            .toggle_exercise_completion(&mut view, bench, true)
            .await
            .unwrap();

        assert!(view.placement.is_completed);
        assert!(view.placement.session.is_some());
        assert!(view.exercises[0].log_id().is_some());
        assert_eq!(view, service.require_workout(day()).await.unwrap());
    }

    #[tokio::test]
    async fn test_edit_of_pending_exercise_stays_local() {
        let (service, mut view) = scheduled().await;
        let row = view.exercises[1].id();
        let mut values = view.exercises[1].values().clone();
        values.reps = "12".into();

        service.edit_exercise(&mut view, row, values).await.unwrap();

        assert_eq!(view.exercises[1].values().reps, "12");
        assert!(view.placement.session.is_none());
    }

    #[tokio::test]
    async fn test_edit_of_completed_exercise_is_stored() {
        let (service, mut view) = scheduled().await;
        let bench = view.exercises[0].id();
        service
            .toggle_exercise_completion(&mut view, bench, true)
            .await
            .unwrap();

        let mut values = view.exercises[0].values().clone();
        values.load = Load::Kilograms(65.0);
        service.edit_exercise(&mut view, bench, values).await.unwrap();

        let fresh = service.require_workout(day()).await.unwrap();
        assert_eq!(fresh.exercises[0].values().load, Load::Kilograms(65.0));

        service.reset_to_baseline(&mut view, bench).await.unwrap();
        let fresh = service.require_workout(day()).await.unwrap();
        assert_eq!(fresh.exercises[0].values().load, Load::Kilograms(60.0));
        assert!(fresh.exercises[0].is_completed());
    }

    #[tokio::test]
    async fn test_edit_refused_while_field_is_held() {
        let (service, mut view) = scheduled().await;
        let row = view.exercises[1].id();
        let _token = service.edit_guard().begin(row, EditField::Sets).unwrap();

        let mut values = view.exercises[1].values().clone();
        values.sets = 5;
        let err = service.edit_exercise(&mut view, row, values).await.unwrap_err();

        assert!(matches!(err, Error::EditInProgress { field: "sets", .. }));
        assert_eq!(view.exercises[1].values().sets, 4);
    }

    #[tokio::test]
    async fn test_rest_seconds_falls_back_to_config() {
        let (service, view) = scheduled().await;
        assert_eq!(service.rest_seconds(&view.exercises[0]), 90);

        let mut exercise = view.exercises[0].clone();
        exercise.values_mut().rest_seconds = 45;
        assert_eq!(service.rest_seconds(&exercise), 45);
    }

    #[tokio::test]
    async fn test_import_rejects_foreign_owner() {
        let service = WorkoutService::new(Arc::new(LocalStore::new()), Config::default());
        let json = r#"{"owner":"someone-else","title":"Legs","exercises":[]}"#;

        let err = service.import_template(json).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
