use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use lift_core::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lift")]
#[command(about = "Workout planning and session logging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Act as this owner instead of the configured one
    #[arg(long, global = true)]
    owner: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workout templates
    Template {
        #[command(subcommand)]
        action: TemplateCommand,
    },

    /// Schedule a template on a date
    Schedule {
        template_id: Uuid,

        /// Date to schedule on (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List scheduled workouts between two dates
    Calendar {
        #[arg(long)]
        from: NaiveDate,

        #[arg(long)]
        to: NaiveDate,
    },

    /// Show the workout for a date
    Show {
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark an exercise as completed (by name or id)
    Done {
        exercise: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Mark an exercise as not completed
    Undo {
        exercise: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Change an exercise's values
    Edit {
        exercise: String,

        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        sets: Option<u32>,

        #[arg(long)]
        reps: Option<String>,

        /// Load in kilograms
        #[arg(long, conflicts_with = "bodyweight")]
        weight: Option<f64>,

        #[arg(long)]
        bodyweight: bool,

        /// Rest after the exercise, in seconds
        #[arg(long)]
        rest: Option<u32>,
    },

    /// Restore an exercise to its planned values
    Reset {
        exercise: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Log transcribed exercises
    Voice {
        /// JSONL file of voice records
        #[arg(long, conflicts_with = "exercise")]
        file: Option<PathBuf>,

        /// Exercise name for a single inline record
        #[arg(long, requires = "sets")]
        exercise: Option<String>,

        #[arg(long)]
        sets: Option<u32>,

        #[arg(long)]
        reps: Option<u32>,

        /// Load in kilograms
        #[arg(long)]
        weight: Option<f64>,

        /// Duration in seconds, for timed exercises
        #[arg(long)]
        duration: Option<u32>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Reorder the logged exercises (list every exercise in its new order)
    Reorder {
        #[arg(required = true)]
        exercises: Vec<String>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Group logged exercises into a superset
    Superset {
        #[arg(required = true)]
        exercises: Vec<String>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Remove a logged exercise from its superset
    Ungroup {
        exercise: String,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Run the rest timer for an exercise
    Rest {
        exercise: String,

        /// Rest length (default: the exercise's rest, else the configured default)
        #[arg(long)]
        seconds: Option<u32>,

        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Export logged exercises to CSV
    Export {
        #[arg(long)]
        from: NaiveDate,

        #[arg(long)]
        to: NaiveDate,

        /// Output file (default: <data-dir>/exercise_logs.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Import a template document ("-" reads stdin)
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    lift_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());

    let service = open_service(&data_dir, &config, cli.owner.clone())?;

    match cli.command {
        Commands::Template {
            action: TemplateCommand::Import { file },
        } => cmd_template_import(&service, &file).await,
        Commands::Schedule { template_id, date } => {
            cmd_schedule(&service, template_id, day(date)).await
        }
        Commands::Calendar { from, to } => cmd_calendar(&service, from, to).await,
        Commands::Show { date, json } => cmd_show(&service, day(date), json).await,
        Commands::Done { exercise, date } => cmd_toggle(&service, &exercise, day(date), true).await,
        Commands::Undo { exercise, date } => {
            cmd_toggle(&service, &exercise, day(date), false).await
        }
        Commands::Edit {
            exercise,
            date,
            sets,
            reps,
            weight,
            bodyweight,
            rest,
        } => {
            let changes = ValueChanges {
                sets,
                reps,
                load: match (weight, bodyweight) {
                    (Some(kg), _) => Some(Load::Kilograms(kg)),
                    (None, true) => Some(Load::Bodyweight),
                    (None, false) => None,
                },
                rest,
            };
            cmd_edit(&service, &exercise, day(date), changes).await
        }
        Commands::Reset { exercise, date } => cmd_reset(&service, &exercise, day(date)).await,
        Commands::Voice {
            file,
            exercise,
            sets,
            reps,
            weight,
            duration,
            date,
        } => {
            let records = match (file, exercise, sets) {
                (Some(path), _, _) => read_voice_records(&path)?,
                (None, Some(exercise), Some(sets)) => vec![VoiceRecord {
                    exercise,
                    sets,
                    reps,
                    weight_kg: weight,
                    duration_seconds: duration,
                }],
                _ => {
                    return Err(Error::Validation(
                        "give either --file or --exercise with --sets".into(),
                    ))
                }
            };
            cmd_voice(&service, day(date), &records).await
        }
        Commands::Reorder { exercises, date } => {
            cmd_reorder(&service, &exercises, day(date)).await
        }
        Commands::Superset { exercises, date } => {
            cmd_superset(&service, &exercises, day(date)).await
        }
        Commands::Ungroup { exercise, date } => cmd_ungroup(&service, &exercise, day(date)).await,
        Commands::Rest {
            exercise,
            seconds,
            date,
        } => cmd_rest(&service, &exercise, seconds, day(date)).await,
        Commands::Export { from, to, output } => {
            let output = output.unwrap_or_else(|| data_dir.join("exercise_logs.csv"));
            cmd_export(&service, from, to, &output).await
        }
    }
}

fn open_service(data_dir: &Path, config: &Config, owner: Option<String>) -> Result<WorkoutService> {
    std::fs::create_dir_all(data_dir)?;
    let store_path = data_dir.join("store.json");
    let local = LocalStore::open(&store_path)?;
    tracing::debug!("Opened store at {:?}", store_path);
    let store: Arc<dyn WorkoutStore> = Arc::new(TimedStore::new(local, config.store.timeout()));

    let service = WorkoutService::new(store, config.clone());
    Ok(match owner {
        Some(owner) => service.with_owner(owner),
        None => service,
    })
}

fn day(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| chrono::Local::now().date_naive())
}

async fn cmd_template_import(service: &WorkoutService, file: &Path) -> Result<()> {
    let json = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };

    let template = service.import_template(&json).await?;
    println!("✓ Imported template \"{}\"", template.title);
    println!("  id: {}", template.id);
    println!("  exercises: {}", template.exercises.len());
    Ok(())
}

async fn cmd_schedule(service: &WorkoutService, template_id: Uuid, date: NaiveDate) -> Result<()> {
    let placement = service.schedule_template(template_id, date).await?;
    println!("✓ Scheduled on {}", placement.date);
    Ok(())
}

async fn cmd_calendar(service: &WorkoutService, from: NaiveDate, to: NaiveDate) -> Result<()> {
    let placements = service.schedule(from, to).await?;
    if placements.is_empty() {
        println!("Nothing scheduled between {} and {}.", from, to);
        return Ok(());
    }

    for placement in placements {
        let title = service
            .store()
            .get_template(placement.template_id)
            .await
            .map(|t| t.title)
            .unwrap_or_else(|_| "<missing template>".into());
        let mark = if placement.is_completed { "x" } else { " " };
        println!("[{}] {}  {}", mark, placement.date, title);
    }
    Ok(())
}

async fn cmd_show(service: &WorkoutService, date: NaiveDate, json: bool) -> Result<()> {
    let view = service.resolve_effective_workout(date).await?;

    if json {
        let progress = view.as_ref().map(|v| v.progress());
        let out = serde_json::json!({
            "date": date,
            "workout": view,
            "progress": progress,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match view {
        Some(view) => display_workout(date, &view),
        None => println!("No workout scheduled on {}.", date),
    }
    Ok(())
}

async fn cmd_toggle(
    service: &WorkoutService,
    exercise: &str,
    date: NaiveDate,
    completed: bool,
) -> Result<()> {
    let mut view = service.require_workout(date).await?;
    let id = find_exercise(&view, exercise)?;
    service
        .toggle_exercise_completion(&mut view, id, completed)
        .await?;

    let name = view.find(id).map(|e| e.name().to_string()).unwrap_or_default();
    let progress = view.progress();
    let verb = if completed { "Completed" } else { "Reopened" };
    println!("✓ {} {}", verb, name);
    println!(
        "  Progress: {}/{} ({:.0}%)",
        progress.completed, progress.total, progress.percentage
    );
    Ok(())
}

struct ValueChanges {
    sets: Option<u32>,
    reps: Option<String>,
    load: Option<Load>,
    rest: Option<u32>,
}

async fn cmd_edit(
    service: &WorkoutService,
    exercise: &str,
    date: NaiveDate,
    changes: ValueChanges,
) -> Result<()> {
    let mut view = service.require_workout(date).await?;
    let id = find_exercise(&view, exercise)?;

    let mut values = view
        .find(id)
        .map(|e| e.values().clone())
        .ok_or_else(|| Error::not_found("exercise", id))?;
    if let Some(sets) = changes.sets {
        values.sets = sets;
    }
    if let Some(reps) = changes.reps {
        values.reps = reps;
    }
    if let Some(load) = changes.load {
        values.load = load;
    }
    if let Some(rest) = changes.rest {
        values.rest_seconds = rest;
    }

    let completed = view.find(id).map(|e| e.is_completed()).unwrap_or(false);
    service.edit_exercise(&mut view, id, values).await?;

    if let Some(e) = view.find(id) {
        println!("✓ {} now {}", e.name(), e.values());
    }
    if !completed {
        println!("  (not completed yet; values are kept once it is marked done)");
    }
    Ok(())
}

async fn cmd_reset(service: &WorkoutService, exercise: &str, date: NaiveDate) -> Result<()> {
    let mut view = service.require_workout(date).await?;
    let id = find_exercise(&view, exercise)?;
    service.reset_to_baseline(&mut view, id).await?;

    if let Some(e) = view.find(id) {
        println!("✓ {} reset to {}", e.name(), e.values());
    }
    Ok(())
}

async fn cmd_voice(service: &WorkoutService, date: NaiveDate, records: &[VoiceRecord]) -> Result<()> {
    match service.record_voice_log(date, records).await? {
        VoiceLogOutcome::Scheduled(view) => {
            println!("✓ Logged {} exercises to {}", records.len(), view.template_title);
            display_workout(date, &view);
        }
        VoiceLogOutcome::AdHoc(log) => {
            println!(
                "✓ Logged {} exercises (no workout scheduled on {})",
                records.len(),
                date
            );
            for entry in &log.entries {
                println!("  {}. {}  {}", entry.position + 1, entry.name, entry.values);
            }
        }
    }
    Ok(())
}

async fn session_log(service: &WorkoutService, date: NaiveDate) -> Result<SessionLog> {
    let view = service.require_workout(date).await?;
    service
        .session_log_for(&view)
        .await?
        .ok_or_else(|| Error::Validation(format!("nothing logged on {} yet", date)))
}

async fn cmd_reorder(service: &WorkoutService, exercises: &[String], date: NaiveDate) -> Result<()> {
    let mut log = session_log(service, date).await?;
    let order = exercises
        .iter()
        .map(|key| find_entry(&log, key))
        .collect::<Result<Vec<_>>>()?;

    service.reorder(&mut log, &order).await?;

    println!("✓ Reordered");
    for entry in &log.entries {
        println!("  {}. {}", entry.position + 1, entry.name);
    }
    Ok(())
}

async fn cmd_superset(service: &WorkoutService, exercises: &[String], date: NaiveDate) -> Result<()> {
    let mut log = session_log(service, date).await?;
    let members = exercises
        .iter()
        .map(|key| find_entry(&log, key))
        .collect::<Result<Vec<_>>>()?;

    let group = service.group_as_superset(&mut log, &members).await?;

    println!("✓ Superset {}", short(group));
    for id in log.group_members(group) {
        if let Some(entry) = log.get(id) {
            println!("  - {}", entry.name);
        }
    }
    Ok(())
}

async fn cmd_ungroup(service: &WorkoutService, exercise: &str, date: NaiveDate) -> Result<()> {
    let mut log = session_log(service, date).await?;
    let id = find_entry(&log, exercise)?;

    service.ungroup(&mut log, id).await?;

    if let Some(entry) = log.get(id) {
        println!("✓ {} is no longer in a superset", entry.name);
    }
    Ok(())
}

async fn cmd_rest(
    service: &WorkoutService,
    exercise: &str,
    seconds: Option<u32>,
    date: NaiveDate,
) -> Result<()> {
    let view = service.require_workout(date).await?;
    let id = find_exercise(&view, exercise)?;
    let (name, planned) = match view.find(id) {
        Some(e) => (e.name().to_string(), service.rest_seconds(e)),
        None => return Err(Error::not_found("exercise", id)),
    };
    let seconds = seconds.unwrap_or(planned);

    let (timers, mut events) = service.rest_timers();
    timers.start(id, seconds);
    println!("Resting {}s after {}", seconds, name);

    tokio::select! {
        event = events.recv() => {
            if let Some(RestTimerEvent::Finished { .. }) = event {
                println!("\x07✓ Rest over: {}", name);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            timers.stop(id);
            println!("Rest cancelled");
        }
    }
    Ok(())
}

async fn cmd_export(
    service: &WorkoutService,
    from: NaiveDate,
    to: NaiveDate,
    output: &Path,
) -> Result<()> {
    let count = export_logs_csv(service.store(), service.owner(), from..=to, output).await?;
    println!("✓ Exported {} exercise logs", count);
    println!("  CSV: {}", output.display());
    Ok(())
}

/// Resolve an exercise by id or exact name
fn find_exercise(view: &EffectiveWorkout, key: &str) -> Result<Uuid> {
    if let Ok(id) = key.parse::<Uuid>() {
        if view.find(id).is_some() {
            return Ok(id);
        }
    }
    view.find_by_name(key)
        .map(|e| e.id())
        .ok_or_else(|| Error::not_found("exercise", key))
}

fn find_entry(log: &SessionLog, key: &str) -> Result<Uuid> {
    if let Ok(id) = key.parse::<Uuid>() {
        if log.get(id).is_some() {
            return Ok(id);
        }
    }
    log.entries
        .iter()
        .find(|e| e.name == key)
        .map(|e| e.id)
        .ok_or_else(|| Error::not_found("exercise log", key))
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn display_workout(date: NaiveDate, view: &EffectiveWorkout) {
    println!("\n{}  {}", date, view.template_title);
    println!("─────────────────────────────────────────");

    for (index, exercise) in view.exercises.iter().enumerate() {
        let mark = if exercise.is_completed() { "x" } else { " " };
        let mut line = format!(
            "[{}] {}. {}  {}",
            mark,
            index + 1,
            exercise.name(),
            exercise.values()
        );
        if exercise.source() == ExerciseSource::Voice {
            line.push_str("  (voice)");
        }
        if let Some(group) = exercise.superset_group() {
            line.push_str(&format!("  [superset {}]", short(group)));
        }
        println!("{}", line);
    }

    let progress = view.progress();
    println!("─────────────────────────────────────────");
    println!(
        "Progress: {}/{} ({:.0}%)",
        progress.completed, progress.total, progress.percentage
    );
}
