use clap::{Parser, Subcommand};
use repset_core::history;
use repset_core::services::{CountdownSurface, NotificationScheduler, WatchChannel};
use repset_core::watch::{CompletedWorkoutRecord, WatchMessage};
use repset_core::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "repset")]
#[command(about = "Strength workout tracker with supersets and rest timers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage exercise definitions
    Exercise {
        #[command(subcommand)]
        command: ExerciseCommand,
    },

    /// Manage routines
    Routine {
        #[command(subcommand)]
        command: RoutineCommand,
    },

    /// Run a workout from a routine
    Start {
        /// Routine name
        routine: String,

        /// Complete every set as planned and skip rests (for testing)
        #[arg(long)]
        auto_complete: bool,

        /// Cancel the workout after N completed sets (for testing)
        #[arg(long, value_name = "N")]
        cancel_after: Option<usize>,

        /// Leave the workout in progress after N completed sets (for testing)
        #[arg(long, value_name = "N", conflicts_with = "cancel_after")]
        suspend_after: Option<usize>,

        /// Write performed values back into the routine
        #[arg(long)]
        update_template: bool,

        /// Notes saved with the workout
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Show finished workouts with progress against the previous one
    History {
        /// Number of workouts to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Rewrite the session log keeping one entry per workout
    Compact,

    /// Export every performed set as CSV
    Export {
        #[arg(long)]
        output: PathBuf,
    },

    /// Exchange data with the companion watch app
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },
}

#[derive(Subcommand)]
enum ExerciseCommand {
    Add {
        #[arg(long)]
        name: String,

        /// Muscle group tag (repeatable)
        #[arg(long = "muscle")]
        muscles: Vec<String>,

        #[arg(long, default_value = "bodyweight")]
        equipment: String,
    },
    List,
}

#[derive(Subcommand)]
enum RoutineCommand {
    Add {
        #[arg(long)]
        name: String,

        /// NAME:SETSxREPS@WEIGHT/REST[+GROUP], e.g. "Bench Press:3x10@45/90+a"
        #[arg(long = "exercise", required = true)]
        exercises: Vec<String>,
    },
    List,
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum WatchCommand {
    /// Write the routine snapshot the watch would receive
    Snapshot {
        #[arg(long)]
        output: PathBuf,
    },
    /// Import a workout recorded on the watch
    Import {
        path: PathBuf,

        /// Update the routine even if the record does not ask for it
        #[arg(long)]
        update_template: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    repset_core::logging::init();

    let cli = Cli::parse();

    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    match cli.command {
        Commands::Exercise { command } => cmd_exercise(&data_dir, command),
        Commands::Routine { command } => cmd_routine(&data_dir, command),
        Commands::Start {
            routine,
            auto_complete,
            cancel_after,
            suspend_after,
            update_template,
            notes,
        } => cmd_start(
            &data_dir,
            &config,
            &routine,
            StartOptions {
                auto_complete,
                cancel_after,
                suspend_after,
                update_template,
                notes,
            },
        ),
        Commands::History { limit } => cmd_history(&data_dir, &config, limit),
        Commands::Compact => cmd_compact(&data_dir),
        Commands::Export { output } => cmd_export(&data_dir, &output),
        Commands::Watch { command } => cmd_watch(&data_dir, &config, command),
    }
}

// ============================================================================
// Plan commands
// ============================================================================

fn cmd_exercise(data_dir: &Path, command: ExerciseCommand) -> Result<()> {
    let mut store = FileStore::new(data_dir);

    match command {
        ExerciseCommand::Add {
            name,
            muscles,
            equipment,
        } => {
            if find_exercise(&store, &name)?.is_some() {
                return Err(Error::Other(format!("Exercise {:?} already exists", name)));
            }
            let exercise = Exercise::new(name, muscles, equipment.parse()?);
            store.save_exercise(&exercise)?;
            println!("✓ Added exercise {}", exercise.name);
        }
        ExerciseCommand::List => {
            let exercises = store.exercises()?;
            if exercises.is_empty() {
                println!("No exercises yet.");
            }
            for exercise in exercises {
                println!(
                    "  {} ({:?}) [{}]",
                    exercise.name,
                    exercise.equipment,
                    exercise.muscle_groups.join(", ")
                );
            }
        }
    }

    Ok(())
}

/// One `--exercise` argument of `routine add`
#[derive(Debug, PartialEq)]
struct ExerciseSpec {
    name: String,
    sets: u32,
    reps: u32,
    weight: f64,
    rest_seconds: u32,
    group: Option<String>,
}

fn parse_exercise_spec(spec: &str) -> Result<ExerciseSpec> {
    let invalid = || {
        Error::Other(format!(
            "Invalid exercise spec {:?}, expected NAME:SETSxREPS@WEIGHT/REST[+GROUP]",
            spec
        ))
    };

    let (name, plan) = spec.rsplit_once(':').ok_or_else(invalid)?;
    let (plan, group) = match plan.split_once('+') {
        Some((plan, group)) => (plan, Some(group.trim().to_string()).filter(|g| !g.is_empty())),
        None => (plan, None),
    };
    let (counts, load) = plan.split_once('@').ok_or_else(invalid)?;
    let (sets, reps) = counts.split_once('x').ok_or_else(invalid)?;
    let (weight, rest) = load.split_once('/').ok_or_else(invalid)?;

    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }

    Ok(ExerciseSpec {
        name: name.to_string(),
        sets: sets.trim().parse().map_err(|_| invalid())?,
        reps: reps.trim().parse().map_err(|_| invalid())?,
        weight: weight.trim().parse().map_err(|_| invalid())?,
        rest_seconds: rest.trim().parse().map_err(|_| invalid())?,
        group,
    })
}

fn cmd_routine(data_dir: &Path, command: RoutineCommand) -> Result<()> {
    let mut store = FileStore::new(data_dir);

    match command {
        RoutineCommand::Add { name, exercises } => {
            if find_routine(&store, &name)?.is_some() {
                return Err(Error::Other(format!("Routine {:?} already exists", name)));
            }

            let specs = exercises
                .iter()
                .map(|s| parse_exercise_spec(s))
                .collect::<Result<Vec<_>>>()?;

            let mut routine = Routine::new(name);
            for (position, spec) in specs.into_iter().enumerate() {
                let exercise = match find_exercise(&store, &spec.name)? {
                    Some(exercise) => exercise,
                    None => {
                        let exercise = Exercise::new(spec.name.clone(), Vec::new(), Equipment::default());
                        store.save_exercise(&exercise)?;
                        println!("  + created exercise {}", exercise.name);
                        exercise
                    }
                };

                let sets = (0..spec.sets)
                    .map(|order| ExerciseSet::new(order, spec.reps, spec.weight, spec.rest_seconds))
                    .collect();
                let mut planned = RoutineExercise::new(exercise.id, 0, sets);
                planned.superset_group = spec.group;
                planned.superset_order = position as u32;
                routine.push_exercise(planned);
            }

            store.save_routine(&routine)?;
            println!("✓ Added routine {} ({} exercises)", routine.name, routine.exercises.len());
        }
        RoutineCommand::List => {
            let routines = store.routines()?;
            if routines.is_empty() {
                println!("No routines yet.");
            }
            for routine in routines {
                println!("  {} ({} exercises)", routine.name, routine.exercises.len());
            }
        }
        RoutineCommand::Show { name } => {
            let routine = require_routine(&store, &name)?;
            let exercises = store.exercises()?;
            display_routine(&routine, &exercises);
        }
        RoutineCommand::Delete { name } => {
            let routine = require_routine(&store, &name)?;
            store.delete_routine(routine.id)?;
            println!("✓ Deleted routine {}", routine.name);
        }
    }

    Ok(())
}

fn display_routine(routine: &Routine, exercises: &[Exercise]) {
    println!("\n  {}", routine.name);
    for planned in routine.sorted_exercises() {
        let name = exercises
            .iter()
            .find(|e| e.id == planned.exercise_id)
            .map_or("Unknown exercise", |e| e.name.as_str());
        let group = planned
            .superset_group
            .as_deref()
            .map(|g| format!(" [superset {}]", g))
            .unwrap_or_default();
        println!("  {}. {}{}", planned.order + 1, name, group);
        for set in planned.sorted_sets() {
            println!(
                "     {} x {:.1} kg, rest {}s",
                set.reps, set.weight, set.rest_seconds
            );
        }
    }
    println!();
}

fn find_exercise(store: &FileStore, name: &str) -> Result<Option<Exercise>> {
    Ok(store
        .exercises()?
        .into_iter()
        .find(|e| e.name.eq_ignore_ascii_case(name)))
}

fn find_routine(store: &FileStore, name: &str) -> Result<Option<Routine>> {
    Ok(store
        .routines()?
        .into_iter()
        .find(|r| r.name.eq_ignore_ascii_case(name)))
}

fn require_routine(store: &FileStore, name: &str) -> Result<Routine> {
    find_routine(store, name)?.ok_or_else(|| Error::Other(format!("No routine named {:?}", name)))
}

// ============================================================================
// Live workout
// ============================================================================

struct StartOptions {
    auto_complete: bool,
    cancel_after: Option<usize>,
    suspend_after: Option<usize>,
    update_template: bool,
    notes: String,
}

/// Prints the events a terminal user cares about
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::RestStarted { seconds } => println!("  ⏱ Rest {}s", seconds),
            SessionEvent::RestFinished => println!("  ⏱ Rest over"),
            SessionEvent::WorkoutReadyToFinish => println!("\n✓ All sets done!"),
            SessionEvent::HealthSync(HealthSyncStatus::Failed(reason)) => {
                println!("  ! Health sync failed: {}", reason)
            }
            _ => {}
        }
    }
}

/// Countdown shown inline in the terminal
struct TerminalCountdown;

impl CountdownSurface for TerminalCountdown {
    fn start(&mut self, ends_at: chrono::DateTime<chrono::Utc>, label: &str) -> Result<()> {
        let local = ends_at.with_timezone(&chrono::Local);
        println!("  ⏱ Next up: {} at {}", label, local.format("%H:%M:%S"));
        Ok(())
    }

    fn end(&mut self, final_message: &str) -> Result<()> {
        tracing::debug!("Countdown ended: {}", final_message);
        Ok(())
    }
}

/// Announces the end-of-rest reminder the terminal would raise
struct TerminalReminder;

impl NotificationScheduler for TerminalReminder {
    fn schedule_one_shot(&mut self, after_seconds: u32, identifier: &str, body: &str) -> Result<()> {
        tracing::debug!("Scheduling reminder {} in {}s", identifier, after_seconds);
        println!("  🔔 Reminder in {}s: {}", after_seconds, body);
        Ok(())
    }

    fn cancel(&mut self, identifier: &str) -> Result<()> {
        tracing::debug!("Cancelled reminder {}", identifier);
        Ok(())
    }
}

enum SetAction {
    Done { reps: Option<u32>, weight: Option<f64> },
    Finish,
    Cancel,
}

fn cmd_start(data_dir: &Path, config: &Config, routine_name: &str, options: StartOptions) -> Result<()> {
    let mut services = Services::new(
        Box::new(FileStore::new(data_dir)),
        Box::new(FileAnchorStore::new(data_dir)),
    );
    if config.integrations.notifications {
        services = services.with_notifications(TerminalReminder);
    }
    if config.integrations.live_countdown {
        services = services.with_countdown(TerminalCountdown);
    }
    if config.integrations.health {
        tracing::warn!("Health integration is not available in the terminal");
    }

    let mut controller = SessionController::new(services, config.defaults.set_defaults());
    controller.add_observer(ConsoleObserver);

    if let Some(id) = controller.recover() {
        println!("Resuming workout in progress ({})", id);
    } else {
        let routine = find_routine(&FileStore::new(data_dir), routine_name)?
            .ok_or_else(|| Error::Other(format!("No routine named {:?}", routine_name)))?;
        controller.start(routine.id)?;
    }

    if let Some(session) = controller.session() {
        println!("\n╭─────────────────────────────────────────╮");
        println!("│  {}", session.routine_name);
        println!("╰─────────────────────────────────────────╯");
    }

    let mut completed_here = 0;
    while let Some(current) = controller.current_set() {
        let Some(line) = describe_set(&controller, current) else {
            break;
        };
        println!("\n  {}", line);

        let action = if options.auto_complete {
            SetAction::Done {
                reps: None,
                weight: None,
            }
        } else {
            prompt_set_action()?
        };

        match action {
            SetAction::Done { reps, weight } => {
                if reps.is_some() || weight.is_some() {
                    let planned = controller
                        .session()
                        .and_then(|s| s.resolve(current))
                        .map(|(_, set)| (set.actual_reps, set.actual_weight));
                    if let Some((planned_reps, planned_weight)) = planned {
                        controller.update_set(
                            current,
                            reps.unwrap_or(planned_reps),
                            weight.unwrap_or(planned_weight),
                        );
                    }
                }
                controller.complete_set(current);
                completed_here += 1;
            }
            SetAction::Finish => break,
            SetAction::Cancel => {
                controller.cancel();
                println!("\n✗ Workout cancelled");
                return Ok(());
            }
        }

        if options.cancel_after == Some(completed_here) {
            controller.cancel();
            println!("\n✗ Workout cancelled");
            return Ok(());
        }
        if options.suspend_after == Some(completed_here) {
            controller.suspend();
            println!("\n⏸ Workout left in progress");
            return Ok(());
        }

        if controller.rest_timer().is_active() {
            if !options.auto_complete {
                wait_for_enter("  Press Enter to skip the rest")?;
            }
            controller.skip_rest();
        }
    }

    let notes = options.notes;
    if !controller.has_session() {
        return Ok(());
    }
    let Some(session_id) = controller.complete_workout(options.update_template, &notes) else {
        return Err(Error::Persistence(
            "Failed to save the finished workout; it stays in progress".into(),
        ));
    };

    let finished = history::finished_sessions(controller.store())?;
    if let Some(session) = finished.iter().find(|s| s.id == session_id) {
        println!(
            "\n✓ Workout saved: {}/{} sets, volume {:.1}",
            session.completed_sets(),
            session.total_sets(),
            session.total_volume()
        );
        if options.update_template && session.routine_id.is_some() {
            println!("  Routine updated with today's numbers");
        }
    }

    Ok(())
}

fn describe_set(controller: &SessionController, current: SetRef) -> Option<String> {
    let session = controller.session()?;
    let (exercise, set) = session.resolve(current)?;
    let position = exercise.sorted_sets().iter().position(|s| s.id == set.id)? + 1;
    let superset = exercise
        .group_id()
        .map(|g| format!(" [superset {}]", g))
        .unwrap_or_default();

    Some(format!(
        "{}{} set {}/{}: {} x {:.1} kg",
        exercise.name,
        superset,
        position,
        exercise.sets.len(),
        set.actual_reps,
        set.actual_weight
    ))
}

fn prompt_set_action() -> Result<SetAction> {
    println!("─────────────────────────────────────────");
    println!("Press Enter when done");
    println!("  'REPS [WEIGHT]' + Enter to log different numbers");
    println!("  'f' + Enter to finish now");
    println!("  'c' + Enter to cancel the workout");
    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(SetAction::Finish);
    }

    let input = input.trim().to_lowercase();
    let action = match input.as_str() {
        "f" => SetAction::Finish,
        "c" => SetAction::Cancel,
        _ => {
            let mut parts = input.split_whitespace();
            SetAction::Done {
                reps: parts.next().and_then(|r| r.parse().ok()),
                weight: parts.next().and_then(|w| w.parse().ok()),
            }
        }
    };

    Ok(action)
}

fn wait_for_enter(message: &str) -> Result<()> {
    print!("{} ", message);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(())
}

// ============================================================================
// History
// ============================================================================

fn cmd_history(data_dir: &Path, config: &Config, limit: usize) -> Result<()> {
    let store = FileStore::new(data_dir);
    let sessions = history::finished_sessions(&store)?;

    if sessions.is_empty() {
        println!("No workouts yet.");
        return Ok(());
    }

    for session in sessions.iter().take(limit) {
        let minutes = session
            .end_time
            .map_or(0, |end| (end - session.start_time).num_minutes());
        println!(
            "\n{}  {}  ({} min, {}/{} sets, volume {:.1})",
            session.start_time.format("%Y-%m-%d %H:%M"),
            session.routine_name,
            minutes,
            session.completed_sets(),
            session.total_sets(),
            session.total_volume()
        );
        if !session.notes.is_empty() {
            println!("  \"{}\"", session.notes);
        }

        for comparison in history::compare_with_previous(session, &sessions, config.history.compare_window) {
            let current = &comparison.current;
            match &comparison.previous {
                Some(_) => println!(
                    "  {}: volume {:.1} ({:+.1}), top {:.1} ({:+.1}), {} sets ({:+})",
                    current.name,
                    current.volume,
                    comparison.volume_delta().unwrap_or_default(),
                    current.top_weight,
                    comparison.top_weight_delta().unwrap_or_default(),
                    current.completed_sets,
                    comparison.completed_sets_delta().unwrap_or_default()
                ),
                None => println!(
                    "  {}: volume {:.1}, top {:.1}, {} sets (first time)",
                    current.name, current.volume, current.top_weight, current.completed_sets
                ),
            }
        }
    }

    Ok(())
}

fn cmd_compact(data_dir: &Path) -> Result<()> {
    let store = FileStore::new(data_dir);
    if !store.log_path().exists() {
        println!("No session log found - nothing to compact.");
        return Ok(());
    }

    let kept = store.compact()?;
    println!("✓ Compacted session log to {} workouts", kept);
    Ok(())
}

fn cmd_export(data_dir: &Path, output: &Path) -> Result<()> {
    let store = FileStore::new(data_dir);
    let sessions = history::finished_sessions(&store)?;
    let rows = history::export_sets_csv(&sessions, output)?;

    println!("✓ Exported {} sets to {}", rows, output.display());
    Ok(())
}

// ============================================================================
// Watch
// ============================================================================

/// A watch link that is never reachable; guaranteed messages land in a file
struct OutboxChannel {
    path: PathBuf,
}

impl WatchChannel for OutboxChannel {
    fn is_reachable(&self) -> bool {
        false
    }

    fn send_fast(&mut self, _message: &WatchMessage) -> Result<()> {
        Err(Error::Channel("watch not reachable".into()))
    }

    fn send_guaranteed(&mut self, message: &WatchMessage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(message)?)?;
        Ok(())
    }

    fn drain_incoming(&mut self) -> Vec<WatchMessage> {
        Vec::new()
    }
}

fn cmd_watch(data_dir: &Path, config: &Config, command: WatchCommand) -> Result<()> {
    let services = Services::new(
        Box::new(FileStore::new(data_dir)),
        Box::new(FileAnchorStore::new(data_dir)),
    );
    let mut controller = SessionController::new(services, config.defaults.set_defaults());

    match command {
        WatchCommand::Snapshot { output } => {
            let mut channel = OutboxChannel { path: output };
            let delivery = controller.sync_watch(&mut channel)?;
            println!(
                "✓ Snapshot queued ({:?} delivery) at {}",
                delivery,
                channel.path.display()
            );
        }
        WatchCommand::Import {
            path,
            update_template,
        } => {
            let contents = std::fs::read_to_string(&path)?;
            let mut record = match serde_json::from_str::<WatchMessage>(&contents) {
                Ok(WatchMessage::CompletedWorkout { record }) => record,
                Ok(WatchMessage::Snapshot { .. }) => {
                    return Err(Error::Other(format!("{} holds a snapshot, not a workout", path.display())));
                }
                Err(_) => serde_json::from_str::<CompletedWorkoutRecord>(&contents)?,
            };
            record.update_template |= update_template;

            let id = controller.import_watch_workout(&record)?;
            println!("✓ Imported watch workout {} ({})", record.routine_name, id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exercise_spec() {
        let spec = parse_exercise_spec("Bench Press:3x10@45.5/90+a").unwrap();
        assert_eq!(
            spec,
            ExerciseSpec {
                name: "Bench Press".into(),
                sets: 3,
                reps: 10,
                weight: 45.5,
                rest_seconds: 90,
                group: Some("a".into()),
            }
        );

        let standalone = parse_exercise_spec("Pull-up:4x8@0/60").unwrap();
        assert_eq!(standalone.group, None);
    }

    #[test]
    fn test_parse_exercise_spec_rejects_garbage() {
        assert!(parse_exercise_spec("Bench").is_err());
        assert!(parse_exercise_spec(":3x10@45/90").is_err());
        assert!(parse_exercise_spec("Bench:3x@45/90").is_err());
        assert!(parse_exercise_spec("Bench:3x10@heavy/90").is_err());
    }
}
