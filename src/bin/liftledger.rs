//! liftledger command-line tool
//!
//! Runs single requests against a persistent ledger directory.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use liftledger::{
    open_ledger, LedgerError, LedgerResult, PersistentWorkoutStore, UserId, ValidationError,
    WorkoutDraft, WorkoutEngine, WorkoutId,
};

const USAGE: &str = "\
liftledger - workout ledger

USAGE:
    liftledger --data-dir <DIR> --owner <UUID> <COMMAND>

COMMANDS:
    save                 Read a workout draft (JSON) from stdin and save it
    load <WORKOUT_ID>    Print a workout
    delete <WORKOUT_ID>  Soft delete a workout
    list                 List the owner's workouts
    add-exercise <NAME>  Create a user-defined exercise
    list-exercises       List the owner's user-defined exercises
    compact              Fold the WAL into the snapshot

ENVIRONMENT:
    LIFTLEDGER_LOG       Log filter [default: info]";

#[derive(Debug)]
enum Command {
    Save,
    Load(WorkoutId),
    Delete(WorkoutId),
    List,
    AddExercise(String),
    ListExercises,
    Compact,
}

#[derive(Debug)]
struct Args {
    data_dir: PathBuf,
    owner: UserId,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut data_dir = None;
    let mut owner = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                let value = args.get(i + 1).ok_or("--data-dir requires a value")?;
                data_dir = Some(PathBuf::from(value));
                i += 2;
            }
            "--owner" | "-o" => {
                let value = args.get(i + 1).ok_or("--owner requires a value")?;
                owner = Some(
                    value
                        .parse::<UserId>()
                        .map_err(|e| format!("invalid owner id '{value}': {e}"))?,
                );
                i += 2;
            }
            other => {
                rest.push(other.to_string());
                i += 1;
            }
        }
    }

    let workout_id = |value: Option<&String>| -> Result<WorkoutId, String> {
        let value = value.ok_or("missing workout id")?;
        value
            .parse()
            .map_err(|e| format!("invalid workout id '{value}': {e}"))
    };

    let command = match rest.first().map(String::as_str) {
        Some("save") => Command::Save,
        Some("load") => Command::Load(workout_id(rest.get(1))?),
        Some("delete") => Command::Delete(workout_id(rest.get(1))?),
        Some("list") => Command::List,
        Some("add-exercise") => {
            Command::AddExercise(rest.get(1..).map(|words| words.join(" ")).unwrap_or_default())
        }
        Some("list-exercises") => Command::ListExercises,
        Some("compact") => Command::Compact,
        Some(other) => return Err(format!("unknown command '{other}'")),
        None => return Err("missing command".to_string()),
    };

    Ok(Args {
        data_dir: data_dir.ok_or("--data-dir is required")?,
        owner: owner.ok_or("--owner is required")?,
        command,
    })
}

fn print_json<T: Serialize>(value: &T) -> LedgerResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| LedgerError::internal(format!("failed to encode output: {e}")))?;
    println!("{json}");
    Ok(())
}

/// A draft that does not parse is rejected like any other invalid field.
fn parse_draft(input: &str) -> LedgerResult<WorkoutDraft> {
    serde_json::from_str(input).map_err(|e| {
        ValidationError::InvalidField {
            field: "draft".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn run(args: Args) -> LedgerResult<()> {
    let store: Arc<PersistentWorkoutStore> = Arc::new(open_ledger(&args.data_dir, None)?);
    let engine = WorkoutEngine::with_store(store.clone());

    match args.command {
        Command::Save => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| LedgerError::internal(format!("failed to read stdin: {e}")))?;
            let draft = parse_draft(&input)?;
            print_json(&engine.reconcile_and_save(args.owner, &draft)?)
        }
        Command::Load(id) => print_json(&engine.load_workout(args.owner, id)?),
        Command::Delete(id) => {
            engine.soft_delete_workout(args.owner, id)?;
            println!("deleted {id}");
            Ok(())
        }
        Command::List => print_json(&engine.list_workouts(args.owner)?),
        Command::AddExercise(name) => print_json(&engine.create_user_exercise(args.owner, &name)?),
        Command::ListExercises => print_json(&engine.list_user_exercises(args.owner)?),
        Command::Compact => {
            let result = store.compact()?;
            println!(
                "compacted {} rows into {} (WAL {} -> {} bytes)",
                result.rows_compacted,
                result.snapshot_path.display(),
                result.wal_size_before,
                result.wal_size_after
            );
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("LIFTLEDGER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            tracing::debug!(status = e.status_code(), "request failed");
            ExitCode::FAILURE
        }
    }
}
