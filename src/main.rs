//! FlowRunner CLI Entry Point
//!
//! Drives the engine against a state file, one command per invocation.
//!
//! # Usage
//!
//! ```bash
//! # Deploy (create + activate) a workflow
//! flowrunner deploy expense.json
//!
//! # Start an instance
//! flowrunner start <WORKFLOW_ID> --input '{"amount": 1200, "initiator": "alice"}'
//!
//! # Work on tasks
//! flowrunner tasks
//! flowrunner claim <TASK_ID> --user bob --group managers
//! flowrunner complete <TASK_ID> --user bob --result rejected --comment "missing receipt"
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;
use uuid::Uuid;

use flowrunner::definition::{load_definition, parser::to_json};
use flowrunner::{
    Actor, Completion, Engine, EngineConfig, LogNotifier, MemoryStore, Repositories, Snapshot,
    Task, TaskResult, TaskService, WorkflowService, APP_NAME, VERSION,
};

/// Default state file used when none is specified.
const DEFAULT_STATE_FILE: &str = ".flowrunner/state.json";

/// Default result for `complete`.
const DEFAULT_RESULT: TaskResult = TaskResult::Approved;

#[derive(Debug, PartialEq)]
enum Command {
    Deploy { path: PathBuf },
    Start { workflow_id: Uuid, input: Value },
    Tasks { instance_id: Option<Uuid> },
    Claim { task_id: Uuid, actor: Actor },
    Complete { task_id: Uuid, actor: Actor, completion: Completion },
    Retry { task_id: Uuid },
    Show { instance_id: Uuid },
}

impl Command {
    fn is_read_only(&self) -> bool {
        matches!(self, Self::Tasks { .. } | Self::Show { .. })
    }
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    state_path: PathBuf,
    config_path: Option<PathBuf>,
    verbose: bool,
}

/// Options shared by all commands, collected before the command is built.
#[derive(Debug, Default)]
struct RawArgs {
    positional: Vec<String>,
    state_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    verbose: bool,
    input: Option<String>,
    user: Option<String>,
    groups: Vec<String>,
    result: Option<String>,
    comment: Option<String>,
    output: Option<String>,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("Commands:");
    println!("  deploy <DEFINITION_FILE>        Create and activate a workflow (JSON or YAML)");
    println!("  start <WORKFLOW_ID>             Start an instance (--input JSON)");
    println!("  tasks [INSTANCE_ID]             List open tasks");
    println!("  claim <TASK_ID>                 Claim a task (--user, --group)");
    println!("  complete <TASK_ID>              Complete a task (--user, --result, --comment, --output)");
    println!("  retry <TASK_ID>                 Retry a stalled task's progression");
    println!("  show <INSTANCE_ID>              Show an instance and its tasks");
    println!();
    println!("Options:");
    println!("  --state PATH        State file (default: {})", DEFAULT_STATE_FILE);
    println!("  --config PATH       Engine config file (JSON or YAML)");
    println!("  --input JSON        Instance input for 'start'");
    println!("  --user NAME         Acting user");
    println!("  --group NAME        Group of the acting user (repeatable)");
    println!("  --result RESULT     approved | rejected | completed (default: {})", DEFAULT_RESULT);
    println!("  --comment TEXT      Completion comment");
    println!("  --output JSON       Completion output");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
}

fn parse_id(value: Option<&String>, what: &str) -> Result<Uuid, String> {
    let value = value.ok_or_else(|| format!("missing {}", what))?;
    Uuid::parse_str(value).map_err(|_| format!("Invalid {}: {}", what, value))
}

fn parse_json(value: Option<String>, what: &str) -> Result<Value, String> {
    match value {
        Some(text) => serde_json::from_str(&text).map_err(|e| format!("Invalid {}: {}", what, e)),
        None => Ok(Value::Null),
    }
}

impl RawArgs {
    fn actor(&mut self) -> Result<Actor, String> {
        let user = self.user.take().ok_or("--user is required")?;
        Ok(Actor {
            user,
            groups: std::mem::take(&mut self.groups),
        })
    }
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut raw = RawArgs::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        let mut value = |name: &str| -> Result<String, String> {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{} requires an argument", name))
        };

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => raw.verbose = true,
            "--state" => raw.state_path = Some(PathBuf::from(value("--state")?)),
            "--config" => raw.config_path = Some(PathBuf::from(value("--config")?)),
            "--input" => raw.input = Some(value("--input")?),
            "--user" => raw.user = Some(value("--user")?),
            "--group" => raw.groups.push(value("--group")?),
            "--result" => raw.result = Some(value("--result")?),
            "--comment" => raw.comment = Some(value("--comment")?),
            "--output" => raw.output = Some(value("--output")?),
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => raw.positional.push(arg.clone()),
        }
        i += 1;
    }

    let name = raw.positional.first().cloned().ok_or("missing command")?;
    let first = raw.positional.get(1);
    let command = match name.as_str() {
        "deploy" => Command::Deploy {
            path: PathBuf::from(first.ok_or("missing definition file")?),
        },
        "start" => Command::Start {
            workflow_id: parse_id(first, "workflow id")?,
            input: parse_json(raw.input.take(), "--input")?,
        },
        "tasks" => Command::Tasks {
            instance_id: first.map(|id| parse_id(Some(id), "instance id")).transpose()?,
        },
        "claim" => Command::Claim {
            task_id: parse_id(first, "task id")?,
            actor: raw.actor()?,
        },
        "complete" => {
            let task_id = parse_id(first, "task id")?;
            let result = match raw.result.take() {
                Some(text) => text.parse()?,
                None => DEFAULT_RESULT,
            };
            Command::Complete {
                task_id,
                actor: raw.actor()?,
                completion: Completion {
                    result,
                    output: parse_json(raw.output.take(), "--output")?,
                    comment: raw.comment.take(),
                },
            }
        }
        "retry" => Command::Retry {
            task_id: parse_id(first, "task id")?,
        },
        "show" => Command::Show {
            instance_id: parse_id(first, "instance id")?,
        },
        other => return Err(format!("Unknown command: {}", other)),
    };

    if raw.positional.len() > 2 {
        return Err(format!("Unexpected argument: {}", raw.positional[2]));
    }

    Ok(Config {
        command,
        state_path: raw
            .state_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
        config_path: raw.config_path,
        verbose: raw.verbose,
    })
}

fn print_task(task: &Task) {
    println!(
        "{}  {:<24} {:<9} {:<7} {}",
        task.id,
        task.task_key,
        task.status.to_string(),
        task.priority.to_string(),
        task.assignee.as_deref().unwrap_or("-")
    );
}

fn execute(
    command: Command,
    workflows: &WorkflowService,
    tasks: &TaskService,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Deploy { path } => {
            let definition = load_definition(&path)?;
            let workflow =
                workflows.create(&definition.name, &definition.description, &to_json(&definition)?)?;
            let workflow = workflows.activate(workflow.id)?;
            println!("{}", workflow.id);
        }
        Command::Start { workflow_id, input } => {
            let instance = workflows.start_instance(workflow_id, input)?;
            println!("{}", instance.id);
            for task in tasks.open_tasks(instance.id)? {
                print_task(&task);
            }
        }
        Command::Tasks { instance_id } => {
            let instance_ids = match instance_id {
                Some(id) => vec![id],
                None => {
                    let mut ids = Vec::new();
                    for workflow in workflows.list()? {
                        ids.extend(workflows.instances(workflow.id)?.into_iter().map(|i| i.id));
                    }
                    ids
                }
            };
            for id in instance_ids {
                for task in tasks.open_tasks(id)? {
                    print_task(&task);
                }
            }
        }
        Command::Claim { task_id, actor } => {
            print_task(&tasks.claim(task_id, &actor)?);
        }
        Command::Complete {
            task_id,
            actor,
            completion,
        } => {
            let task = tasks.complete(task_id, &actor, completion)?;
            if task.progression.is_stalled() {
                warn!("Instance {} did not advance; see 'retry'", task.instance_id);
            }
            for next in tasks.open_tasks(task.instance_id)? {
                print_task(&next);
            }
        }
        Command::Retry { task_id } => {
            let task = tasks.retry_progression(task_id)?;
            info!("Task {} progression: advanced", task.id);
        }
        Command::Show { instance_id } => {
            let instance = workflows.get_instance(instance_id)?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
            for task in tasks.open_tasks(instance_id)? {
                print_task(&task);
            }
            for task in tasks.stalled(instance_id)? {
                warn!("Task {} ({}) is stalled: {:?}", task.id, task.task_key, task.progression);
            }
        }
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    let engine_config = match &config.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = Arc::new(MemoryStore::from_snapshot(Snapshot::load_or_default(
        &config.state_path,
    )?));
    let engine = Arc::new(Engine::new(
        Repositories::from_store(store.clone()),
        Arc::new(LogNotifier),
        engine_config,
    ));
    let workflows = WorkflowService::new(engine.clone());
    let tasks = TaskService::new(engine);

    let read_only = config.command.is_read_only();
    let outcome = execute(config.command, &workflows, &tasks);

    // Saved on failure too: a failed start records a failed instance
    if !read_only {
        store.snapshot().save(&config.state_path)?;
    }
    outcome
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        std::iter::once("flowrunner")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_complete() {
        let id = Uuid::new_v4();
        let config = parse_arguments(&args(&format!(
            "complete {} --user bob --group managers --result reject --comment late --output {{\"n\":1}}",
            id
        )))
        .unwrap();

        assert_eq!(config.state_path, PathBuf::from(DEFAULT_STATE_FILE));
        match config.command {
            Command::Complete {
                task_id,
                actor,
                completion,
            } => {
                assert_eq!(task_id, id);
                assert_eq!(actor.user, "bob");
                assert_eq!(actor.groups, vec!["managers"]);
                assert_eq!(completion.result, TaskResult::Rejected);
                assert_eq!(completion.comment.as_deref(), Some("late"));
                assert_eq!(completion.output["n"], 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_tasks_and_state() {
        let config = parse_arguments(&args("--state /tmp/s.json tasks --verbose")).unwrap();
        assert_eq!(config.command, Command::Tasks { instance_id: None });
        assert_eq!(config.state_path, PathBuf::from("/tmp/s.json"));
        assert!(config.verbose);
        assert!(config.command.is_read_only());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args("")).is_err());
        assert!(parse_arguments(&args("launch")).is_err());
        assert!(parse_arguments(&args("start not-a-uuid")).is_err());
        assert!(parse_arguments(&args("claim 00000000-0000-0000-0000-000000000000")).is_err());
        assert!(parse_arguments(&args("tasks --state")).is_err());
        assert!(parse_arguments(&args("--dry-run tasks")).is_err());
    }
}
