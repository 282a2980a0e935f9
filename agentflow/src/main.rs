//! LLM agent workflow orchestrator.
//!
//! Drives a declarative state machine (`*.workflow.json`) one transition at a
//! time. Each transition delegates to an agent command; sessions are stored
//! under `.agentflow/sessions/` so runs can resume.

use std::path::{Path, PathBuf};

use agentflow::controller::{PipelineStop, TransitionRejection};
use agentflow::core::fsm;
use agentflow::core::normalize::safe_serialize;
use agentflow::exit_codes;
use agentflow::io::config::{Settings, init_settings, load_settings};
use agentflow::io::workflow_loader::WorkflowLoader;
use agentflow::logging;
use agentflow::session::{
    DEFAULT_MAX_STEPS, load_session, load_workflow, open_controller, starting_data, summarize,
};
use agentflow::validate::validate_workflow;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agentflow",
    version,
    about = "Finite-state orchestrator for LLM agent workflows"
)]
struct Cli {
    /// Runner settings file.
    #[arg(long, global = true, default_value = ".agentflow/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write default settings to the `--config` path if missing.
    Init {
        /// Overwrite an existing settings file.
        #[arg(short, long)]
        force: bool,
    },
    /// Check a workflow against the schema and invariants, and load its agent profiles.
    Validate {
        /// Workflow name (looked up in `workflows_dir`) or path.
        workflow: String,
    },
    /// List states and their outgoing transitions.
    States { workflow: String },
    /// Attempt one transition from the session's current state.
    Transition {
        workflow: String,
        /// Target state.
        to_state: String,
        #[arg(long)]
        session: String,
        /// JSON object to use as state data (defaults to the stored data, then `input_file`).
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Follow single outgoing transitions until a terminal state, a branch, or a failure.
    Run {
        workflow: String,
        #[arg(long)]
        session: String,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
        max_steps: usize,
    },
    /// Print the stored session.
    Status {
        #[arg(long)]
        session: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let command = match cli.command {
        Command::Init { force } => return cmd_init(&cli.config, force),
        command => command,
    };
    let settings = load_settings(&cli.config)
        .with_context(|| format!("load settings {}", cli.config.display()))?;
    match command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Validate { workflow } => cmd_validate(&settings, &workflow),
        Command::States { workflow } => cmd_states(&settings, &workflow),
        Command::Transition {
            workflow,
            to_state,
            session,
            data,
        } => cmd_transition(&settings, &workflow, &to_state, &session, data.as_deref()),
        Command::Run {
            workflow,
            session,
            data,
            max_steps,
        } => cmd_run(&settings, &workflow, &session, data.as_deref(), max_steps),
        Command::Status { session } => cmd_status(&settings, &session),
    }
}

fn cmd_init(config: &Path, force: bool) -> Result<i32> {
    if init_settings(config, force)? {
        eprintln!("wrote {}", config.display());
    } else {
        eprintln!("{} already exists (use --force to overwrite)", config.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(settings: &Settings, workflow: &str) -> Result<i32> {
    let summary = validate_workflow(&WorkflowLoader::new(&settings.workflows_dir), workflow)?;
    println!("ok: {} ({})", summary.name, summary.path.display());
    println!("initial: {}", summary.initial_state);
    println!("states: {}", summary.states.join(", "));
    println!("terminal: {}", summary.terminal_states.join(", "));
    println!("agents: {}", summary.agents.join(", "));
    println!("transitions: {}", summary.transitions);
    Ok(exit_codes::OK)
}

fn cmd_states(settings: &Settings, workflow: &str) -> Result<i32> {
    let loaded = load_workflow(settings, workflow)?;
    let config = &loaded.config;
    for state in fsm::states(config) {
        let marker = if state == config.initial_state { "*" } else { " " };
        let edges = fsm::outgoing(config, state);
        if edges.is_empty() {
            println!("{marker} {state} (terminal)");
            continue;
        }
        println!("{marker} {state}");
        for edge in edges {
            println!("    -> {} via {}", edge.to_state, edge.agent_id);
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_transition(
    settings: &Settings,
    workflow: &str,
    to_state: &str,
    session_id: &str,
    data: Option<&Path>,
) -> Result<i32> {
    let loaded = load_workflow(settings, workflow)?;
    let mut controller = open_controller(settings, &loaded, session_id)?;
    let data = starting_data(&controller, &loaded, data)?;
    match controller.transition(to_state, data) {
        Ok(report) => {
            eprintln!(
                "{} -> {} via {} ({})",
                report.from,
                report.to,
                report.agent_id,
                report.status.as_str()
            );
            println!("{}", safe_serialize(&report.state_data));
            Ok(exit_codes::OK)
        }
        Err(rejection) => Ok(report_rejection(&rejection)),
    }
}

fn cmd_run(
    settings: &Settings,
    workflow: &str,
    session_id: &str,
    data: Option<&Path>,
    max_steps: usize,
) -> Result<i32> {
    let loaded = load_workflow(settings, workflow)?;
    let mut controller = open_controller(settings, &loaded, session_id)?;
    let data = starting_data(&controller, &loaded, data)?;
    let outcome = controller.run_pipeline(data, max_steps);
    for state in &outcome.visited {
        eprintln!("entered {state}");
    }
    let code = match &outcome.stop {
        PipelineStop::Terminal => {
            eprintln!("reached terminal state {}", controller.current_state());
            exit_codes::OK
        }
        PipelineStop::FanOut(targets) => {
            eprintln!(
                "state {} branches to {}; pick one with `agentflow transition`",
                controller.current_state(),
                targets.join(", ")
            );
            exit_codes::OK
        }
        PipelineStop::Rejected(rejection) => report_rejection(rejection),
        PipelineStop::StepLimit => {
            eprintln!("stopped after {max_steps} steps in {}", controller.current_state());
            exit_codes::REJECTED
        }
    };
    println!("{}", safe_serialize(&controller.state_data()));
    Ok(code)
}

fn cmd_status(settings: &Settings, session_id: &str) -> Result<i32> {
    match load_session(settings, session_id)? {
        Some(session) => {
            eprintln!("{}", summarize(&session));
            println!("{}", safe_serialize(&session));
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("no session '{session_id}' in {}", settings.sessions_dir.display());
            Ok(exit_codes::INVALID)
        }
    }
}

fn report_rejection(rejection: &TransitionRejection) -> i32 {
    eprintln!("rejected: {rejection}");
    match rejection {
        TransitionRejection::Commit(_) | TransitionRejection::Invoke(_) => exit_codes::INVALID,
        _ => exit_codes::REJECTED,
    }
}
