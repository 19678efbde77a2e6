// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `voltaic`: the developer CLI.
//!
//! Every non-streaming command writes exactly one top-level JSON object to
//! stdout - `{ok, command, data?, error?, error_code?}` - and exits 0 iff
//! `ok`. Logs go to stderr so stdout stays machine-parseable. Streaming
//! debug commands emit line-delimited `{event, timestamp, ...}` objects
//! instead, ending with `end` (success) or `error` (failure).

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use voltaic_rewrite::{RetimingApplicationOptions, RetimingObjective, RetimingObjectiveKind};
use voltaic_service::{
    emit_poll_stream, emit_process_logs, emit_websocket_stream, ErrorCode, EventSink,
    ServiceError, SessionService, StreamEvent,
};

/// Reported in the init-workspace payload; bumped with the CLI surface.
const SURFACE_VERSION: &str = "0.1";

#[derive(Parser)]
#[command(name = "voltaic", version, about = "Voltaic circuit design sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create (or validate) a workspace directory.
    InitWorkspace {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
    },
    /// Import a circuit file into a new session.
    CreateSession {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Circuit file to import.
        #[arg(long)]
        circuit_file: PathBuf,
    },
    /// List sessions (corrupt ones reported separately).
    ListSessions {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
    },
    /// Run simulation ticks on a session's current branch.
    RunTicks {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Number of ticks to run.
        #[arg(long)]
        ticks: u64,
    },
    /// Report a session's persisted state.
    GetState {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
    },
    /// Export a board's netlist.
    ExportNetlist {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Board index (defaults to 0).
        #[arg(long, default_value_t = 0)]
        pcb_id: usize,
    },
    /// Destroy a session.
    DestroySession {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
    },
    /// Branch operations.
    Branch {
        #[command(subcommand)]
        command: BranchCommand,
    },
    /// Transformation engine operations.
    Transform {
        #[command(subcommand)]
        command: TransformCommand,
    },
    /// Retiming engine operations.
    Retime {
        #[command(subcommand)]
        command: RetimeCommand,
    },
    /// Global pipelining operations.
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },
    /// Streaming debug endpoints.
    Debug {
        #[command(subcommand)]
        command: DebugCommand,
    },
    /// Run the line-delimited JSON daemon on stdin/stdout.
    Daemon,
}

#[derive(Subcommand)]
enum BranchCommand {
    /// List branches.
    List {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
    },
    /// Create a branch.
    Create {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// New branch name.
        #[arg(long)]
        name: String,
        /// Source branch (defaults to the current one).
        #[arg(long)]
        from_branch: Option<String>,
        /// Fork revision; -1 means the source's head.
        #[arg(long, default_value_t = -1)]
        from_revision: i64,
    },
    /// Switch the active branch.
    Switch {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch to activate.
        #[arg(long)]
        name: String,
    },
    /// Delete a branch.
    Delete {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch to delete.
        #[arg(long)]
        name: String,
    },
    /// Merge one branch into another.
    Merge {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Source branch.
        #[arg(long)]
        source: String,
        /// Target branch.
        #[arg(long)]
        target: String,
        /// Let the rewrite engine resolve conflicts (pass `false` to get a
        /// conflict error instead).
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        allow_merge: bool,
    },
}

#[derive(Subcommand)]
enum TransformCommand {
    /// Discover rewrite opportunities.
    Propose {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Scope to one declared block.
        #[arg(long)]
        block: Option<String>,
        /// Plan cap.
        #[arg(long, default_value_t = 8)]
        max_plans: usize,
    },
    /// Apply a proposed plan by id.
    Apply {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Plan id from a propose run.
        #[arg(long)]
        plan_id: String,
    },
    /// Verify a proposed plan preserves behavior.
    Verify {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Plan id from a propose run.
        #[arg(long)]
        plan_id: String,
    },
}

#[derive(Subcommand)]
enum RetimeCommand {
    /// Propose retiming plans.
    Propose {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Target block (defaults to the whole circuit).
        #[arg(long)]
        target: Option<String>,
        /// Objective: minimize-max-depth | minimize-depth-with-budget | balance-stages.
        #[arg(long, default_value = "minimize-max-depth")]
        objective: String,
        /// Cap on moves per plan; -1 means no limit.
        #[arg(long, default_value_t = -1)]
        max_moves: i64,
    },
    /// Evaluate and rank retiming plans.
    Evaluate {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Target block (defaults to the whole circuit).
        #[arg(long)]
        target: Option<String>,
        /// Objective: minimize-max-depth | minimize-depth-with-budget | balance-stages.
        #[arg(long, default_value = "minimize-max-depth")]
        objective: String,
    },
    /// Apply a retiming plan by id.
    Apply {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Target block (defaults to the whole circuit).
        #[arg(long)]
        target: Option<String>,
        /// Plan id from a propose run.
        #[arg(long)]
        plan_id: String,
        /// Objective the plan was proposed under; must match the propose
        /// invocation for the plan id to resolve.
        #[arg(long, default_value = "minimize-max-depth")]
        objective: String,
        /// The propose invocation's `--max-moves`, when one was given.
        #[arg(long, default_value_t = -1)]
        objective_max_moves: i64,
        /// Apply only safe moves (pass `false` to widen).
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        apply_only_safe: bool,
        /// Also apply suspicious moves.
        #[arg(long)]
        allow_suspicious: bool,
        /// Cap on applied moves; -1 means no limit.
        #[arg(long, default_value_t = -1)]
        max_moves: i64,
    },
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Propose global pipelining plans for a subsystem.
    Propose {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Subsystem id.
        #[arg(long)]
        subsystem: String,
    },
    /// Apply a global pipelining plan by id.
    Apply {
        /// Workspace directory.
        #[arg(long)]
        workspace: PathBuf,
        /// Target session.
        #[arg(long)]
        session_id: i64,
        /// Branch (defaults to the current one).
        #[arg(long)]
        branch: Option<String>,
        /// Subsystem id.
        #[arg(long)]
        subsystem: String,
        /// Plan id from a propose run.
        #[arg(long)]
        plan_id: String,
    },
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Process-scoped streams.
    Process {
        #[command(subcommand)]
        command: ProcessStream,
    },
    /// Websocket frame streams.
    Websocket {
        #[command(subcommand)]
        command: SocketStream,
    },
    /// Poll streams.
    Poll {
        #[command(subcommand)]
        command: SocketStream,
    },
}

#[derive(Subcommand)]
enum ProcessStream {
    /// Stream a process's logs.
    Logs {
        /// Process id.
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum SocketStream {
    /// Stream frames/polls for a stream id.
    Stream {
        /// Stream id.
        #[arg(long)]
        id: String,
    },
}

/// Sink that writes one JSON line per event to stdout.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&mut self, event: &StreamEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
        }
    }
}

fn parse_objective(name: &str, max_moves: i64) -> Result<RetimingObjective, ServiceError> {
    let kind = match name {
        "minimize-max-depth" => RetimingObjectiveKind::MinimizeMaxDepth,
        "minimize-depth-with-budget" => RetimingObjectiveKind::MinimizeDepthWithBudget,
        "balance-stages" => RetimingObjectiveKind::BalanceStages,
        other => {
            return Err(ServiceError::new(
                ErrorCode::CommandParseError,
                format!("unknown objective: {other}"),
            ))
        }
    };
    Ok(RetimingObjective {
        kind,
        max_moves,
        ..RetimingObjective::default()
    })
}

fn default_global_objective() -> voltaic_rewrite::GlobalPipeliningObjective {
    voltaic_rewrite::GlobalPipeliningObjective {
        kind: voltaic_rewrite::GlobalPipeliningStrategyKind::ReduceCriticalPath,
        target_stage_count: -1,
        target_max_depth: -1,
        max_extra_registers: -1,
        max_total_moves: -1,
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::new(ErrorCode::InternalError, e.to_string()))
}

/// Executes one non-streaming command; returns its wire name and payload.
fn execute(command: Command) -> (String, Result<Value, ServiceError>) {
    match command {
        Command::InitWorkspace { workspace } => (
            "init-workspace".into(),
            SessionService::init_workspace(&workspace).and_then(|outcome| {
                to_value(&json!({
                    "workspace": workspace.display().to_string(),
                    "created": outcome.created,
                    "version": SURFACE_VERSION,
                    "next_session_id": outcome.metadata.next_session_id,
                }))
            }),
        ),
        Command::CreateSession {
            workspace,
            circuit_file,
        } => (
            "create-session".into(),
            SessionService::new(&workspace)
                .create_session(&circuit_file)
                .and_then(|metadata| {
                    to_value(&json!({
                        "session_id": metadata.session_id,
                        "circuit_file": metadata.circuit_file,
                        "current_branch": metadata.current_branch,
                        "created_at": metadata.created_at,
                    }))
                }),
        ),
        Command::ListSessions { workspace } => (
            "list-sessions".into(),
            SessionService::new(&workspace).list_sessions().and_then(|list| {
                to_value(&json!({
                    "sessions": list.sessions,
                    "corrupt_sessions": list.corrupt_sessions,
                }))
            }),
        ),
        Command::RunTicks {
            workspace,
            session_id,
            ticks,
        } => (
            "run-ticks".into(),
            SessionService::new(&workspace)
                .run_ticks(session_id, ticks)
                .and_then(|r| to_value(&r)),
        ),
        Command::GetState {
            workspace,
            session_id,
        } => (
            "get-state".into(),
            SessionService::new(&workspace)
                .get_state(session_id)
                .and_then(|r| to_value(&r)),
        ),
        Command::ExportNetlist {
            workspace,
            session_id,
            pcb_id,
        } => (
            "export-netlist".into(),
            SessionService::new(&workspace)
                .export_netlist(session_id, pcb_id)
                .and_then(|r| to_value(&r)),
        ),
        Command::DestroySession {
            workspace,
            session_id,
        } => (
            "destroy-session".into(),
            SessionService::new(&workspace)
                .destroy_session(session_id)
                .and_then(|()| to_value(&json!({ "session_id": session_id, "destroyed": true }))),
        ),
        Command::Branch { command } => execute_branch(command),
        Command::Transform { command } => execute_transform(command),
        Command::Retime { command } => execute_retime(command),
        Command::Pipeline { command } => execute_pipeline(command),
        // Streaming and daemon are handled before execute().
        Command::Debug { .. } | Command::Daemon => (
            "debug".into(),
            Err(ServiceError::new(
                ErrorCode::InternalError,
                "streaming command routed into the envelope path",
            )),
        ),
    }
}

fn execute_branch(command: BranchCommand) -> (String, Result<Value, ServiceError>) {
    match command {
        BranchCommand::List {
            workspace,
            session_id,
        } => (
            "branch-list".into(),
            SessionService::new(&workspace)
                .list_branches(session_id)
                .and_then(|r| {
                    to_value(&json!({
                        "session_id": r.session_id,
                        "current_branch": r.current_branch,
                        "branches": r.branches,
                    }))
                }),
        ),
        BranchCommand::Create {
            workspace,
            session_id,
            name,
            from_branch,
            from_revision,
        } => (
            "branch-create".into(),
            SessionService::new(&workspace)
                .create_branch(session_id, &name, from_branch.as_deref(), from_revision)
                .and_then(|r| {
                    to_value(&json!({
                        "session_id": r.session_id,
                        "branch": r.branch,
                    }))
                }),
        ),
        BranchCommand::Switch {
            workspace,
            session_id,
            name,
        } => (
            "branch-switch".into(),
            SessionService::new(&workspace)
                .switch_branch(session_id, &name)
                .and_then(|r| {
                    to_value(&json!({
                        "session_id": r.session_id,
                        "current_branch": r.current_branch,
                    }))
                }),
        ),
        BranchCommand::Delete {
            workspace,
            session_id,
            name,
        } => (
            "branch-delete".into(),
            SessionService::new(&workspace)
                .delete_branch(session_id, &name)
                .and_then(|r| {
                    to_value(&json!({
                        "session_id": r.session_id,
                        "deleted_branch": r.deleted_branch,
                    }))
                }),
        ),
        BranchCommand::Merge {
            workspace,
            session_id,
            source,
            target,
            allow_merge,
        } => (
            "branch-merge".into(),
            SessionService::new(&workspace)
                .merge_branches(session_id, &source, &target, allow_merge)
                .and_then(|r| to_value(&r)),
        ),
    }
}

fn execute_transform(command: TransformCommand) -> (String, Result<Value, ServiceError>) {
    match command {
        TransformCommand::Propose {
            workspace,
            session_id,
            branch,
            block,
            max_plans,
        } => (
            "transform-propose".into(),
            SessionService::new(&workspace)
                .propose_transformations(session_id, branch.as_deref(), block.as_deref(), max_plans)
                .and_then(|plans| to_value(&json!({ "plans": plans }))),
        ),
        TransformCommand::Apply {
            workspace,
            session_id,
            branch,
            plan_id,
        } => (
            "transform-apply".into(),
            SessionService::new(&workspace)
                .apply_transformation(session_id, branch.as_deref(), &plan_id)
                .and_then(|(plan, new_head)| {
                    to_value(&json!({
                        "plan_id": plan.id,
                        "ops_appended": plan.op_count(),
                        "new_head_revision": new_head,
                    }))
                }),
        ),
        TransformCommand::Verify {
            workspace,
            session_id,
            branch,
            plan_id,
        } => (
            "transform-verify".into(),
            SessionService::new(&workspace)
                .verify_transformation(session_id, branch.as_deref(), &plan_id)
                .and_then(|(preserved, diagnostic)| {
                    to_value(&json!({
                        "plan_id": plan_id,
                        "behavior_preserved": preserved,
                        "diagnostic": diagnostic,
                    }))
                }),
        ),
    }
}

fn execute_retime(command: RetimeCommand) -> (String, Result<Value, ServiceError>) {
    match command {
        RetimeCommand::Propose {
            workspace,
            session_id,
            branch,
            target,
            objective,
            max_moves,
        } => (
            "retime-propose".into(),
            parse_objective(&objective, max_moves).and_then(|objective| {
                SessionService::new(&workspace)
                    .propose_retiming(session_id, branch.as_deref(), target.as_deref(), &objective)
                    .and_then(|plans| to_value(&json!({ "plans": plans })))
            }),
        ),
        RetimeCommand::Evaluate {
            workspace,
            session_id,
            branch,
            target,
            objective,
        } => (
            "retime-evaluate".into(),
            parse_objective(&objective, -1).and_then(|objective| {
                SessionService::new(&workspace)
                    .evaluate_retiming(session_id, branch.as_deref(), target.as_deref(), &objective)
                    .and_then(|r| to_value(&r))
            }),
        ),
        RetimeCommand::Apply {
            workspace,
            session_id,
            branch,
            target,
            plan_id,
            objective,
            objective_max_moves,
            apply_only_safe,
            allow_suspicious,
            max_moves,
        } => (
            "retime-apply".into(),
            parse_objective(&objective, objective_max_moves).and_then(|objective| {
                SessionService::new(&workspace)
                    .apply_retiming(
                        session_id,
                        branch.as_deref(),
                        target.as_deref(),
                        &plan_id,
                        &objective,
                        &RetimingApplicationOptions {
                            apply_only_safe_moves: apply_only_safe,
                            allow_suspicious_moves: allow_suspicious,
                            max_moves,
                        },
                    )
                    .and_then(|r| to_value(&r))
            }),
        ),
    }
}

fn execute_pipeline(command: PipelineCommand) -> (String, Result<Value, ServiceError>) {
    match command {
        PipelineCommand::Propose {
            workspace,
            session_id,
            branch,
            subsystem,
        } => (
            "pipeline-propose".into(),
            SessionService::new(&workspace)
                .propose_global_pipelining(
                    session_id,
                    branch.as_deref(),
                    &subsystem,
                    &default_global_objective(),
                )
                .and_then(|plans| to_value(&json!({ "plans": plans }))),
        ),
        PipelineCommand::Apply {
            workspace,
            session_id,
            branch,
            subsystem,
            plan_id,
        } => (
            "pipeline-apply".into(),
            SessionService::new(&workspace)
                .apply_global_pipelining(
                    session_id,
                    branch.as_deref(),
                    &subsystem,
                    &plan_id,
                    &RetimingApplicationOptions::default(),
                    &default_global_objective(),
                )
                .and_then(|results| to_value(&json!({ "steps": results }))),
        ),
    }
}

fn write_envelope(command: &str, result: Result<Value, ServiceError>) -> ExitCode {
    let (ok, envelope) = match result {
        Ok(data) => (
            true,
            json!({ "ok": true, "command": command, "data": data }),
        ),
        Err(err) => (
            false,
            json!({
                "ok": false,
                "command": command,
                "error": err.message,
                "error_code": err.code.as_str(),
            }),
        ),
    };
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{envelope}");
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_debug(command: DebugCommand) -> ExitCode {
    let mut sink = StdoutSink;
    match command {
        DebugCommand::Process {
            command: ProcessStream::Logs { id },
        } => emit_process_logs(&mut sink, id, 5),
        DebugCommand::Websocket {
            command: SocketStream::Stream { id },
        } => emit_websocket_stream(&mut sink, &id, 5),
        DebugCommand::Poll {
            command: SocketStream::Stream { id },
        } => emit_poll_stream(&mut sink, &id, 3),
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Debug { command } => run_debug(command),
        Command::Daemon => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            match voltaic_service::run_daemon(stdin.lock(), stdout.lock()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            }
        }
        other => {
            let (name, result) = execute(other);
            write_envelope(&name, result)
        }
    }
}
