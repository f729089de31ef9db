//! `conductor`: run, replay and inspect orchestration sessions.

mod config;
mod loopback;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use conductor_core::{DecisionAction, Outcome};
use conductor_orchestrator::{
    ExecutionResult, ExecutorMonitor, RequestContext, StagedPlanner, StateMachine,
};
use conductor_policy::{
    FilePolicyParser, PolicyContext, PolicyEngine, PolicyParser, PolicyWatcher,
};
use conductor_store::DecisionFilter;
use config::{ConductorConfig, PolicySection};
use loopback::LoopbackExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: policy-driven task orchestration loop")]
struct Cli {
    /// Path to config file (defaults to ./conductor.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command through the loop against the built-in loopback executor
    Run {
        /// The command to orchestrate
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
        /// Session id (a fresh UUID when omitted)
        #[arg(long)]
        session_id: Option<String>,
        /// Request context as a JSON object
        #[arg(long)]
        context: Option<String>,
        /// Plan one chained step per role instead of a single step
        #[arg(long, value_delimiter = ',')]
        stages: Vec<String>,
        /// Make the loopback executor fail its first N attempts
        #[arg(long, default_value_t = 0)]
        fail_first: u32,
        /// Include every persisted state in the output
        #[arg(long)]
        history: bool,
    },
    /// Rebuild a session's result from the store
    Replay {
        session_id: String,
        #[arg(long)]
        history: bool,
    },
    /// List stored sessions
    Sessions,
    /// Query decision logs
    Decisions {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        outcome: Option<Outcome>,
        #[arg(long, value_parser = parse_action)]
        action: Option<DecisionAction>,
        /// RFC 3339 lower bound (inclusive)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound (inclusive)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Inspect policy documents
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Parse a policy document and list its rules
    Check {
        /// Policy file (defaults to policy.path from the config)
        path: Option<PathBuf>,
    },
    /// Evaluate a policy against a JSON context
    Eval {
        /// Policy file (defaults to policy.path from the config)
        path: Option<PathBuf>,
        /// JSON file holding the evaluation context, `-` for stdin
        #[arg(long)]
        context: PathBuf,
    },
}

fn parse_action(s: &str) -> Result<DecisionAction, String> {
    match serde_json::from_value(serde_json::Value::String(s.to_string())) {
        Ok(DecisionAction::Unrecognized) | Err(_) => Err(format!(
            "unknown action '{s}' (expected complete, retry, extend_plan or escalate)"
        )),
        Ok(action) => Ok(action),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn policy_engine(section: &PolicySection) -> anyhow::Result<Arc<PolicyEngine>> {
    let engine = Arc::new(PolicyEngine::new());
    if let Some(path) = &section.path {
        engine
            .load(path)
            .with_context(|| format!("Failed to load policy '{}'", path.display()))?;
    }
    Ok(engine)
}

fn policy_path(explicit: Option<PathBuf>, config: &ConductorConfig) -> anyhow::Result<PathBuf> {
    explicit
        .or_else(|| config.policy.path.clone())
        .context("No policy file given and no policy.path configured")
}

fn print_result(mut result: ExecutionResult, history: bool) -> anyhow::Result<bool> {
    if !history {
        result.history.clear();
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

async fn run(
    config: ConductorConfig,
    command: String,
    session_id: Option<String>,
    context: Option<String>,
    stages: Vec<String>,
    fail_first: u32,
    history: bool,
) -> anyhow::Result<bool> {
    let context: RequestContext = match context {
        Some(raw) => serde_json::from_str(&raw).context("--context must be a JSON object")?,
        None => RequestContext::new(),
    };

    let store = config.store.open().await?;
    let policy = policy_engine(&config.policy)?;
    let _watcher = match (&config.policy.path, config.policy.watch) {
        (Some(path), true) => Some(PolicyWatcher::start(
            policy.clone(),
            path.clone(),
            config.policy.debounce_ms,
            |path: &Path| info!(path = %path.display(), "Policy change picked up"),
        )?),
        _ => None,
    };

    let max_silence = config.orchestrator.observation_timeout();
    let mut builder = StateMachine::builder()
        .config(config.orchestrator)
        .store(store)
        .policy(policy);
    if !stages.is_empty() {
        builder = builder.planner(Arc::new(StagedPlanner::new(stages)));
    }
    let machine = builder.build()?;

    let monitor = Arc::new(ExecutorMonitor::new());
    monitor.attach(machine.bus());
    let executor = LoopbackExecutor::new(machine.bus().clone())
        .failing_first(fail_first)
        .attach();

    let result = machine.execute(&command, context, session_id).await;
    info!(
        attempts = executor.attempts(),
        executors = %monitor.to_json().await,
        "Executor activity"
    );
    let stale = monitor.stale(max_silence).await;
    if !stale.is_empty() {
        warn!(executors = ?stale, "Executors silent for longer than the observation timeout");
    }
    print_result(result, history)
}

async fn list_sessions(config: &ConductorConfig) -> anyhow::Result<()> {
    let store = config.store.open().await?;
    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions stored in {}", config.store.data_dir.display());
        return Ok(());
    }
    for session_id in &sessions {
        let states = store.states_for_session(session_id).await?;
        let summary = ExecutionResult::from_history(session_id, states);
        println!(
            "{session_id}\t{}\titerations={}\tsuccess={}",
            summary.final_phase, summary.total_iterations, summary.success
        );
    }
    Ok(())
}

fn policy_check(path: &Path) -> anyhow::Result<()> {
    let policy = FilePolicyParser.parse(path)?;
    println!("{}: ok", path.display());
    if let Some(version) = &policy.spec_version {
        println!("  spec_version: {version}");
    }
    if !policy.defaults.allow.is_empty() || !policy.defaults.forbid.is_empty() {
        println!(
            "  defaults: allow={:?} forbid={:?}",
            policy.defaults.allow, policy.defaults.forbid
        );
    }
    println!("  rules: {}", policy.rules.len());
    for rule in &policy.rules {
        println!(
            "    [{:>4}] {} ({} condition(s))",
            rule.priority,
            rule.name,
            rule.conditions.len()
        );
    }
    Ok(())
}

fn policy_eval(path: &Path, context_path: &Path) -> anyhow::Result<()> {
    let raw = if context_path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(context_path)
            .with_context(|| format!("Failed to read context '{}'", context_path.display()))?
    };
    let context: PolicyContext = serde_json::from_str(&raw).context("Invalid policy context")?;
    let policy = FilePolicyParser.parse(path)?;
    let effective = policy.evaluate(&context);
    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = config::load(cli.config.as_deref())?;

    let success = match cli.command {
        Commands::Run {
            command,
            session_id,
            context,
            stages,
            fail_first,
            history,
        } => {
            run(
                config,
                command.join(" "),
                session_id,
                context,
                stages,
                fail_first,
                history,
            )
            .await?
        }
        Commands::Replay {
            session_id,
            history,
        } => {
            if config.store.backend == config::StoreBackend::Memory {
                warn!("The memory store starts empty; replay will find nothing");
            }
            let machine = StateMachine::builder()
                .config(config.orchestrator.clone())
                .store(config.store.open().await?)
                .build()?;
            print_result(machine.replay(&session_id).await?, history)?
        }
        Commands::Sessions => {
            list_sessions(&config).await?;
            true
        }
        Commands::Decisions {
            session,
            outcome,
            action,
            since,
            until,
            limit,
        } => {
            let filter = DecisionFilter {
                session_id: session,
                outcome,
                action,
                since,
                until,
                limit,
            };
            let store = config.store.open().await?;
            for log in store.query_decisions(&filter).await? {
                println!("{}", serde_json::to_string(&log)?);
            }
            true
        }
        Commands::Policy { action } => {
            match action {
                PolicyAction::Check { path } => policy_check(&policy_path(path, &config)?)?,
                PolicyAction::Eval { path, context } => {
                    policy_eval(&policy_path(path, &config)?, &context)?;
                }
            }
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
