use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use rigwatch::agent::polecat_bead_id;
use rigwatch::circuit::{record_failure, record_success, set_half_open};
use rigwatch::config::Config;
use rigwatch::isolation::IsolationResult;
use rigwatch::mail::FileMailbox;
use rigwatch::notify::parse_work_requeue;
use rigwatch::patrol::Patrol;
use rigwatch::queue::rank;
use rigwatch::reclaim::SessionReclaimer;
use rigwatch::score::WorkItem;
use rigwatch::store::FileAgentStore;
use rigwatch::workspace::Workspace;
use rigwatch::{zlog, zlog_error, Result};

/// rigwatch - circuit breaker and merge-queue scoring for polecat fleets
#[derive(Parser, Debug)]
#[command(name = "rigwatch")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    RIGWATCH_DEBUG=1     Enable debug logging (alternative to --debug)\n    RIGWATCH_LOG=<path>  Log file (default ~/.rigwatch/rigwatch.log)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.rigwatch/rigwatch.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Workspace root, or any directory inside it
    #[arg(short = 'w', long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Isolate polecats whose circuit breaker has tripped
    Patrol {
        #[arg(long)]
        rig: String,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a failed exit for a polecat
    Failure {
        #[arg(long)]
        rig: String,
        #[arg(long)]
        polecat: String,
    },

    /// Record a successful completion for a polecat
    Success {
        #[arg(long)]
        rig: String,
        #[arg(long)]
        polecat: String,
    },

    /// Grant a tripped polecat one more attempt once its cooldown has passed
    HalfOpen {
        #[arg(long)]
        rig: String,
        #[arg(long)]
        polecat: String,
    },

    /// Rank work items from a JSON file, highest priority first
    Queue {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Parse a WORK_REQUEUE message and print its payload as JSON
    ParseRequeue {
        subject: String,

        #[arg(default_value = "")]
        body: String,
    },
}

struct Context {
    config: Config,
    workspace: Workspace,
}

impl Context {
    fn load(workspace: Option<PathBuf>) -> Result<Self> {
        let config = Config::load()?;
        let start = match workspace.or_else(|| config.workspace_path()) {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        let workspace = Workspace::find(&start)?;
        Ok(Self { config, workspace })
    }

    fn store(&self) -> FileAgentStore {
        FileAgentStore::for_workspace(&self.workspace)
    }

    fn agent_id(&self, rig: &str, polecat: &str) -> String {
        polecat_bead_id(&self.config.bead_prefix, rig, polecat)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    rigwatch::log::init_with_debug(cli.debug);
    if rigwatch::log::is_debug() {
        zlog!("rigwatch starting (debug mode enabled): {:?}", cli.command);
    } else {
        zlog!("rigwatch starting: {:?}", cli.command);
    }

    let result = match cli.command {
        Command::Patrol { rig, once, json } => run_patrol(cli.workspace, rig, once, json),
        Command::Failure { rig, polecat } => run_failure(cli.workspace, &rig, &polecat),
        Command::Success { rig, polecat } => run_success(cli.workspace, &rig, &polecat),
        Command::HalfOpen { rig, polecat } => run_half_open(cli.workspace, &rig, &polecat),
        Command::Queue { file, json } => run_queue(file, json),
        Command::ParseRequeue { subject, body } => run_parse_requeue(&subject, &body),
    };
    if let Err(e) = &result {
        zlog_error!("rigwatch failed: {}", e);
    }
    result
}

fn run_patrol(workspace: Option<PathBuf>, rig: String, once: bool, json: bool) -> Result<()> {
    let ctx = Context::load(workspace)?;
    ctx.config.validate()?;

    let patrol = Patrol::new(
        rig,
        Arc::new(ctx.store()),
        Arc::new(FileMailbox::for_workspace(&ctx.workspace)),
        Arc::new(
            SessionReclaimer::new(ctx.workspace.clone())
                .with_session_prefix(ctx.config.bead_prefix.clone()),
        ),
    )
    .with_circuit_breaker(ctx.config.circuit_breaker())
    .with_score(ctx.config.score)
    .with_timeout(ctx.config.collaborator_timeout());

    let rt = tokio::runtime::Runtime::new()?;
    if once {
        let results = rt.block_on(patrol.check_circuit_breakers_concurrent())?;
        return print_results(patrol.rig(), &results, json);
    }

    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                zlog!("Interrupt received, stopping patrol");
            }
            on_signal.cancel();
        });

        let rig = patrol.rig().to_string();
        patrol
            .run(ctx.config.patrol_interval(), cancel, |outcome| match outcome {
                Ok(results) => {
                    if let Err(e) = print_results(&rig, results, json) {
                        zlog_error!("Failed to print patrol results: {}", e);
                    }
                }
                Err(e) => eprintln!("patrol cycle failed: {}", e),
            })
            .await;
    });
    Ok(())
}

fn print_results(rig: &str, results: &[IsolationResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("{}: no tripped polecats", rig);
        return Ok(());
    }
    for r in results {
        print!(
            "{}/{}: {} (failures: {})",
            rig, r.polecat, r.action, r.failure_count
        );
        if let Some(id) = &r.requeue_mail_id {
            print!(" requeue={}", id);
        }
        if let Some(id) = &r.escalation_mail_id {
            print!(" escalation={}", id);
        }
        if let Some(e) = &r.error {
            print!(" error: {}", e);
        }
        println!();
    }
    Ok(())
}

fn run_failure(workspace: Option<PathBuf>, rig: &str, polecat: &str) -> Result<()> {
    let ctx = Context::load(workspace)?;
    let config = ctx.config.circuit_breaker();
    config.validate()?;
    let id = ctx.agent_id(rig, polecat);

    let (count, tripped) = record_failure(&ctx.store(), &id, config.max_failures)?;
    if tripped {
        println!(
            "{}/{}: circuit OPEN after {} consecutive failures",
            rig, polecat, count
        );
    } else {
        println!(
            "{}/{}: {} of {} failures",
            rig, polecat, count, config.max_failures
        );
    }
    Ok(())
}

fn run_success(workspace: Option<PathBuf>, rig: &str, polecat: &str) -> Result<()> {
    let ctx = Context::load(workspace)?;
    record_success(&ctx.store(), &ctx.agent_id(rig, polecat))?;
    println!("{}/{}: failures reset, circuit closed", rig, polecat);
    Ok(())
}

fn run_half_open(workspace: Option<PathBuf>, rig: &str, polecat: &str) -> Result<()> {
    let ctx = Context::load(workspace)?;
    let config = ctx.config.circuit_breaker();
    let result = set_half_open(&ctx.store(), &ctx.agent_id(rig, polecat), &config, Utc::now())?;
    println!(
        "{}/{}: {} (failures: {})",
        rig, result.polecat, result.action, result.failure_count
    );
    Ok(())
}

fn run_queue(file: PathBuf, json: bool) -> Result<()> {
    let config = Config::load()?;
    let items: Vec<WorkItem> = serde_json::from_str(&fs::read_to_string(&file)?)?;
    let entries = rank(&items, None, &config.score);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. {:<24} {:>10.2}  p{} retries={}",
            i + 1,
            entry.id,
            entry.score,
            entry.input.priority,
            entry.input.retry_count
        );
    }
    Ok(())
}

fn run_parse_requeue(subject: &str, body: &str) -> Result<()> {
    let payload = parse_work_requeue(subject, body)?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
