//! # Autobump — CLI control surface
//!
//! Binds the orchestration engine's control operations to a command
//! line. Runs in dry-run mode out of the box: the bundled action
//! client only logs what it would do. Hosts that actually talk to the
//! platform embed `autobump-engine` and wire in their own client.
//!
//! Usage:
//!   autobump enable --action bump --strategy peak_hours l-101 l-102
//!   autobump status
//!   autobump run --account acc-1 --account acc-2
//!   autobump cancel <job-id>

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use autobump_core::types::{ActionType, CredentialHandle, Strategy};
use autobump_core::OrchestratorConfig;
use autobump_engine::{
    ActionClient, ActionResult, CredentialStore, JobStore, JsonJobStore, Orchestrator,
};

#[derive(Parser)]
#[command(
    name = "autobump",
    version,
    about = "⚙️ Autobump — rate-limited automation orchestrator"
)]
struct Cli {
    /// Config file (default: ~/.autobump/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedule automation for one or more targets
    Enable {
        /// Target ids (listing/user/conversation ids)
        targets: Vec<String>,
        #[arg(long, default_value = "bump")]
        action: ActionType,
        #[arg(long, default_value = "peak_hours")]
        strategy: Strategy,
        #[arg(long, default_value = "5")]
        priority: u8,
    },
    /// Cancel jobs by target id or job id
    Disable { targets: Vec<String> },
    /// Cancel a single job
    Cancel { job_id: String },
    /// Show engine status and upcoming jobs
    Status,
    /// Run the dispatch loop (dry-run client)
    Run {
        /// Account ids to seed the pool with
        #[arg(long = "account")]
        accounts: Vec<String>,
        /// Run a single dispatch cycle and exit
        #[arg(long)]
        once: bool,
    },
}

/// Logs actions instead of performing them.
struct DryRunClient;

#[async_trait::async_trait]
impl ActionClient for DryRunClient {
    async fn execute(
        &self,
        action_type: ActionType,
        credential: &CredentialHandle,
        target_id: &str,
    ) -> ActionResult {
        tracing::info!("🧪 [dry-run] {} on {} as {}", action_type, target_id, credential);
        ActionResult::ok(None)
    }
}

/// Maps every account id onto its session file under ~/.autobump.
struct SessionPathCredentials;

impl CredentialStore for SessionPathCredentials {
    fn get(&self, account_id: &str) -> Option<CredentialHandle> {
        let path = OrchestratorConfig::home_dir()
            .join("sessions")
            .join(format!("{account_id}.json"));
        Some(CredentialHandle(path.display().to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "autobump=debug,autobump_engine=debug"
    } else {
        "autobump=info,autobump_engine=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => OrchestratorConfig::load_from(std::path::Path::new(path))?,
        None => OrchestratorConfig::load()?,
    };

    let store: Arc<dyn JobStore> = Arc::new(JsonJobStore::open(&JsonJobStore::default_dir())?);
    let orchestrator = Orchestrator::new(
        config,
        store,
        Arc::new(DryRunClient),
        Arc::new(SessionPathCredentials),
    )?;

    match cli.command {
        Command::Enable {
            targets,
            action,
            strategy,
            priority,
        } => {
            let ids = orchestrator.enable_automation(&targets, action, strategy, priority)?;
            println!("Scheduled {} job(s):", ids.len());
            for id in ids {
                println!("  {id}");
            }
        }
        Command::Disable { targets } => {
            let n = orchestrator.disable_automation(&targets).await;
            println!("Cancelled {n} job(s)");
        }
        Command::Cancel { job_id } => {
            if orchestrator.cancel_job(&job_id).await {
                println!("Cancelled {job_id}");
            } else {
                println!("Job {job_id} not found or already terminal");
            }
        }
        Command::Status => {
            let status = orchestrator.get_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Run { accounts, once } => {
            if accounts.is_empty() {
                anyhow::bail!("at least one --account is required to run");
            }
            for id in &accounts {
                orchestrator.add_account(id, 5).await?;
            }
            if once {
                let n = orchestrator.run_cycle_now().await;
                println!("Dispatched {n} job(s)");
            } else {
                orchestrator.run().await;
                tokio::signal::ctrl_c().await?;
                orchestrator.shutdown().await;
            }
        }
    }

    Ok(())
}
