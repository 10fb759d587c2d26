//! Orchestrator — the per-tenant control surface.
//!
//! Owns the registry, budgets, policy engine, and dispatcher for one
//! tenant. Constructed at session start, torn down at session end;
//! everything is passed by reference, never through globals.

use std::sync::Arc;

use autobump_core::config::OrchestratorConfig;
use autobump_core::error::{AutobumpError, Result};
use autobump_core::types::{ActionType, Strategy};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::account::Account;
use crate::budget::ScopedBudgets;
use crate::client::{ActionClient, CredentialStore};
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::job::{Job, JobStatus};
use crate::policy::PolicyEngine;
use crate::registry::AccountRegistry;
use crate::store::JobStore;

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub total_jobs: usize,
    pub scheduled_count: usize,
    pub rate_limited_count: usize,
    pub account_count: usize,
    pub sidelined_accounts: usize,
    pub stats: DispatchStats,
    /// Next jobs up, ordered by scheduled_time (top 8).
    pub upcoming: Vec<Job>,
}

/// One tenant's automation session.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<Mutex<AccountRegistry>>,
    store: Arc<dyn JobStore>,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    policy: PolicyEngine,
    shutdown_tx: watch::Sender<bool>,
    running: Mutex<bool>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        client: Arc<dyn ActionClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Mutex::new(AccountRegistry::new(config.quarantine.clone())));
        let budgets = Arc::new(ScopedBudgets::new(
            config.rate_budget.clone(),
            config.backoff_caps.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            Arc::clone(&registry),
            budgets,
            Arc::clone(&store),
            client,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            registry,
            store,
            credentials,
            dispatcher,
            policy: PolicyEngine,
            shutdown_tx,
            running: Mutex::new(false),
        })
    }

    /// Register an account with the pool. The credential store must
    /// already know it.
    pub async fn add_account(&self, account_id: &str, priority: u8) -> Result<()> {
        let handle = self.credentials.get(account_id).ok_or_else(|| {
            AutobumpError::Config(format!("no credential for account {account_id}"))
        })?;
        let account = Account::new(account_id, handle, priority);
        self.registry.lock().await.add_account(account);
        Ok(())
    }

    pub async fn remove_account(&self, account_id: &str) -> bool {
        self.registry.lock().await.remove_account(account_id)
    }

    /// Schedule automation for a batch of targets. Returns the new job
    /// ids in input order.
    pub fn enable_automation(
        &self,
        target_ids: &[String],
        action_type: ActionType,
        strategy: Strategy,
        priority: u8,
    ) -> Result<Vec<String>> {
        if target_ids.is_empty() {
            return Err(AutobumpError::Config("no targets given".into()));
        }
        if !(1..=10).contains(&priority) {
            return Err(AutobumpError::Config(format!(
                "priority must be 1-10, got {priority}"
            )));
        }

        let now = Utc::now();
        let times = self.policy.bulk_schedule(target_ids.len(), strategy, now);
        let mut ids = Vec::with_capacity(target_ids.len());
        for (target, time) in target_ids.iter().zip(times) {
            let job = Job::new(action_type, target, strategy, priority, time);
            tracing::info!(
                "📅 Job scheduled: {} {} on {} at {}",
                job.action_type,
                job.id,
                job.target_id,
                job.scheduled_time
            );
            self.store.save(&job)?;
            ids.push(job.id);
        }
        Ok(ids)
    }

    /// Cancel every non-terminal job matching a target id or job id.
    /// Returns the number of jobs cancelled.
    pub async fn disable_automation(&self, targets: &[String]) -> usize {
        let mut cancelled = 0;
        for job in self.store.all() {
            if job.status.is_terminal() {
                continue;
            }
            if targets.iter().any(|t| *t == job.id || *t == job.target_id)
                && self.cancel_job(&job.id).await
            {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel one job. A Scheduled job is cancelled immediately; an
    /// InProgress one finishes its in-flight call but schedules no
    /// retry or follow-up. Terminal jobs return false.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let Some(mut job) = self.store.get(job_id) else {
            return false;
        };
        match job.status {
            JobStatus::Scheduled => {
                // A dispatch worker may have picked the job up since
                // the status read above; flag it so a racing execution
                // also ends Cancelled.
                self.dispatcher.request_cancel(job_id).await;
                job.touch(JobStatus::Cancelled);
                if let Err(e) = self.store.save(&job) {
                    tracing::error!("⚠️ Failed to persist cancellation of {job_id}: {e}");
                    return false;
                }
                tracing::info!("🚫 Job cancelled: {job_id}");
                true
            }
            JobStatus::InProgress => {
                self.dispatcher.request_cancel(job_id).await;
                true
            }
            _ => false,
        }
    }

    /// Current engine snapshot. Repeated calls with no intervening
    /// mutation return identical counts.
    pub async fn get_status(&self) -> StatusReport {
        let now = Utc::now();
        let jobs = self.store.all();
        let scheduled_count = jobs.iter().filter(|j| j.status == JobStatus::Scheduled).count();
        let rate_limited_count = jobs
            .iter()
            .filter(|j| j.status == JobStatus::RateLimited)
            .count();

        let mut upcoming: Vec<Job> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Scheduled)
            .cloned()
            .collect();
        upcoming.sort_by_key(|j| j.scheduled_time);
        upcoming.truncate(8);

        let registry = self.registry.lock().await;
        StatusReport {
            running: *self.running.lock().await,
            total_jobs: jobs.len(),
            scheduled_count,
            rate_limited_count,
            account_count: registry.account_count(),
            sidelined_accounts: registry.sidelined_count(now),
            stats: self.dispatcher.stats().await,
            upcoming,
        }
    }

    /// Spawn the dispatch loop. Idempotent.
    pub async fn run(&self) {
        let mut running = self.running.lock().await;
        if *running {
            return;
        }
        *running = true;
        let dispatcher = Arc::clone(&self.dispatcher);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(dispatcher.run(shutdown_rx));
        tracing::info!(
            "▶️ Orchestrator running (cycle {}s)",
            self.config.poll_interval_secs
        );
    }

    /// Stop the dispatch loop. In-flight jobs complete.
    pub async fn shutdown(&self) {
        *self.running.lock().await = false;
        let _ = self.shutdown_tx.send(true);
    }

    /// Run one dispatch cycle inline (CLI `run --once`, tests).
    pub async fn run_cycle_now(&self) -> usize {
        self.dispatcher.run_cycle().await
    }
}
