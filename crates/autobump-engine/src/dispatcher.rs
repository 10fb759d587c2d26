//! Job Dispatcher — the control loop.
//!
//! One cycle: poll due jobs, sort (priority desc, scheduled_time asc),
//! lease an account per job, gate through the rate budgets, call the
//! action client, and feed the outcome back into the registry and the
//! budgets. Per-job failures never terminate the loop.
//!
//! Jobs run on a bounded worker pool; only same-account executions are
//! serialized (via the registry lease). After a success each worker
//! holds its pool slot through a human-scale jitter pause, which paces
//! the dispatches in the cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use autobump_core::config::OrchestratorConfig;
use autobump_core::types::ActionType;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::account::{Account, Outcome};
use crate::budget::{Scope, ScopedBudgets};
use crate::client::{ActionClient, ActionResult, ErrorKind};
use crate::job::{Job, JobStatus};
use crate::policy::PolicyEngine;
use crate::registry::AccountRegistry;
use crate::store::JobStore;

/// Running totals across cycles.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DispatchStats {
    pub cycles: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub deferred: u64,
}

/// Per-day execution counters. Reset at midnight.
struct DailyCaps {
    date: NaiveDate,
    per_account: HashMap<String, u32>,
    per_action: HashMap<ActionType, u32>,
}

impl DailyCaps {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            date: now.date_naive(),
            per_account: HashMap::new(),
            per_action: HashMap::new(),
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.date {
            self.date = now.date_naive();
            self.per_account.clear();
            self.per_action.clear();
        }
    }

    fn action_count(&self, action: ActionType) -> u32 {
        self.per_action.get(&action).copied().unwrap_or(0)
    }

    fn account_count(&self, id: &str) -> u32 {
        self.per_account.get(id).copied().unwrap_or(0)
    }

    fn record(&mut self, action: ActionType, account_id: &str) {
        *self.per_action.entry(action).or_insert(0) += 1;
        *self.per_account.entry(account_id.to_string()).or_insert(0) += 1;
    }
}

/// The control loop. One instance per orchestrator.
pub struct Dispatcher {
    config: OrchestratorConfig,
    registry: Arc<Mutex<AccountRegistry>>,
    budgets: Arc<ScopedBudgets>,
    store: Arc<dyn JobStore>,
    client: Arc<dyn ActionClient>,
    policy: PolicyEngine,
    /// Jobs whose cancellation was requested while in flight.
    cancelled: Mutex<HashSet<String>>,
    caps: Mutex<DailyCaps>,
    stats: Mutex<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<Mutex<AccountRegistry>>,
        budgets: Arc<ScopedBudgets>,
        store: Arc<dyn JobStore>,
        client: Arc<dyn ActionClient>,
    ) -> Self {
        Self {
            config,
            registry,
            budgets,
            store,
            client,
            policy: PolicyEngine,
            cancelled: Mutex::new(HashSet::new()),
            caps: Mutex::new(DailyCaps::new(Utc::now())),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    pub async fn stats(&self) -> DispatchStats {
        *self.stats.lock().await
    }

    /// Flag an in-flight job for cooperative cancellation. The running
    /// call completes, but no retry or follow-up is scheduled.
    pub async fn request_cancel(&self, job_id: &str) {
        self.cancelled.lock().await.insert(job_id.to_string());
    }

    /// One dispatch cycle. Returns the number of jobs dispatched.
    pub async fn run_cycle(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        // Cancel flags whose jobs already reached a terminal state
        // have nothing left to interrupt.
        {
            let mut cancelled = self.cancelled.lock().await;
            if !cancelled.is_empty() {
                cancelled
                    .retain(|id| self.store.get(id).is_some_and(|j| !j.status.is_terminal()));
            }
        }
        let mut due: Vec<Job> = self
            .store
            .all()
            .into_iter()
            .filter(|j| j.is_due(now))
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_time.cmp(&b.scheduled_time))
        });
        due.truncate(self.config.max_per_cycle);

        if due.is_empty() {
            self.stats.lock().await.cycles += 1;
            return 0;
        }
        tracing::info!("🔁 Dispatch cycle: {} due job(s)", due.len());

        let pool = Arc::new(Semaphore::new(self.config.max_concurrent_dispatch));
        let mut workers = JoinSet::new();
        let mut dispatched = 0usize;

        for job in due {
            // Daily cap per action type.
            {
                let mut caps = self.caps.lock().await;
                caps.roll(now);
                if caps.action_count(job.action_type) >= self.config.daily_cap_per_action_type {
                    tracing::debug!("🛑 Daily cap hit for {}, deferring {}", job.action_type, job.id);
                    self.stats.lock().await.deferred += 1;
                    continue;
                }
            }

            // Lease an account. None is "no capacity", the job just
            // stays Scheduled for a later cycle.
            let account = {
                let mut registry = self.registry.lock().await;
                registry.select_best(now)
            };
            let Some(account) = account else {
                tracing::debug!("😴 No account available, deferring {}", job.id);
                self.stats.lock().await.deferred += 1;
                continue;
            };

            // Daily cap per account.
            {
                let mut caps = self.caps.lock().await;
                if caps.account_count(&account.id) >= self.config.daily_cap_per_account {
                    self.registry.lock().await.release(&account.id);
                    self.stats.lock().await.deferred += 1;
                    continue;
                }
                caps.record(job.action_type, &account.id);
            }

            dispatched += 1;
            let this = Arc::clone(self);
            let permit_pool = Arc::clone(&pool);
            workers.spawn(async move {
                // The pool lives for the whole cycle, acquire cannot fail.
                let Ok(_permit) = permit_pool.acquire_owned().await else {
                    return;
                };
                this.dispatch_one(job, account).await;
            });
        }

        // Per-job errors are caught inside dispatch_one; a panicked
        // worker is logged and the cycle carries on.
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                tracing::error!("💥 Dispatch worker panicked: {e}");
            }
        }

        let mut stats = self.stats.lock().await;
        stats.cycles += 1;
        stats.dispatched += dispatched as u64;
        dispatched
    }

    /// Execute one job against one leased account.
    async fn dispatch_one(&self, mut job: Job, account: Account) {
        // A cancel may have landed since cycle selection. Re-read the
        // stored copy and only run a job that is still waiting.
        match self.store.get(&job.id) {
            Some(fresh) if fresh.status == JobStatus::Scheduled => job = fresh,
            _ => {
                tracing::debug!("🚫 Job {} no longer scheduled, skipping", job.id);
                self.registry.lock().await.release(&account.id);
                return;
            }
        }
        // A flag raised before the action fires cancels without firing.
        if self.cancelled.lock().await.remove(&job.id) {
            job.touch(JobStatus::Cancelled);
            if let Err(e) = self.store.save(&job) {
                tracing::error!("⚠️ Failed to persist job {}: {e}", job.id);
            }
            tracing::info!("🚫 Job {} cancelled before dispatch", job.id);
            self.registry.lock().await.release(&account.id);
            return;
        }
        job.touch(JobStatus::InProgress);
        if let Err(e) = self.store.save(&job) {
            tracing::error!("⚠️ Failed to persist job {}: {e}", job.id);
        }
        tracing::info!(
            "🚀 Dispatching {} {} on target {} via {}",
            job.action_type,
            job.id,
            job.target_id,
            account.id
        );

        let global = Scope::Global;
        let per_account = Scope::Account(account.id.clone());
        self.budgets.acquire(&global).await;
        self.budgets.acquire(&per_account).await;

        let timeout = StdDuration::from_secs(self.config.action_timeout_secs);
        let result = match tokio::time::timeout(
            timeout,
            self.client
                .execute(job.action_type, &account.credential, &job.target_id),
        )
        .await
        {
            Ok(result) => result,
            // A hung call is an ordinary failure, not a crash path.
            Err(_) => ActionResult::err(ErrorKind::Other, "action timed out"),
        };

        // A cancel shows up as the in-flight flag or, when it raced
        // the InProgress save, as a Cancelled record in the store.
        let cancelled = {
            let mut set = self.cancelled.lock().await;
            set.remove(&job.id)
        } || self
            .store
            .get(&job.id)
            .is_some_and(|j| j.status == JobStatus::Cancelled);

        if result.success {
            self.on_success(&mut job, &account, result.payload, cancelled).await;
        } else {
            self.on_failure(&mut job, &account, &result, cancelled).await;
        }
    }

    async fn on_success(
        &self,
        job: &mut Job,
        account: &Account,
        payload: Option<serde_json::Value>,
        cancelled: bool,
    ) {
        let now = Utc::now();
        if let Err(e) = self
            .registry
            .lock()
            .await
            .record_outcome(&account.id, Outcome::Success, now)
        {
            tracing::error!("⚠️ Outcome not recorded for {}: {e}", account.id);
        }
        self.budgets.record_outcome(&Scope::Global, true, false, false).await;
        self.budgets
            .record_outcome(&Scope::Account(account.id.clone()), true, false, false)
            .await;

        job.result = payload;
        job.touch(if cancelled { JobStatus::Cancelled } else { JobStatus::Success });
        if let Err(e) = self.store.save(job) {
            tracing::error!("⚠️ Failed to persist job {}: {e}", job.id);
        }
        self.stats.lock().await.succeeded += 1;
        tracing::info!("✅ Job {} succeeded on {}", job.id, account.id);

        // Recurring jobs (bumps) re-enter the schedule; a cancelled job
        // never spawns a follow-up.
        if job.recurring && !cancelled {
            let next = self.policy.next_time(job.strategy, now);
            let mut follow_up = Job::new(
                job.action_type,
                &job.target_id,
                job.strategy,
                job.priority,
                next,
            );
            follow_up.recurring = true;
            follow_up.max_retries = job.max_retries;
            tracing::info!(
                "📅 Follow-up {} for target {} at {}",
                follow_up.id,
                follow_up.target_id,
                next
            );
            if let Err(e) = self.store.save(&follow_up) {
                tracing::error!("⚠️ Failed to persist follow-up for {}: {e}", job.id);
            }
        }

        // Human-scale pause before the next dispatch in this cycle.
        let jitter = &self.config.jitter;
        if jitter.inter_job_max_ms > 0 {
            let pause = rand::thread_rng()
                .gen_range(jitter.inter_job_min_ms..=jitter.inter_job_max_ms);
            tokio::time::sleep(StdDuration::from_millis(pause)).await;
        }
    }

    async fn on_failure(
        &self,
        job: &mut Job,
        account: &Account,
        result: &ActionResult,
        cancelled: bool,
    ) {
        let now = Utc::now();
        let kind = result.error_kind.unwrap_or(ErrorKind::Other);
        let message = result.message.clone().unwrap_or_else(|| "unknown failure".into());

        let (outcome, retry_delay, terminal) = match kind {
            ErrorKind::RateLimited => (
                Outcome::RateLimited,
                Duration::hours(1),
                JobStatus::RateLimited,
            ),
            // The account sits in quarantine anyway; retry after it may
            // have recovered.
            ErrorKind::Captcha => (Outcome::Captcha, Duration::hours(24), JobStatus::Failed),
            ErrorKind::NotFound | ErrorKind::Other => {
                (Outcome::OtherFailure, Duration::minutes(30), JobStatus::Failed)
            }
        };

        if let Err(e) = self
            .registry
            .lock()
            .await
            .record_outcome(&account.id, outcome, now)
        {
            tracing::error!("⚠️ Outcome not recorded for {}: {e}", account.id);
        }
        let captcha = kind == ErrorKind::Captcha;
        let rate_limited = kind == ErrorKind::RateLimited;
        self.budgets
            .record_outcome(&Scope::Global, false, captcha, rate_limited)
            .await;
        self.budgets
            .record_outcome(&Scope::Account(account.id.clone()), false, captcha, rate_limited)
            .await;

        if cancelled {
            job.error = Some(message);
            job.touch(JobStatus::Cancelled);
        } else if kind == ErrorKind::NotFound {
            // Target is gone; retrying cannot help.
            job.error = Some(message);
            job.touch(JobStatus::Exhausted);
        } else {
            job.reschedule_or_exhaust(now + retry_delay, terminal, message);
        }
        if let Err(e) = self.store.save(job) {
            tracing::error!("⚠️ Failed to persist job {}: {e}", job.id);
        }
        self.stats.lock().await.failed += 1;
        tracing::warn!(
            "❌ Job {} failed on {} ({:?}) → {:?} (retry {}/{})",
            job.id,
            account.id,
            kind,
            job.status,
            job.retry_count,
            job.max_retries
        );
    }

    /// Run the dispatch loop until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Dispatcher started (cycle every {}s, pool {})",
            self.config.poll_interval_secs,
            self.config.max_concurrent_dispatch
        );
        let mut interval =
            tokio::time::interval(StdDuration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("🛑 Dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }
}
