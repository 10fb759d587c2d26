//! Rate Budget — sliding-window counters plus detection-score backoff.
//!
//! One budget per scope (global, per-account, per-action-type). Three
//! windows (minute/hour/day) bound the call rate; a detection score
//! rises on failures and captchas and drives an adaptive delay
//! multiplier, so the engine slows down as soon as the platform starts
//! pushing back.
//!
//! Waits are computed under the scope lock but slept outside it, so a
//! saturated scope never stalls the others.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use autobump_core::config::{BackoffCapsConfig, RateBudgetConfig};
use autobump_core::types::ActionType;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tokio::sync::Mutex;

/// The unit a budget's windows are counted over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Account(String),
    Action(ActionType),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Account(id) => write!(f, "account:{id}"),
            Scope::Action(at) => write!(f, "action:{at}"),
        }
    }
}

/// One sliding window of call timestamps.
#[derive(Debug)]
struct Window {
    size: Duration,
    max_calls: usize,
    calls: VecDeque<DateTime<Utc>>,
}

impl Window {
    fn new(size: Duration, max_calls: u32) -> Self {
        Self {
            size,
            max_calls: max_calls as usize,
            calls: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(&front) = self.calls.front() {
            if now - front >= self.size {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Wait until this window frees a slot. Zero when below capacity.
    fn wait(&mut self, now: DateTime<Utc>) -> Duration {
        self.prune(now);
        if self.calls.len() >= self.max_calls {
            if let Some(&oldest) = self.calls.front() {
                return (self.size - (now - oldest)).max(Duration::zero());
            }
        }
        Duration::zero()
    }
}

/// Adaptive limiter state for one scope.
pub struct RateBudget {
    minute: Window,
    hour: Window,
    day: Window,
    base_delay: Duration,
    caps: BackoffCapsConfig,
    detection_score: f64,
    delay_multiplier: f64,
}

impl RateBudget {
    pub fn new(limits: &RateBudgetConfig, caps: BackoffCapsConfig) -> Self {
        Self {
            minute: Window::new(Duration::seconds(60), limits.per_minute),
            hour: Window::new(Duration::seconds(3600), limits.per_hour),
            day: Window::new(Duration::seconds(86400), limits.per_day),
            base_delay: Duration::milliseconds(limits.base_delay_ms as i64),
            caps,
            detection_score: 0.0,
            delay_multiplier: 1.0,
        }
    }

    pub fn detection_score(&self) -> f64 {
        self.detection_score
    }

    pub fn delay_multiplier(&self) -> f64 {
        self.delay_multiplier
    }

    /// How long the next call must wait. Never negative: the max of the
    /// window-saturation waits and the jittered adaptive base delay.
    pub fn wait_time(&mut self, now: DateTime<Utc>) -> StdDuration {
        let window_wait = self
            .minute
            .wait(now)
            .max(self.hour.wait(now))
            .max(self.day.wait(now));

        let jitter = rand::thread_rng().gen_range(0.8..1.5);
        let base_ms = self.base_delay.num_milliseconds() as f64 * self.delay_multiplier * jitter;
        let adaptive = Duration::milliseconds(base_ms as i64);

        let wait = window_wait.max(adaptive).max(Duration::zero());
        wait.to_std().unwrap_or(StdDuration::ZERO)
    }

    /// Record one call into all three windows.
    pub fn record_call(&mut self, now: DateTime<Utc>) {
        self.minute.prune(now);
        self.hour.prune(now);
        self.day.prune(now);
        self.minute.calls.push_back(now);
        self.hour.calls.push_back(now);
        self.day.calls.push_back(now);
    }

    /// Feed an action outcome into the backoff state.
    ///
    /// Failures raise the detection score and multiply the delay,
    /// captcha hardest (the platform is actively challenging us).
    /// Sustained success decays the score first, then the multiplier.
    pub fn record_outcome(&mut self, success: bool, captcha: bool, rate_limited: bool) {
        if success {
            self.detection_score = (self.detection_score - 0.5).max(0.0);
            if self.detection_score == 0.0 && self.delay_multiplier > 1.0 {
                self.delay_multiplier = (self.delay_multiplier * 0.95).max(1.0);
            }
            return;
        }

        let (score_bump, factor, cap) = if captcha {
            (5.0, 2.0, self.caps.captcha)
        } else if rate_limited {
            (3.0, 1.8, self.caps.rate_limited)
        } else {
            (1.0, 1.5, self.caps.plain)
        };
        self.detection_score += score_bump;
        self.delay_multiplier = (self.delay_multiplier * factor).min(cap).clamp(1.0, 10.0);
        tracing::debug!(
            "🐢 Backoff raised: score {:.1}, multiplier {:.2}",
            self.detection_score,
            self.delay_multiplier
        );
    }

    /// Calls currently inside the minute window.
    pub fn minute_window_len(&mut self, now: DateTime<Utc>) -> usize {
        self.minute.prune(now);
        self.minute.calls.len()
    }
}

/// Lazily-created budgets keyed by scope, shared across workers.
pub struct ScopedBudgets {
    limits: RateBudgetConfig,
    caps: BackoffCapsConfig,
    budgets: Mutex<HashMap<Scope, Arc<Mutex<RateBudget>>>>,
}

impl ScopedBudgets {
    pub fn new(limits: RateBudgetConfig, caps: BackoffCapsConfig) -> Self {
        Self {
            limits,
            caps,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    async fn budget(&self, scope: &Scope) -> Arc<Mutex<RateBudget>> {
        let mut map = self.budgets.lock().await;
        map.entry(scope.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RateBudget::new(&self.limits, self.caps.clone())))
            })
            .clone()
    }

    /// Wait until the scope has budget, then record the call.
    ///
    /// The sleep happens with no lock held; only the wait computation
    /// and the timestamp recording take the scope lock.
    pub async fn acquire(&self, scope: &Scope) {
        let budget = self.budget(scope).await;
        let wait = {
            let mut b = budget.lock().await;
            b.wait_time(Utc::now())
        };
        if !wait.is_zero() {
            tracing::debug!("⏳ Budget {} backoff: {:?}", scope, wait);
            tokio::time::sleep(wait).await;
        }
        let mut b = budget.lock().await;
        b.record_call(Utc::now());
    }

    /// Feed an outcome into one scope's backoff state.
    pub async fn record_outcome(&self, scope: &Scope, success: bool, captcha: bool, rate_limited: bool) {
        let budget = self.budget(scope).await;
        let mut b = budget.lock().await;
        b.record_outcome(success, captcha, rate_limited);
    }

    /// Current delay multiplier for a scope (1.0 if never used).
    pub async fn multiplier(&self, scope: &Scope) -> f64 {
        let budget = self.budget(scope).await;
        let b = budget.lock().await;
        b.delay_multiplier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_minute: u32) -> RateBudgetConfig {
        RateBudgetConfig {
            per_minute,
            per_hour: 1000,
            per_day: 10000,
            base_delay_ms: 0,
        }
    }

    fn budget(per_minute: u32) -> RateBudget {
        RateBudget::new(&limits(per_minute), BackoffCapsConfig::default())
    }

    #[test]
    fn test_wait_time_never_negative() {
        let mut b = budget(5);
        let now = Utc::now();
        for _ in 0..50 {
            assert!(b.wait_time(now) >= StdDuration::ZERO);
            b.record_call(now);
        }
    }

    #[test]
    fn test_sixth_call_in_a_minute_waits() {
        let mut b = budget(5);
        let now = Utc::now();
        for _ in 0..5 {
            assert_eq!(b.wait_time(now), StdDuration::ZERO);
            b.record_call(now);
        }
        let wait = b.wait_time(now);
        assert!(wait > StdDuration::ZERO);
        assert!(wait <= StdDuration::from_secs(60));
    }

    #[test]
    fn test_window_frees_up_after_expiry() {
        let mut b = budget(5);
        let now = Utc::now();
        for _ in 0..5 {
            b.record_call(now);
        }
        let later = now + Duration::seconds(61);
        assert_eq!(b.wait_time(later), StdDuration::ZERO);
        assert_eq!(b.minute_window_len(later), 0);
    }

    #[test]
    fn test_wait_monotone_in_multiplier() {
        let cfg = RateBudgetConfig {
            base_delay_ms: 1000,
            ..limits(1000)
        };
        let mut b = RateBudget::new(&cfg, BackoffCapsConfig::default());
        let now = Utc::now();
        let before = b.wait_time(now);
        for _ in 0..4 {
            b.record_outcome(false, true, false);
        }
        assert!(b.delay_multiplier() > 1.0);
        // jitter is 0.8..1.5, multiplier is 10x: strictly longer waits
        let after = b.wait_time(now);
        assert!(after > before);
    }

    #[test]
    fn test_backoff_escalation_and_caps() {
        let mut b = budget(5);
        b.record_outcome(false, false, false);
        assert_eq!(b.detection_score(), 1.0);
        assert!((b.delay_multiplier() - 1.5).abs() < 1e-9);

        b.record_outcome(false, false, true);
        assert_eq!(b.detection_score(), 4.0);

        for _ in 0..10 {
            b.record_outcome(false, true, false);
        }
        assert!(b.delay_multiplier() <= 10.0);
    }

    #[test]
    fn test_plain_failures_cap_at_five() {
        let mut b = budget(5);
        for _ in 0..20 {
            b.record_outcome(false, false, false);
        }
        assert!((b.delay_multiplier() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_decays_score_then_multiplier() {
        let mut b = budget(5);
        b.record_outcome(false, false, true); // score 3, mult 1.8
        b.record_outcome(true, false, false); // score 2.5
        assert_eq!(b.detection_score(), 2.5);
        assert!((b.delay_multiplier() - 1.8).abs() < 1e-9);

        for _ in 0..5 {
            b.record_outcome(true, false, false);
        }
        assert_eq!(b.detection_score(), 0.0);
        // multiplier only decays once the score is clean
        assert!(b.delay_multiplier() < 1.8);
        assert!(b.delay_multiplier() >= 1.0);
    }

    #[tokio::test]
    async fn test_scoped_budgets_isolate_scopes() {
        let budgets = ScopedBudgets::new(limits(100), BackoffCapsConfig::default());
        let acc = Scope::Account("a1".into());
        budgets.record_outcome(&acc, false, true, false).await;
        assert!(budgets.multiplier(&acc).await > 1.0);
        assert_eq!(budgets.multiplier(&Scope::Global).await, 1.0);
    }

    #[tokio::test]
    async fn test_acquire_records_call() {
        let budgets = ScopedBudgets::new(limits(100), BackoffCapsConfig::default());
        budgets.acquire(&Scope::Global).await;
        let b = budgets.budget(&Scope::Global).await;
        assert_eq!(b.lock().await.minute_window_len(Utc::now()), 1);
    }
}
