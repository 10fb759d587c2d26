//! Account records — health counters, cooldown, quarantine.
//!
//! An account is a credentialed identity in the pool. The registry owns
//! these records; everything here is pure state transition so it can be
//! tested with injected clocks.

use autobump_core::config::QuarantineConfig;
use autobump_core::types::CredentialHandle;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Health status of an account in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Healthy,
    /// Degraded success rate or repeated captchas. Still selectable.
    Warning,
    /// The platform pushed back. Sits out until `quarantined_until`.
    RateLimited,
    /// Success rate collapsed. Long sit-out.
    Quarantined,
    /// Permanently out of the pool.
    Banned,
}

/// Outcome of one executed action, as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimited,
    Captcha,
    OtherFailure,
}

/// One credentialed account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// Opaque reference into the credential store. Never the secret.
    pub credential: CredentialHandle,
    pub status: AccountStatus,
    /// Priority tier, 1-10. Higher is preferred.
    pub priority: u8,
    pub total_ops: u32,
    pub success_ops: u32,
    pub fail_ops: u32,
    pub rate_limit_hits: u32,
    pub captcha_hits: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub quarantined_until: Option<DateTime<Utc>>,
    /// Exclusive execution lease. Held from selection until the outcome
    /// is recorded, so same-account runs never overlap.
    #[serde(skip)]
    pub leased: bool,
}

impl Account {
    pub fn new(id: &str, credential: CredentialHandle, priority: u8) -> Self {
        Self {
            id: id.to_string(),
            credential,
            status: AccountStatus::Healthy,
            priority: priority.clamp(1, 10),
            total_ops: 0,
            success_ops: 0,
            fail_ops: 0,
            rate_limit_hits: 0,
            captcha_hits: 0,
            created_at: Utc::now(),
            last_used_at: None,
            last_success_at: None,
            last_failure_at: None,
            quarantined_until: None,
            leased: false,
        }
    }

    /// success_ops / total_ops; a fresh account counts as perfect.
    pub fn success_rate(&self) -> f64 {
        if self.total_ops == 0 {
            1.0
        } else {
            f64::from(self.success_ops) / f64::from(self.total_ops)
        }
    }

    /// Minimum idle time between uses, derived from success rate.
    pub fn cooldown_minutes(&self) -> i64 {
        let rate = self.success_rate();
        if rate < 0.5 {
            15
        } else if rate < 0.8 {
            10
        } else {
            5
        }
    }

    /// Clear an expired quarantine on a health read. Status falls back
    /// to Healthy or Warning depending on success rate.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if let Some(until) = self.quarantined_until {
            if now > until {
                self.quarantined_until = None;
                self.status = if self.success_rate() < 0.7 {
                    AccountStatus::Warning
                } else {
                    AccountStatus::Healthy
                };
            }
        }
    }

    /// Whether this account may execute an action right now.
    /// Side-effect-free; call `refresh` first for quarantine expiry.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        if self.leased {
            return false;
        }
        match self.status {
            AccountStatus::Banned => return false,
            AccountStatus::Quarantined | AccountStatus::RateLimited => {
                if let Some(until) = self.quarantined_until {
                    if now < until {
                        return false;
                    }
                }
            }
            _ => {}
        }
        if let Some(last) = self.last_used_at {
            if now - last < Duration::minutes(self.cooldown_minutes()) {
                return false;
            }
        }
        true
    }

    /// Selection score before jitter. Rewards reliability, priority and
    /// idle time; punishes rate-limit and captcha history.
    pub fn score(&self, now: DateTime<Utc>) -> f64 {
        let idle_hours = match self.last_used_at {
            Some(last) => ((now - last).num_minutes() as f64 / 60.0).max(0.0),
            None => 24.0,
        };
        self.success_rate() * 100.0
            + f64::from(self.priority) * 20.0
            + (idle_hours * 10.0).min(50.0)
            - f64::from(self.rate_limit_hits) * 10.0
            - f64::from(self.captcha_hits) * 5.0
    }

    /// Apply one action outcome. The only mutation path for counters.
    pub fn record_outcome(&mut self, outcome: Outcome, quarantine: &QuarantineConfig, now: DateTime<Utc>) {
        self.total_ops += 1;
        self.last_used_at = Some(now);

        // RateLimited/Quarantined set in this call win over the generic
        // success-rate reclassification below.
        let mut pinned = false;

        match outcome {
            Outcome::Success => {
                self.success_ops += 1;
                self.last_success_at = Some(now);
            }
            Outcome::RateLimited => {
                self.fail_ops += 1;
                self.rate_limit_hits += 1;
                self.last_failure_at = Some(now);
                self.status = AccountStatus::RateLimited;
                self.quarantined_until =
                    Some(now + Duration::minutes(i64::from(quarantine.rate_limited_mins)));
                pinned = true;
            }
            Outcome::Captcha => {
                self.fail_ops += 1;
                self.captcha_hits += 1;
                self.last_failure_at = Some(now);
            }
            Outcome::OtherFailure => {
                self.fail_ops += 1;
                self.last_failure_at = Some(now);
            }
        }

        let rate = self.success_rate();
        if self.total_ops >= 10 && rate < 0.3 {
            self.status = AccountStatus::Quarantined;
            self.quarantined_until =
                Some(now + Duration::minutes(i64::from(quarantine.low_success_rate_mins)));
            pinned = true;
        }

        if !pinned && self.status != AccountStatus::Banned {
            if rate < 0.7 {
                self.status = AccountStatus::Warning;
            } else if outcome == Outcome::Captcha && self.captcha_hits > 3 {
                self.status = AccountStatus::Warning;
            } else {
                self.status = AccountStatus::Healthy;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("acc-1", CredentialHandle("vault/acc-1".into()), 5)
    }

    fn quarantine() -> QuarantineConfig {
        QuarantineConfig::default()
    }

    #[test]
    fn test_fresh_account_is_perfect_and_available() {
        let a = account();
        let now = Utc::now();
        assert_eq!(a.success_rate(), 1.0);
        assert_eq!(a.cooldown_minutes(), 5);
        assert!(a.is_available(now));
    }

    #[test]
    fn test_success_rate_invariant() {
        let mut a = account();
        let now = Utc::now();
        let q = quarantine();
        a.record_outcome(Outcome::Success, &q, now);
        a.record_outcome(Outcome::Success, &q, now);
        a.record_outcome(Outcome::OtherFailure, &q, now);
        assert_eq!(a.total_ops, 3);
        assert!((a.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_limited_quarantines_for_an_hour() {
        let mut a = account();
        let now = Utc::now();
        a.record_outcome(Outcome::RateLimited, &quarantine(), now);
        assert_eq!(a.status, AccountStatus::RateLimited);
        assert_eq!(a.quarantined_until, Some(now + Duration::hours(1)));
        assert!(!a.is_available(now));
        assert!(!a.is_available(now + Duration::minutes(59)));
    }

    #[test]
    fn test_low_success_rate_quarantines_24h() {
        // 2 successes then 8 failures: total 10, rate 0.2
        let mut a = account();
        let now = Utc::now();
        let q = quarantine();
        a.record_outcome(Outcome::Success, &q, now);
        a.record_outcome(Outcome::Success, &q, now);
        for _ in 0..8 {
            a.record_outcome(Outcome::OtherFailure, &q, now);
        }
        assert_eq!(a.total_ops, 10);
        assert!((a.success_rate() - 0.2).abs() < 1e-9);
        assert_eq!(a.status, AccountStatus::Quarantined);
        assert_eq!(a.quarantined_until, Some(now + Duration::hours(24)));
        assert!(!a.is_available(now));
    }

    #[test]
    fn test_not_quarantined_below_ten_ops() {
        let mut a = account();
        let now = Utc::now();
        let q = quarantine();
        for _ in 0..5 {
            a.record_outcome(Outcome::OtherFailure, &q, now);
        }
        assert_ne!(a.status, AccountStatus::Quarantined);
        assert_eq!(a.status, AccountStatus::Warning);
    }

    #[test]
    fn test_captcha_spam_degrades_to_warning() {
        let mut a = account();
        let now = Utc::now();
        let q = quarantine();
        // Keep the rate healthy with successes in between.
        for _ in 0..12 {
            a.record_outcome(Outcome::Success, &q, now);
        }
        for _ in 0..4 {
            a.record_outcome(Outcome::Captcha, &q, now);
        }
        assert_eq!(a.status, AccountStatus::Warning);
        assert_eq!(a.captcha_hits, 4);
    }

    #[test]
    fn test_quarantine_expiry_clears_on_refresh() {
        let mut a = account();
        let now = Utc::now();
        a.record_outcome(Outcome::RateLimited, &quarantine(), now);
        let later = now + Duration::hours(2);
        a.refresh(later);
        assert_eq!(a.quarantined_until, None);
        assert_eq!(a.status, AccountStatus::Healthy);
    }

    #[test]
    fn test_cooldown_blocks_reuse() {
        let mut a = account();
        let now = Utc::now();
        a.record_outcome(Outcome::Success, &quarantine(), now);
        assert!(!a.is_available(now + Duration::minutes(2)));
        assert!(a.is_available(now + Duration::minutes(6)));
    }

    #[test]
    fn test_cooldown_stretches_with_failures() {
        let mut a = account();
        let now = Utc::now();
        let q = quarantine();
        a.record_outcome(Outcome::Success, &q, now);
        for _ in 0..2 {
            a.record_outcome(Outcome::OtherFailure, &q, now);
        }
        // rate = 1/3 < 0.5
        assert_eq!(a.cooldown_minutes(), 15);
    }

    #[test]
    fn test_score_punishes_rate_limit_history() {
        let now = Utc::now();
        let clean = account();
        let mut burned = account();
        burned.rate_limit_hits = 3;
        assert!(clean.score(now) > burned.score(now));
    }

    #[test]
    fn test_leased_account_never_available() {
        let mut a = account();
        a.leased = true;
        assert!(!a.is_available(Utc::now()));
    }
}
