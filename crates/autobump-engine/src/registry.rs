//! Account Health Registry — owns the account pool, scores and leases
//! accounts for execution, and folds action outcomes back into health
//! state.
//!
//! The registry is plain synchronous state; the orchestrator shares it
//! behind a `tokio::sync::Mutex`. No lock is ever held across an await.

use std::collections::HashMap;

use autobump_core::config::QuarantineConfig;
use autobump_core::error::{AutobumpError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::account::{Account, AccountStatus, Outcome};

/// The pool of credentialed accounts.
pub struct AccountRegistry {
    accounts: HashMap<String, Account>,
    quarantine: QuarantineConfig,
}

impl AccountRegistry {
    pub fn new(quarantine: QuarantineConfig) -> Self {
        Self {
            accounts: HashMap::new(),
            quarantine,
        }
    }

    /// Register an account with the pool.
    pub fn add_account(&mut self, account: Account) {
        tracing::info!("👤 Account registered: {} (priority {})", account.id, account.priority);
        self.accounts.insert(account.id.clone(), account);
    }

    /// Detach an account from the pool. Jobs already holding its id are
    /// unaffected; they will simply select another account next time.
    pub fn remove_account(&mut self, id: &str) -> bool {
        self.accounts.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn list_accounts(&self) -> Vec<&Account> {
        let mut v: Vec<&Account> = self.accounts.values().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        v
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Count of accounts currently sitting out (quarantined or
    /// platform rate-limited).
    pub fn sidelined_count(&self, now: DateTime<Utc>) -> usize {
        self.accounts
            .values()
            .filter(|a| {
                matches!(a.status, AccountStatus::RateLimited | AccountStatus::Quarantined)
                    && a.quarantined_until.is_some_and(|u| now < u)
            })
            .count()
    }

    /// Whether the given account could execute right now.
    pub fn is_available(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.accounts.get(id).is_some_and(|a| a.is_available(now))
    }

    /// Pick the best available account and lease it. Returns `None`
    /// when the pool has no capacity right now — a soft condition, the
    /// caller defers the job.
    ///
    /// Scores get a ±10% jitter so equally-good accounts rotate instead
    /// of the same one being hammered every cycle.
    pub fn select_best(&mut self, now: DateTime<Utc>) -> Option<Account> {
        for account in self.accounts.values_mut() {
            account.refresh(now);
        }

        let mut rng = rand::thread_rng();
        let best_id = self
            .accounts
            .values()
            .filter(|a| a.is_available(now))
            .map(|a| (a.id.clone(), a.score(now) * rng.gen_range(0.9..1.1)))
            .max_by(|(_, x), (_, y)| x.total_cmp(y))
            .map(|(id, _)| id)?;

        let account = self.accounts.get_mut(&best_id)?;
        account.leased = true;
        tracing::debug!(
            "🎯 Account selected: {} (rate {:.2}, {} ops)",
            account.id,
            account.success_rate(),
            account.total_ops
        );
        Some(account.clone())
    }

    /// Fold an outcome back into the account and release its lease.
    pub fn record_outcome(&mut self, id: &str, outcome: Outcome, now: DateTime<Utc>) -> Result<()> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| AutobumpError::UnknownAccount(id.to_string()))?;
        account.record_outcome(outcome, &self.quarantine, now);
        account.leased = false;
        if account.status != AccountStatus::Healthy {
            tracing::warn!(
                "🩺 Account {} now {:?} (rate {:.2}, {} rate-limits, {} captchas)",
                account.id,
                account.status,
                account.success_rate(),
                account.rate_limit_hits,
                account.captcha_hits
            );
        }
        Ok(())
    }

    /// Release a lease without recording an outcome. Used when a
    /// dispatch aborts before the action ran (e.g. budget shutdown).
    pub fn release(&mut self, id: &str) {
        if let Some(account) = self.accounts.get_mut(id) {
            account.leased = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobump_core::types::CredentialHandle;
    use chrono::Duration;

    fn registry() -> AccountRegistry {
        AccountRegistry::new(QuarantineConfig::default())
    }

    fn account(id: &str, priority: u8) -> Account {
        Account::new(id, CredentialHandle(format!("vault/{id}")), priority)
    }

    #[test]
    fn test_select_best_never_returns_unavailable() {
        let mut reg = registry();
        let now = Utc::now();
        reg.add_account(account("good", 5));
        let mut bad = account("bad", 10);
        bad.record_outcome(Outcome::RateLimited, &QuarantineConfig::default(), now);
        reg.add_account(bad);

        for _ in 0..20 {
            let picked = reg.select_best(now).expect("good account available");
            assert_eq!(picked.id, "good");
            reg.release("good");
        }
    }

    #[test]
    fn test_select_best_empty_pool_is_none_not_error() {
        let mut reg = registry();
        assert!(reg.select_best(Utc::now()).is_none());
    }

    #[test]
    fn test_select_best_leases_the_account() {
        let mut reg = registry();
        let now = Utc::now();
        reg.add_account(account("only", 5));
        assert!(reg.select_best(now).is_some());
        // Leased: a second concurrent selection must not hand it out again.
        assert!(reg.select_best(now).is_none());
        reg.record_outcome("only", Outcome::Success, now).unwrap();
        // Outcome recorded: lease released, but cooldown now applies.
        assert!(!reg.is_available("only", now));
        assert!(reg.is_available("only", now + Duration::minutes(6)));
    }

    #[test]
    fn test_priority_dominates_selection() {
        let mut reg = registry();
        let now = Utc::now();
        reg.add_account(account("low", 1));
        reg.add_account(account("high", 10));
        // priority gap is 180 points, far beyond the ±10% jitter band
        let picked = reg.select_best(now).unwrap();
        assert_eq!(picked.id, "high");
    }

    #[test]
    fn test_quarantined_account_reenters_after_expiry() {
        let mut reg = registry();
        let now = Utc::now();
        let mut a = account("a", 5);
        a.record_outcome(Outcome::RateLimited, &QuarantineConfig::default(), now);
        reg.add_account(a);

        assert!(reg.select_best(now).is_none());
        let later = now + Duration::hours(2);
        let picked = reg.select_best(later).expect("quarantine expired");
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn test_record_outcome_unknown_account_errors() {
        let mut reg = registry();
        assert!(reg.record_outcome("ghost", Outcome::Success, Utc::now()).is_err());
    }

    #[test]
    fn test_remove_account_detaches() {
        let mut reg = registry();
        reg.add_account(account("a", 5));
        assert!(reg.remove_account("a"));
        assert!(!reg.remove_account("a"));
        assert_eq!(reg.account_count(), 0);
    }

    #[test]
    fn test_sidelined_count() {
        let mut reg = registry();
        let now = Utc::now();
        reg.add_account(account("ok", 5));
        let mut limited = account("limited", 5);
        limited.record_outcome(Outcome::RateLimited, &QuarantineConfig::default(), now);
        reg.add_account(limited);
        assert_eq!(reg.sidelined_count(now), 1);
        assert_eq!(reg.sidelined_count(now + Duration::hours(2)), 0);
    }
}
