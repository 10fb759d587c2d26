//! Autobump configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration for one orchestrator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds between dispatch cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Max jobs dispatched concurrently (worker pool size).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatch: usize,
    /// Max jobs picked up in a single dispatch cycle.
    #[serde(default = "default_cycle_cap")]
    pub max_per_cycle: usize,
    /// Daily execution cap per account. Resets at midnight.
    #[serde(default = "default_daily_cap_account")]
    pub daily_cap_per_account: u32,
    /// Daily execution cap per action type. Resets at midnight.
    #[serde(default = "default_daily_cap_action")]
    pub daily_cap_per_action_type: u32,
    /// Timeout for one external action call, in seconds.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
    #[serde(default)]
    pub rate_budget: RateBudgetConfig,
    #[serde(default)]
    pub backoff_caps: BackoffCapsConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    #[serde(default)]
    pub jitter: JitterConfig,
}

fn default_poll_interval() -> u64 { 60 }
fn default_max_concurrent() -> usize { 3 }
fn default_cycle_cap() -> usize { 10 }
fn default_daily_cap_account() -> u32 { 30 }
fn default_daily_cap_action() -> u32 { 100 }
fn default_action_timeout() -> u64 { 120 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrent_dispatch: default_max_concurrent(),
            max_per_cycle: default_cycle_cap(),
            daily_cap_per_account: default_daily_cap_account(),
            daily_cap_per_action_type: default_daily_cap_action(),
            action_timeout_secs: default_action_timeout(),
            rate_budget: RateBudgetConfig::default(),
            backoff_caps: BackoffCapsConfig::default(),
            quarantine: QuarantineConfig::default(),
            jitter: JitterConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load config from the default path (~/.autobump/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AutobumpError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::AutobumpError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AutobumpError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autobump")
            .join("config.toml")
    }

    /// Get the Autobump home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autobump")
    }

    /// Reject configs the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(crate::error::AutobumpError::Config(
                "poll_interval_secs must be > 0".into(),
            ));
        }
        if self.max_concurrent_dispatch == 0 {
            return Err(crate::error::AutobumpError::Config(
                "max_concurrent_dispatch must be > 0".into(),
            ));
        }
        if self.rate_budget.per_minute == 0
            || self.rate_budget.per_hour == 0
            || self.rate_budget.per_day == 0
        {
            return Err(crate::error::AutobumpError::Config(
                "rate_budget window limits must be > 0".into(),
            ));
        }
        if self.jitter.inter_job_min_ms > self.jitter.inter_job_max_ms {
            return Err(crate::error::AutobumpError::Config(
                "jitter.inter_job_min_ms must be <= inter_job_max_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Sliding-window call limits for one rate-budget scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBudgetConfig {
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
    #[serde(default = "default_per_day")]
    pub per_day: u32,
    /// Base delay between calls before backoff, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_per_minute() -> u32 { 5 }
fn default_per_hour() -> u32 { 60 }
fn default_per_day() -> u32 { 300 }
fn default_base_delay() -> u64 { 1000 }

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            per_day: default_per_day(),
            base_delay_ms: default_base_delay(),
        }
    }
}

/// Ceilings for the adaptive delay multiplier, per failure kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffCapsConfig {
    #[serde(default = "default_cap_plain")]
    pub plain: f64,
    #[serde(default = "default_cap_rate_limited")]
    pub rate_limited: f64,
    #[serde(default = "default_cap_captcha")]
    pub captcha: f64,
}

fn default_cap_plain() -> f64 { 5.0 }
fn default_cap_rate_limited() -> f64 { 8.0 }
fn default_cap_captcha() -> f64 { 10.0 }

impl Default for BackoffCapsConfig {
    fn default() -> Self {
        Self {
            plain: default_cap_plain(),
            rate_limited: default_cap_rate_limited(),
            captcha: default_cap_captcha(),
        }
    }
}

/// How long accounts sit out after trouble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    /// After the platform rate-limits an account, in minutes.
    #[serde(default = "default_quarantine_rate_limited")]
    pub rate_limited_mins: u32,
    /// After success rate collapses below the floor, in minutes.
    #[serde(default = "default_quarantine_low_success")]
    pub low_success_rate_mins: u32,
}

fn default_quarantine_rate_limited() -> u32 { 60 }
fn default_quarantine_low_success() -> u32 { 24 * 60 }

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            rate_limited_mins: default_quarantine_rate_limited(),
            low_success_rate_mins: default_quarantine_low_success(),
        }
    }
}

/// Human-scale pauses between successful dispatches in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterConfig {
    #[serde(default = "default_jitter_min")]
    pub inter_job_min_ms: u64,
    #[serde(default = "default_jitter_max")]
    pub inter_job_max_ms: u64,
}

fn default_jitter_min() -> u64 { 2 * 60 * 1000 }
fn default_jitter_max() -> u64 { 5 * 60 * 1000 }

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            inter_job_min_ms: default_jitter_min(),
            inter_job_max_ms: default_jitter_max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.rate_budget.per_minute, 5);
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let mut cfg = OrchestratorConfig::default();
        cfg.poll_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_with_partial_fields() {
        let toml = r#"
            poll_interval_secs = 30

            [rate_budget]
            per_minute = 10
        "#;
        let cfg: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.poll_interval_secs, 30);
        assert_eq!(cfg.rate_budget.per_minute, 10);
        // Unspecified fields fall back to defaults
        assert_eq!(cfg.rate_budget.per_hour, 60);
        assert_eq!(cfg.daily_cap_per_account, 30);
    }
}
