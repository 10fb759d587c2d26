//! Shared types: action kinds, scheduling strategies, credential handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of action a job performs against the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Repost a listing so it surfaces at the top of search again.
    Bump,
    Follow,
    Unfollow,
    Message,
    Publish,
}

impl ActionType {
    /// Bumps recur by default; everything else is one-shot unless the
    /// job says otherwise.
    pub fn recurring_by_default(&self) -> bool {
        matches!(self, ActionType::Bump)
    }

    pub const ALL: [ActionType; 5] = [
        ActionType::Bump,
        ActionType::Follow,
        ActionType::Unfollow,
        ActionType::Message,
        ActionType::Publish,
    ];
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Bump => write!(f, "bump"),
            ActionType::Follow => write!(f, "follow"),
            ActionType::Unfollow => write!(f, "unfollow"),
            ActionType::Message => write!(f, "message"),
            ActionType::Publish => write!(f, "publish"),
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bump" => Ok(ActionType::Bump),
            "follow" => Ok(ActionType::Follow),
            "unfollow" => Ok(ActionType::Unfollow),
            "message" => Ok(ActionType::Message),
            "publish" => Ok(ActionType::Publish),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// Timing strategy for scheduling jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Post inside high-traffic windows (lunch + evening on weekdays,
    /// wider bands on weekends).
    PeakHours,
    /// Twice a day at noon and end of business.
    BusinessHours,
    /// Concentrate on Saturday/Sunday.
    WeekendFocus,
    /// Spread a batch evenly across upcoming days.
    SpreadEvenly,
    /// Steady cadence, one slot every 4-6 hours.
    Continuous,
    /// Peak-hours timing with extra jitter. Placeholder heuristic,
    /// not a trained model.
    SmartAi,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::PeakHours => write!(f, "peak_hours"),
            Strategy::BusinessHours => write!(f, "business_hours"),
            Strategy::WeekendFocus => write!(f, "weekend_focus"),
            Strategy::SpreadEvenly => write!(f, "spread_evenly"),
            Strategy::Continuous => write!(f, "continuous"),
            Strategy::SmartAi => write!(f, "smart_ai"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "peak_hours" | "peak" => Ok(Strategy::PeakHours),
            "business_hours" | "business" => Ok(Strategy::BusinessHours),
            "weekend_focus" | "weekend" => Ok(Strategy::WeekendFocus),
            "spread_evenly" | "spread" => Ok(Strategy::SpreadEvenly),
            "continuous" => Ok(Strategy::Continuous),
            "smart_ai" | "smart" => Ok(Strategy::SmartAi),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Opaque reference to a stored credential. The secret itself never
/// passes through the orchestrator; the action client resolves the
/// handle against the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHandle(pub String);

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Handles may embed vault paths; keep log output short.
        write!(f, "cred:{}", self.0)
    }
}
