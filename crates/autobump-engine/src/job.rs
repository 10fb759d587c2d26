//! Job definitions — one scheduled unit of automated action.
//!
//! A single abstraction covers one-shot publication and recurring
//! bump/follow/message automation; `recurring` is the only difference.

use autobump_core::types::{ActionType, Strategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle status.
///
/// Transitions run Scheduled→InProgress→{Success | RateLimited |
/// Failed}; failure states loop back to Scheduled while retries
/// remain, otherwise the job is Exhausted. Terminal states are
/// immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    InProgress,
    Success,
    Failed,
    RateLimited,
    Cancelled,
    /// Retries used up. The last error kind is on `error`.
    Exhausted,
}

impl JobStatus {
    /// Failed/RateLimited only appear once retries are used up; a job
    /// with retries left goes straight back to Scheduled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success
                | JobStatus::Cancelled
                | JobStatus::Exhausted
                | JobStatus::Failed
                | JobStatus::RateLimited
        )
    }
}

/// One scheduled action against the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub action_type: ActionType,
    /// Listing/user/conversation id the action targets.
    pub target_id: String,
    pub strategy: Strategy,
    /// 1-10, higher dispatches first.
    pub priority: u8,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_time: DateTime<Utc>,
    /// Whether a successful run schedules a follow-up.
    pub recurring: bool,
    /// Opaque payload from the action client on success.
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        action_type: ActionType,
        target_id: &str,
        strategy: Strategy,
        priority: u8,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            action_type,
            target_id: target_id.to_string(),
            strategy,
            priority: priority.clamp(1, 10),
            status: JobStatus::Scheduled,
            retry_count: 0,
            max_retries: 3,
            scheduled_time,
            recurring: action_type.recurring_by_default(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the dispatcher should pick this job up now.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.scheduled_time <= now
    }

    pub fn touch(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Push the job back onto the schedule for a retry, or into its
    /// terminal state when retries are used up. `terminal` is the label
    /// matching the last error kind (Failed or RateLimited).
    pub fn reschedule_or_exhaust(
        &mut self,
        next_time: DateTime<Utc>,
        terminal: JobStatus,
        error: String,
    ) {
        self.error = Some(error);
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.scheduled_time = next_time;
            self.touch(JobStatus::Scheduled);
        } else {
            debug_assert!(matches!(terminal, JobStatus::Failed | JobStatus::RateLimited));
            // Exhausted unless the caller wants the error-kind label.
            let status = if terminal == JobStatus::RateLimited {
                JobStatus::RateLimited
            } else {
                JobStatus::Exhausted
            };
            self.touch(status);
        }
    }
}
