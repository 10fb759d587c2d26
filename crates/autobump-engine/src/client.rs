//! External collaborator contracts: the action client that actually
//! talks to the platform, and the credential store that resolves
//! account handles.
//!
//! The engine never retries through these — retry policy lives in the
//! dispatcher — and never sees raw secrets.

use async_trait::async_trait;
use autobump_core::types::{ActionType, CredentialHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a failed action failed, as classified by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    Captcha,
    NotFound,
    Other,
}

/// Result of one action execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    /// Opaque payload (e.g. new listing id after a publish).
    pub payload: Option<serde_json::Value>,
}

impl ActionResult {
    pub fn ok(payload: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            error_kind: None,
            message: None,
            payload,
        }
    }

    pub fn err(kind: ErrorKind, message: &str) -> Self {
        Self {
            success: false,
            error_kind: Some(kind),
            message: Some(message.to_string()),
            payload: None,
        }
    }
}

/// Executes one action against the platform. Implementations must be
/// safe to call repeatedly and must not retry internally.
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn execute(
        &self,
        action_type: ActionType,
        credential: &CredentialHandle,
        target_id: &str,
    ) -> ActionResult;
}

/// Resolves account ids to credential handles.
pub trait CredentialStore: Send + Sync {
    fn get(&self, account_id: &str) -> Option<CredentialHandle>;
}

/// Fixed in-memory credential mapping. Enough for tests and for hosts
/// that load handles at startup.
#[derive(Default)]
pub struct StaticCredentialStore {
    handles: HashMap<String, CredentialHandle>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account_id: &str, handle: CredentialHandle) {
        self.handles.insert(account_id.to_string(), handle);
    }
}

impl CredentialStore for StaticCredentialStore {
    fn get(&self, account_id: &str) -> Option<CredentialHandle> {
        self.handles.get(account_id).cloned()
    }
}
