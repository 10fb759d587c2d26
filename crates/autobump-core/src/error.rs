//! Error taxonomy for the orchestrator.
//!
//! Only real failures are errors. "No account available" is a soft
//! condition (a job simply stays scheduled) and is modeled as `None`
//! at the registry API, never as an error variant.

use thiserror::Error;

/// All errors produced by the orchestrator core.
#[derive(Debug, Error)]
pub enum AutobumpError {
    /// Invalid strategy/parameters at setup time. Fatal for the request.
    #[error("configuration error: {0}")]
    Config(String),

    /// Job store read/write failed.
    #[error("store error: {0}")]
    Store(String),

    /// The external action client failed in a way that is not a normal
    /// per-action outcome (those are reported through `ActionResult`).
    #[error("client error: {0}")]
    Client(String),

    /// Referenced job does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Referenced account does not exist in the pool.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AutobumpError>;
