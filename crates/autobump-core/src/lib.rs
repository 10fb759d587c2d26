//! # Autobump Core
//!
//! Shared foundation for the Autobump orchestrator: configuration,
//! error taxonomy, and the small set of types every crate needs.

pub mod config;
pub mod error;
pub mod types;

pub use config::OrchestratorConfig;
pub use error::{AutobumpError, Result};
pub use types::{ActionType, CredentialHandle, Strategy};
