//! # Autobump Engine
//!
//! The orchestration core: schedules and executes rate-limited actions
//! (bump, follow, unfollow, message, publish) against a ban-sensitive
//! platform, spreading load across a pool of accounts.
//!
//! ## Architecture
//! ```text
//! Orchestrator (one per tenant — no ambient globals)
//!   ├── PolicyEngine: strategy → next execution time(s)
//!   ├── AccountRegistry: health scores, cooldowns, quarantine
//!   ├── RateBudget: sliding windows + detection-score backoff
//!   └── Dispatcher (tokio interval loop)
//!         ├── poll due jobs, sort (priority desc, time asc)
//!         ├── lease account → acquire budget → ActionClient.execute
//!         └── outcome → registry + budget → retry / follow-up / done
//! ```
//!
//! The action client, credential store, and job store are traits; the
//! host wires in the real platform client and persistence.

pub mod account;
pub mod budget;
pub mod client;
pub mod dispatcher;
pub mod job;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod store;

pub use account::{Account, AccountStatus, Outcome};
pub use budget::{RateBudget, Scope, ScopedBudgets};
pub use client::{ActionClient, ActionResult, CredentialStore, ErrorKind};
pub use dispatcher::{Dispatcher, DispatchStats};
pub use job::{Job, JobStatus};
pub use orchestrator::{Orchestrator, StatusReport};
pub use policy::PolicyEngine;
pub use registry::AccountRegistry;
pub use store::{InMemoryJobStore, JobStore, JsonJobStore};
