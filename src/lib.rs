//! notifyd: a multi-tenant notification dispatch service.
//!
//! Campaigns are submitted over a single HTTP endpoint, fanned out into
//! per-recipient delivery jobs against a durable Postgres-backed queue,
//! and drained by a pool of polling workers that run the SMTP delivery
//! workflow with backoff-based retry.
//!
//! # Architecture
//!
//! - [`queue`] — the durable job store every other component reads from
//!   or writes to.
//! - [`strategy`] and [`audience`] — expand a submitted campaign into its
//!   resolved recipient list.
//! - [`template`] — resolves and renders the subject/text/html triad for
//!   a delivery.
//! - [`delivery`] and [`mail`] — the per-recipient send workflow and its
//!   SMTP transport.
//! - [`worker`] — the poll/dispatch/retry loop tying the above together.
//! - [`retry`] — the shared retry-vs-dead-letter decision.
//! - [`metrics`] — the periodic queue-depth gauge.
//! - [`submission`] — the one inbound HTTP route.
//! - [`directories`] — identity and resource-catalog clients used by the
//!   audience resolver.
//! - [`config`], [`error`], [`observability`], [`encryption`] — ambient
//!   infrastructure shared by every component above.

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod audience;
pub mod config;
pub mod delivery;
pub mod directories;
pub mod encryption;
pub mod error;
pub mod mail;
pub mod metrics;
pub mod model;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod strategy;
pub mod submission;
pub mod template;
pub mod worker;

/// Convenience re-exports for wiring up a running service.
pub mod prelude {
    pub use crate::config::NotifydConfig;
    pub use crate::delivery::{DeliveryWorkflow, PreferenceStore};
    pub use crate::encryption::Cloak;
    pub use crate::error::NotifydError;
    pub use crate::mail::{MailClient, SmtpMailClient};
    pub use crate::queue::{PgQueue, Queue};
    pub use crate::strategy::StrategyDeterminer;
    pub use crate::submission::{router, SubmissionState};
    pub use crate::template::TemplateStore;
    pub use crate::worker::WorkerGenerator;
}
