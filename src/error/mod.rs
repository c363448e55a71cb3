//! Crate-wide error aggregation.
//!
//! Individual pipeline stages define their own `thiserror` enums
//! (`directories::IdentityError`, `mail::MailError`,
//! `delivery::DeliveryError`, ...) so that `worker` can match on the
//! narrowest type it needs. `NotifydError` exists only at the boundary the
//! `submission` handler talks across, where every stage's error needs a
//! single return type.

use thiserror::Error;

/// Top-level error type returned by the HTTP submission boundary (§6).
#[derive(Debug, Error)]
pub enum NotifydError {
    /// Malformed submission payload.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Referenced campaign type, template, or sender does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Submitting client lacks a required OAuth2 scope.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job queue error.
    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),
}

/// Marker trait letting `worker` ask any pipeline-stage error whether the
/// job should be retried (§7 error taxonomy).
pub trait Retryable {
    /// Returns `true` if the failure is transient and the job should be
    /// retried with backoff; `false` if it is terminal.
    fn is_retryable(&self) -> bool;
}
