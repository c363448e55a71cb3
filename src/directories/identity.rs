//! Identity service client (UAA equivalent) and its error classification
//! (§4.D):
//!
//! - URL/network error → `UAADown` (retryable).
//! - HTTP 404 whose body contains "Requested route" → `UAADown` (retryable).
//! - Any other HTTP 404 → `UAAGeneric` (terminal).
//! - Any other HTTP failure → `UAADown` (retryable, message preserved).
//!
//! Grounded on `examples/original_source/postal/errors.go`'s `UAAErrorFor`.

use crate::error::Retryable;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// A resolved user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// The identity service's user GUID.
    pub guid: String,
    /// The user's email address.
    pub email: String,
}

/// Errors resolving a user through the identity service.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Network/connection failure, or a non-404 HTTP failure — transient.
    #[error("identity service unavailable: {0}")]
    Down(String),

    /// An HTTP 404 whose body is not the load-balancer's routing-miss
    /// message — the user genuinely does not exist. Terminal.
    #[error("identity service reported an unknown error: {0}")]
    Generic(String),
}

impl Retryable for IdentityError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Down(_))
    }
}

/// Pluggable identity-resolution collaborator (§4.D).
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Resolve a user GUID to its current directory record.
    async fn get_user(&self, guid: &str) -> Result<UserInfo, IdentityError>;
}

/// `reqwest`-backed [`IdentityClient`].
pub struct HttpIdentityClient {
    client: Client,
    base_url: String,
}

impl HttpIdentityClient {
    /// Build a client against `base_url` (the configured `UAA_HOST`) with
    /// the given request deadline (§5).
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Classify a failed HTTP response the way the original's
    /// `UAAErrorFor` does.
    fn classify_http_failure(status: StatusCode, body: &str) -> IdentityError {
        if status == StatusCode::NOT_FOUND {
            if body.contains("Requested route") {
                IdentityError::Down("identity service is unavailable".to_string())
            } else {
                IdentityError::Generic(format!("unknown 404 error message: {body}"))
            }
        } else {
            IdentityError::Down(body.to_string())
        }
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn get_user(&self, guid: &str) -> Result<UserInfo, IdentityError> {
        let url = format!("{}/Users/{guid}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| IdentityError::Down(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_http_failure(status, &body));
        }

        #[derive(serde::Deserialize)]
        struct UaaUser {
            id: String,
            emails: Vec<UaaEmail>,
        }
        #[derive(serde::Deserialize)]
        struct UaaEmail {
            value: String,
        }

        let user: UaaUser = response
            .json()
            .await
            .map_err(|err| IdentityError::Down(err.to_string()))?;

        Ok(UserInfo {
            guid: user.id,
            email: user.emails.into_iter().next().map_or_else(String::new, |e| e.value),
        })
    }
}
