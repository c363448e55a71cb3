//! Resource catalog client (Cloud Controller equivalent) used by the space
//! and org audience strategies (§4.D).

use crate::error::Retryable;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// A membership role within a space or organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// A space/org developer.
    Developer,
    /// A space/org manager.
    Manager,
    /// A space/org auditor.
    Auditor,
}

/// A user's membership in a space or organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// The member's user GUID.
    pub user_guid: String,
    /// The role they hold.
    pub role: Role,
}

/// Errors querying the resource catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Network/connection failure, or a non-404 HTTP failure — transient.
    #[error("catalog service unavailable: {0}")]
    Down(String),

    /// The referenced space or organization does not exist. Terminal; the
    /// campaign job surfaces this as a 404-equivalent status.
    #[error("resource \"{0}\" cannot be found")]
    NotFound(String),
}

impl Retryable for CatalogError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Down(_))
    }
}

/// Pluggable catalog-resolution collaborator (§4.D).
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Flattened developers+managers+auditors of a space.
    async fn space_members(&self, space_guid: &str) -> Result<Vec<Membership>, CatalogError>;

    /// Org members, optionally filtered by role.
    async fn org_members(
        &self,
        org_guid: &str,
        role_filter: Option<Role>,
    ) -> Result<Vec<Membership>, CatalogError>;
}

/// `reqwest`-backed [`CatalogClient`].
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
}

impl HttpCatalogClient {
    /// Build a client against `base_url` (the configured `CC_HOST`) with
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

    async fn fetch_role(
        &self,
        resource: &str,
        guid: &str,
        role_path: &str,
        role: Role,
    ) -> Result<Vec<Membership>, CatalogError> {
        let url = format!("{}/v2/{resource}/{guid}/{role_path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| CatalogError::Down(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(guid.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Down(body));
        }

        #[derive(serde::Deserialize)]
        struct Page {
            resources: Vec<Resource>,
        }
        #[derive(serde::Deserialize)]
        struct Resource {
            metadata: Metadata,
        }
        #[derive(serde::Deserialize)]
        struct Metadata {
            guid: String,
        }

        let page: Page = response
            .json()
            .await
            .map_err(|err| CatalogError::Down(err.to_string()))?;

        Ok(page
            .resources
            .into_iter()
            .map(|r| Membership {
                user_guid: r.metadata.guid,
                role,
            })
            .collect())
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn space_members(&self, space_guid: &str) -> Result<Vec<Membership>, CatalogError> {
        let mut members = Vec::new();
        members.extend(self.fetch_role("spaces", space_guid, "developers", Role::Developer).await?);
        members.extend(self.fetch_role("spaces", space_guid, "managers", Role::Manager).await?);
        members.extend(self.fetch_role("spaces", space_guid, "auditors", Role::Auditor).await?);
        Ok(members)
    }

    async fn org_members(
        &self,
        org_guid: &str,
        role_filter: Option<Role>,
    ) -> Result<Vec<Membership>, CatalogError> {
        let roles = match role_filter {
            Some(role) => vec![role],
            None => vec![Role::Developer, Role::Manager, Role::Auditor],
        };

        let mut members = Vec::new();
        for role in roles {
            let role_path = match role {
                Role::Developer => "users",
                Role::Manager => "managers",
                Role::Auditor => "auditors",
            };
            members.extend(self.fetch_role("organizations", org_guid, role_path, role).await?);
        }
        Ok(members)
    }
}
