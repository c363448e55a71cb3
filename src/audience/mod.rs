//! Audience resolver (§4.D).
//!
//! Four strategies expand an audience key into a list of `{user_guid,
//! email}` recipients. Grounded on
//! `examples/original_source/postal/v2/campaign_job_processor.go`.

use crate::directories::{CatalogClient, CatalogError, IdentityClient, IdentityError, Role};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// A single resolved recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// The recipient's identity GUID, empty for a bare email address.
    pub guid: String,
    /// The recipient's email address, empty if it could not be resolved.
    pub email: String,
}

/// A resolved audience: a recipient set plus a human-readable endorsement
/// explaining why they were included (GLOSSARY "Endorsement").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audience {
    /// The deduplicated recipient set.
    pub users: Vec<User>,
    /// Endorsement copy, e.g. "you are a member of space X".
    pub endorsement: String,
}

/// Errors generating an audience.
#[derive(Debug, Error)]
pub enum AudienceError {
    /// The catalog could not resolve the space or org at all — terminal.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Common contract for all four audience strategies (§4.D).
#[async_trait]
pub trait AudienceGenerator: Send + Sync {
    /// Expand `inputs` (a single-element slice carrying the audience key's
    /// value) into a resolved [`Audience`].
    async fn generate_audiences(&self, inputs: &[String]) -> Result<Vec<Audience>, AudienceError>;
}

/// `send_to: {"email": "<value>"}` — no directory lookups at all.
pub struct EmailStrategy;

#[async_trait]
impl AudienceGenerator for EmailStrategy {
    async fn generate_audiences(&self, inputs: &[String]) -> Result<Vec<Audience>, AudienceError> {
        let users = inputs
            .iter()
            .map(|email| User {
                guid: String::new(),
                email: email.clone(),
            })
            .collect();
        Ok(vec![Audience {
            users,
            endorsement: String::new(),
        }])
    }
}

/// `send_to: {"user": "<guid>"}` — resolves one user's email via the
/// identity service. If the lookup fails for any reason, the recipient is
/// still included with an empty email rather than dropped (§4.D partial
/// failure policy: "skipped" means skipped resolution, not skipped
/// delivery) — the delivery workflow's opt-out/profile lookup is the
/// actual gate on whether an email goes out.
pub struct UserStrategy {
    identity: Arc<dyn IdentityClient>,
}

impl UserStrategy {
    /// Construct a user-audience strategy over the given identity client.
    #[must_use]
    pub const fn new(identity: Arc<dyn IdentityClient>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl AudienceGenerator for UserStrategy {
    async fn generate_audiences(&self, inputs: &[String]) -> Result<Vec<Audience>, AudienceError> {
        let mut users = Vec::new();
        for guid in inputs {
            match self.identity.get_user(guid).await {
                Ok(info) => users.push(User {
                    guid: info.guid,
                    email: info.email,
                }),
                Err(err) => {
                    tracing::warn!(guid, error = %err, "could not resolve user, sending with empty email");
                    users.push(User {
                        guid: guid.clone(),
                        email: String::new(),
                    });
                }
            }
        }
        Ok(vec![Audience {
            users,
            endorsement: String::new(),
        }])
    }
}

/// Shared plumbing for the space and org strategies: resolve a set of
/// catalog memberships' emails via the identity service, deduplicating by
/// `user_guid` before returning (§9 Open Question, resolved: always
/// dedupe, regardless of role).
async fn resolve_memberships(
    identity: &Arc<dyn IdentityClient>,
    user_guids: Vec<String>,
) -> Vec<User> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();
    for guid in user_guids {
        if !seen.insert(guid.clone()) {
            continue;
        }
        match identity.get_user(&guid).await {
            Ok(info) => users.push(User {
                guid: info.guid,
                email: info.email,
            }),
            Err(_) => users.push(User {
                guid,
                email: String::new(),
            }),
        }
    }
    users
}

/// `send_to: {"space": "<guid>"}` — resolves developers+managers+auditors
/// of a space, deduplicated by `user_guid`.
pub struct SpaceStrategy {
    catalog: Arc<dyn CatalogClient>,
    identity: Arc<dyn IdentityClient>,
}

impl SpaceStrategy {
    /// Construct a space-audience strategy over the given collaborators.
    #[must_use]
    pub const fn new(catalog: Arc<dyn CatalogClient>, identity: Arc<dyn IdentityClient>) -> Self {
        Self { catalog, identity }
    }
}

#[async_trait]
impl AudienceGenerator for SpaceStrategy {
    async fn generate_audiences(&self, inputs: &[String]) -> Result<Vec<Audience>, AudienceError> {
        let mut audiences = Vec::with_capacity(inputs.len());
        for space_guid in inputs {
            let members = self.catalog.space_members(space_guid).await?;
            let guids = members.into_iter().map(|m| m.user_guid).collect();
            let users = resolve_memberships(&self.identity, guids).await;
            audiences.push(Audience {
                users,
                endorsement: format!("You are a member of space {space_guid}"),
            });
        }
        Ok(audiences)
    }
}

/// `send_to: {"org": "<guid>"}` — resolves org members, filtered by role,
/// deduplicated by `user_guid`.
pub struct OrgStrategy {
    catalog: Arc<dyn CatalogClient>,
    identity: Arc<dyn IdentityClient>,
    role_filter: Option<Role>,
}

impl OrgStrategy {
    /// Construct an org-audience strategy over the given collaborators.
    #[must_use]
    pub const fn new(
        catalog: Arc<dyn CatalogClient>,
        identity: Arc<dyn IdentityClient>,
        role_filter: Option<Role>,
    ) -> Self {
        Self {
            catalog,
            identity,
            role_filter,
        }
    }
}

#[async_trait]
impl AudienceGenerator for OrgStrategy {
    async fn generate_audiences(&self, inputs: &[String]) -> Result<Vec<Audience>, AudienceError> {
        let mut audiences = Vec::with_capacity(inputs.len());
        for org_guid in inputs {
            let members = self.catalog.org_members(org_guid, self.role_filter).await?;
            let guids = members.into_iter().map(|m| m.user_guid).collect();
            let users = resolve_memberships(&self.identity, guids).await;
            audiences.push(Audience {
                users,
                endorsement: format!("You are a member of organization {org_guid}"),
            });
        }
        Ok(audiences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeIdentity {
        users: Vec<(String, String)>,
        down: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn get_user(&self, guid: &str) -> Result<crate::directories::UserInfo, IdentityError> {
            if self.down.lock().unwrap().contains(guid) {
                return Err(IdentityError::Down("simulated outage".to_string()));
            }
            self.users
                .iter()
                .find(|(g, _)| g == guid)
                .map(|(g, e)| crate::directories::UserInfo {
                    guid: g.clone(),
                    email: e.clone(),
                })
                .ok_or_else(|| IdentityError::Generic("user not found".to_string()))
        }
    }

    struct FakeCatalog {
        space_members: Vec<crate::directories::Membership>,
    }

    #[async_trait]
    impl CatalogClient for FakeCatalog {
        async fn space_members(
            &self,
            space_guid: &str,
        ) -> Result<Vec<crate::directories::Membership>, CatalogError> {
            if space_guid == "missing-space" {
                return Err(CatalogError::NotFound(space_guid.to_string()));
            }
            Ok(self.space_members.clone())
        }

        async fn org_members(
            &self,
            org_guid: &str,
            _role_filter: Option<Role>,
        ) -> Result<Vec<crate::directories::Membership>, CatalogError> {
            if org_guid == "missing-org" {
                return Err(CatalogError::NotFound(org_guid.to_string()));
            }
            Ok(self.space_members.clone())
        }
    }

    #[tokio::test]
    async fn test_email_strategy_produces_one_audience_with_no_lookup() {
        let strategy = EmailStrategy;
        let audiences = strategy
            .generate_audiences(&["user@example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(audiences.len(), 1);
        assert_eq!(audiences[0].users[0].email, "user@example.com");
        assert_eq!(audiences[0].users[0].guid, "");
    }

    #[tokio::test]
    async fn test_user_strategy_resolves_email() {
        let identity: Arc<dyn IdentityClient> = Arc::new(FakeIdentity {
            users: vec![("user-456".to_string(), "user-456@example.com".to_string())],
            down: Mutex::new(HashSet::new()),
        });
        let strategy = UserStrategy::new(identity);
        let audiences = strategy
            .generate_audiences(&["user-456".to_string()])
            .await
            .unwrap();
        assert_eq!(audiences[0].users[0].email, "user-456@example.com");
    }

    #[tokio::test]
    async fn test_partial_identity_failure_skips_user_but_not_whole_strategy() {
        let mut down = HashSet::new();
        down.insert("user-down".to_string());
        let identity: Arc<dyn IdentityClient> = Arc::new(FakeIdentity {
            users: vec![("user-ok".to_string(), "ok@example.com".to_string())],
            down: Mutex::new(down),
        });
        let catalog: Arc<dyn CatalogClient> = Arc::new(FakeCatalog {
            space_members: vec![
                crate::directories::Membership {
                    user_guid: "user-down".to_string(),
                    role: Role::Developer,
                },
                crate::directories::Membership {
                    user_guid: "user-ok".to_string(),
                    role: Role::Manager,
                },
            ],
        });
        let strategy = SpaceStrategy::new(catalog, identity);
        let audiences = strategy
            .generate_audiences(&["space-1".to_string()])
            .await
            .unwrap();
        // Both show up (skipped identity lookups yield empty email, not a dropped recipient).
        assert_eq!(audiences[0].users.len(), 2);
        assert!(audiences[0].endorsement.contains("space-1"));
    }

    #[tokio::test]
    async fn test_space_strategy_dedupes_by_guid_across_roles() {
        let identity: Arc<dyn IdentityClient> = Arc::new(FakeIdentity {
            users: vec![("dup-user".to_string(), "dup@example.com".to_string())],
            down: Mutex::new(HashSet::new()),
        });
        let catalog: Arc<dyn CatalogClient> = Arc::new(FakeCatalog {
            space_members: vec![
                crate::directories::Membership {
                    user_guid: "dup-user".to_string(),
                    role: Role::Developer,
                },
                crate::directories::Membership {
                    user_guid: "dup-user".to_string(),
                    role: Role::Manager,
                },
            ],
        });
        let strategy = SpaceStrategy::new(catalog, identity);
        let audiences = strategy
            .generate_audiences(&["space-1".to_string()])
            .await
            .unwrap();
        assert_eq!(audiences[0].users.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_org_fails_the_whole_strategy() {
        let identity: Arc<dyn IdentityClient> = Arc::new(FakeIdentity {
            users: vec![],
            down: Mutex::new(HashSet::new()),
        });
        let catalog: Arc<dyn CatalogClient> = Arc::new(FakeCatalog { space_members: vec![] });
        let strategy = OrgStrategy::new(catalog, identity, None);
        let result = strategy.generate_audiences(&["missing-org".to_string()]).await;
        assert!(matches!(result, Err(AudienceError::Catalog(CatalogError::NotFound(_)))));
    }
}
