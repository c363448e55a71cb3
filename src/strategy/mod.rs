//! Campaign strategy determiner (§4.C): maps a campaign's `send_to` key
//! to one of the four audience strategies, resolves the audience, and
//! fans the campaign out into one [`DeliveryJob`] per recipient.
//!
//! Grounded on `examples/original_source/postal/campaign_strategy_determiner.go`.

use crate::audience::{Audience, AudienceError, AudienceGenerator};
use crate::model::{CampaignJob, DeliveryJob, WorkflowVersion};
use crate::template::extract_html_parts;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors determining or expanding a campaign's strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// `send_to` did not contain exactly one recognized audience key.
    #[error("no strategy registered for audience key {0:?}")]
    NoStrategy(String),

    /// `send_to` was empty or had more than one key.
    #[error("send_to must contain exactly one audience key, got {0}")]
    InvalidSendTo(usize),

    /// Resolving the audience failed.
    #[error(transparent)]
    Audience(#[from] AudienceError),
}

/// Registry of the four audience strategies, keyed by `send_to` key
/// (§4.C: `"email"`, `"user"`, `"space"`, `"org"`).
pub struct StrategyDeterminer {
    strategies: HashMap<String, Arc<dyn AudienceGenerator>>,
}

impl StrategyDeterminer {
    /// Construct a determiner over the given `{audience_key -> strategy}`
    /// map.
    #[must_use]
    pub const fn new(strategies: HashMap<String, Arc<dyn AudienceGenerator>>) -> Self {
        Self { strategies }
    }

    /// Resolve `campaign`'s single `send_to` entry into its audiences.
    ///
    /// # Errors
    /// Returns [`StrategyError::InvalidSendTo`] if `send_to` does not have
    /// exactly one key, [`StrategyError::NoStrategy`] if the key names an
    /// unregistered audience kind, or propagates the strategy's own
    /// [`AudienceError`].
    pub async fn resolve(&self, campaign: &CampaignJob) -> Result<Vec<Audience>, StrategyError> {
        if campaign.send_to.len() != 1 {
            return Err(StrategyError::InvalidSendTo(campaign.send_to.len()));
        }
        let (kind, value) = campaign
            .send_to
            .iter()
            .next()
            .expect("send_to.len() == 1 checked above");
        let strategy = self
            .strategies
            .get(kind)
            .ok_or_else(|| StrategyError::NoStrategy(kind.clone()))?;
        Ok(strategy.generate_audiences(&[value.clone()]).await?)
    }

    /// Expand `campaign` into one [`DeliveryJob`] per resolved recipient,
    /// deduplicated by `user_guid` across every returned audience (§9 Open
    /// Question, resolved: always dedupe).
    ///
    /// # Errors
    /// See [`Self::resolve`].
    pub async fn expand(&self, campaign: &CampaignJob) -> Result<Vec<DeliveryJob>, StrategyError> {
        let audiences = self.resolve(campaign).await?;
        let html = extract_html_parts(&campaign.html);

        let mut seen_guids = std::collections::HashSet::new();
        let mut jobs = Vec::new();
        for audience in audiences {
            for user in audience.users {
                if !user.guid.is_empty() && !seen_guids.insert(user.guid.clone()) {
                    continue;
                }
                jobs.push(DeliveryJob {
                    message_id: Uuid::new_v4().to_string(),
                    campaign_id: campaign.campaign_id.clone(),
                    user_guid: user.guid,
                    email: user.email,
                    template_id: campaign.template_id.clone(),
                    campaign_type_id: campaign.campaign_type_id.clone(),
                    client_id: campaign.client_id.clone(),
                    reply_to: campaign.reply_to.clone(),
                    subject: campaign.subject.clone(),
                    text: campaign.text.clone(),
                    html: html.clone(),
                    endorsement: audience.endorsement.clone(),
                    workflow_version: WorkflowVersion::V2,
                    kind_id: None,
                });
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedStrategy(Vec<Audience>);

    #[async_trait]
    impl AudienceGenerator for FixedStrategy {
        async fn generate_audiences(&self, _inputs: &[String]) -> Result<Vec<Audience>, AudienceError> {
            Ok(self.0.clone())
        }
    }

    fn sample_campaign(send_to: HashMap<String, String>) -> CampaignJob {
        CampaignJob {
            campaign_id: "camp-1".to_string(),
            client_id: "client-1".to_string(),
            send_to,
            template_id: None,
            campaign_type_id: "ct-1".to_string(),
            subject: "Hi".to_string(),
            text: "Hello".to_string(),
            html: "<html><body>Hello</body></html>".to_string(),
            reply_to: String::new(),
        }
    }

    #[tokio::test]
    async fn test_resolve_dispatches_to_registered_strategy() {
        let mut strategies: HashMap<String, Arc<dyn AudienceGenerator>> = HashMap::new();
        strategies.insert(
            "space".to_string(),
            Arc::new(FixedStrategy(vec![crate::audience::Audience {
                users: vec![crate::audience::User {
                    guid: "u1".to_string(),
                    email: "u1@example.com".to_string(),
                }],
                endorsement: "member".to_string(),
            }])),
        );
        let determiner = StrategyDeterminer::new(strategies);
        let mut send_to = HashMap::new();
        send_to.insert("space".to_string(), "space-1".to_string());
        let audiences = determiner.resolve(&sample_campaign(send_to)).await.unwrap();
        assert_eq!(audiences[0].users[0].email, "u1@example.com");
    }

    #[tokio::test]
    async fn test_unknown_audience_key_fails() {
        let determiner = StrategyDeterminer::new(HashMap::new());
        let mut send_to = HashMap::new();
        send_to.insert("carrier-pigeon".to_string(), "x".to_string());
        let result = determiner.resolve(&sample_campaign(send_to)).await;
        assert!(matches!(result, Err(StrategyError::NoStrategy(_))));
    }

    #[tokio::test]
    async fn test_expand_dedupes_across_audiences() {
        let mut strategies: HashMap<String, Arc<dyn AudienceGenerator>> = HashMap::new();
        strategies.insert(
            "org".to_string(),
            Arc::new(FixedStrategy(vec![
                crate::audience::Audience {
                    users: vec![crate::audience::User {
                        guid: "dup".to_string(),
                        email: "dup@example.com".to_string(),
                    }],
                    endorsement: "a".to_string(),
                },
                crate::audience::Audience {
                    users: vec![crate::audience::User {
                        guid: "dup".to_string(),
                        email: "dup@example.com".to_string(),
                    }],
                    endorsement: "b".to_string(),
                },
            ])),
        );
        let determiner = StrategyDeterminer::new(strategies);
        let mut send_to = HashMap::new();
        send_to.insert("org".to_string(), "org-1".to_string());
        let jobs = determiner.expand(&sample_campaign(send_to)).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_expand_rejects_multi_key_send_to() {
        let determiner = StrategyDeterminer::new(HashMap::new());
        let mut send_to = HashMap::new();
        send_to.insert("space".to_string(), "s1".to_string());
        send_to.insert("org".to_string(), "o1".to_string());
        let result = determiner.expand(&sample_campaign(send_to)).await;
        assert!(matches!(result, Err(StrategyError::InvalidSendTo(2))));
    }
}
