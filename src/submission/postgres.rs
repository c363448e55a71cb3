//! Postgres-backed [`CampaignTypeLookup`], sharing the `campaign_types`
//! table owned by [`crate::template::PgTemplateStore`].

use super::CampaignTypeLookup;
use sqlx::PgPool;

/// [`CampaignTypeLookup`] backed by the `campaign_types` table.
pub struct PgCampaignTypeLookup {
    pool: PgPool,
}

impl PgCampaignTypeLookup {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CampaignTypeLookup for PgCampaignTypeLookup {
    async fn is_critical(&self, campaign_type_id: &str) -> Option<bool> {
        sqlx::query_scalar("SELECT critical FROM campaign_types WHERE id = $1")
            .bind(campaign_type_id)
            .fetch_optional(&self.pool)
            .await
            .inspect_err(|err| tracing::warn!(error = %err, campaign_type_id, "campaign type lookup failed"))
            .ok()
            .flatten()
    }
}
