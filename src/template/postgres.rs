//! Postgres-backed [`TemplateStore`] (§4.E). Read-mostly reference data;
//! lookups swallow database errors into `None` rather than propagating,
//! since the resolution chain already treats "not found at this link"
//! as the signal to fall through to the next one.

use super::TemplateStore;
use crate::model::{CampaignType, Template};
use sqlx::{PgPool, Row};

/// [`TemplateStore`] backed by `templates` and `campaign_types` tables.
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the `templates` and `campaign_types` table migrations. Test
    /// setup and first boot only, as with [`crate::queue::PgQueue::migrate`].
    ///
    /// # Errors
    ///
    /// Returns an error if either DDL statement fails.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subject TEXT NOT NULL,
                text TEXT NOT NULL,
                html TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}',
                client_id TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS campaign_types (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                critical BOOLEAN NOT NULL DEFAULT FALSE,
                template_id TEXT,
                client_id TEXT NOT NULL,
                sender_id TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get_template(&self, id: &str) -> Option<Template> {
        let row = sqlx::query(
            "SELECT id, name, subject, text, html, metadata, client_id FROM templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|err| tracing::warn!(error = %err, id, "template lookup failed"))
        .ok()
        .flatten()?;

        Some(Template {
            id: row.get("id"),
            name: row.get("name"),
            subject: row.get("subject"),
            text: row.get("text"),
            html: row.get("html"),
            metadata: row.get("metadata"),
            client_id: row.get("client_id"),
        })
    }

    async fn get_campaign_type(&self, id: &str) -> Option<CampaignType> {
        let row = sqlx::query(
            "SELECT id, name, critical, template_id, client_id, sender_id FROM campaign_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|err| tracing::warn!(error = %err, id, "campaign type lookup failed"))
        .ok()
        .flatten()?;

        Some(CampaignType {
            id: row.get("id"),
            name: row.get("name"),
            critical: row.get("critical"),
            template_id: row.get("template_id"),
            client_id: row.get("client_id"),
            sender_id: row.get("sender_id"),
        })
    }

    async fn default_template(&self) -> Template {
        self.get_template("default").await.unwrap_or_else(|| Template {
            id: "default".to_string(),
            name: "Default".to_string(),
            subject: "{{.Subject}}".to_string(),
            text: "{{.Text}}".to_string(),
            html: "<html><body>{{.HTML}}</body></html>".to_string(),
            metadata: serde_json::Value::Null,
            client_id: None,
        })
    }
}
