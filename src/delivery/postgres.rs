//! Postgres-backed [`PreferenceStore`] (§3 Unsubscribe/Receipt entities).
//! Preference lookups and receipt writes are best-effort: a failure here
//! must never block a send that otherwise succeeded, so errors are
//! logged and swallowed the same way the teacher's storage layer treats
//! advisory writes.

use super::{PreferenceStore, RecipientPreferences};
use crate::model::{DeliveryJob, MessageStatus};
use sqlx::PgPool;

/// [`PreferenceStore`] backed by `unsubscribes`, `messages`, and
/// `receipts` tables.
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the `unsubscribes`, `messages`, and `receipts` table
    /// migrations. Test setup and first boot only.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS unsubscribes (
                user_guid TEXT NOT NULL,
                client_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                PRIMARY KEY (user_guid, client_id, scope)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS receipts (
                id BIGSERIAL PRIMARY KEY,
                message_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn status_label(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Queued => "queued",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Failed => "failed",
        MessageStatus::Retry => "retry",
        MessageStatus::Undeliverable => "undeliverable",
    }
}

#[async_trait::async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn preferences(&self, job: &DeliveryJob) -> RecipientPreferences {
        let global = sqlx::query(
            "SELECT 1 FROM unsubscribes WHERE user_guid = $1 AND client_id = '' AND scope = 'global'",
        )
        .bind(&job.user_guid)
        .fetch_optional(&self.pool)
        .await;

        let scope = job
            .kind_id
            .as_deref()
            .map_or_else(|| job.campaign_type_id.clone(), |kind| format!("{}.{kind}", job.client_id));

        let scoped = sqlx::query(
            "SELECT 1 FROM unsubscribes WHERE user_guid = $1 AND client_id = $2 AND scope = $3",
        )
        .bind(&job.user_guid)
        .bind(&job.client_id)
        .bind(&scope)
        .fetch_optional(&self.pool)
        .await;

        match (global, scoped) {
            (Ok(global), Ok(scoped)) => RecipientPreferences {
                global_unsubscribe: global.is_some(),
                scoped_unsubscribe: scoped.is_some(),
            },
            (global, scoped) => {
                if let Err(err) = global {
                    tracing::warn!(error = %err, "global unsubscribe lookup failed");
                }
                if let Err(err) = scoped {
                    tracing::warn!(error = %err, "scoped unsubscribe lookup failed");
                }
                RecipientPreferences::default()
            }
        }
    }

    async fn record_receipt(&self, job: &DeliveryJob, status: MessageStatus, detail: &str) {
        let result = sqlx::query(
            "INSERT INTO receipts (message_id, campaign_id, status, detail) VALUES ($1, $2, $3, $4)",
        )
        .bind(&job.message_id)
        .bind(&job.campaign_id)
        .bind(status_label(status))
        .bind(detail)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, message_id = %job.message_id, "failed to record receipt");
        }
    }

    async fn set_message_status(&self, message_id: &str, status: MessageStatus) {
        // §4.F/§8: `delivered` is monotonic and must never be overwritten by
        // a later retry/failed write racing in after a successful send.
        let result = sqlx::query(
            r"
            INSERT INTO messages (id, status) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = now()
            WHERE messages.status != 'delivered'
            ",
        )
        .bind(message_id)
        .bind(status_label(status))
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, message_id, "failed to set message status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_label_covers_every_variant() {
        assert_eq!(status_label(MessageStatus::Queued), "queued");
        assert_eq!(status_label(MessageStatus::Delivered), "delivered");
        assert_eq!(status_label(MessageStatus::Failed), "failed");
        assert_eq!(status_label(MessageStatus::Retry), "retry");
        assert_eq!(status_label(MessageStatus::Undeliverable), "undeliverable");
    }
}
