//! Delivery workflow (§4.F): the six steps run once per
//! [`crate::model::DeliveryJob`].
//!
//! Grounded on `examples/original_source/postal/boot.go` (the v1/v2
//! workflow wiring: `UnsubscribesRepo`/`GlobalUnsubscribesRepo` and
//! `unsubscribersRepository` feeding each workflow's opt-out gate),
//! `examples/original_source/web/handlers/notify_test.go` (critical flag
//! bypasses the gate but is scope-checked before enqueue, not at
//! delivery time), and `examples/original_source/postal/delivery_worker.go`.

use crate::config::SmtpSettings;
use crate::error::Retryable;
use crate::mail::{Envelope, MailClient, MailError};
use crate::model::{DeliveryJob, MessageStatus};
use crate::template::{resolve_template, substitute, RenderContext, TemplateStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

mod postgres;
pub use postgres::PgPreferenceStore;

/// A recipient's notification preferences, resolved from the `receipts`/
/// `unsubscribes` store (§3 Unsubscribe entity).
#[derive(Debug, Clone, Default)]
pub struct RecipientPreferences {
    /// The recipient opted out of every non-critical notification.
    pub global_unsubscribe: bool,
    /// The recipient opted out of this specific campaign type (v2) or
    /// (client, kind) pair (v1).
    pub scoped_unsubscribe: bool,
}

/// Storage contract for recipient preferences and delivery receipts.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Fetch a recipient's opt-out preferences for this delivery's scope.
    async fn preferences(&self, job: &DeliveryJob) -> RecipientPreferences;

    /// Record the outcome of a delivery attempt (§3 Receipt entity,
    /// append-only audit trail).
    async fn record_receipt(&self, job: &DeliveryJob, status: MessageStatus, detail: &str);

    /// Persist the message's current status (§3 Message entity).
    async fn set_message_status(&self, message_id: &str, status: MessageStatus);
}

/// Errors from a single delivery attempt, classified for the retry
/// handler (§4.G).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// SMTP transport failure.
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Mail(err) => err.is_retryable(),
        }
    }
}

/// Outcome of running a [`DeliveryJob`] through the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered successfully.
    Delivered,
    /// Recipient opted out; terminal, not a failure.
    Undeliverable,
    /// Transient send failure; the caller should retry.
    Retry,
}

/// Runs the six-step delivery workflow for one recipient (§4.F).
pub struct DeliveryWorkflow {
    templates: Arc<dyn TemplateStore>,
    preferences: Arc<dyn PreferenceStore>,
    mailer: Arc<dyn MailClient>,
    smtp: SmtpSettings,
}

impl DeliveryWorkflow {
    /// Construct a delivery workflow over its collaborators.
    #[must_use]
    pub const fn new(
        templates: Arc<dyn TemplateStore>,
        preferences: Arc<dyn PreferenceStore>,
        mailer: Arc<dyn MailClient>,
        smtp: SmtpSettings,
    ) -> Self {
        Self {
            templates,
            preferences,
            mailer,
            smtp,
        }
    }

    /// Step 1-6: look up preferences, gate on opt-out, load the template,
    /// package the envelope, send it, and record the outcome.
    ///
    /// # Errors
    /// Returns a [`DeliveryError`] if the send transport fails. Opt-outs
    /// and missing-email recipients are reported as
    /// [`DeliveryOutcome::Undeliverable`], not an `Err`.
    pub async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryOutcome, DeliveryError> {
        if job.email.is_empty() {
            self.preferences
                .record_receipt(job, MessageStatus::Undeliverable, "no email address on file")
                .await;
            self.preferences
                .set_message_status(&job.message_id, MessageStatus::Undeliverable)
                .await;
            return Ok(DeliveryOutcome::Undeliverable);
        }

        // Step 2: opt-out gate. Critical campaign types bypass it entirely
        // (§3 CampaignType.critical); the scope check that gates who is
        // allowed to submit a critical campaign already ran at submission
        // time, so by the time a job reaches here "critical" just means
        // "skip the gate".
        let critical = job.kind_id.is_none()
            && self
                .templates
                .get_campaign_type(&job.campaign_type_id)
                .await
                .is_some_and(|campaign_type| campaign_type.critical);
        if !critical {
            let prefs = self.preferences.preferences(job).await;
            if prefs.global_unsubscribe || prefs.scoped_unsubscribe {
                self.preferences
                    .record_receipt(job, MessageStatus::Undeliverable, "recipient unsubscribed")
                    .await;
                self.preferences
                    .set_message_status(&job.message_id, MessageStatus::Undeliverable)
                    .await;
                return Ok(DeliveryOutcome::Undeliverable);
            }
        }

        // Step 3: template resolution.
        let template = resolve_template(
            self.templates.as_ref(),
            job.template_id.as_deref(),
            &job.campaign_type_id,
            &job.client_id,
            job.kind_id.as_deref(),
        )
        .await;

        // Step 4: substitute + package.
        let mut recipient = HashMap::new();
        recipient.insert("Email".to_string(), job.email.clone());
        recipient.insert("UserGUID".to_string(), job.user_guid.clone());
        recipient.insert("Endorsement".to_string(), job.endorsement.clone());
        let ctx = RenderContext {
            subject: job.subject.clone(),
            text: job.text.clone(),
            html: job.html.body_content.clone(),
            recipient,
            template_metadata: template.metadata.clone(),
        };

        let envelope = Envelope {
            to: job.email.clone(),
            from: format!("{}@{}", self.smtp.sender, self.smtp.domain),
            reply_to: if job.reply_to.is_empty() {
                None
            } else {
                Some(job.reply_to.clone())
            },
            subject: substitute(&template.subject, &ctx),
            text: substitute(&template.text, &ctx),
            html: substitute(&template.html, &ctx),
        };

        // Step 5: send, step 6: record.
        match self.mailer.send(envelope).await {
            Ok(()) => {
                self.preferences
                    .record_receipt(job, MessageStatus::Delivered, "")
                    .await;
                self.preferences
                    .set_message_status(&job.message_id, MessageStatus::Delivered)
                    .await;
                Ok(DeliveryOutcome::Delivered)
            }
            Err(err) if err.is_retryable() => {
                self.preferences
                    .record_receipt(job, MessageStatus::Retry, &err.to_string())
                    .await;
                self.preferences
                    .set_message_status(&job.message_id, MessageStatus::Retry)
                    .await;
                Ok(DeliveryOutcome::Retry)
            }
            Err(err) => {
                self.preferences
                    .record_receipt(job, MessageStatus::Failed, &err.to_string())
                    .await;
                self.preferences
                    .set_message_status(&job.message_id, MessageStatus::Failed)
                    .await;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MockMailClient;
    use crate::model::{CampaignType, HtmlParts, Template};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTemplates {
        critical_campaign_type: Option<String>,
    }

    #[async_trait]
    impl TemplateStore for FakeTemplates {
        async fn get_template(&self, _id: &str) -> Option<Template> {
            None
        }
        async fn get_campaign_type(&self, id: &str) -> Option<CampaignType> {
            let critical_id = self.critical_campaign_type.as_deref()?;
            (id == critical_id).then(|| CampaignType {
                id: id.to_string(),
                name: "Critical".to_string(),
                critical: true,
                template_id: None,
                client_id: "client-1".to_string(),
                sender_id: "sender-1".to_string(),
            })
        }
        async fn default_template(&self) -> Template {
            Template {
                id: "default".to_string(),
                name: "Default".to_string(),
                subject: "{{.Subject}}".to_string(),
                text: "{{.Text}}".to_string(),
                html: "{{.HTML}}".to_string(),
                metadata: serde_json::Value::Null,
                client_id: None,
            }
        }
    }

    struct FakePreferences {
        prefs: RecipientPreferences,
        statuses: Mutex<Vec<MessageStatus>>,
    }

    #[async_trait]
    impl PreferenceStore for FakePreferences {
        async fn preferences(&self, _job: &DeliveryJob) -> RecipientPreferences {
            self.prefs.clone()
        }
        async fn record_receipt(&self, _job: &DeliveryJob, _status: MessageStatus, _detail: &str) {}
        async fn set_message_status(&self, _message_id: &str, status: MessageStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    fn sample_job() -> DeliveryJob {
        DeliveryJob {
            message_id: "msg-1".to_string(),
            campaign_id: "camp-1".to_string(),
            user_guid: "user-1".to_string(),
            email: "user@example.com".to_string(),
            template_id: None,
            campaign_type_id: "ct-1".to_string(),
            client_id: "client-1".to_string(),
            reply_to: String::new(),
            subject: "Hi".to_string(),
            text: "Hello".to_string(),
            html: HtmlParts {
                doctype: String::new(),
                head: String::new(),
                body_content: "<p>Hello</p>".to_string(),
                body_attributes: String::new(),
            },
            endorsement: String::new(),
            workflow_version: crate::model::WorkflowVersion::V2,
            kind_id: None,
        }
    }

    #[tokio::test]
    async fn test_delivers_successfully() {
        let mut mailer = MockMailClient::new();
        mailer.expect_send().returning(|_| Box::pin(async { Ok(()) }));
        let workflow = DeliveryWorkflow::new(
            Arc::new(FakeTemplates::default()),
            Arc::new(FakePreferences {
                prefs: RecipientPreferences::default(),
                statuses: Mutex::new(Vec::new()),
            }),
            Arc::new(mailer),
            SmtpSettings::default(),
        );
        let outcome = workflow.deliver(&sample_job()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_unsubscribed_recipient_is_undeliverable_without_sending() {
        let mut mailer = MockMailClient::new();
        mailer.expect_send().times(0);
        let workflow = DeliveryWorkflow::new(
            Arc::new(FakeTemplates::default()),
            Arc::new(FakePreferences {
                prefs: RecipientPreferences {
                    global_unsubscribe: true,
                    scoped_unsubscribe: false,
                },
                statuses: Mutex::new(Vec::new()),
            }),
            Arc::new(mailer),
            SmtpSettings::default(),
        );
        let outcome = workflow.deliver(&sample_job()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Undeliverable);
    }

    #[tokio::test]
    async fn test_missing_email_is_undeliverable() {
        let mailer = MockMailClient::new();
        let workflow = DeliveryWorkflow::new(
            Arc::new(FakeTemplates::default()),
            Arc::new(FakePreferences {
                prefs: RecipientPreferences::default(),
                statuses: Mutex::new(Vec::new()),
            }),
            Arc::new(mailer),
            SmtpSettings::default(),
        );
        let mut job = sample_job();
        job.email = String::new();
        let outcome = workflow.deliver(&job).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Undeliverable);
    }

    #[tokio::test]
    async fn test_transient_send_failure_is_retry_not_error() {
        let mut mailer = MockMailClient::new();
        mailer
            .expect_send()
            .returning(|_| Box::pin(async { Err(MailError::Transport("timeout".to_string())) }));
        let workflow = DeliveryWorkflow::new(
            Arc::new(FakeTemplates::default()),
            Arc::new(FakePreferences {
                prefs: RecipientPreferences::default(),
                statuses: Mutex::new(Vec::new()),
            }),
            Arc::new(mailer),
            SmtpSettings::default(),
        );
        let outcome = workflow.deliver(&sample_job()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Retry);
    }

    #[tokio::test]
    async fn test_critical_campaign_bypasses_opt_out() {
        let mut mailer = MockMailClient::new();
        mailer.expect_send().times(1).returning(|_| Box::pin(async { Ok(()) }));
        let workflow = DeliveryWorkflow::new(
            Arc::new(FakeTemplates {
                critical_campaign_type: Some("ct-1".to_string()),
            }),
            Arc::new(FakePreferences {
                prefs: RecipientPreferences {
                    global_unsubscribe: true,
                    scoped_unsubscribe: true,
                },
                statuses: Mutex::new(Vec::new()),
            }),
            Arc::new(mailer),
            SmtpSettings::default(),
        );
        let outcome = workflow.deliver(&sample_job()).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_permanent_send_failure_is_error() {
        let mut mailer = MockMailClient::new();
        mailer
            .expect_send()
            .returning(|_| Box::pin(async { Err(MailError::Malformed("bad address".to_string())) }));
        let workflow = DeliveryWorkflow::new(
            Arc::new(FakeTemplates::default()),
            Arc::new(FakePreferences {
                prefs: RecipientPreferences::default(),
                statuses: Mutex::new(Vec::new()),
            }),
            Arc::new(mailer),
            SmtpSettings::default(),
        );
        let result = workflow.deliver(&sample_job()).await;
        assert!(result.is_err());
    }
}
