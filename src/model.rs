//! Shared data model (§3): the entities passed between the strategy
//! determiner, audience resolver, template loader, and delivery workflow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The tiny JSON envelope every job payload carries so the worker can
/// route without decoding the full payload (§4.B, §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobEnvelope {
    /// `"campaign"`, `"v1"`, `"v2"`, or absent/empty for legacy v1 jobs.
    #[serde(default, rename = "JobType")]
    pub job_type: String,
}

/// A submitted campaign, addressed to an audience selector (§3
/// CampaignJob).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignJob {
    /// Campaign identifier.
    pub campaign_id: String,
    /// The OAuth2 client id the campaign is attributed to.
    pub client_id: String,
    /// Exactly one `{audience_kind -> audience_value}` pair (§4.C).
    pub send_to: HashMap<String, String>,
    /// Explicit template override, if the campaign specified one.
    pub template_id: Option<String>,
    /// The campaign type id (carries `critical` + default template).
    pub campaign_type_id: String,
    /// Subject override.
    pub subject: String,
    /// Plain-text body override.
    pub text: String,
    /// HTML body override.
    pub html: String,
    /// `Reply-To` address.
    pub reply_to: String,
}

/// Extracted HTML parts (§4.E, §9 "small tolerant parser").
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HtmlParts {
    /// The `<!DOCTYPE ...>` declaration, if any.
    pub doctype: String,
    /// The contents of `<head>`, if any.
    pub head: String,
    /// The contents of `<body>`, or the raw input if it could not be
    /// parsed as HTML.
    pub body_content: String,
    /// The attribute string of the `<body>` tag, if any.
    pub body_attributes: String,
}

/// One concrete message to send to one recipient (§3 DeliveryJob).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryJob {
    /// Message identifier (status-tracking key).
    pub message_id: String,
    /// The campaign this delivery belongs to.
    pub campaign_id: String,
    /// Recipient's identity GUID, empty for bare-email audiences.
    pub user_guid: String,
    /// Recipient's email address.
    pub email: String,
    /// Explicit template override carried from the campaign, if any.
    pub template_id: Option<String>,
    /// The campaign type id (§4.F opt-out gate, critical check).
    pub campaign_type_id: String,
    /// The attributing client id.
    pub client_id: String,
    /// `Reply-To` address.
    pub reply_to: String,
    /// Subject override.
    pub subject: String,
    /// Plain-text body override.
    pub text: String,
    /// HTML parts, already extracted by the campaign job processor.
    pub html: HtmlParts,
    /// Endorsement copy explaining why this recipient was included.
    pub endorsement: String,
    /// `"v1"` or `"v2"` — which delivery workflow processes this job.
    pub workflow_version: WorkflowVersion,
    /// v1-only: the notification kind id, used in the v1 template
    /// resolution fallback and per-(client,kind) unsubscribe lookup.
    pub kind_id: Option<String>,
}

/// Which delivery workflow a [`DeliveryJob`] should run through (§9 Open
/// Question: both v1 and v2 are modeled, sharing one queue).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkflowVersion {
    /// Legacy per-(client,kind) workflow.
    V1,
    /// Current per-campaign-type workflow.
    V2,
}

/// A message's delivery status (§3 Message entity). The store is
/// monotonic in the sense that `Delivered` is never overwritten once
/// written (§4.F Idempotence note).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Enqueued, not yet attempted.
    Queued,
    /// Successfully delivered.
    Delivered,
    /// Permanently failed; will not be retried.
    Failed,
    /// Failed with a transient error; queued for another attempt.
    Retry,
    /// Terminally unable to deliver (opt-out, recipient not found).
    Undeliverable,
}

/// A template triad plus tenant scoping and free-form metadata (§3
/// Template entity; metadata per SPEC_FULL.md §3 supplement).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Template {
    /// Template identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Subject line, possibly containing `{{.Subject}}`-style variables.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: String,
    /// Free-form metadata merged into the substitution context.
    pub metadata: serde_json::Value,
    /// Owning client, or `None` for the well-known default template.
    pub client_id: Option<String>,
}

/// A campaign type: classification + critical flag + default template
/// (§3 CampaignType entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignType {
    /// Campaign type identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Bypasses opt-outs, but requires `critical_notifications.write`.
    pub critical: bool,
    /// Default template for campaigns of this type, if assigned.
    pub template_id: Option<String>,
    /// Owning client.
    pub client_id: String,
    /// Sender this campaign type is scoped to.
    pub sender_id: String,
}
