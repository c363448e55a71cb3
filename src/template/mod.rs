//! Template loader & packager (§4.E).
//!
//! Resolves the template triad (subject/text/html) for a delivery through
//! the override chain, substitutes `{{.Field}}`-style variables, and
//! splits HTML into head/body parts for MIME packaging. Grounded on
//! `examples/original_source/web/services/template_assigner.go` (the
//! override-chain shape) and `examples/original_source/v2/collections/
//! templates.go` (the template entity fields).

use crate::model::{CampaignType, HtmlParts, Template};
use serde_json::Value;
use std::collections::HashMap;

mod postgres;
pub use postgres::PgTemplateStore;

/// Storage contract for templates and campaign types (§4.E). Kept
/// separate from [`crate::queue::Queue`] since templates are read-mostly
/// reference data rather than queue state.
#[async_trait::async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch a template by id, if it exists.
    async fn get_template(&self, id: &str) -> Option<Template>;

    /// Fetch a campaign type by id.
    async fn get_campaign_type(&self, id: &str) -> Option<CampaignType>;

    /// The well-known default template, always present.
    async fn default_template(&self) -> Template;
}

/// Resolve the effective template for a delivery following the override
/// chain (§4.E):
///
/// 1. an explicit per-campaign `template_id` override,
/// 2. the campaign type's default template,
/// 3. the client's default template (id `"{client_id}.default"`),
/// 4. the kind's default template for v1 jobs (id `"{kind_id}.default"`),
/// 5. the global default template.
pub async fn resolve_template(
    store: &dyn TemplateStore,
    template_id: Option<&str>,
    campaign_type_id: &str,
    client_id: &str,
    kind_id: Option<&str>,
) -> Template {
    if let Some(id) = template_id {
        if let Some(template) = owned_by(store.get_template(id).await, client_id) {
            return template;
        }
    }

    if let Some(campaign_type) = store.get_campaign_type(campaign_type_id).await {
        if let Some(id) = campaign_type.template_id {
            if let Some(template) = owned_by(store.get_template(&id).await, client_id) {
                return template;
            }
        }
    }

    if let Some(template) = store.get_template(&format!("{client_id}.default")).await {
        return template;
    }

    if let Some(kind_id) = kind_id {
        if let Some(template) = store.get_template(&format!("{kind_id}.default")).await {
            return template;
        }
    }

    store.default_template().await
}

/// Enforce the tenant boundary on a resolved template (§3 supplement:
/// templates carry an owning `client_id`, or `None` for shared/global
/// templates). A template owned by a *different* client is treated as not
/// found, letting the override chain fall through instead of leaking
/// another tenant's content.
fn owned_by(template: Option<Template>, client_id: &str) -> Option<Template> {
    template.filter(|t| t.client_id.as_deref().is_none_or(|owner| owner == client_id))
}

/// The substitution context made available to `{{.Field}}` placeholders
/// (§4.E: `Subject`, `Text`, `HTML`, plus recipient metadata and the
/// template's own `metadata` map).
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    /// The campaign/delivery subject override.
    pub subject: String,
    /// The campaign/delivery plain-text override.
    pub text: String,
    /// The campaign/delivery HTML override.
    pub html: String,
    /// Recipient-scoped metadata (e.g. `email`, `user_guid`).
    pub recipient: HashMap<String, String>,
    /// The template's own free-form metadata.
    pub template_metadata: Value,
}

/// Substitute `{{.Field}}` placeholders in `body` using `ctx`. Unknown
/// placeholders are left verbatim rather than erroring — templates are
/// tenant-authored and a typo should not fail delivery (§4.E).
#[must_use]
pub fn substitute(body: &str, ctx: &RenderContext) -> String {
    let mut fields: HashMap<&str, String> = HashMap::new();
    fields.insert("Subject", ctx.subject.clone());
    fields.insert("Text", ctx.text.clone());
    fields.insert("HTML", ctx.html.clone());
    for (key, value) in &ctx.recipient {
        fields.insert(key.as_str(), value.clone());
    }

    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("{{.") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        if let Some(end) = after.find("}}") {
            let field = after[..end].trim();
            let replacement = fields.get(field).cloned().or_else(|| {
                ctx.template_metadata
                    .get(field)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            match replacement {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[start..start + 3 + end + 2]),
            }
            rest = &after[end + 2..];
        } else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Tolerant HTML splitter (§9 "small tolerant parser", not a full HTML
/// parser dependency). Extracts the doctype, `<head>` contents, `<body>`
/// contents and attributes. Falls back to treating the whole input as
/// body content if no `<body>` tag is present — templates are free-form
/// HTML fragments as often as full documents.
#[must_use]
pub fn extract_html_parts(html: &str) -> HtmlParts {
    let mut parts = HtmlParts::default();

    if let Some(start) = html.to_ascii_lowercase().find("<!doctype") {
        if let Some(end) = html[start..].find('>') {
            parts.doctype = html[start..=start + end].to_string();
        }
    }

    let lower = html.to_ascii_lowercase();
    if let (Some(head_start), Some(head_end)) = (lower.find("<head"), lower.find("</head>")) {
        if let Some(tag_end) = html[head_start..].find('>') {
            let content_start = head_start + tag_end + 1;
            if content_start <= head_end {
                parts.head = html[content_start..head_end].trim().to_string();
            }
        }
    }

    if let Some(body_start) = lower.find("<body") {
        if let Some(tag_end_rel) = html[body_start..].find('>') {
            let tag_end = body_start + tag_end_rel;
            parts.body_attributes = html[body_start + 5..tag_end].trim().to_string();
            let content_start = tag_end + 1;
            let content_end = lower.find("</body>").unwrap_or(html.len());
            if content_start <= content_end {
                parts.body_content = html[content_start..content_end].trim().to_string();
            }
            return parts;
        }
    }

    parts.body_content = html.trim().to_string();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeStore {
        templates: Mutex<HashMap<String, Template>>,
        campaign_types: Mutex<HashMap<String, CampaignType>>,
    }

    #[async_trait::async_trait]
    impl TemplateStore for FakeStore {
        async fn get_template(&self, id: &str) -> Option<Template> {
            self.templates.lock().unwrap().get(id).cloned()
        }

        async fn get_campaign_type(&self, id: &str) -> Option<CampaignType> {
            self.campaign_types.lock().unwrap().get(id).cloned()
        }

        async fn default_template(&self) -> Template {
            Template {
                id: "default".to_string(),
                name: "Default".to_string(),
                subject: "{{.Subject}}".to_string(),
                text: "{{.Text}}".to_string(),
                html: "<html><body>{{.HTML}}</body></html>".to_string(),
                metadata: Value::Null,
                client_id: None,
            }
        }
    }

    fn fake_store() -> FakeStore {
        FakeStore {
            templates: Mutex::new(HashMap::new()),
            campaign_types: Mutex::new(HashMap::new()),
        }
    }

    #[tokio::test]
    async fn test_explicit_override_wins() {
        let store = fake_store();
        store.templates.lock().unwrap().insert(
            "override".to_string(),
            Template {
                id: "override".to_string(),
                name: "Override".to_string(),
                subject: "s".to_string(),
                text: "t".to_string(),
                html: "h".to_string(),
                metadata: Value::Null,
                client_id: None,
            },
        );
        let resolved = resolve_template(&store, Some("override"), "ct-1", "client-1", None).await;
        assert_eq!(resolved.id, "override");
    }

    #[tokio::test]
    async fn test_falls_back_to_campaign_type_template() {
        let store = fake_store();
        store.campaign_types.lock().unwrap().insert(
            "ct-1".to_string(),
            CampaignType {
                id: "ct-1".to_string(),
                name: "Type".to_string(),
                critical: false,
                template_id: Some("ct-template".to_string()),
                client_id: "client-1".to_string(),
                sender_id: "sender-1".to_string(),
            },
        );
        store.templates.lock().unwrap().insert(
            "ct-template".to_string(),
            Template {
                id: "ct-template".to_string(),
                name: "CT".to_string(),
                subject: "s".to_string(),
                text: "t".to_string(),
                html: "h".to_string(),
                metadata: Value::Null,
                client_id: None,
            },
        );
        let resolved = resolve_template(&store, None, "ct-1", "client-1", None).await;
        assert_eq!(resolved.id, "ct-template");
    }

    #[tokio::test]
    async fn test_explicit_override_owned_by_another_client_is_rejected() {
        let store = fake_store();
        store.templates.lock().unwrap().insert(
            "client-b-template".to_string(),
            Template {
                id: "client-b-template".to_string(),
                name: "Client B's template".to_string(),
                subject: "s".to_string(),
                text: "t".to_string(),
                html: "h".to_string(),
                metadata: Value::Null,
                client_id: Some("client-b".to_string()),
            },
        );
        let resolved = resolve_template(&store, Some("client-b-template"), "ct-1", "client-a", None).await;
        assert_eq!(resolved.id, "default");
    }

    #[tokio::test]
    async fn test_falls_back_to_global_default() {
        let store = fake_store();
        let resolved = resolve_template(&store, None, "missing-ct", "client-1", None).await;
        assert_eq!(resolved.id, "default");
    }

    #[test]
    fn test_substitute_replaces_known_fields() {
        let ctx = RenderContext {
            subject: "Hello".to_string(),
            text: "World".to_string(),
            html: String::new(),
            recipient: HashMap::new(),
            template_metadata: Value::Null,
        };
        assert_eq!(substitute("{{.Subject}}, {{.Text}}!", &ctx), "Hello, World!");
    }

    #[test]
    fn test_substitute_leaves_unknown_field_verbatim() {
        let ctx = RenderContext::default();
        assert_eq!(substitute("{{.Unknown}}", &ctx), "{{.Unknown}}");
    }

    #[test]
    fn test_extract_html_parts_full_document() {
        let html = "<!DOCTYPE html><html><head><title>t</title></head><body class=\"x\">hi</body></html>";
        let parts = extract_html_parts(html);
        assert_eq!(parts.doctype, "<!DOCTYPE html>");
        assert_eq!(parts.body_attributes, "class=\"x\"");
        assert_eq!(parts.body_content, "hi");
    }

    #[test]
    fn test_extract_html_parts_fragment_falls_back_to_body_content() {
        let parts = extract_html_parts("<p>just a fragment</p>");
        assert_eq!(parts.body_content, "<p>just a fragment</p>");
        assert!(parts.doctype.is_empty());
    }
}
