//! Renders a lead as the plain-text block handed to the language model.

use crate::models::{render_scalar, ContactValue, Lead};
use chrono::{DateTime, Utc};
use std::fmt::Write;

const NO_PHONE: &str = "No phone";
const NO_EMAIL: &str = "No email";
const NO_TAGS: &str = "No tags";

fn join_contacts(values: &[ContactValue], placeholder: &str) -> String {
    if values.is_empty() {
        return placeholder.to_string();
    }
    values
        .iter()
        .map(|c| c.value.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default()
}

/// One `name: v1, v2` line per custom field; fields without values are omitted.
pub fn render_custom_fields(lead: &Lead) -> String {
    let mut out = String::new();
    for field in &lead.custom_fields_values {
        if field.values.is_empty() {
            continue;
        }
        let values = field
            .values
            .iter()
            .map(|v| render_scalar(&v.value))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "{}: {}", field.field_name, values);
    }
    out
}

/// Summarizes a lead for scoring. Never fails; absent fields render empty.
pub fn summarize(lead: &Lead) -> String {
    let tags = lead.tag_names();
    let tags_text = if tags.is_empty() {
        NO_TAGS.to_string()
    } else {
        tags.join(", ")
    };

    format!(
        "Lead Information:
- Name: {name}
- Company: {company}
- Position: {position}
- Phone: {phone}
- Email: {email}
- Pipeline: {pipeline}
- Status: {status}
- Price: {price}
- Tags: {tags}
- Created: {created}
- Updated: {updated}

Custom Fields:
{custom_fields}",
        name = lead.name,
        company = lead.company(),
        position = lead.position,
        phone = join_contacts(&lead.phone, NO_PHONE),
        email = join_contacts(&lead.email, NO_EMAIL),
        pipeline = lead.pipeline_name(),
        status = lead.status_name(),
        price = lead.price,
        tags = tags_text,
        created = format_time(lead.created_time()),
        updated = format_time(lead.updated_time()),
        custom_fields = render_custom_fields(lead),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomField, FieldValue, NamedRef, Tag};
    use serde_json::json;

    fn full_lead() -> Lead {
        Lead {
            id: 42,
            name: "Website redesign".to_string(),
            company_name: "Acme Ltda".to_string(),
            position: "CTO".to_string(),
            phone: vec![
                ContactValue::new("+55 11 98765-4321"),
                ContactValue::new("+55 11 3333-4444"),
            ],
            email: vec![ContactValue::new("cto@acme.com")],
            custom_fields_values: vec![
                CustomField {
                    field_name: "Budget".to_string(),
                    values: vec![FieldValue {
                        value: json!(50000),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                CustomField {
                    field_name: "Interests".to_string(),
                    values: vec![FieldValue::text("SEO"), FieldValue::text("Ads")],
                    ..Default::default()
                },
                CustomField {
                    field_name: "Empty".to_string(),
                    values: vec![],
                    ..Default::default()
                },
            ],
            pipeline: Some(NamedRef {
                id: 1,
                name: "Sales".to_string(),
            }),
            status: Some(NamedRef {
                id: 2,
                name: "Negotiation".to_string(),
            }),
            price: 1500.0,
            created_at: Some(1_700_000_000),
            embedded: crate::models::LeadEmbedded {
                tags: vec![Tag::named("vip"), Tag::named("inbound")],
                companies: vec![],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_contains_all_fields() {
        let summary = summarize(&full_lead());

        assert!(summary.contains("- Name: Website redesign"));
        assert!(summary.contains("- Company: Acme Ltda"));
        assert!(summary.contains("- Position: CTO"));
        assert!(summary.contains("- Phone: +55 11 98765-4321, +55 11 3333-4444"));
        assert!(summary.contains("- Email: cto@acme.com"));
        assert!(summary.contains("- Pipeline: Sales"));
        assert!(summary.contains("- Status: Negotiation"));
        assert!(summary.contains("- Price: 1500"));
        assert!(summary.contains("- Tags: vip, inbound"));
        assert!(summary.contains("- Created: 2023-11-14 22:13:20 UTC"));
        assert!(summary.contains("- Updated: \n"));
        assert!(summary.contains("Budget: 50000\n"));
        assert!(summary.contains("Interests: SEO, Ads\n"));
        assert!(!summary.contains("Empty:"));
    }

    #[test]
    fn test_bare_lead_uses_placeholders() {
        let summary = summarize(&Lead {
            id: 1,
            ..Default::default()
        });

        assert!(summary.contains("- Phone: No phone"));
        assert!(summary.contains("- Email: No email"));
        assert!(summary.contains("- Tags: No tags"));
        assert!(summary.contains("- Price: 0"));
        assert!(summary.ends_with("Custom Fields:\n"));
    }

    #[test]
    fn test_company_falls_back_to_embedded() {
        let mut lead = Lead {
            id: 1,
            ..Default::default()
        };
        lead.embedded.companies.push(NamedRef {
            id: 9,
            name: "Globex".to_string(),
        });

        assert!(summarize(&lead).contains("- Company: Globex"));
    }

    #[test]
    fn test_summary_is_deterministic() {
        let lead = full_lead();
        assert_eq!(summarize(&lead), summarize(&lead));
    }
}
