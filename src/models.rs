use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lowest score the model may assign.
pub const MIN_SCORE: u8 = 1;
/// Highest score the model may assign.
pub const MAX_SCORE: u8 = 10;
/// Neutral score used whenever a lead cannot be scored.
pub const DEFAULT_SCORE: u8 = 5;
/// Leads scoring at or above this value are "high scoring" (medium and up).
pub const HIGH_SCORE_THRESHOLD: u8 = 5;

// ============ Lenient field decoding ============
//
// Kommo sends `null` for empty collections and occasionally reshapes nested
// fields. A bad nested value must fall back to its default instead of
// rejecting the whole lead.

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Decodes a list element by element, dropping entries that do not fit.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn contact_values<'de, D>(deserializer: D) -> Result<Vec<ContactValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(ContactValue::from_json)
            .collect(),
        other => ContactValue::from_json(other).into_iter().collect(),
    })
}

/// Renders a scalar JSON value as display text. `null` becomes empty.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============ CRM Models ============

/// An `{id, name}` reference to another Kommo entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    #[serde(default, deserialize_with = "lenient")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
}

/// A single phone number or email address attached to a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContactValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_code: Option<String>,
}

impl ContactValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            enum_code: None,
        }
    }

    /// Accepts `{"value": ..}` objects as well as bare strings and numbers.
    fn from_json(value: Value) -> Option<Self> {
        let (text, enum_code) = match value {
            Value::Object(map) => (
                map.get("value").map(render_scalar).unwrap_or_default(),
                map.get("enum_code")
                    .and_then(|c| c.as_str())
                    .map(str::to_string),
            ),
            Value::String(s) => (s, None),
            Value::Number(n) => (n.to_string(), None),
            _ => return None,
        };

        if text.trim().is_empty() {
            return None;
        }

        Some(Self {
            value: text,
            enum_code,
        })
    }
}

/// A tag attached to a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
}

impl Tag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// One value of a custom field. Kommo values may be strings, numbers or booleans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub enum_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub enum_code: Option<String>,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Value::String(value.into()),
            ..Default::default()
        }
    }
}

/// CRM-defined extra attribute on a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub field_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub field_name: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub values: Vec<FieldValue>,
}

/// Entities Kommo embeds into a lead payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadEmbedded {
    #[serde(default, deserialize_with = "lenient_list")]
    pub tags: Vec<Tag>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub companies: Vec<NamedRef>,
}

/// A Kommo sales lead.
///
/// Only `id` is required. Every other field defaults to empty or zero when it
/// is missing, `null` or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "String::is_empty")]
    pub company_name: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "String::is_empty")]
    pub position: String,
    #[serde(default, deserialize_with = "contact_values", skip_serializing_if = "Vec::is_empty")]
    pub phone: Vec<ContactValue>,
    #[serde(default, deserialize_with = "contact_values", skip_serializing_if = "Vec::is_empty")]
    pub email: Vec<ContactValue>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub custom_fields_values: Vec<CustomField>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<NamedRef>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<NamedRef>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub responsible_user_id: Option<i64>,
    #[serde(rename = "_embedded", default, deserialize_with = "lenient")]
    pub embedded: LeadEmbedded,
}

impl Lead {
    /// Pipeline the lead currently sits in, from either the reference or the bare id.
    pub fn current_pipeline_id(&self) -> Option<i64> {
        self.pipeline
            .as_ref()
            .map(|p| p.id)
            .filter(|id| *id != 0)
            .or(self.pipeline_id)
    }

    pub fn current_status_id(&self) -> Option<i64> {
        self.status
            .as_ref()
            .map(|s| s.id)
            .filter(|id| *id != 0)
            .or(self.status_id)
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.as_ref().map(|p| p.name.as_str()).unwrap_or("")
    }

    pub fn status_name(&self) -> &str {
        self.status.as_ref().map(|s| s.name.as_str()).unwrap_or("")
    }

    /// Company name, falling back to the first embedded company.
    pub fn company(&self) -> &str {
        if !self.company_name.is_empty() {
            return &self.company_name;
        }
        self.embedded
            .companies
            .first()
            .map(|c| c.name.as_str())
            .unwrap_or("")
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.embedded
            .tags
            .iter()
            .map(|t| t.name.as_str())
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.embedded.tags.iter().any(|t| t.name == name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn updated_time(&self) -> Option<DateTime<Utc>> {
        self.updated_at.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

/// A single stage within a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub sort: i64,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineEmbedded {
    #[serde(default, deserialize_with = "lenient_list")]
    pub statuses: Vec<Status>,
}

/// An ordered sequence of stages a lead moves through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub sort: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub is_main: bool,
    #[serde(rename = "_embedded", default, deserialize_with = "lenient")]
    pub embedded: PipelineEmbedded,
}

impl Pipeline {
    pub fn statuses(&self) -> &[Status] {
        &self.embedded.statuses
    }
}

/// Outcome of a tag write through the CRM gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagWrite {
    Added,
    AlreadyPresent,
}

// ============ Scoring Models ============

/// Score assigned to one lead in one scoring pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    score: u8,
    reason: String,
}

impl ScoreResult {
    /// Creates a result, clamping the score into `MIN_SCORE..=MAX_SCORE`.
    pub fn new(score: u64, reason: impl Into<String>) -> Self {
        let score = score.clamp(MIN_SCORE as u64, MAX_SCORE as u64) as u8;
        Self {
            score,
            reason: reason.into(),
        }
    }

    /// The neutral result used when scoring degrades.
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            score: DEFAULT_SCORE,
            reason: reason.into(),
        }
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Either a real score from the model or the neutral fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreOutcome {
    Scored(ScoreResult),
    Degraded(ScoreResult),
}

impl ScoreOutcome {
    pub fn degraded(reason: impl Into<String>) -> Self {
        ScoreOutcome::Degraded(ScoreResult::neutral(reason))
    }

    pub fn result(&self) -> &ScoreResult {
        match self {
            ScoreOutcome::Scored(result) | ScoreOutcome::Degraded(result) => result,
        }
    }

    pub fn into_result(self) -> ScoreResult {
        match self {
            ScoreOutcome::Scored(result) | ScoreOutcome::Degraded(result) => result,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ScoreOutcome::Degraded(_))
    }
}

/// Tag name recording a score on a lead.
pub fn score_tag_name(score: u8) -> String {
    format!("AI_Score_{}", score)
}

/// A copy of a lead enriched with its AI score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLead {
    #[serde(flatten)]
    pub lead: Lead,
    pub ai_score: u8,
    pub ai_reason: String,
}

impl ScoredLead {
    /// Attaches a score to a clone of `lead`; the input is left untouched.
    pub fn new(lead: &Lead, result: ScoreResult) -> Self {
        Self {
            lead: lead.clone(),
            ai_score: result.score,
            ai_reason: result.reason,
        }
    }

    pub fn id(&self) -> i64 {
        self.lead.id
    }

    pub fn score_tag(&self) -> String {
        score_tag_name(self.ai_score)
    }

    pub fn is_high_score(&self) -> bool {
        self.ai_score >= HIGH_SCORE_THRESHOLD
    }
}

/// Aggregate of one score-and-tag pass.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total_leads: usize,
    pub tagged_leads: usize,
    pub high_score_leads: Vec<ScoredLead>,
    pub high_score_count: usize,
}

/// Counts from moving high-scoring leads into a target pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MoveReport {
    pub total_high_score: usize,
    pub moved_leads: usize,
    pub skipped_leads: usize,
    pub target_pipeline: i64,
    pub target_status: Option<i64>,
}

/// Score distribution over a scoring pass with no CRM writes.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreSummary {
    pub total_leads: usize,
    pub score_distribution: BTreeMap<u8, usize>,
    pub high_score_leads: Vec<ScoredLead>,
}

/// Success and degradation counts for a scoring run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoringStats {
    pub total: usize,
    pub successful: usize,
    pub degraded: usize,
}
