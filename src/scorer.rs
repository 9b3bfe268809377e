//! Scores a single lead with the language model.
//!
//! The scorer never returns an error: transport failures, an open circuit and
//! unparseable replies all become a neutral [`ScoreOutcome::Degraded`].

use crate::circuit_breaker::{create_llm_circuit_breaker, LlmCircuitBreaker};
use crate::models::{Lead, ScoreOutcome, ScoreResult};
use crate::openai_client::{CompletionModel, CompletionRequest};
use crate::summarizer::summarize;
use failsafe::CircuitBreaker;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

pub const SYSTEM_INSTRUCTION: &str = "You are a sales lead scoring expert. Always respond with SCORE: [number] and REASON: [explanation] format.";
pub const MAX_OUTPUT_TOKENS: u32 = 150;
pub const SCORING_TEMPERATURE: f32 = 0.3;

pub const UNPARSEABLE_REASON: &str = "Unable to parse AI response";
pub const MISSING_REASON: &str = "No reason provided";
const CIRCUIT_OPEN_REASON: &str = "language model circuit open, call skipped";

static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SCORE:\s*([0-9]+)").expect("valid score regex"));
static REASON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"REASON:\s*(.+)").expect("valid reason regex"));

/// Builds the user prompt around a lead summary.
pub fn build_prompt(summary: &str) -> String {
    format!(
        "You are an expert sales lead scorer. Analyze the following lead information and provide a score from 1-10 based on lead quality, potential value, and likelihood to convert.

Scoring criteria:
- 1-3: Low quality lead (poor contact info, no clear value, unlikely to convert)
- 4-6: Medium quality lead (decent contact info, some potential, moderate conversion chance)
- 7-8: High quality lead (good contact info, clear value proposition, likely to convert)
- 9-10: Excellent lead (complete info, high value, very likely to convert)

Consider these factors:
- Contact information completeness (phone, email)
- Company size and position
- Lead source and pipeline stage
- Custom field data
- Price/value indicators
- Tags and previous interactions

Lead Data:
{summary}

Provide your response in this exact format:
SCORE: [number from 1-10]
REASON: [brief explanation of why this score was given]

Example:
SCORE: 7
REASON: Good contact information, established company, clear position, moderate price value
"
    )
}

/// Parses a `SCORE:`/`REASON:` reply.
///
/// Without a `SCORE:` label the outcome is degraded; a missing `REASON:` only
/// defaults the reason. Scores outside 1..=10 are clamped.
pub fn parse_score_response(text: &str) -> ScoreOutcome {
    let Some(captures) = SCORE_RE.captures(text) else {
        return ScoreOutcome::degraded(UNPARSEABLE_REASON);
    };

    // Digits too long for u64 are still an over-range score.
    let score = captures[1].parse::<u64>().unwrap_or(u64::MAX);

    let reason = REASON_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| MISSING_REASON.to_string());

    ScoreOutcome::Scored(ScoreResult::new(score, reason))
}

/// Turns leads into scores through a [`CompletionModel`].
pub struct LeadScorer {
    model: Arc<dyn CompletionModel>,
    breaker: LlmCircuitBreaker,
}

impl LeadScorer {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self::with_breaker(model, create_llm_circuit_breaker())
    }

    pub fn with_breaker(model: Arc<dyn CompletionModel>, breaker: LlmCircuitBreaker) -> Self {
        Self { model, breaker }
    }

    /// The completion request sent for `lead`.
    pub fn request_for(lead: &Lead) -> CompletionRequest {
        CompletionRequest {
            system: SYSTEM_INSTRUCTION.to_string(),
            prompt: build_prompt(&summarize(lead)),
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: SCORING_TEMPERATURE,
        }
    }

    /// Scores one lead. Always yields a result.
    pub async fn score(&self, lead: &Lead) -> ScoreOutcome {
        if !self.breaker.is_call_permitted() {
            tracing::warn!("Skipping model call for lead {}: circuit open", lead.id);
            return ScoreOutcome::degraded(format!("Error: {}", CIRCUIT_OPEN_REASON));
        }

        let request = Self::request_for(lead);
        let response = self.model.complete(&request).await;

        match self.breaker.call(move || response) {
            Ok(text) => {
                let outcome = parse_score_response(&text);
                if outcome.is_degraded() {
                    tracing::warn!(
                        "Could not parse model reply for lead {}: {:?}",
                        lead.id,
                        text
                    );
                }
                outcome
            }
            Err(failsafe::Error::Inner(e)) => {
                tracing::error!("Error scoring lead {}: {}", lead.id, e);
                ScoreOutcome::degraded(format!("Error: {}", e))
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Model call for lead {} rejected: circuit open", lead.id);
                ScoreOutcome::degraded(format!("Error: {}", CIRCUIT_OPEN_REASON))
            }
        }
    }
}
