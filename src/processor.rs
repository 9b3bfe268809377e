/// Batch orchestration of the lead-scoring pipeline
///
/// This module drives the per-lead flow over a collection:
/// 1. Score each lead (summary → prompt → model → parsed score)
/// 2. Tag each lead in Kommo with `AI_Score_<n>`
/// 3. Move high-scoring leads into a target pipeline
///
/// Leads are processed one at a time in input order. A failure on one lead is
/// logged and counted; it never aborts the batch.
use crate::errors::{AppError, ResultExt};
use crate::kommo_client::CrmGateway;
use crate::models::{
    BatchResult, Lead, MoveReport, ScoreSummary, ScoredLead, ScoringStats, TagWrite,
};
use crate::scorer::LeadScorer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default spacing between consecutive CRM writes.
pub const DEFAULT_WRITE_PACING: Duration = Duration::from_millis(100);

pub struct LeadProcessor {
    gateway: Arc<dyn CrmGateway>,
    scorer: LeadScorer,
    write_pacing: Duration,
}

impl LeadProcessor {
    pub fn new(gateway: Arc<dyn CrmGateway>, scorer: LeadScorer) -> Self {
        Self {
            gateway,
            scorer,
            write_pacing: DEFAULT_WRITE_PACING,
        }
    }

    pub fn with_write_pacing(mut self, pacing: Duration) -> Self {
        self.write_pacing = pacing;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn CrmGateway> {
        &self.gateway
    }

    /// Constant delay before every CRM write except the first of a pass.
    async fn pace(&self, writes_issued: usize) {
        if writes_issued > 0 && !self.write_pacing.is_zero() {
            tokio::time::sleep(self.write_pacing).await;
        }
    }

    /// Scores every lead in order. The output has exactly one entry per input.
    pub async fn score_all(&self, leads: &[Lead]) -> Vec<ScoredLead> {
        self.score_all_with_stats(leads).await.0
    }

    /// Like [`score_all`](Self::score_all), also reporting how many scores degraded.
    pub async fn score_all_with_stats(&self, leads: &[Lead]) -> (Vec<ScoredLead>, ScoringStats) {
        let total = leads.len();
        let mut scored_leads = Vec::with_capacity(total);
        let mut stats = ScoringStats {
            total,
            ..Default::default()
        };

        tracing::info!("🤖 Starting AI scoring for {} leads", total);

        for (i, lead) in leads.iter().enumerate() {
            let display_name = if lead.name.is_empty() {
                "Unknown"
            } else {
                lead.name.as_str()
            };
            tracing::info!("Scoring lead {}/{}: {}", i + 1, total, display_name);

            let outcome = self.scorer.score(lead).await;
            if outcome.is_degraded() {
                stats.degraded += 1;
            } else {
                stats.successful += 1;
            }

            let scored = ScoredLead::new(lead, outcome.into_result());
            tracing::debug!(
                "Lead {} scored {} ({})",
                scored.id(),
                scored.ai_score,
                scored.ai_reason
            );
            scored_leads.push(scored);
        }

        tracing::info!(
            "📊 Scoring completed: {} successful, {} degraded",
            stats.successful,
            stats.degraded
        );

        (scored_leads, stats)
    }

    /// Tags each lead with `AI_Score_<score>`. Returns how many leads carry the tag afterwards.
    pub async fn tag_all(&self, scored_leads: &[ScoredLead]) -> usize {
        let mut tagged_count = 0;

        for (i, lead) in scored_leads.iter().enumerate() {
            self.pace(i).await;

            let tag_name = lead.score_tag();
            match self.gateway.add_tag(lead.id(), &tag_name).await {
                Ok(TagWrite::Added) => {
                    tagged_count += 1;
                    tracing::info!("✓ Added tag '{}' to lead {}", tag_name, lead.id());
                }
                Ok(TagWrite::AlreadyPresent) => {
                    tagged_count += 1;
                    tracing::debug!("Lead {} already tagged '{}'", lead.id(), tag_name);
                }
                Err(e) => {
                    tracing::warn!("✗ Failed to tag lead {}: {}", lead.id(), e);
                }
            }
        }

        tracing::info!(
            "Tagged {} leads out of {}",
            tagged_count,
            scored_leads.len()
        );
        tagged_count
    }

    /// Resolves the status a lead lands in when moved into `pipeline_id`.
    async fn resolve_target_status(
        &self,
        pipeline_id: i64,
        status_id: Option<i64>,
    ) -> Result<i64, AppError> {
        if let Some(status_id) = status_id {
            return Ok(status_id);
        }

        let statuses = self
            .gateway
            .list_pipeline_statuses(pipeline_id)
            .await
            .with_context(|| format!("Resolving first status of pipeline {}", pipeline_id))?;

        statuses.first().map(|s| s.id).ok_or_else(|| {
            AppError::NotFound(format!(
                "Could not find statuses for target pipeline {}",
                pipeline_id
            ))
        })
    }

    /// Moves leads scoring at or above the threshold into `target_pipeline_id`.
    ///
    /// Leads already in the target pipeline are skipped without a request.
    pub async fn move_high_scoring(
        &self,
        scored_leads: &[ScoredLead],
        target_pipeline_id: i64,
        target_status_id: Option<i64>,
    ) -> Result<MoveReport, AppError> {
        let high_score: Vec<&ScoredLead> =
            scored_leads.iter().filter(|l| l.is_high_score()).collect();

        let mut report = MoveReport {
            total_high_score: high_score.len(),
            target_pipeline: target_pipeline_id,
            ..Default::default()
        };

        if high_score.is_empty() {
            tracing::info!("No high-scoring leads to move");
            return Ok(report);
        }

        let status_id = self
            .resolve_target_status(target_pipeline_id, target_status_id)
            .await?;
        report.target_status = Some(status_id);

        let mut writes_issued = 0;
        for lead in high_score {
            if lead.lead.current_pipeline_id() == Some(target_pipeline_id) {
                report.skipped_leads += 1;
                tracing::debug!(
                    "Lead {} already in pipeline {}",
                    lead.id(),
                    target_pipeline_id
                );
                continue;
            }

            self.pace(writes_issued).await;
            writes_issued += 1;

            match self
                .gateway
                .move_lead(lead.id(), target_pipeline_id, status_id)
                .await
            {
                Ok(()) => {
                    report.moved_leads += 1;
                    tracing::info!(
                        "✓ Moved lead {} to pipeline {} (status {})",
                        lead.id(),
                        target_pipeline_id,
                        status_id
                    );
                }
                Err(e) => {
                    tracing::warn!("✗ Failed to move lead {}: {}", lead.id(), e);
                }
            }
        }

        tracing::info!(
            "Moved {} of {} high-scoring leads ({} already in place)",
            report.moved_leads,
            report.total_high_score,
            report.skipped_leads
        );

        Ok(report)
    }

    async fn fetch_leads(&self, limit: Option<usize>) -> Result<Vec<Lead>, AppError> {
        tracing::info!("Fetching all leads from all pipelines...");
        let mut leads = self.gateway.list_all_leads().await?;

        // Closed deals are never scored, tagged or moved.
        let fetched = leads.len();
        leads.retain(|lead| !lead.is_closed());
        let skipped_closed = fetched - leads.len();
        if skipped_closed > 0 {
            tracing::info!("Skipped {} closed leads", skipped_closed);
        }

        if leads.is_empty() {
            return Err(AppError::NotFound("No leads found".to_string()));
        }

        if let Some(limit) = limit {
            leads.truncate(limit);
        }

        tracing::info!("Found {} leads to process", leads.len());
        Ok(leads)
    }

    /// Fetches, scores and tags every open lead (or the first `limit`).
    pub async fn process_all_leads(&self, limit: Option<usize>) -> Result<BatchResult, AppError> {
        let leads = self.fetch_leads(limit).await?;

        let scored_leads = self.score_all(&leads).await;
        let tagged_leads = self.tag_all(&scored_leads).await;

        let high_score_leads: Vec<ScoredLead> = scored_leads
            .into_iter()
            .filter(ScoredLead::is_high_score)
            .collect();

        Ok(BatchResult {
            total_leads: leads.len(),
            tagged_leads,
            high_score_count: high_score_leads.len(),
            high_score_leads,
        })
    }

    /// Runs a full scoring pass, then moves the high scorers into the target pipeline.
    pub async fn move_high_score_leads(
        &self,
        target_pipeline_id: i64,
        target_status_id: Option<i64>,
    ) -> Result<MoveReport, AppError> {
        let batch = self.process_all_leads(None).await?;
        self.move_high_scoring(&batch.high_score_leads, target_pipeline_id, target_status_id)
            .await
    }

    /// Scores every open lead without writing anything back and reports the distribution.
    pub async fn scores_summary(&self) -> Result<ScoreSummary, AppError> {
        let leads = self.fetch_leads(None).await?;
        let scored_leads = self.score_all(&leads).await;

        let mut score_distribution = BTreeMap::new();
        for lead in &scored_leads {
            *score_distribution.entry(lead.ai_score).or_insert(0) += 1;
        }

        Ok(ScoreSummary {
            total_leads: scored_leads.len(),
            score_distribution,
            high_score_leads: scored_leads
                .into_iter()
                .filter(ScoredLead::is_high_score)
                .collect(),
        })
    }
}
