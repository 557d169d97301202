//! Feature Detector (C5): turns an issue plus its gathered evidence into
//! a persisted [`FeatureDetection`] and an updated confidence on the
//! issue row itself.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use issuectl_core::config::DetectorConfig;
use issuectl_core::store::Store;
use issuectl_core::types::{CompletionStatus, FeatureDetection, Issue};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::evidence::EvidenceSource;
use crate::error::Result;
use crate::scoring::{self, Disqualifier};

/// Outcome of analyzing a single issue, returned for the planner and for
/// cycle-level reporting.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub issue_id: Uuid,
    pub automation_eligible: bool,
    pub feature_completion_score: f64,
    pub confidence: issuectl_core::types::ConfidenceLevel,
    pub disqualifier: Option<Disqualifier>,
}

pub struct FeatureDetector {
    store: Arc<Store>,
    evidence_source: Arc<dyn EvidenceSource>,
    config: DetectorConfig,
}

impl FeatureDetector {
    pub fn new(store: Arc<Store>, evidence_source: Arc<dyn EvidenceSource>, config: DetectorConfig) -> Self {
        Self { store, evidence_source, config }
    }

    /// Analyze one issue: gather evidence, score it, persist a detection
    /// row (unless a hard disqualifier fires), and stamp the issue's
    /// `feature_completion_score`/`automation_confidence`/eligibility.
    #[instrument(skip(self, issue), fields(issue_id = %issue.id, issue_number = issue.github_issue_number))]
    pub async fn analyze_issue(&self, issue: &Issue) -> Result<DetectionOutcome> {
        let started = Instant::now();
        let now = Utc::now();
        let evidence = self.evidence_source.gather(issue).await?;

        if let Some(disqualifier) = scoring::disqualifier(issue, &evidence, self.config.assignee_hold_window_hours, now) {
            warn!(?disqualifier, "issue disqualified from automation");
            self.store.set_automation_eligible(issue.id, false).await?;
            self.store
                .mark_issue_analyzed(issue.id, 0.0, issuectl_core::types::ConfidenceLevel::Low, now, elapsed_ms(started))
                .await?;
            return Ok(DetectionOutcome {
                issue_id: issue.id,
                automation_eligible: false,
                feature_completion_score: 0.0,
                confidence: issuectl_core::types::ConfidenceLevel::Low,
                disqualifier: Some(disqualifier),
            });
        }

        let breakdown = scoring::score(&evidence, &self.config, now);
        let confidence = scoring::confidence_level(&breakdown);

        // No disqualifier fired this pass: clear any eligibility flip a
        // prior analysis made (e.g. a `do-not-automate` label that has
        // since been removed), so the issue isn't stuck ineligible forever.
        if !issue.automation_eligible {
            self.store.set_automation_eligible(issue.id, true).await?;
        }

        let detection = FeatureDetection {
            id: Uuid::new_v4(),
            issue_id: issue.id,
            feature_name: issue.title.clone(),
            feature_category: "issue_automation".to_string(),
            completion_status: completion_status(breakdown.feature_completion_score),
            confidence_score: breakdown.feature_completion_score,
            detection_method: "weighted_evidence_v1".to_string(),
            code_evidence: evidence.files_touched.clone(),
            commit_evidence: evidence.commits.iter().map(|c| format!("{} {}", c.sha, c.message)).collect(),
            test_evidence: evidence
                .files_touched
                .iter()
                .filter(|p| crate::evidence::looks_like_test_path(p))
                .cloned()
                .collect(),
            documentation_evidence: evidence
                .files_touched
                .iter()
                .filter(|p| crate::evidence::looks_like_doc_path(p))
                .cloned()
                .collect(),
            analysis_version: self.config.analysis_version.clone(),
            false_positive_score: breakdown.false_positive_score,
            detected_at: now,
            verified_at: None,
        };
        self.store.record_detection(&detection).await?;

        self.store
            .mark_issue_analyzed(issue.id, breakdown.feature_completion_score, confidence, now, elapsed_ms(started))
            .await?;

        info!(
            score = breakdown.feature_completion_score,
            false_positive_score = breakdown.false_positive_score,
            ?confidence,
            "issue analyzed"
        );

        Ok(DetectionOutcome {
            issue_id: issue.id,
            automation_eligible: true,
            feature_completion_score: breakdown.feature_completion_score,
            confidence,
            disqualifier: None,
        })
    }

    /// Analyze every issue the store considers due for analysis, in
    /// batches, returning one outcome per issue attempted.
    pub async fn analyze_due_issues(&self, limit: i64, batch_size: usize) -> Result<Vec<DetectionOutcome>> {
        let issues = self.store.list_issues_needing_analysis(limit).await?;
        let mut outcomes = Vec::with_capacity(issues.len());
        for batch in issuectl_core::batch::batch_items(issues, batch_size) {
            for issue in batch {
                match self.analyze_issue(&issue).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => warn!(issue_id = %issue.id, error = %err, "analysis failed"),
                }
            }
        }
        Ok(outcomes)
    }
}

fn completion_status(score: f64) -> CompletionStatus {
    if score >= 0.85 {
        CompletionStatus::Verified
    } else if score >= 0.50 {
        CompletionStatus::Completed
    } else if score > 0.0 {
        CompletionStatus::InProgress
    } else {
        CompletionStatus::NotStarted
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
