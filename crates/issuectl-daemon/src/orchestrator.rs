//! Cycle Controller (C8): orchestrates one ingest→detect→plan→execute
//! pass for a single repository and assembles the per-cycle report.
//!
//! Cycles are serial per `(owner, repo)` — the scheduler never runs two
//! cycles for the same repository concurrently — but multiple
//! repositories' cycles may run at once, sharing the global rate
//! buckets and executing against the same store.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use issuectl_core::config::Config;
use issuectl_core::rate_budget::RateBudget;
use issuectl_core::store::Store;
use issuectl_core::types::{ActionType, RateLimitBucket};
use issuectl_detector::FeatureDetector;
use issuectl_executor::executor::{ActionExecutor, CycleExecutionReport};
use issuectl_planner::ActionPlanner;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ingestor::Ingestor;

#[derive(Debug, Clone, Serialize)]
pub struct RateBucketHeadroom {
    pub bucket: RateLimitBucket,
    pub remaining: i64,
    pub seconds_to_reset: i64,
}

/// Assembled once per `run_cycle` call, per the cycle controller's
/// design: cycle id, repo, per-phase durations, counters, a rate-limit
/// headroom snapshot, and any terminal failures encountered without
/// aborting the whole cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub repo_owner: String,
    pub repo_name: String,
    pub started_at: DateTime<Utc>,
    pub sync_duration_ms: f64,
    pub detect_duration_ms: f64,
    pub plan_duration_ms: f64,
    pub execute_duration_ms: f64,
    pub fetched: usize,
    pub new_issues: usize,
    pub updated_issues: usize,
    pub analyzed: usize,
    pub planned_actions: usize,
    pub completed_actions: usize,
    pub failed_actions: usize,
    pub cancelled_actions: usize,
    pub rate_limit_headroom: Vec<RateBucketHeadroom>,
    pub terminal_failures: Vec<String>,
}

pub struct CycleController {
    store: Arc<Store>,
    rate_budget: Arc<RateBudget>,
    ingestor: Ingestor,
    detector: FeatureDetector,
    planner: ActionPlanner,
    executor: ActionExecutor,
    config: Config,
}

impl CycleController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        rate_budget: Arc<RateBudget>,
        ingestor: Ingestor,
        detector: FeatureDetector,
        planner: ActionPlanner,
        executor: ActionExecutor,
        config: Config,
    ) -> Self {
        Self { store, rate_budget, ingestor, detector, planner, executor, config }
    }

    /// Run one ingest→detect→plan→execute pass for `(owner, repo)`. Each
    /// phase is skipped once the cycle's deadline has elapsed, leaving
    /// its counters at zero and recording a terminal failure rather than
    /// running past the configured ceiling.
    #[instrument(skip(self), fields(%owner, %repo))]
    pub async fn run_cycle(&self, owner: &str, repo: &str, force_full_scan: bool) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = started_at + chrono::Duration::seconds(self.config.executor.cycle_deadline_seconds as i64);
        let mut terminal_failures = Vec::new();

        let sync_started = Instant::now();
        let sync_report = self.ingestor.sync(owner, repo, force_full_scan).await?;
        let sync_duration_ms = sync_started.elapsed().as_secs_f64() * 1000.0;

        let detect_started = Instant::now();
        let mut analyzed = 0usize;
        if Utc::now() < deadline {
            let analysis_limit = (self.config.planner.max_actions_per_run as i64) * 4;
            match self
                .store
                .list_issues_needing_analysis_for_repo(owner, repo, analysis_limit)
                .await
            {
                Ok(due) => {
                    for issue in &due {
                        match self.detector.analyze_issue(issue).await {
                            Ok(_) => analyzed += 1,
                            Err(err) => terminal_failures.push(format!("detect issue {}: {err}", issue.id)),
                        }
                    }
                }
                Err(err) => terminal_failures.push(format!("listing issues needing analysis: {err}")),
            }
        } else {
            warn!(%cycle_id, "cycle deadline exceeded before detection phase");
            terminal_failures.push("deadline exceeded before detection phase".to_string());
        }
        let detect_duration_ms = detect_started.elapsed().as_secs_f64() * 1000.0;

        let plan_started = Instant::now();
        let mut planned_actions = 0usize;
        if Utc::now() < deadline {
            let plan_limit = self.config.planner.max_actions_per_run as i64;
            match self.store.list_issues_ready_for_planning(owner, repo, plan_limit).await {
                Ok(ready) => match self.planner.plan_for_issues(&ready).await {
                    Ok(actions) => planned_actions = actions.len(),
                    Err(err) => terminal_failures.push(format!("planning: {err}")),
                },
                Err(err) => terminal_failures.push(format!("listing issues ready for planning: {err}")),
            }
        } else {
            warn!(%cycle_id, "cycle deadline exceeded before planning phase");
            terminal_failures.push("deadline exceeded before planning phase".to_string());
        }
        let plan_duration_ms = plan_started.elapsed().as_secs_f64() * 1000.0;

        let execute_started = Instant::now();
        let mut execution = CycleExecutionReport::default();
        if Utc::now() < deadline {
            match self.executor.run_cycle_for_repo(owner, repo).await {
                Ok(report) => execution = report,
                Err(err) => terminal_failures.push(format!("execution: {err}")),
            }
        } else {
            warn!(%cycle_id, "cycle deadline exceeded before execution phase");
            terminal_failures.push("deadline exceeded before execution phase".to_string());
        }
        let execute_duration_ms = execute_started.elapsed().as_secs_f64() * 1000.0;

        let rate_limit_headroom = [
            RateLimitBucket::Core,
            RateLimitBucket::Search,
            RateLimitBucket::Graphql,
            RateLimitBucket::IntegrationManifest,
        ]
        .into_iter()
        .map(|bucket| {
            let headroom = self.rate_budget.headroom(bucket);
            RateBucketHeadroom {
                bucket,
                remaining: headroom.remaining,
                seconds_to_reset: headroom.seconds_to_reset,
            }
        })
        .collect();

        let report = CycleReport {
            cycle_id,
            repo_owner: owner.to_string(),
            repo_name: repo.to_string(),
            started_at,
            sync_duration_ms,
            detect_duration_ms,
            plan_duration_ms,
            execute_duration_ms,
            fetched: sync_report.fetched,
            new_issues: sync_report.new_issues,
            updated_issues: sync_report.updated_issues,
            analyzed,
            planned_actions,
            completed_actions: execution.completed,
            failed_actions: execution.failed,
            cancelled_actions: execution.cancelled,
            rate_limit_headroom,
            terminal_failures,
        };

        info!(
            %cycle_id, owner, repo, analyzed, planned_actions,
            completed = execution.completed, failed = execution.failed, cancelled = execution.cancelled,
            "cycle complete"
        );
        Ok(report)
    }

    /// The synchronous half of the webhook path: ingest one delivery and,
    /// if it resolved to an issue, drive that issue alone through
    /// detect→plan→execute without waiting for the next periodic cycle.
    #[instrument(skip(self, raw_body, headers))]
    pub async fn process_webhook_event(
        &self,
        raw_body: &[u8],
        headers: &std::collections::HashMap<String, String>,
    ) -> Result<WebhookCycleOutcome> {
        let result = self.ingestor.ingest(raw_body, headers, &self.config.webhook).await?;

        if result.is_new_delivery && result.event_type == "issues" && result.action.as_deref() == Some("reopened") {
            if let Some(issue_id) = result.issue_id {
                self.roll_back_close_on_reopen(issue_id).await;
            }
        }

        let Some(issue_id) = result.issue_id else {
            return Ok(WebhookCycleOutcome {
                delivery_id: result.delivery_id,
                is_new_delivery: result.is_new_delivery,
                issue_processed: false,
                actions_planned: 0,
                prior_processed: result.prior_processed,
                prior_triggered_actions: result.prior_triggered_actions,
                prior_automation_results: result.prior_automation_results,
            });
        };

        let Some(issue) = self.store.get_issue(issue_id).await? else {
            return Ok(WebhookCycleOutcome {
                delivery_id: result.delivery_id,
                is_new_delivery: result.is_new_delivery,
                issue_processed: false,
                actions_planned: 0,
                prior_processed: result.prior_processed,
                prior_triggered_actions: result.prior_triggered_actions,
                prior_automation_results: result.prior_automation_results,
            });
        };

        self.detector.analyze_issue(&issue).await?;
        let refreshed = self.store.get_issue(issue_id).await?.unwrap_or(issue);
        let actions = self.planner.plan_for_issue(&refreshed).await?;
        let mut execution = None;
        if !actions.is_empty() {
            execution = Some(
                self.executor
                    .run_cycle_for_repo(&refreshed.repo_owner, &refreshed.repo_name)
                    .await?,
            );
        }

        // Record the real outcome against the delivery so a retry of the
        // same `X-GitHub-Delivery` gets this result back verbatim, per
        // §7's "409 ... with the prior result body".
        let automation_results = serde_json::json!({
            "actions_planned": actions.len(),
            "completed": execution.as_ref().map(|e| e.completed).unwrap_or(0),
            "failed": execution.as_ref().map(|e| e.failed).unwrap_or(0),
            "cancelled": execution.as_ref().map(|e| e.cancelled).unwrap_or(0),
        });
        if let Err(err) = self
            .store
            .record_webhook_automation_results(&result.delivery_id, actions.len() as i64, &automation_results)
            .await
        {
            warn!(delivery_id = %result.delivery_id, error = %err, "failed to record webhook automation results");
        }

        Ok(WebhookCycleOutcome {
            delivery_id: result.delivery_id,
            is_new_delivery: result.is_new_delivery,
            issue_processed: true,
            actions_planned: actions.len(),
            prior_processed: result.prior_processed,
            prior_triggered_actions: result.prior_triggered_actions,
            prior_automation_results: result.prior_automation_results,
        })
    }

    /// Scenario: a human reopens an issue shortly after this automation
    /// closed it. Finds the most recent completed `close_issue` action
    /// within `rollback_window_seconds` and rolls it back with reason
    /// `human_reopen_detected`, rather than waiting for a manual call.
    /// Never fails the webhook response on error; a rollback miss here
    /// is logged and left for manual follow-up.
    async fn roll_back_close_on_reopen(&self, issue_id: Uuid) {
        let since = Utc::now() - chrono::Duration::seconds(self.config.executor.rollback_window_seconds);
        let candidate = match self.store.find_recent_completed_action(issue_id, ActionType::CloseIssue, since).await {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(%issue_id, error = %err, "failed to look up close action for reopen rollback");
                return;
            }
        };
        let Some(action) = candidate else { return };
        match self.executor.rollback(action.id, "human_reopen_detected").await {
            Ok(()) => info!(%issue_id, action_id = %action.id, "rolled back close action after human reopen"),
            Err(err) => warn!(%issue_id, action_id = %action.id, error = %err, "rollback after reopen failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookCycleOutcome {
    pub delivery_id: String,
    pub is_new_delivery: bool,
    pub issue_processed: bool,
    pub actions_planned: usize,
    /// Carried from the ingestor's stored outcome when this delivery was
    /// already processed, so the webhook endpoint can return the prior
    /// result body on a duplicate delivery per §7.
    pub prior_processed: Option<bool>,
    pub prior_triggered_actions: Option<i64>,
    pub prior_automation_results: Option<serde_json::Value>,
}
