//! Action Executor (C7): drains pending actions under a bounded-concurrency
//! worker pool, executes each against the GitHub gateway, and supports
//! rolling a completed action back via its inverse operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use issuectl_core::store::Store;
use issuectl_core::types::{Action, ActionStatus, ActionType, Issue, IssueStatus};
use issuectl_core::config::ExecutorConfig;
use issuectl_github::Gateway;
use issuectl_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::backoff::backoff_for_attempt;
use crate::error::{ExecutorError, Result};
use crate::lock::IssueLocks;

/// Outcome summary for one `run_cycle` pass, surfaced to the cycle
/// controller's per-cycle report.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CycleExecutionReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Actions that hit a rate-limit ceiling and were requeued to
    /// `pending` for a future cycle rather than failed outright.
    pub deferred: usize,
}

pub struct ActionExecutor {
    store: Arc<Store>,
    gateway: Arc<Gateway>,
    config: ExecutorConfig,
    locks: IssueLocks,
    circuit_breaker: CircuitBreaker,
}

impl ActionExecutor {
    /// `http_timeout_seconds` bounds each individual GitHub call
    /// (`GitHubConfig::http_timeout_seconds`, default 60s); it is kept
    /// separate from `ExecutorConfig` because it is a gateway-level
    /// concern the executor merely needs to configure its circuit
    /// breaker with.
    pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, config: ExecutorConfig, http_timeout_seconds: u64) -> Self {
        let circuit_breaker = CircuitBreaker::new(CircuitBreakerConfig {
            call_timeout: Duration::from_secs(http_timeout_seconds),
            ..CircuitBreakerConfig::default()
        });
        Self {
            store,
            gateway,
            config,
            locks: IssueLocks::new(),
            circuit_breaker,
        }
    }

    /// Claim a batch of pending actions and drive each to a terminal
    /// state (or back to `pending` for a future cycle's retry, which
    /// `claim_actions` implements by leaving it `in_progress` until its
    /// backoff elapses and a reaper or this same call retries it).
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleExecutionReport> {
        let claim_limit = (self.config.max_concurrent_actions as i64) * 4;
        let claimed = self.store.claim_actions(claim_limit, Utc::now()).await?;
        self.drain_claimed(claimed).await
    }

    /// Same drain as `run_cycle`, scoped to one repository's actions so
    /// concurrently-running per-repo cycles don't attribute another
    /// repo's executions to this one's report.
    #[instrument(skip(self))]
    pub async fn run_cycle_for_repo(&self, owner: &str, repo: &str) -> Result<CycleExecutionReport> {
        let claim_limit = (self.config.max_concurrent_actions as i64) * 4;
        let claimed = self.store.claim_actions_for_repo(owner, repo, claim_limit, Utc::now()).await?;
        self.drain_claimed(claimed).await
    }

    async fn drain_claimed(&self, claimed: Vec<Action>) -> Result<CycleExecutionReport> {
        let mut report = CycleExecutionReport { claimed: claimed.len(), ..Default::default() };

        let mut grouped: HashMap<Uuid, Vec<Action>> = HashMap::new();
        for action in claimed {
            grouped.entry(action.issue_id).or_default().push(action);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_actions));
        let mut tasks = JoinSet::new();

        for (issue_id, actions) in grouped {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let store = self.store.clone();
            let gateway = self.gateway.clone();
            let config = self.config.clone();
            let locks = self.locks.clone();
            let circuit_breaker = self.circuit_breaker.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let _lock = locks.try_acquire(issue_id);
                if _lock.is_none() {
                    warn!(%issue_id, "issue already locked by another worker, deferring its actions");
                    return Vec::new();
                }

                let issue = match store.get_issue(issue_id).await {
                    Ok(Some(issue)) => issue,
                    Ok(None) => {
                        error!(%issue_id, "claimed action references unknown issue");
                        return Vec::new();
                    }
                    Err(err) => {
                        error!(%issue_id, error = %err, "failed to load issue for claimed actions");
                        return Vec::new();
                    }
                };

                let mut outcomes = Vec::with_capacity(actions.len());
                let mut prior = issue.clone();
                for action in actions {
                    let outcome = execute_one(&store, &gateway, &circuit_breaker, &config, &prior, action.clone()).await;
                    if outcome == ActionStatus::Completed {
                        apply_local_effect(&mut prior, &action);
                    }
                    outcomes.push(outcome);
                }
                outcomes
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for status in outcomes {
                        match status {
                            ActionStatus::Completed => report.completed += 1,
                            ActionStatus::Failed => report.failed += 1,
                            ActionStatus::Cancelled => report.cancelled += 1,
                            ActionStatus::Pending => report.deferred += 1,
                            _ => {}
                        }
                    }
                }
                Err(join_err) => error!(error = %join_err, "executor worker task panicked"),
            }
        }

        Ok(report)
    }

    /// Roll a completed, rollback-eligible action back to its prior
    /// GitHub state.
    #[instrument(skip(self, reason))]
    pub async fn rollback(&self, action_id: Uuid, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut action = self
            .store
            .get_action(action_id)
            .await?
            .ok_or(ExecutorError::UnknownAction(action_id))?;

        if action.status != ActionStatus::Completed || !action.can_rollback {
            return Err(ExecutorError::NotRollbackEligible(action_id));
        }

        let issue = self
            .store
            .get_issue(action.issue_id)
            .await?
            .ok_or(ExecutorError::MissingIssue(action.issue_id))?;

        invert_action(&self.gateway, &issue, &action).await?;

        action.status = ActionStatus::RolledBack;
        action.rolled_back = true;
        action.rollback_reason = Some(reason);
        self.store.update_action(&action).await?;
        info!(%action_id, "action rolled back");
        Ok(())
    }
}

/// Upper bound on consecutive rate-limit deferrals within one `execute_one`
/// call, independent of `rate_limit_wait_ceiling_seconds`. A deferral isn't
/// counted against `max_attempts` and its wait can legitimately be ~0 right
/// after a window rolls over, so without a separate cap a bucket that keeps
/// reporting itself exhausted (clock skew, a misbehaving observe) would spin
/// this worker forever while holding its issue lock and pool permit.
const MAX_CONSECUTIVE_RATE_LIMIT_DEFERRALS: u32 = 20;

async fn execute_one(
    store: &Arc<Store>,
    gateway: &Arc<Gateway>,
    circuit_breaker: &CircuitBreaker,
    config: &ExecutorConfig,
    issue: &Issue,
    mut action: Action,
) -> ActionStatus {
    let rate_limit_ceiling = Duration::from_secs(config.rate_limit_wait_ceiling_seconds);
    let mut consecutive_rate_limit_deferrals: u32 = 0;

    loop {
        action.execution_attempts += 1;

        if let Some(reason) = check_precondition(gateway, issue, &action).await {
            action.status = ActionStatus::Cancelled;
            action.success = Some(false);
            action.error_message = Some(reason.clone());
            action.completed_at = Some(Utc::now());
            let _ = store.update_action(&action).await;
            warn!(action_id = %action.id, reason = %reason, "action precondition failed, cancelling");
            return ActionStatus::Cancelled;
        }

        // The circuit breaker erases the inner error to a `String`, so we
        // stash the typed `GatewayError` on the side to recover the
        // RateLimited/Transient/Permanent classification §7 requires.
        let last_error: Arc<std::sync::Mutex<Option<issuectl_github::GatewayError>>> =
            Arc::new(std::sync::Mutex::new(None));
        let last_error_write = last_error.clone();
        let call_result = circuit_breaker
            .call(|| async {
                let result = perform_action(gateway, issue, &action).await;
                if let Err(ref e) = result {
                    *last_error_write.lock().expect("lock not poisoned") = Some(e.clone());
                }
                result
            })
            .await;

        match call_result {
            Ok(response) => {
                action.success = Some(true);
                action.status = ActionStatus::Completed;
                action.github_response = Some(response.body.clone());
                action.rollback_data = Some(build_rollback_data(issue, &action, &response));
                action.completed_at = Some(Utc::now());
                action.duration_ms = action
                    .started_at
                    .map(|s| (Utc::now() - s).num_milliseconds() as f64);
                let _ = store.update_action(&action).await;
                return ActionStatus::Completed;
            }
            Err(err) => {
                let gateway_err = last_error.lock().expect("lock not poisoned").take();

                if let Some(issuectl_github::GatewayError::RateLimited { reset_at }) = gateway_err {
                    // A rate-limit response that slipped past `reserve()` is a
                    // deferral, not a failed attempt: don't count it against
                    // `max_attempts`.
                    action.execution_attempts -= 1;
                    consecutive_rate_limit_deferrals += 1;
                    let wait = (reset_at - Utc::now()).to_std().unwrap_or_default();
                    if wait > rate_limit_ceiling || consecutive_rate_limit_deferrals > MAX_CONSECUTIVE_RATE_LIMIT_DEFERRALS {
                        action.status = ActionStatus::Pending;
                        action.started_at = None;
                        let _ = store.update_action(&action).await;
                        warn!(
                            action_id = %action.id,
                            wait_secs = wait.as_secs(),
                            consecutive_rate_limit_deferrals,
                            "rate limit wait exceeds ceiling or deferral count, deferring to next cycle"
                        );
                        return ActionStatus::Pending;
                    }
                    info!(action_id = %action.id, wait_secs = wait.as_secs(), "deferring action for rate limit reset");
                    tokio::time::sleep(wait).await;
                    continue;
                }

                let is_permanent = matches!(gateway_err, Some(issuectl_github::GatewayError::Permanent { .. }));
                let exhausted = action.execution_attempts >= action.max_attempts;

                if is_permanent || exhausted {
                    action.success = Some(false);
                    action.status = ActionStatus::Failed;
                    action.error_message = Some(err.to_string());
                    action.completed_at = Some(Utc::now());
                    let _ = store.update_action(&action).await;
                    warn!(action_id = %action.id, error = %err, "action failed permanently");
                    return ActionStatus::Failed;
                }

                warn!(action_id = %action.id, attempt = action.execution_attempts, error = %err, "action attempt failed, backing off");
                let _ = store.update_action(&action).await;
                let wait = backoff_for_attempt(action.execution_attempts, config.backoff_base_seconds, config.backoff_cap_seconds);
                tokio::time::sleep(wait.min(rate_limit_ceiling)).await;
            }
        }
    }
}

/// Re-checks the mutation's precondition against current GitHub state
/// immediately before calling out, so a concurrently-closed issue or an
/// already-applied label does not get acted on twice. Returns `Some(reason)`
/// when the precondition no longer holds, in which case the caller cancels
/// the action rather than retrying or failing it.
async fn check_precondition(gateway: &Arc<Gateway>, issue: &Issue, action: &Action) -> Option<String> {
    if action.action_type == ActionType::CloseIssue {
        return match gateway
            .get_issue(&issue.repo_owner, &issue.repo_name, issue.github_issue_number as u64)
            .await
        {
            Ok(snapshot) if snapshot.status != IssueStatus::Open => {
                Some(format!("issue is no longer open (status={:?})", snapshot.status))
            }
            Ok(_) => None,
            Err(err) => Some(format!("failed to re-check issue state before closing: {err}")),
        };
    }
    check_local_precondition(issue, action)
}

/// The subset of precondition checks that need no network round trip:
/// labels already applied, or the issue having moved out of `open` since
/// the action was planned.
fn check_local_precondition(issue: &Issue, action: &Action) -> Option<String> {
    match action.action_type {
        ActionType::LabelIssue => {
            let labels = extract_string_list(&action.evidence, "labels");
            if !labels.is_empty() && labels.iter().all(|l| issue.has_label(l)) {
                Some("all proposed labels are already applied".to_string())
            } else {
                None
            }
        }
        ActionType::CommentIssue | ActionType::AssignIssue | ActionType::MilestoneIssue => {
            if issue.status != IssueStatus::Open {
                Some(format!("issue is no longer open (status={:?})", issue.status))
            } else {
                None
            }
        }
        ActionType::CloseIssue | ActionType::UpdateIssue | ActionType::CreateIssue => None,
    }
}

async fn perform_action(gateway: &Arc<Gateway>, issue: &Issue, action: &Action) -> std::result::Result<issuectl_github::types::GitHubResponse, issuectl_github::GatewayError> {
    let owner = issue.repo_owner.as_str();
    let repo = issue.repo_name.as_str();
    let number = issue.github_issue_number as u64;

    match action.action_type {
        ActionType::CloseIssue => gateway.close_issue(owner, repo, number).await,
        ActionType::LabelIssue => {
            let labels = extract_string_list(&action.evidence, "labels");
            gateway.add_labels(owner, repo, number, &labels).await
        }
        ActionType::CommentIssue => {
            let body = build_comment_body(action);
            gateway.add_comment(owner, repo, number, &body).await
        }
        ActionType::AssignIssue => {
            let assignees = extract_string_list(&action.evidence, "assignees");
            gateway.set_assignees(owner, repo, number, &assignees).await
        }
        ActionType::MilestoneIssue => {
            let milestone = action.evidence.get("milestone_number").and_then(|v| v.as_u64());
            gateway.set_milestone(owner, repo, number, milestone).await
        }
        ActionType::UpdateIssue | ActionType::CreateIssue => Err(issuectl_github::GatewayError::Permanent {
            status: 501,
            body: "action type not implemented by the executor".to_string(),
        }),
    }
}

fn build_comment_body(action: &Action) -> String {
    format!(
        "Automated update (confidence {:.2}): {}",
        action.confidence_score, action.reasoning
    )
}

fn extract_string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// `issue` is the issue's state immediately before this action ran, so
/// `AssignIssue`/`MilestoneIssue` rollback data reflects what was
/// actually in place rather than an empty/cleared value.
fn build_rollback_data(issue: &Issue, action: &Action, response: &issuectl_github::types::GitHubResponse) -> serde_json::Value {
    match action.action_type {
        ActionType::CommentIssue => serde_json::json!({ "comment_id": response.comment_id }),
        ActionType::LabelIssue => serde_json::json!({ "labels_added": extract_string_list(&action.evidence, "labels") }),
        ActionType::AssignIssue => serde_json::json!({ "prior_assignees": issue.assignees }),
        ActionType::MilestoneIssue => serde_json::json!({
            "prior_milestone_number": action.evidence.get("prior_milestone_number").and_then(|v| v.as_u64()),
        }),
        _ => serde_json::json!({}),
    }
}

/// Updates the in-memory issue snapshot carried across a batch of
/// same-issue actions so a later action in the same cycle sees the
/// effect of an earlier one when it captures its own rollback data.
fn apply_local_effect(issue: &mut Issue, action: &Action) {
    match action.action_type {
        ActionType::AssignIssue => issue.assignees = extract_string_list(&action.evidence, "assignees"),
        ActionType::LabelIssue => {
            for label in extract_string_list(&action.evidence, "labels") {
                if !issue.has_label(&label) {
                    issue.labels.push(label);
                }
            }
        }
        _ => {}
    }
}

/// Inverse-operation table for rollback, per action type:
/// close→reopen, label→remove the labels this action added,
/// comment→delete the comment this action created,
/// assign/milestone→restore the prior value captured at plan time.
async fn invert_action(gateway: &Arc<Gateway>, issue: &Issue, action: &Action) -> Result<()> {
    let owner = issue.repo_owner.as_str();
    let repo = issue.repo_name.as_str();
    let number = issue.github_issue_number as u64;
    let rollback_data = action.rollback_data.clone().unwrap_or(serde_json::json!({}));

    match action.action_type {
        ActionType::CloseIssue => {
            gateway.reopen_issue(owner, repo, number).await?;
        }
        ActionType::LabelIssue => {
            let labels = extract_string_list(&rollback_data, "labels_added");
            if !labels.is_empty() {
                gateway.remove_labels(owner, repo, number, &labels).await?;
            }
        }
        ActionType::CommentIssue => {
            if let Some(id) = rollback_data.get("comment_id").and_then(|v| v.as_i64()) {
                gateway.delete_comment(owner, repo, id).await?;
            }
        }
        ActionType::AssignIssue => {
            let prior = extract_string_list(&rollback_data, "prior_assignees");
            gateway.set_assignees(owner, repo, number, &prior).await?;
        }
        ActionType::MilestoneIssue => {
            let prior = rollback_data.get("prior_milestone_number").and_then(|v| v.as_u64());
            gateway.set_milestone(owner, repo, number, prior).await?;
        }
        ActionType::UpdateIssue | ActionType::CreateIssue => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuectl_core::types::IssueSnapshot;

    fn sample_issue(status: IssueStatus, labels: Vec<String>) -> Issue {
        let now = Utc::now();
        Issue::new(
            IssueSnapshot {
                number: 1,
                github_id: 100,
                repo_owner: "acme".into(),
                repo_name: "widgets".into(),
                title: "t".into(),
                body: None,
                status,
                author: "alice".into(),
                assignees: vec![],
                labels,
                milestone: None,
                created_at: now,
                updated_at: now,
                closed_at: None,
            },
            now,
        )
    }

    fn sample_action(action_type: ActionType, evidence: serde_json::Value) -> Action {
        Action::new_pending(Uuid::new_v4(), action_type, 0.9, "because", evidence, 3, Utc::now())
    }

    #[test]
    fn label_precondition_fails_when_all_labels_already_present() {
        let issue = sample_issue(IssueStatus::Open, vec!["automated-close".to_string()]);
        let action = sample_action(ActionType::LabelIssue, serde_json::json!({ "labels": ["automated-close"] }));
        assert!(check_local_precondition(&issue, &action).is_some());
    }

    #[test]
    fn label_precondition_passes_when_a_label_is_missing() {
        let issue = sample_issue(IssueStatus::Open, vec!["automated-close".to_string()]);
        let action = sample_action(
            ActionType::LabelIssue,
            serde_json::json!({ "labels": ["automated-close", "needs-review"] }),
        );
        assert!(check_local_precondition(&issue, &action).is_none());
    }

    #[test]
    fn comment_precondition_fails_once_issue_is_closed() {
        let issue = sample_issue(IssueStatus::Closed, vec![]);
        let action = sample_action(ActionType::CommentIssue, serde_json::json!({}));
        assert!(check_local_precondition(&issue, &action).is_some());
    }

    #[test]
    fn close_precondition_is_handled_over_the_network_not_locally() {
        let issue = sample_issue(IssueStatus::Closed, vec![]);
        let action = sample_action(ActionType::CloseIssue, serde_json::json!({}));
        assert!(check_local_precondition(&issue, &action).is_none());
    }
}
