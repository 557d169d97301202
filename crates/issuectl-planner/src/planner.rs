//! Action Planner (C6): turns an analyzed issue into zero or more
//! pending [`Action`] rows, ordered by a priority score the executor
//! later claims in.

use std::sync::Arc;

use chrono::Utc;
use issuectl_core::config::PlannerConfig;
use issuectl_core::store::Store;
use issuectl_core::types::{Action, ActionType, ConfidenceLevel, Issue, IssueStatus};

use crate::error::Result;

const RECENCY_WINDOW_DAYS: f64 = 30.0;

pub struct ActionPlanner {
    store: Arc<Store>,
    config: PlannerConfig,
}

impl ActionPlanner {
    pub fn new(store: Arc<Store>, config: PlannerConfig) -> Self {
        Self { store, config }
    }

    /// Synthesize and persist actions for one analyzed issue. Returns the
    /// actions written, already ordered by descending priority.
    pub async fn plan_for_issue(&self, issue: &Issue) -> Result<Vec<Action>> {
        if !issue.automation_eligible {
            return Ok(Vec::new());
        }

        let mut actions = synthesize_actions(issue, &self.config);
        for action in &mut actions {
            action.priority_score = priority_score(issue, action);
        }
        actions.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        for action in &actions {
            self.store.create_action(action).await?;
        }
        Ok(actions)
    }

    /// Plan for a batch of analyzed issues, respecting the per-cycle cap
    /// on total actions emitted.
    pub async fn plan_for_issues(&self, issues: &[Issue]) -> Result<Vec<Action>> {
        let mut planned = Vec::new();
        for batch in issuectl_core::batch::batch_items(issues.to_vec(), self.config.batch_size) {
            for issue in &batch {
                if planned.len() as u32 >= self.config.max_actions_per_run {
                    return Ok(planned);
                }
                let mut actions = self.plan_for_issue(issue).await?;
                let remaining = (self.config.max_actions_per_run as usize).saturating_sub(planned.len());
                actions.truncate(remaining);
                planned.extend(actions);
            }
        }
        Ok(planned)
    }
}

fn synthesize_actions(issue: &Issue, config: &PlannerConfig) -> Vec<Action> {
    let now = Utc::now();
    let score = issue.feature_completion_score;
    let confidence = issue.automation_confidence;

    let mut actions = Vec::new();
    let mut closing_or_labeling = false;

    let eligible_close = config.enable_auto_close
        && issue.status == IssueStatus::Open
        && matches!(confidence, Some(ConfidenceLevel::High) | Some(ConfidenceLevel::VeryHigh))
        && score >= config.min_confidence_auto_close;

    if eligible_close {
        actions.push(Action::new_pending(
            issue.id,
            ActionType::CloseIssue,
            score,
            format!(
                "feature_completion_score {:.2} meets auto-close threshold {:.2} at {:?} confidence",
                score, config.min_confidence_auto_close, confidence
            ),
            serde_json::json!({ "feature_completion_score": score }),
            config.action_max_attempts,
            now,
        ));
        closing_or_labeling = true;
    }

    let derived = derived_labels(confidence);
    let proposed_labels: Vec<String> = derived.into_iter().filter(|l| !issue.has_label(l)).collect();
    let eligible_label = config.enable_auto_label && score >= config.min_confidence_auto_label && !proposed_labels.is_empty();

    if eligible_label {
        actions.push(Action::new_pending(
            issue.id,
            ActionType::LabelIssue,
            score,
            format!("feature_completion_score {:.2} meets auto-label threshold {:.2}", score, config.min_confidence_auto_label),
            serde_json::json!({ "labels": proposed_labels }),
            config.action_max_attempts,
            now,
        ));
        closing_or_labeling = true;
    }

    if closing_or_labeling && config.enable_auto_comment {
        actions.push(Action::new_pending(
            issue.id,
            ActionType::CommentIssue,
            score,
            "summary comment accompanying an automated close/label action",
            serde_json::json!({
                "feature_completion_score": score,
                "automation_confidence": confidence,
            }),
            config.action_max_attempts,
            now,
        ));
    }

    actions
}

/// Labels this detector's confidence level would add, absent any
/// explicit per-repo label-mapping configuration.
fn derived_labels(confidence: Option<ConfidenceLevel>) -> Vec<String> {
    match confidence {
        Some(ConfidenceLevel::VeryHigh) => vec!["automation/high-confidence".to_string(), "automation/ready-to-close".to_string()],
        Some(ConfidenceLevel::High) => vec!["automation/high-confidence".to_string()],
        Some(ConfidenceLevel::Medium) => vec!["automation/needs-review".to_string()],
        Some(ConfidenceLevel::Low) | None => Vec::new(),
    }
}

fn impact_hint(issue: &Issue) -> f64 {
    if issue.has_label("security") {
        1.0
    } else if issue.has_label("bug") {
        0.7
    } else {
        0.3
    }
}

fn recency_normalized(issue: &Issue) -> f64 {
    let age_days = (Utc::now() - issue.github_updated_at).num_seconds() as f64 / 86_400.0;
    (1.0 - (age_days / RECENCY_WINDOW_DAYS)).clamp(0.0, 1.0)
}

fn priority_score(issue: &Issue, action: &Action) -> f64 {
    0.6 * action.confidence_score + 0.3 * recency_normalized(issue) + 0.1 * impact_hint(issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuectl_core::types::{Issue, IssueSnapshot};

    fn sample_issue(score: f64, confidence: Option<ConfidenceLevel>, labels: Vec<String>) -> Issue {
        let now = Utc::now();
        let snapshot = IssueSnapshot {
            number: 7,
            github_id: 7,
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            title: "Add dark mode".into(),
            body: None,
            status: IssueStatus::Open,
            author: "octocat".into(),
            assignees: vec![],
            labels,
            milestone: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };
        let mut issue = Issue::new(snapshot, now);
        issue.feature_completion_score = score;
        issue.automation_confidence = confidence;
        issue
    }

    #[test]
    fn very_high_confidence_above_threshold_closes_labels_and_comments() {
        let issue = sample_issue(0.90, Some(ConfidenceLevel::VeryHigh), vec![]);
        let actions = synthesize_actions(&issue, &PlannerConfig::default());
        let types: Vec<_> = actions.iter().map(|a| a.action_type).collect();
        assert!(types.contains(&ActionType::CloseIssue));
        assert!(types.contains(&ActionType::LabelIssue));
        assert!(types.contains(&ActionType::CommentIssue));
    }

    #[test]
    fn medium_confidence_below_close_threshold_only_labels() {
        let issue = sample_issue(0.65, Some(ConfidenceLevel::Medium), vec![]);
        let actions = synthesize_actions(&issue, &PlannerConfig::default());
        let types: Vec<_> = actions.iter().map(|a| a.action_type).collect();
        assert!(!types.contains(&ActionType::CloseIssue));
        assert!(types.contains(&ActionType::LabelIssue));
    }

    #[test]
    fn low_confidence_emits_nothing() {
        let issue = sample_issue(0.20, Some(ConfidenceLevel::Low), vec![]);
        let actions = synthesize_actions(&issue, &PlannerConfig::default());
        assert!(actions.is_empty());
    }

    #[test]
    fn already_present_labels_are_not_reproposed() {
        let issue = sample_issue(0.90, Some(ConfidenceLevel::VeryHigh), vec!["automation/high-confidence".into(), "automation/ready-to-close".into()]);
        let actions = synthesize_actions(&issue, &PlannerConfig::default());
        assert!(!actions.iter().any(|a| a.action_type == ActionType::LabelIssue));
    }

    #[test]
    fn disabled_kill_switches_suppress_actions() {
        let mut config = PlannerConfig::default();
        config.enable_auto_close = false;
        config.enable_auto_label = false;
        config.enable_auto_comment = false;
        let issue = sample_issue(0.95, Some(ConfidenceLevel::VeryHigh), vec![]);
        let actions = synthesize_actions(&issue, &config);
        assert!(actions.is_empty());
    }

    #[test]
    fn emitted_actions_carry_the_configured_max_attempts() {
        let mut config = PlannerConfig::default();
        config.action_max_attempts = 7;
        let issue = sample_issue(0.95, Some(ConfidenceLevel::VeryHigh), vec![]);
        let actions = synthesize_actions(&issue, &config);
        assert!(!actions.is_empty());
        assert!(actions.iter().all(|a| a.max_attempts == 7));
    }

    #[test]
    fn security_label_raises_priority_over_default_impact() {
        let security_issue = sample_issue(0.9, Some(ConfidenceLevel::VeryHigh), vec!["security".into()]);
        let plain_issue = sample_issue(0.9, Some(ConfidenceLevel::VeryHigh), vec![]);
        assert!(impact_hint(&security_issue) > impact_hint(&plain_issue));
    }
}
