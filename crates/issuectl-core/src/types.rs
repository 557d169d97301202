//! Domain types shared by every component of the automation core: the
//! persisted entities from the data model, plus the small value types that
//! flow between components without being persisted on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Closed,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    /// Map a `feature_completion_score` to a confidence bucket per the
    /// detector's scoring model (score thresholds only; the
    /// `false_positive_score` gate for `very_high` is applied by the
    /// caller, since it isn't a pure function of the score).
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.70 {
            ConfidenceLevel::High
        } else if score >= 0.50 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub github_issue_number: i64,
    pub github_issue_id: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub title: String,
    pub body: Option<String>,
    pub status: IssueStatus,
    pub author: String,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub milestone: Option<String>,
    pub automation_eligible: bool,
    pub automation_confidence: Option<ConfidenceLevel>,
    pub feature_completion_score: f64,
    pub github_created_at: DateTime<Utc>,
    pub github_updated_at: DateTime<Utc>,
    pub github_closed_at: Option<DateTime<Utc>>,
    pub first_detected: DateTime<Utc>,
    pub last_analyzed: Option<DateTime<Utc>>,
    pub analysis_count: i64,
    pub last_analysis_duration_ms: Option<f64>,
}

impl Issue {
    /// A fresh row for an issue never seen before, derived from a snapshot
    /// fetched off the wire. `feature_completion_score` starts at zero and
    /// `automation_eligible` defaults true until the detector says
    /// otherwise.
    pub fn new(snapshot: IssueSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            github_issue_number: snapshot.number,
            github_issue_id: snapshot.github_id,
            repo_owner: snapshot.repo_owner,
            repo_name: snapshot.repo_name,
            title: snapshot.title,
            body: snapshot.body,
            status: snapshot.status,
            author: snapshot.author,
            assignees: snapshot.assignees,
            labels: snapshot.labels,
            milestone: snapshot.milestone,
            automation_eligible: true,
            automation_confidence: None,
            feature_completion_score: 0.0,
            github_created_at: snapshot.created_at,
            github_updated_at: snapshot.updated_at,
            github_closed_at: snapshot.closed_at,
            first_detected: now,
            last_analyzed: None,
            analysis_count: 0,
            last_analysis_duration_ms: None,
        }
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(name))
    }

    pub fn is_do_not_automate(&self) -> bool {
        self.has_label("do-not-automate")
    }
}

/// An issue snapshot as fetched from GitHub, before it has a local id.
/// Produced by the gateway (C2), consumed by the store's `upsert_issue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub number: i64,
    pub github_id: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub title: String,
    pub body: Option<String>,
    pub status: IssueStatus,
    pub author: String,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub milestone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CloseIssue,
    UpdateIssue,
    CreateIssue,
    LabelIssue,
    AssignIssue,
    MilestoneIssue,
    CommentIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl ActionStatus {
    /// The state machine from the executor design (§4.7): which
    /// transitions are legal from the current state.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, InProgress) // backoff / rate-limit re-entry
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (Completed, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Completed
                | ActionStatus::Failed
                | ActionStatus::RolledBack
                | ActionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub confidence_score: f64,
    pub reasoning: String,
    pub evidence: serde_json::Value,
    pub execution_attempts: i64,
    pub max_attempts: i64,
    pub api_calls_used: i64,
    pub rate_limit_remaining_seen: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub github_response: Option<serde_json::Value>,
    pub rollback_data: Option<serde_json::Value>,
    pub can_rollback: bool,
    pub rolled_back: bool,
    pub rollback_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    /// Planner-assigned priority score. Not an independent column in the
    /// source schema; recomputed from `confidence_score` and issue context
    /// at plan time and carried on the in-memory struct for sort stability
    /// within a cycle.
    #[serde(default)]
    pub priority_score: f64,
}

impl Action {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        issue_id: Uuid,
        action_type: ActionType,
        confidence_score: f64,
        reasoning: impl Into<String>,
        evidence: serde_json::Value,
        max_attempts: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id,
            action_type,
            status: ActionStatus::Pending,
            confidence_score,
            reasoning: reasoning.into(),
            evidence,
            execution_attempts: 0,
            max_attempts,
            api_calls_used: 0,
            rate_limit_remaining_seen: None,
            success: None,
            error_message: None,
            github_response: None,
            rollback_data: None,
            can_rollback: matches!(
                action_type,
                ActionType::CloseIssue
                    | ActionType::LabelIssue
                    | ActionType::CommentIssue
                    | ActionType::AssignIssue
                    | ActionType::MilestoneIssue
            ),
            rolled_back: false,
            rollback_reason: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            priority_score: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureDetection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    NotStarted,
    InProgress,
    Completed,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDetection {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub feature_name: String,
    pub feature_category: String,
    pub completion_status: CompletionStatus,
    pub confidence_score: f64,
    pub detection_method: String,
    pub code_evidence: Vec<String>,
    pub commit_evidence: Vec<String>,
    pub test_evidence: Vec<String>,
    pub documentation_evidence: Vec<String>,
    pub analysis_version: String,
    pub false_positive_score: f64,
    pub detected_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// WebhookEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub github_delivery_id: String,
    pub event_type: String,
    pub action: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
    pub payload: serde_json::Value,
    pub headers: serde_json::Value,
    pub processed: bool,
    pub processing_duration_ms: Option<f64>,
    pub processing_error: Option<String>,
    pub triggered_actions: i64,
    pub automation_results: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// RateLimitSample / RateLimitBucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBucket {
    Core,
    Search,
    Graphql,
    IntegrationManifest,
}

impl RateLimitBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitBucket::Core => "core",
            RateLimitBucket::Search => "search",
            RateLimitBucket::Graphql => "graphql",
            RateLimitBucket::IntegrationManifest => "integration_manifest",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSample {
    pub id: Uuid,
    pub api_endpoint: String,
    pub rate_limit_type: RateLimitBucket,
    pub limit: i64,
    pub remaining: i64,
    pub reset_timestamp: i64,
    pub used: i64,
    pub request_url: String,
    pub response_status: i32,
    pub request_duration_ms: f64,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AutomationMetric
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationMetric {
    pub id: Uuid,
    pub metric_name: String,
    pub metric_category: String,
    pub value: f64,
    pub previous_value: Option<f64>,
    pub change_percentage: Option<f64>,
    pub repository_name: Option<String>,
    pub time_period: String,
    pub details: serde_json::Value,
    pub measured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_from_score_boundaries() {
        assert_eq!(ConfidenceLevel::from_score(0.0), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.49), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.50), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.70), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.85), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_score(1.0), ConfidenceLevel::VeryHigh);
    }

    #[test]
    fn action_status_valid_transitions() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::InProgress));
        assert!(ActionStatus::InProgress.can_transition_to(ActionStatus::Completed));
        assert!(ActionStatus::InProgress.can_transition_to(ActionStatus::Failed));
        assert!(ActionStatus::Completed.can_transition_to(ActionStatus::RolledBack));
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Cancelled));
    }

    #[test]
    fn action_status_invalid_transitions() {
        assert!(!ActionStatus::Completed.can_transition_to(ActionStatus::Pending));
        assert!(!ActionStatus::Failed.can_transition_to(ActionStatus::Completed));
        assert!(!ActionStatus::Cancelled.can_transition_to(ActionStatus::InProgress));
        assert!(!ActionStatus::RolledBack.can_transition_to(ActionStatus::Completed));
    }

    #[test]
    fn action_status_terminal() {
        assert!(ActionStatus::Completed.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
        assert!(ActionStatus::RolledBack.is_terminal());
        assert!(ActionStatus::Cancelled.is_terminal());
        assert!(!ActionStatus::Pending.is_terminal());
        assert!(!ActionStatus::InProgress.is_terminal());
    }

    #[test]
    fn issue_do_not_automate_label_is_case_insensitive() {
        let snapshot = IssueSnapshot {
            number: 1,
            github_id: 100,
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            title: "t".into(),
            body: None,
            status: IssueStatus::Open,
            author: "a".into(),
            assignees: vec![],
            labels: vec!["Do-Not-Automate".into()],
            milestone: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
        };
        let issue = Issue::new(snapshot, Utc::now());
        assert!(issue.is_do_not_automate());
    }

    #[test]
    fn new_action_defaults_can_rollback_by_type() {
        let now = Utc::now();
        let close = Action::new_pending(
            Uuid::new_v4(),
            ActionType::CloseIssue,
            0.9,
            "high confidence",
            serde_json::json!({}),
            3,
            now,
        );
        assert!(close.can_rollback);

        let create = Action::new_pending(
            Uuid::new_v4(),
            ActionType::CreateIssue,
            0.9,
            "n/a",
            serde_json::json!({}),
            3,
            now,
        );
        assert!(!create.can_rollback);
    }
}
