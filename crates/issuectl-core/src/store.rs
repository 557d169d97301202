use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::types::{
    Action, ActionStatus, ActionType, AutomationMetric, CompletionStatus, ConfidenceLevel,
    FeatureDetection, Issue, IssueSnapshot, IssueStatus, RateLimitBucket, RateLimitSample,
    WebhookEvent,
};

/// Async SQLite-backed persistence for issues, automation actions, feature
/// detections, webhook deliveries, rate-limit samples and automation
/// metrics.
pub struct Store {
    conn: Connection,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("row references unknown issue {0}")]
    UnknownIssue(Uuid),
}

/// Aggregate automation health over a time window, mirroring the
/// `get_automation_health` report produced by the cycle controller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AutomationHealth {
    pub window_hours: i64,
    pub total_actions: i64,
    pub successful_actions: i64,
    pub failed_actions: i64,
    pub rolled_back_actions: i64,
    pub success_rate: f64,
    pub issues_analyzed: i64,
    pub automation_eligible_issues: i64,
}

// ---------------------------------------------------------------------------
// helpers – enum <-> SQLite string
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

fn parse_dt(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid date")
        .with_timezone(&Utc)
}

fn parse_dt_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|s| parse_dt(&s))
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl Store {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-64000;
                    PRAGMA mmap_size=268435456;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS github_issues (
                        id                       TEXT PRIMARY KEY,
                        github_issue_number      INTEGER NOT NULL,
                        github_issue_id          INTEGER NOT NULL,
                        repository_owner         TEXT NOT NULL,
                        repository_name          TEXT NOT NULL,
                        title                    TEXT NOT NULL,
                        description              TEXT,
                        status                   TEXT NOT NULL,
                        author                   TEXT NOT NULL,
                        assignees                TEXT NOT NULL DEFAULT '[]',
                        labels                   TEXT NOT NULL DEFAULT '[]',
                        milestone                TEXT,
                        automation_eligible      INTEGER NOT NULL DEFAULT 1,
                        automation_confidence    TEXT,
                        feature_completion_score REAL NOT NULL DEFAULT 0.0,
                        github_created_at        TEXT NOT NULL,
                        github_updated_at        TEXT NOT NULL,
                        github_closed_at         TEXT,
                        first_detected           TEXT NOT NULL,
                        last_analyzed            TEXT,
                        analysis_count           INTEGER NOT NULL DEFAULT 0,
                        last_analysis_duration_ms REAL,

                        CONSTRAINT ck_github_issues_completion_score
                            CHECK (feature_completion_score >= 0.0 AND feature_completion_score <= 1.0),
                        CONSTRAINT uq_github_issues_github_id UNIQUE (github_issue_id)
                    );

                    CREATE INDEX IF NOT EXISTS ix_github_issues_repo ON github_issues(repository_owner, repository_name);
                    CREATE INDEX IF NOT EXISTS ix_github_issues_status ON github_issues(status);
                    CREATE INDEX IF NOT EXISTS ix_github_issues_number ON github_issues(github_issue_number);
                    CREATE INDEX IF NOT EXISTS ix_github_issues_automation ON github_issues(automation_eligible, automation_confidence);
                    CREATE INDEX IF NOT EXISTS ix_github_issues_updated ON github_issues(github_updated_at);

                    CREATE TABLE IF NOT EXISTS github_automation_actions (
                        id                          TEXT PRIMARY KEY,
                        issue_id                    TEXT NOT NULL REFERENCES github_issues(id) ON DELETE CASCADE,
                        action_type                 TEXT NOT NULL,
                        status                      TEXT NOT NULL DEFAULT 'pending',
                        confidence_score            REAL NOT NULL,
                        reasoning                   TEXT NOT NULL,
                        evidence                    TEXT NOT NULL DEFAULT '{}',
                        execution_attempts          INTEGER NOT NULL DEFAULT 0,
                        max_attempts                INTEGER NOT NULL DEFAULT 3,
                        github_api_calls            INTEGER NOT NULL DEFAULT 0,
                        github_rate_limit_remaining INTEGER,
                        success                     INTEGER,
                        error_message               TEXT,
                        github_response             TEXT,
                        rollback_data               TEXT,
                        can_rollback                INTEGER NOT NULL DEFAULT 1,
                        rolled_back                 INTEGER NOT NULL DEFAULT 0,
                        rollback_reason             TEXT,
                        created_at                  TEXT NOT NULL,
                        started_at                  TEXT,
                        completed_at                TEXT,
                        duration_ms                 REAL,

                        CONSTRAINT ck_automation_actions_confidence
                            CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0)
                    );

                    CREATE INDEX IF NOT EXISTS ix_automation_actions_issue ON github_automation_actions(issue_id);
                    CREATE INDEX IF NOT EXISTS ix_automation_actions_status ON github_automation_actions(status);
                    CREATE INDEX IF NOT EXISTS ix_automation_actions_type ON github_automation_actions(action_type);
                    CREATE INDEX IF NOT EXISTS ix_automation_actions_created ON github_automation_actions(created_at);
                    CREATE INDEX IF NOT EXISTS ix_automation_actions_confidence ON github_automation_actions(confidence_score);

                    CREATE TABLE IF NOT EXISTS feature_detections (
                        id                      TEXT PRIMARY KEY,
                        issue_id                TEXT NOT NULL REFERENCES github_issues(id) ON DELETE CASCADE,
                        feature_name            TEXT NOT NULL,
                        feature_category        TEXT NOT NULL,
                        completion_status       TEXT NOT NULL,
                        confidence_score        REAL NOT NULL,
                        detection_method        TEXT NOT NULL,
                        code_evidence           TEXT NOT NULL DEFAULT '[]',
                        commit_evidence         TEXT NOT NULL DEFAULT '[]',
                        test_evidence           TEXT NOT NULL DEFAULT '[]',
                        documentation_evidence  TEXT NOT NULL DEFAULT '[]',
                        analysis_version        TEXT NOT NULL DEFAULT '1.0.0',
                        false_positive_score    REAL NOT NULL DEFAULT 0.0,
                        detected_at             TEXT NOT NULL,
                        verified_at             TEXT,

                        CONSTRAINT ck_feature_detections_confidence
                            CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
                        CONSTRAINT ck_feature_detections_false_positive
                            CHECK (false_positive_score >= 0.0 AND false_positive_score <= 1.0),
                        CONSTRAINT ck_feature_detections_status
                            CHECK (completion_status IN ('not_started', 'in_progress', 'completed', 'verified'))
                    );

                    CREATE INDEX IF NOT EXISTS ix_feature_detections_issue ON feature_detections(issue_id);
                    CREATE INDEX IF NOT EXISTS ix_feature_detections_feature ON feature_detections(feature_name);
                    CREATE INDEX IF NOT EXISTS ix_feature_detections_status ON feature_detections(completion_status);
                    CREATE INDEX IF NOT EXISTS ix_feature_detections_confidence ON feature_detections(confidence_score);
                    CREATE INDEX IF NOT EXISTS ix_feature_detections_detected ON feature_detections(detected_at);

                    CREATE TABLE IF NOT EXISTS automation_metrics (
                        id                TEXT PRIMARY KEY,
                        metric_name       TEXT NOT NULL,
                        metric_category   TEXT NOT NULL,
                        value             REAL NOT NULL,
                        previous_value    REAL,
                        change_percentage REAL,
                        repository_name   TEXT,
                        time_period       TEXT NOT NULL DEFAULT 'daily',
                        details           TEXT NOT NULL DEFAULT '{}',
                        measured_at       TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS ix_automation_metrics_name ON automation_metrics(metric_name);
                    CREATE INDEX IF NOT EXISTS ix_automation_metrics_category ON automation_metrics(metric_category);
                    CREATE INDEX IF NOT EXISTS ix_automation_metrics_measured ON automation_metrics(measured_at);
                    CREATE INDEX IF NOT EXISTS ix_automation_metrics_repo ON automation_metrics(repository_name);

                    CREATE TABLE IF NOT EXISTS webhook_events (
                        id                      TEXT PRIMARY KEY,
                        github_delivery_id      TEXT NOT NULL UNIQUE,
                        event_type              TEXT NOT NULL,
                        action                  TEXT,
                        repository_owner        TEXT NOT NULL,
                        repository_name         TEXT NOT NULL,
                        payload                 TEXT NOT NULL,
                        headers                 TEXT NOT NULL DEFAULT '{}',
                        processed               INTEGER NOT NULL DEFAULT 0,
                        processing_duration_ms  REAL,
                        processing_error        TEXT,
                        triggered_actions       INTEGER NOT NULL DEFAULT 0,
                        automation_results      TEXT NOT NULL DEFAULT '{}',
                        received_at             TEXT NOT NULL,
                        processed_at            TEXT
                    );

                    CREATE INDEX IF NOT EXISTS ix_webhook_events_delivery ON webhook_events(github_delivery_id);
                    CREATE INDEX IF NOT EXISTS ix_webhook_events_type ON webhook_events(event_type);
                    CREATE INDEX IF NOT EXISTS ix_webhook_events_repo ON webhook_events(repository_owner, repository_name);
                    CREATE INDEX IF NOT EXISTS ix_webhook_events_received ON webhook_events(received_at);
                    CREATE INDEX IF NOT EXISTS ix_webhook_events_processed ON webhook_events(processed);

                    CREATE TABLE IF NOT EXISTS rate_limit_tracking (
                        id                   TEXT PRIMARY KEY,
                        api_endpoint         TEXT NOT NULL,
                        rate_limit_type      TEXT NOT NULL DEFAULT 'core',
                        \"limit\"            INTEGER NOT NULL,
                        remaining            INTEGER NOT NULL,
                        reset_timestamp      INTEGER NOT NULL,
                        used                 INTEGER NOT NULL,
                        request_url          TEXT NOT NULL,
                        response_status      INTEGER NOT NULL,
                        request_duration_ms  REAL NOT NULL,
                        recorded_at          TEXT NOT NULL,

                        CONSTRAINT ck_rate_limit_type
                            CHECK (rate_limit_type IN ('core', 'search', 'graphql', 'integration_manifest'))
                    );

                    CREATE INDEX IF NOT EXISTS ix_rate_limit_endpoint ON rate_limit_tracking(api_endpoint);
                    CREATE INDEX IF NOT EXISTS ix_rate_limit_type ON rate_limit_tracking(rate_limit_type);
                    CREATE INDEX IF NOT EXISTS ix_rate_limit_recorded ON rate_limit_tracking(recorded_at);
                    CREATE INDEX IF NOT EXISTS ix_rate_limit_reset ON rate_limit_tracking(reset_timestamp);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Issues
    // -----------------------------------------------------------------------

    /// Insert a newly-seen issue, or update the mutable GitHub-side fields
    /// of one already tracked. Returns the resolved local row.
    pub async fn upsert_issue(&self, snapshot: IssueSnapshot, now: DateTime<Utc>) -> Result<Issue, StoreError> {
        if let Some(existing) = self.get_issue_by_github_id(snapshot.github_id).await? {
            let mut updated = existing;
            updated.title = snapshot.title;
            updated.body = snapshot.body;
            updated.status = snapshot.status;
            updated.assignees = snapshot.assignees;
            updated.labels = snapshot.labels;
            updated.milestone = snapshot.milestone;
            updated.github_updated_at = snapshot.updated_at;
            updated.github_closed_at = snapshot.closed_at;
            self.save_issue(&updated).await?;
            return Ok(updated);
        }
        let issue = Issue::new(snapshot, now);
        self.save_issue(&issue).await?;
        Ok(issue)
    }

    async fn save_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let id = issue.id.to_string();
        let number = issue.github_issue_number;
        let github_id = issue.github_issue_id;
        let repo_owner = issue.repo_owner.clone();
        let repo_name = issue.repo_name.clone();
        let title = issue.title.clone();
        let description = issue.body.clone();
        let status = enum_to_sql(&issue.status);
        let author = issue.author.clone();
        let assignees = serde_json::to_string(&issue.assignees).expect("serialize assignees");
        let labels = serde_json::to_string(&issue.labels).expect("serialize labels");
        let milestone = issue.milestone.clone();
        let automation_eligible = issue.automation_eligible as i64;
        let automation_confidence = issue.automation_confidence.map(|c| enum_to_sql(&c));
        let feature_completion_score = issue.feature_completion_score;
        let github_created_at = issue.github_created_at.to_rfc3339();
        let github_updated_at = issue.github_updated_at.to_rfc3339();
        let github_closed_at = issue.github_closed_at.map(|d| d.to_rfc3339());
        let first_detected = issue.first_detected.to_rfc3339();
        let last_analyzed = issue.last_analyzed.map(|d| d.to_rfc3339());
        let analysis_count = issue.analysis_count;
        let last_analysis_duration_ms = issue.last_analysis_duration_ms;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO github_issues (
                        id, github_issue_number, github_issue_id, repository_owner, repository_name,
                        title, description, status, author, assignees, labels, milestone,
                        automation_eligible, automation_confidence, feature_completion_score,
                        github_created_at, github_updated_at, github_closed_at, first_detected,
                        last_analyzed, analysis_count, last_analysis_duration_ms
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)
                    ON CONFLICT(id) DO UPDATE SET
                        title=excluded.title, description=excluded.description, status=excluded.status,
                        assignees=excluded.assignees, labels=excluded.labels, milestone=excluded.milestone,
                        automation_eligible=excluded.automation_eligible,
                        automation_confidence=excluded.automation_confidence,
                        feature_completion_score=excluded.feature_completion_score,
                        github_updated_at=excluded.github_updated_at,
                        github_closed_at=excluded.github_closed_at,
                        last_analyzed=excluded.last_analyzed,
                        analysis_count=excluded.analysis_count,
                        last_analysis_duration_ms=excluded.last_analysis_duration_ms",
                    rusqlite::params![
                        id, number, github_id, repo_owner, repo_name, title, description, status,
                        author, assignees, labels, milestone, automation_eligible,
                        automation_confidence, feature_completion_score, github_created_at,
                        github_updated_at, github_closed_at, first_detected, last_analyzed,
                        analysis_count, last_analysis_duration_ms,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_issue(&self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        let id_str = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(issue_select_sql("WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_issue(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_issue_by_github_id(&self, github_id: i64) -> Result<Option<Issue>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(issue_select_sql("WHERE github_issue_id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![github_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_issue(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Issues eligible for analysis: automation_eligible and updated since
    /// their last analysis (or never analyzed).
    pub async fn list_issues_needing_analysis(&self, limit: i64) -> Result<Vec<Issue>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(issue_select_sql(
                    "WHERE automation_eligible = 1
                     AND (last_analyzed IS NULL OR last_analyzed < github_updated_at)
                     ORDER BY github_updated_at DESC LIMIT ?1",
                ))?;
                let mut rows = stmt.query(rusqlite::params![limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Same eligibility rule as [`Store::list_issues_needing_analysis`],
    /// scoped to one repository so a cycle running concurrently with
    /// other repositories' cycles only analyzes its own issues.
    pub async fn list_issues_needing_analysis_for_repo(
        &self,
        owner: &str,
        repo: &str,
        limit: i64,
    ) -> Result<Vec<Issue>, StoreError> {
        let owner = owner.to_string();
        let repo = repo.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(issue_select_sql(
                    "WHERE automation_eligible = 1
                     AND (last_analyzed IS NULL OR last_analyzed < github_updated_at)
                     AND repository_owner = ?1 AND repository_name = ?2
                     ORDER BY github_updated_at DESC LIMIT ?3",
                ))?;
                let mut rows = stmt.query(rusqlite::params![owner, repo, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Issues in `(owner, repo)` that have been analyzed at least once and
    /// are still marked automation-eligible, ordered by confidence so the
    /// planner sees its strongest candidates first.
    pub async fn list_issues_ready_for_planning(
        &self,
        owner: &str,
        repo: &str,
        limit: i64,
    ) -> Result<Vec<Issue>, StoreError> {
        let owner = owner.to_string();
        let repo = repo.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(issue_select_sql(
                    "WHERE automation_eligible = 1 AND last_analyzed IS NOT NULL
                     AND repository_owner = ?1 AND repository_name = ?2
                     ORDER BY feature_completion_score DESC LIMIT ?3",
                ))?;
                let mut rows = stmt.query(rusqlite::params![owner, repo, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn mark_issue_analyzed(
        &self,
        issue_id: Uuid,
        score: f64,
        confidence: ConfidenceLevel,
        now: DateTime<Utc>,
        duration_ms: f64,
    ) -> Result<(), StoreError> {
        let id = issue_id.to_string();
        let confidence_str = enum_to_sql(&confidence);
        let now_str = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE github_issues SET
                        feature_completion_score = ?1,
                        automation_confidence = ?2,
                        last_analyzed = ?3,
                        analysis_count = analysis_count + 1,
                        last_analysis_duration_ms = ?4
                     WHERE id = ?5",
                    rusqlite::params![score, confidence_str, now_str, duration_ms, id],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Flip an issue's automation eligibility, used by the detector when a
    /// hard disqualifier (do-not-automate label, assignee hold comment) is
    /// found or clears.
    pub async fn set_automation_eligible(&self, issue_id: Uuid, eligible: bool) -> Result<(), StoreError> {
        let id = issue_id.to_string();
        let eligible = eligible as i64;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE github_issues SET automation_eligible = ?1 WHERE id = ?2",
                    rusqlite::params![eligible, id],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Feature detections
    // -----------------------------------------------------------------------

    pub async fn record_detection(&self, detection: &FeatureDetection) -> Result<(), StoreError> {
        let id = detection.id.to_string();
        let issue_id = detection.issue_id.to_string();
        let feature_name = detection.feature_name.clone();
        let feature_category = detection.feature_category.clone();
        let completion_status = enum_to_sql(&detection.completion_status);
        let confidence_score = detection.confidence_score;
        let detection_method = detection.detection_method.clone();
        let code_evidence = serde_json::to_string(&detection.code_evidence).expect("json");
        let commit_evidence = serde_json::to_string(&detection.commit_evidence).expect("json");
        let test_evidence = serde_json::to_string(&detection.test_evidence).expect("json");
        let documentation_evidence =
            serde_json::to_string(&detection.documentation_evidence).expect("json");
        let analysis_version = detection.analysis_version.clone();
        let false_positive_score = detection.false_positive_score;
        let detected_at = detection.detected_at.to_rfc3339();
        let verified_at = detection.verified_at.map(|d| d.to_rfc3339());

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feature_detections (
                        id, issue_id, feature_name, feature_category, completion_status,
                        confidence_score, detection_method, code_evidence, commit_evidence,
                        test_evidence, documentation_evidence, analysis_version,
                        false_positive_score, detected_at, verified_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                    rusqlite::params![
                        id, issue_id, feature_name, feature_category, completion_status,
                        confidence_score, detection_method, code_evidence, commit_evidence,
                        test_evidence, documentation_evidence, analysis_version,
                        false_positive_score, detected_at, verified_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn list_detections_for_issue(&self, issue_id: Uuid) -> Result<Vec<FeatureDetection>, StoreError> {
        let id = issue_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, issue_id, feature_name, feature_category, completion_status,
                            confidence_score, detection_method, code_evidence, commit_evidence,
                            test_evidence, documentation_evidence, analysis_version,
                            false_positive_score, detected_at, verified_at
                     FROM feature_detections WHERE issue_id = ?1 ORDER BY detected_at DESC",
                )?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_detection(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Automation actions
    // -----------------------------------------------------------------------

    pub async fn create_action(&self, action: &Action) -> Result<(), StoreError> {
        self.save_action(action).await
    }

    async fn save_action(&self, action: &Action) -> Result<(), StoreError> {
        let id = action.id.to_string();
        let issue_id = action.issue_id.to_string();
        let action_type = enum_to_sql(&action.action_type);
        let status = enum_to_sql(&action.status);
        let confidence_score = action.confidence_score;
        let reasoning = action.reasoning.clone();
        let evidence = action.evidence.to_string();
        let execution_attempts = action.execution_attempts;
        let max_attempts = action.max_attempts;
        let api_calls_used = action.api_calls_used;
        let rate_limit_remaining_seen = action.rate_limit_remaining_seen;
        let success = action.success.map(|b| b as i64);
        let error_message = action.error_message.clone();
        let github_response = action.github_response.as_ref().map(|v| v.to_string());
        let rollback_data = action.rollback_data.as_ref().map(|v| v.to_string());
        let can_rollback = action.can_rollback as i64;
        let rolled_back = action.rolled_back as i64;
        let rollback_reason = action.rollback_reason.clone();
        let created_at = action.created_at.to_rfc3339();
        let started_at = action.started_at.map(|d| d.to_rfc3339());
        let completed_at = action.completed_at.map(|d| d.to_rfc3339());
        let duration_ms = action.duration_ms;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO github_automation_actions (
                        id, issue_id, action_type, status, confidence_score, reasoning, evidence,
                        execution_attempts, max_attempts, github_api_calls, github_rate_limit_remaining,
                        success, error_message, github_response, rollback_data, can_rollback,
                        rolled_back, rollback_reason, created_at, started_at, completed_at, duration_ms
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)
                    ON CONFLICT(id) DO UPDATE SET
                        status=excluded.status, execution_attempts=excluded.execution_attempts,
                        github_api_calls=excluded.github_api_calls,
                        github_rate_limit_remaining=excluded.github_rate_limit_remaining,
                        success=excluded.success, error_message=excluded.error_message,
                        github_response=excluded.github_response, rollback_data=excluded.rollback_data,
                        rolled_back=excluded.rolled_back, rollback_reason=excluded.rollback_reason,
                        started_at=excluded.started_at, completed_at=excluded.completed_at,
                        duration_ms=excluded.duration_ms",
                    rusqlite::params![
                        id, issue_id, action_type, status, confidence_score, reasoning, evidence,
                        execution_attempts, max_attempts, api_calls_used, rate_limit_remaining_seen,
                        success, error_message, github_response, rollback_data, can_rollback,
                        rolled_back, rollback_reason, created_at, started_at, completed_at, duration_ms,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Atomically claim up to `limit` pending actions for execution,
    /// ordered by confidence descending (highest-confidence work first,
    /// mirroring the scheduler's priority-then-claim pattern) and flip
    /// them to `in_progress` in the same statement.
    pub async fn claim_actions(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<Action>, StoreError> {
        let now_str = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM github_automation_actions
                         WHERE status = 'pending' ORDER BY confidence_score DESC, created_at ASC
                         LIMIT ?1",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![limit])?;
                    let mut out = Vec::new();
                    while let Some(row) = rows.next()? {
                        out.push(row.get::<_, String>(0)?);
                    }
                    out
                };

                let mut claimed = Vec::new();
                for id in &ids {
                    tx.execute(
                        "UPDATE github_automation_actions SET status = 'in_progress', started_at = ?2
                         WHERE id = ?1 AND status = 'pending'",
                        rusqlite::params![id, now_str],
                    )?;
                    let mut stmt = tx.prepare(action_select_sql("WHERE id = ?1"))?;
                    let mut rows = stmt.query(rusqlite::params![id])?;
                    if let Some(row) = rows.next()? {
                        claimed.push(row_to_action(row)?);
                    }
                }
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Requeue actions that have sat `in_progress` since before
    /// `stuck_before` back to `pending`, for a reaper to recover work
    /// orphaned by a worker process that died mid-execution. This is the
    /// one state transition the in-memory state machine
    /// (`ActionStatus::can_transition_to`) does not model, since it only
    /// happens at the store layer during crash recovery, never as a
    /// result of a normal execution outcome.
    pub async fn reap_stuck_actions(&self, stuck_before: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, StoreError> {
        let stuck_before_str = stuck_before.to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM github_automation_actions
                         WHERE status = 'in_progress' AND started_at < ?1
                         LIMIT ?2",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![stuck_before_str, limit])?;
                    let mut out = Vec::new();
                    while let Some(row) = rows.next()? {
                        out.push(row.get::<_, String>(0)?);
                    }
                    out
                };
                for id in &ids {
                    tx.execute(
                        "UPDATE github_automation_actions SET status = 'pending', started_at = NULL WHERE id = ?1",
                        rusqlite::params![id],
                    )?;
                }
                tx.commit()?;
                Ok(ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Same claim as [`Store::claim_actions`], scoped to actions whose
    /// issue belongs to `(owner, repo)`, so a cycle running concurrently
    /// with other repositories' cycles only executes its own work.
    pub async fn claim_actions_for_repo(
        &self,
        owner: &str,
        repo: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Action>, StoreError> {
        let owner = owner.to_string();
        let repo = repo.to_string();
        let now_str = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT a.id FROM github_automation_actions a
                         JOIN github_issues i ON i.id = a.issue_id
                         WHERE a.status = 'pending' AND i.repository_owner = ?1 AND i.repository_name = ?2
                         ORDER BY a.confidence_score DESC, a.created_at ASC
                         LIMIT ?3",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![owner, repo, limit])?;
                    let mut out = Vec::new();
                    while let Some(row) = rows.next()? {
                        out.push(row.get::<_, String>(0)?);
                    }
                    out
                };

                let mut claimed = Vec::new();
                for id in &ids {
                    tx.execute(
                        "UPDATE github_automation_actions SET status = 'in_progress', started_at = ?2
                         WHERE id = ?1 AND status = 'pending'",
                        rusqlite::params![id, now_str],
                    )?;
                    let mut stmt = tx.prepare(action_select_sql("WHERE id = ?1"))?;
                    let mut rows = stmt.query(rusqlite::params![id])?;
                    if let Some(row) = rows.next()? {
                        claimed.push(row_to_action(row)?);
                    }
                }
                tx.commit()?;
                Ok(claimed)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_action(&self, id: Uuid) -> Result<Option<Action>, StoreError> {
        let id_str = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(action_select_sql("WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_action(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn update_action(&self, action: &Action) -> Result<(), StoreError> {
        self.save_action(action).await
    }

    pub async fn list_actions_by_status(&self, status: ActionStatus) -> Result<Vec<Action>, StoreError> {
        let status_str = enum_to_sql(&status);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(action_select_sql("WHERE status = ?1 ORDER BY created_at DESC"))?;
                let mut rows = stmt.query(rusqlite::params![status_str])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_action(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Most recent `completed` action of `action_type` against `issue_id`,
    /// completed at or after `since` — used to find a candidate close
    /// action to roll back when the issue is reopened shortly after.
    pub async fn find_recent_completed_action(
        &self,
        issue_id: Uuid,
        action_type: ActionType,
        since: DateTime<Utc>,
    ) -> Result<Option<Action>, StoreError> {
        let issue_id_str = issue_id.to_string();
        let action_type_str = enum_to_sql(&action_type);
        let since_str = since.to_rfc3339();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(action_select_sql(
                    "WHERE issue_id = ?1 AND action_type = ?2 AND status = 'completed' AND completed_at >= ?3
                     ORDER BY completed_at DESC LIMIT 1",
                ))?;
                let mut rows = stmt.query(rusqlite::params![issue_id_str, action_type_str, since_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_action(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Webhook events
    // -----------------------------------------------------------------------

    /// Returns `false` if an event with this delivery id was already
    /// recorded (idempotent ingestion keyed on GitHub's delivery header).
    pub async fn record_webhook_event(&self, event: &WebhookEvent) -> Result<bool, StoreError> {
        let id = event.id.to_string();
        let delivery_id = event.github_delivery_id.clone();
        let event_type = event.event_type.clone();
        let action = event.action.clone();
        let repo_owner = event.repo_owner.clone();
        let repo_name = event.repo_name.clone();
        let payload = event.payload.to_string();
        let headers = event.headers.to_string();
        let received_at = event.received_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO webhook_events (
                        id, github_delivery_id, event_type, action, repository_owner,
                        repository_name, payload, headers, processed, triggered_actions,
                        automation_results, received_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0,0,'{}',?9)
                    ON CONFLICT(github_delivery_id) DO NOTHING",
                    rusqlite::params![
                        id, delivery_id, event_type, action, repo_owner, repo_name, payload,
                        headers, received_at,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn mark_webhook_processed(
        &self,
        delivery_id: &str,
        triggered_actions: i64,
        duration_ms: f64,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let delivery_id = delivery_id.to_string();
        let now_str = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE webhook_events SET
                        processed = 1, processing_duration_ms = ?2, processing_error = ?3,
                        triggered_actions = ?4, processed_at = ?5
                     WHERE github_delivery_id = ?1",
                    rusqlite::params![delivery_id, duration_ms, error, triggered_actions, now_str],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Look up a previously-recorded delivery so a redelivered webhook
    /// can be answered with its prior outcome instead of reprocessed.
    pub async fn get_webhook_event_by_delivery_id(
        &self,
        delivery_id: &str,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let delivery_id = delivery_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, github_delivery_id, event_type, action, repository_owner,
                            repository_name, payload, headers, processed, processing_duration_ms,
                            processing_error, triggered_actions, automation_results, received_at,
                            processed_at
                     FROM webhook_events WHERE github_delivery_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![delivery_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_webhook_event(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Deliveries received before `before` that never reached
    /// `mark_webhook_processed` — a reaper's signal that dispatch hung
    /// or the process died mid-delivery.
    pub async fn list_stale_webhook_events(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, StoreError> {
        let before_str = before.to_rfc3339();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, github_delivery_id, event_type, action, repository_owner,
                            repository_name, payload, headers, processed, processing_duration_ms,
                            processing_error, triggered_actions, automation_results, received_at,
                            processed_at
                     FROM webhook_events
                     WHERE processed = 0 AND received_at < ?1
                     ORDER BY received_at ASC LIMIT ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![before_str, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_webhook_event(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Record an automation outcome (actions triggered, errors) against
    /// an already-stored delivery, so a later re-delivery of the same
    /// event can be answered with exactly this result.
    pub async fn record_webhook_automation_results(
        &self,
        delivery_id: &str,
        triggered_actions: i64,
        automation_results: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let delivery_id = delivery_id.to_string();
        let automation_results = automation_results.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE webhook_events SET automation_results = ?2, triggered_actions = ?3 WHERE github_delivery_id = ?1",
                    rusqlite::params![delivery_id, automation_results, triggered_actions],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Rate limit samples
    // -----------------------------------------------------------------------

    pub async fn record_rate_limit_sample(&self, sample: &RateLimitSample) -> Result<(), StoreError> {
        let id = sample.id.to_string();
        let api_endpoint = sample.api_endpoint.clone();
        let rate_limit_type = sample.rate_limit_type.as_str().to_string();
        let limit = sample.limit;
        let remaining = sample.remaining;
        let reset_timestamp = sample.reset_timestamp;
        let used = sample.used;
        let request_url = sample.request_url.clone();
        let response_status = sample.response_status;
        let request_duration_ms = sample.request_duration_ms;
        let recorded_at = sample.recorded_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO rate_limit_tracking (
                        id, api_endpoint, rate_limit_type, \"limit\", remaining, reset_timestamp,
                        used, request_url, response_status, request_duration_ms, recorded_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                    rusqlite::params![
                        id, api_endpoint, rate_limit_type, limit, remaining, reset_timestamp, used,
                        request_url, response_status, request_duration_ms, recorded_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// The most recent sample for a bucket, used to rehydrate the rate
    /// budget on restart.
    pub async fn latest_rate_limit_sample(
        &self,
        bucket: RateLimitBucket,
    ) -> Result<Option<RateLimitSample>, StoreError> {
        let bucket_str = bucket.as_str().to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, api_endpoint, rate_limit_type, \"limit\", remaining, reset_timestamp,
                            used, request_url, response_status, request_duration_ms, recorded_at
                     FROM rate_limit_tracking WHERE rate_limit_type = ?1
                     ORDER BY recorded_at DESC LIMIT 1",
                )?;
                let mut rows = stmt.query(rusqlite::params![bucket_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_rate_limit_sample(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Automation metrics
    // -----------------------------------------------------------------------

    pub async fn record_automation_metric(&self, metric: &AutomationMetric) -> Result<(), StoreError> {
        let id = metric.id.to_string();
        let metric_name = metric.metric_name.clone();
        let metric_category = metric.metric_category.clone();
        let value = metric.value;
        let previous_value = metric.previous_value;
        let change_percentage = metric.change_percentage;
        let repository_name = metric.repository_name.clone();
        let time_period = metric.time_period.clone();
        let details = metric.details.to_string();
        let measured_at = metric.measured_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO automation_metrics (
                        id, metric_name, metric_category, value, previous_value, change_percentage,
                        repository_name, time_period, details, measured_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                    rusqlite::params![
                        id, metric_name, metric_category, value, previous_value,
                        change_percentage, repository_name, time_period, details, measured_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Aggregate health over the trailing `window_hours`, mirroring the
    /// automation engine's health report.
    pub async fn automation_health(&self, window_hours: i64, now: DateTime<Utc>) -> Result<AutomationHealth, StoreError> {
        let cutoff = (now - chrono::Duration::hours(window_hours)).to_rfc3339();
        self.conn
            .call(move |conn| {
                let total: i64 = conn
                    .prepare("SELECT COUNT(*) FROM github_automation_actions WHERE created_at >= ?1")?
                    .query_row(rusqlite::params![cutoff], |r| r.get(0))?;
                let successful: i64 = conn
                    .prepare(
                        "SELECT COUNT(*) FROM github_automation_actions
                         WHERE created_at >= ?1 AND status = 'completed' AND success = 1",
                    )?
                    .query_row(rusqlite::params![cutoff], |r| r.get(0))?;
                let failed: i64 = conn
                    .prepare(
                        "SELECT COUNT(*) FROM github_automation_actions
                         WHERE created_at >= ?1 AND status = 'failed'",
                    )?
                    .query_row(rusqlite::params![cutoff], |r| r.get(0))?;
                let rolled_back: i64 = conn
                    .prepare(
                        "SELECT COUNT(*) FROM github_automation_actions
                         WHERE created_at >= ?1 AND status = 'rolled_back'",
                    )?
                    .query_row(rusqlite::params![cutoff], |r| r.get(0))?;
                let issues_analyzed: i64 = conn
                    .prepare(
                        "SELECT COUNT(*) FROM github_issues WHERE last_analyzed >= ?1",
                    )?
                    .query_row(rusqlite::params![cutoff], |r| r.get(0))?;
                let eligible: i64 = conn
                    .prepare("SELECT COUNT(*) FROM github_issues WHERE automation_eligible = 1")?
                    .query_row([], |r| r.get(0))?;

                let success_rate = if total > 0 {
                    successful as f64 / total as f64
                } else {
                    0.0
                };

                Ok(AutomationHealth {
                    window_hours,
                    total_actions: total,
                    successful_actions: successful,
                    failed_actions: failed,
                    rolled_back_actions: rolled_back,
                    success_rate,
                    issues_analyzed,
                    automation_eligible_issues: eligible,
                })
            })
            .await
            .map_err(StoreError::Db)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn issue_select_sql(tail: &str) -> String {
    format!(
        "SELECT id, github_issue_number, github_issue_id, repository_owner, repository_name,
                title, description, status, author, assignees, labels, milestone,
                automation_eligible, automation_confidence, feature_completion_score,
                github_created_at, github_updated_at, github_closed_at, first_detected,
                last_analyzed, analysis_count, last_analysis_duration_ms
         FROM github_issues {tail}"
    )
}

fn action_select_sql(tail: &str) -> String {
    format!(
        "SELECT id, issue_id, action_type, status, confidence_score, reasoning, evidence,
                execution_attempts, max_attempts, github_api_calls, github_rate_limit_remaining,
                success, error_message, github_response, rollback_data, can_rollback,
                rolled_back, rollback_reason, created_at, started_at, completed_at, duration_ms
         FROM github_automation_actions {tail}"
    )
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(7)?;
    let assignees_str: String = row.get(9)?;
    let labels_str: String = row.get(10)?;
    let automation_confidence_str: Option<String> = row.get(13)?;
    let github_created_at: String = row.get(15)?;
    let github_updated_at: String = row.get(16)?;
    let github_closed_at: Option<String> = row.get(17)?;
    let first_detected: String = row.get(18)?;
    let last_analyzed: Option<String> = row.get(19)?;

    Ok(Issue {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        github_issue_number: row.get(1)?,
        github_issue_id: row.get(2)?,
        repo_owner: row.get(3)?,
        repo_name: row.get(4)?,
        title: row.get(5)?,
        body: row.get(6)?,
        status: enum_from_sql::<IssueStatus>(&status_str),
        author: row.get(8)?,
        assignees: json_list(&assignees_str),
        labels: json_list(&labels_str),
        milestone: row.get(11)?,
        automation_eligible: row.get::<_, i64>(12)? != 0,
        automation_confidence: automation_confidence_str.map(|s| enum_from_sql(&s)),
        feature_completion_score: row.get(14)?,
        github_created_at: parse_dt(&github_created_at),
        github_updated_at: parse_dt(&github_updated_at),
        github_closed_at: parse_dt_opt(github_closed_at),
        first_detected: parse_dt(&first_detected),
        last_analyzed: parse_dt_opt(last_analyzed),
        analysis_count: row.get(20)?,
        last_analysis_duration_ms: row.get(21)?,
    })
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<Action> {
    let id_str: String = row.get(0)?;
    let issue_id_str: String = row.get(1)?;
    let action_type_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let evidence_str: String = row.get(6)?;
    let success_val: Option<i64> = row.get(11)?;
    let github_response_str: Option<String> = row.get(13)?;
    let rollback_data_str: Option<String> = row.get(14)?;
    let created_at: String = row.get(18)?;
    let started_at: Option<String> = row.get(19)?;
    let completed_at: Option<String> = row.get(20)?;

    Ok(Action {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        issue_id: Uuid::parse_str(&issue_id_str).expect("valid uuid"),
        action_type: enum_from_sql::<ActionType>(&action_type_str),
        status: enum_from_sql::<ActionStatus>(&status_str),
        confidence_score: row.get(4)?,
        reasoning: row.get(5)?,
        evidence: serde_json::from_str(&evidence_str).unwrap_or(serde_json::json!({})),
        execution_attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        api_calls_used: row.get(9)?,
        rate_limit_remaining_seen: row.get(10)?,
        success: success_val.map(|v| v != 0),
        error_message: row.get(12)?,
        github_response: github_response_str.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        rollback_data: rollback_data_str.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        can_rollback: row.get::<_, i64>(15)? != 0,
        rolled_back: row.get::<_, i64>(16)? != 0,
        rollback_reason: row.get(17)?,
        created_at: parse_dt(&created_at),
        started_at: parse_dt_opt(started_at),
        completed_at: parse_dt_opt(completed_at),
        duration_ms: row.get(21)?,
        priority_score: 0.0,
    })
}

fn row_to_detection(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeatureDetection> {
    let id_str: String = row.get(0)?;
    let issue_id_str: String = row.get(1)?;
    let completion_status_str: String = row.get(4)?;
    let code_evidence_str: String = row.get(7)?;
    let commit_evidence_str: String = row.get(8)?;
    let test_evidence_str: String = row.get(9)?;
    let documentation_evidence_str: String = row.get(10)?;
    let detected_at: String = row.get(13)?;
    let verified_at: Option<String> = row.get(14)?;

    Ok(FeatureDetection {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        issue_id: Uuid::parse_str(&issue_id_str).expect("valid uuid"),
        feature_name: row.get(2)?,
        feature_category: row.get(3)?,
        completion_status: enum_from_sql::<CompletionStatus>(&completion_status_str),
        confidence_score: row.get(5)?,
        detection_method: row.get(6)?,
        code_evidence: json_list(&code_evidence_str),
        commit_evidence: json_list(&commit_evidence_str),
        test_evidence: json_list(&test_evidence_str),
        documentation_evidence: json_list(&documentation_evidence_str),
        analysis_version: row.get(11)?,
        false_positive_score: row.get(12)?,
        detected_at: parse_dt(&detected_at),
        verified_at: parse_dt_opt(verified_at),
    })
}

fn row_to_webhook_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let id_str: String = row.get(0)?;
    let payload_str: String = row.get(6)?;
    let headers_str: String = row.get(7)?;
    let automation_results_str: String = row.get(12)?;
    let received_at: String = row.get(13)?;
    let processed_at: Option<String> = row.get(14)?;

    Ok(WebhookEvent {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        github_delivery_id: row.get(1)?,
        event_type: row.get(2)?,
        action: row.get(3)?,
        repo_owner: row.get(4)?,
        repo_name: row.get(5)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        headers: serde_json::from_str(&headers_str).unwrap_or(serde_json::Value::Null),
        processed: row.get::<_, i64>(8)? != 0,
        processing_duration_ms: row.get(9)?,
        processing_error: row.get(10)?,
        triggered_actions: row.get(11)?,
        automation_results: serde_json::from_str(&automation_results_str).unwrap_or(serde_json::Value::Null),
        received_at: parse_dt(&received_at),
        processed_at: parse_dt_opt(processed_at),
    })
}

fn row_to_rate_limit_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<RateLimitSample> {
    let id_str: String = row.get(0)?;
    let rate_limit_type_str: String = row.get(2)?;
    let recorded_at: String = row.get(10)?;

    Ok(RateLimitSample {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        api_endpoint: row.get(1)?,
        rate_limit_type: match rate_limit_type_str.as_str() {
            "search" => RateLimitBucket::Search,
            "graphql" => RateLimitBucket::Graphql,
            "integration_manifest" => RateLimitBucket::IntegrationManifest,
            _ => RateLimitBucket::Core,
        },
        limit: row.get(3)?,
        remaining: row.get(4)?,
        reset_timestamp: row.get(5)?,
        used: row.get(6)?,
        request_url: row.get(7)?,
        response_status: row.get(8)?,
        request_duration_ms: row.get(9)?,
        recorded_at: parse_dt(&recorded_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(github_id: i64, number: i64) -> IssueSnapshot {
        let now = Utc::now();
        IssueSnapshot {
            number,
            github_id,
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            title: "Add dark mode".into(),
            body: Some("Please add a dark theme".into()),
            status: IssueStatus::Open,
            author: "octocat".into(),
            assignees: vec![],
            labels: vec!["enhancement".into()],
            milestone: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_issue_inserts_then_updates() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let issue = store.upsert_issue(sample_snapshot(1, 42), now).await.unwrap();
        assert_eq!(issue.github_issue_number, 42);
        assert_eq!(issue.analysis_count, 0);

        let mut snap2 = sample_snapshot(1, 42);
        snap2.title = "Add dark mode (updated)".into();
        let updated = store.upsert_issue(snap2, now).await.unwrap();
        assert_eq!(updated.id, issue.id);
        assert_eq!(updated.title, "Add dark mode (updated)");
    }

    #[tokio::test]
    async fn claim_actions_orders_by_confidence_and_flips_status() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let issue = store.upsert_issue(sample_snapshot(2, 7), now).await.unwrap();

        let low = Action::new_pending(
            issue.id,
            ActionType::LabelIssue,
            0.4,
            "low confidence label",
            serde_json::json!({}),
            3,
            now,
        );
        let high = Action::new_pending(
            issue.id,
            ActionType::CloseIssue,
            0.95,
            "very high confidence close",
            serde_json::json!({}),
            3,
            now,
        );
        store.create_action(&low).await.unwrap();
        store.create_action(&high).await.unwrap();

        let claimed = store.claim_actions(10, now).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, high.id);
        assert!(claimed.iter().all(|a| a.status == ActionStatus::InProgress));
    }

    #[tokio::test]
    async fn webhook_event_idempotent_on_delivery_id() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let event = WebhookEvent {
            id: Uuid::new_v4(),
            github_delivery_id: "abc-123".into(),
            event_type: "issues".into(),
            action: Some("opened".into()),
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            payload: serde_json::json!({}),
            headers: serde_json::json!({}),
            processed: false,
            processing_duration_ms: None,
            processing_error: None,
            triggered_actions: 0,
            automation_results: serde_json::json!({}),
            received_at: now,
            processed_at: None,
        };
        assert!(store.record_webhook_event(&event).await.unwrap());
        assert!(!store.record_webhook_event(&event).await.unwrap());
    }

    #[tokio::test]
    async fn automation_health_computes_success_rate() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let issue = store.upsert_issue(sample_snapshot(3, 9), now).await.unwrap();

        let mut a = Action::new_pending(
            issue.id,
            ActionType::CloseIssue,
            0.9,
            "confident close",
            serde_json::json!({}),
            3,
            now,
        );
        store.create_action(&a).await.unwrap();
        a.status = ActionStatus::Completed;
        a.success = Some(true);
        store.update_action(&a).await.unwrap();

        let health = store.automation_health(24, now).await.unwrap();
        assert_eq!(health.total_actions, 1);
        assert_eq!(health.successful_actions, 1);
        assert_eq!(health.success_rate, 1.0);
    }

    #[tokio::test]
    async fn finds_recent_completed_close_action_for_reopen_rollback() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let issue = store.upsert_issue(sample_snapshot(4, 11), now).await.unwrap();

        let mut action = Action::new_pending(
            issue.id,
            ActionType::CloseIssue,
            0.9,
            "confident close",
            serde_json::json!({}),
            3,
            now,
        );
        store.create_action(&action).await.unwrap();
        action.status = ActionStatus::Completed;
        action.success = Some(true);
        action.completed_at = Some(now);
        store.update_action(&action).await.unwrap();

        let found = store
            .find_recent_completed_action(issue.id, ActionType::CloseIssue, now - chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, action.id);

        let too_old = store
            .find_recent_completed_action(issue.id, ActionType::CloseIssue, now + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(too_old.is_none());
    }

    #[tokio::test]
    async fn reaps_actions_stuck_in_progress_past_the_ceiling() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let issue = store.upsert_issue(sample_snapshot(5, 13), now).await.unwrap();

        let mut action = Action::new_pending(
            issue.id,
            ActionType::LabelIssue,
            0.7,
            "label",
            serde_json::json!({}),
            3,
            now,
        );
        store.create_action(&action).await.unwrap();
        action.status = ActionStatus::InProgress;
        action.started_at = Some(now - chrono::Duration::hours(2));
        store.update_action(&action).await.unwrap();

        let requeued = store.reap_stuck_actions(now - chrono::Duration::hours(1), 10).await.unwrap();
        assert_eq!(requeued, vec![action.id]);

        let refreshed = store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, ActionStatus::Pending);
        assert!(refreshed.started_at.is_none());
    }

    #[tokio::test]
    async fn lists_webhook_events_stale_past_their_timeout() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let stale_event = WebhookEvent {
            id: Uuid::new_v4(),
            github_delivery_id: "stale-1".into(),
            event_type: "issues".into(),
            action: Some("opened".into()),
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            payload: serde_json::json!({}),
            headers: serde_json::json!({}),
            processed: false,
            processing_duration_ms: None,
            processing_error: None,
            triggered_actions: 0,
            automation_results: serde_json::json!({}),
            received_at: now - chrono::Duration::hours(2),
            processed_at: None,
        };
        store.record_webhook_event(&stale_event).await.unwrap();

        let fresh_event = WebhookEvent {
            id: Uuid::new_v4(),
            github_delivery_id: "fresh-1".into(),
            received_at: now,
            ..stale_event.clone()
        };
        store.record_webhook_event(&fresh_event).await.unwrap();

        let stale = store.list_stale_webhook_events(now - chrono::Duration::hours(1), 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].github_delivery_id, "stale-1");
    }
}
