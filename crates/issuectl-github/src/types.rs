use serde::{Deserialize, Serialize};

/// Connection configuration for a single [`crate::client::GitHubClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub token: Option<String>,
}

/// A successful response from a mutating GitHub call, carrying whatever
/// identifiers a rollback would need (e.g. a created comment id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubResponse {
    pub status: u16,
    pub comment_id: Option<i64>,
    pub body: serde_json::Value,
}

impl GitHubResponse {
    pub fn ok(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            comment_id: None,
            body,
        }
    }

    pub fn with_comment_id(mut self, id: i64) -> Self {
        self.comment_id = Some(id);
        self
    }
}

/// A comment left on an issue, as consumed by the detector's evidence
/// gathering (dispute/hold lexicon matching, assignee-hold-window checks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A commit surfaced by the commits-search endpoint as referencing an
/// issue (e.g. by `#123` in its message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReference {
    pub sha: String,
    pub message: String,
    pub authored_at: chrono::DateTime<chrono::Utc>,
}

/// A single entry from an issue's timeline events, used to detect
/// reopen/close history beyond the current snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTimelineEvent {
    pub event: String,
    pub actor: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
