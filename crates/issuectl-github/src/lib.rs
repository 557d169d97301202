//! Typed GitHub REST surface for the automation core.
//!
//! This crate owns the only outbound calls to GitHub: issue reads,
//! mutating actions (close/label/comment/assign/milestone) and their
//! rollback counterparts, plus rate-limit observation. Everything above
//! this crate talks in [`issuectl_core::types::IssueSnapshot`] and
//! [`error::GatewayError`] — never in octocrab models or HTTP status codes.

pub mod client;
pub mod error;
pub mod gateway;
pub mod types;

pub use client::GitHubClient;
pub use error::{classify_octocrab_error, GatewayError, Result};
pub use gateway::{issue_snapshot_from_webhook_payload, Gateway};
pub use types::{CommitReference, GitHubConfig, GitHubResponse, IssueComment, IssueTimelineEvent};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_rejected_before_any_network_call() {
        let err = GitHubClient::new(GitHubConfig { token: None }).unwrap_err();
        assert!(matches!(err, GatewayError::MissingToken));
    }

    #[test]
    fn github_response_carries_comment_id_when_set() {
        let resp = GitHubResponse::ok(201, serde_json::json!({})).with_comment_id(42);
        assert_eq!(resp.comment_id, Some(42));
        assert_eq!(resp.status, 201);
    }

    #[test]
    fn github_response_without_comment_id_defaults_to_none() {
        let resp = GitHubResponse::ok(200, serde_json::json!({"ok": true}));
        assert_eq!(resp.comment_id, None);
    }

    #[test]
    fn github_config_serde_roundtrip() {
        let config = GitHubConfig {
            token: Some("ghp_test123".to_string()),
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: GitHubConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.token.as_deref(), Some("ghp_test123"));
    }
}
