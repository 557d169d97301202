//! Ingestor (C4): the only path through which GitHub issue state enters
//! the store, whether pulled by a periodic scan or pushed by a webhook
//! delivery. Both paths converge on `Store::upsert_issue`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use issuectl_core::config::WebhookConfig;
use issuectl_core::store::Store;
use issuectl_core::types::WebhookEvent;
use issuectl_core::webhook::verify_webhook_signature;
use issuectl_github::Gateway;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{DaemonError, Result};

/// Outcome of a periodic scan against one repository.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub new_issues: usize,
    pub updated_issues: usize,
    pub unchanged_issues: usize,
    pub api_calls: usize,
    pub duration_ms: f64,
}

/// Outcome of ingesting a single webhook delivery. When `is_new_delivery`
/// is `false`, `prior_processed`/`prior_triggered_actions`/
/// `prior_automation_results` carry the first attempt's stored outcome,
/// per §7's "409 ... with the prior result body".
#[derive(Debug, Clone, Serialize)]
pub struct WebhookIngestResult {
    pub delivery_id: String,
    pub event_type: String,
    pub action: Option<String>,
    pub is_new_delivery: bool,
    pub issue_id: Option<Uuid>,
    pub prior_processed: Option<bool>,
    pub prior_triggered_actions: Option<i64>,
    pub prior_automation_results: Option<serde_json::Value>,
}

pub struct Ingestor {
    store: Arc<Store>,
    gateway: Arc<Gateway>,
    full_scan_window_hours: i64,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, full_scan_window_hours: i64) -> Self {
        Self { store, gateway, full_scan_window_hours }
    }

    /// Pull every issue updated since the last sync (or the full scan
    /// window, if never synced / `force_full_scan`) and reconcile it into
    /// the store.
    #[instrument(skip(self))]
    pub async fn sync(&self, owner: &str, repo: &str, force_full_scan: bool) -> Result<SyncReport> {
        let started = Instant::now();
        let since = if force_full_scan {
            None
        } else {
            Some(Utc::now() - chrono::Duration::hours(self.full_scan_window_hours))
        };

        let snapshots = self.gateway.list_repository_issues(owner, repo, since, 100).await?;
        let mut report = SyncReport { fetched: snapshots.len(), api_calls: 1, ..Default::default() };

        for batch in issuectl_core::batch::batch_items(snapshots, 10) {
            for snapshot in batch {
                let existing = self.store.get_issue_by_github_id(snapshot.github_id).await?;
                let issue = self.store.upsert_issue(snapshot, Utc::now()).await?;
                match existing {
                    None => report.new_issues += 1,
                    Some(prior) if prior.github_updated_at < issue.github_updated_at => {
                        report.updated_issues += 1;
                    }
                    Some(_) => report.unchanged_issues += 1,
                }
            }
        }

        report.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            owner, repo,
            fetched = report.fetched, new = report.new_issues, updated = report.updated_issues,
            "repository sync completed"
        );
        Ok(report)
    }

    /// Verify, deduplicate, and reconcile a single webhook delivery.
    /// Returns the previously stored outcome unchanged if this delivery
    /// id has already been processed.
    #[instrument(skip(self, raw_body, config))]
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
        config: &WebhookConfig,
    ) -> Result<WebhookIngestResult> {
        let secret = config
            .secret
            .clone()
            .or_else(|| std::env::var("ISSUECTL_WEBHOOK_SECRET").ok())
            .ok_or(DaemonError::InvalidSignature)?;

        let signature = headers
            .get("x-hub-signature-256")
            .ok_or(DaemonError::InvalidSignature)?;
        verify_webhook_signature(&secret, raw_body, signature).map_err(|_| DaemonError::InvalidSignature)?;

        let delivery_id = headers
            .get("x-github-delivery")
            .ok_or(DaemonError::MalformedWebhook("missing X-GitHub-Delivery header".into()))?
            .clone();
        let event_type = headers
            .get("x-github-event")
            .ok_or(DaemonError::MalformedWebhook("missing X-GitHub-Event header".into()))?
            .clone();

        if let Some(prior) = self.store.get_webhook_event_by_delivery_id(&delivery_id).await? {
            return Ok(WebhookIngestResult {
                delivery_id,
                event_type: prior.event_type,
                action: prior.action,
                is_new_delivery: false,
                issue_id: None,
                prior_processed: Some(prior.processed),
                prior_triggered_actions: Some(prior.triggered_actions),
                prior_automation_results: Some(prior.automation_results),
            });
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| DaemonError::MalformedWebhook(format!("invalid JSON body: {e}")))?;
        let action = payload.get("action").and_then(|v| v.as_str()).map(str::to_string);
        let (repo_owner, repo_name) = repo_from_payload(&payload)
            .ok_or(DaemonError::MalformedWebhook("payload missing repository".into()))?;

        let event = WebhookEvent {
            id: Uuid::new_v4(),
            github_delivery_id: delivery_id.clone(),
            event_type: event_type.clone(),
            action: action.clone(),
            repo_owner: repo_owner.clone(),
            repo_name: repo_name.clone(),
            payload: payload.clone(),
            headers: headers_to_json(headers),
            processed: false,
            processing_duration_ms: None,
            processing_error: None,
            triggered_actions: 0,
            automation_results: serde_json::json!({}),
            received_at: Utc::now(),
            processed_at: None,
        };
        let is_new = self.store.record_webhook_event(&event).await?;
        if !is_new {
            // Lost the race with a concurrent delivery of the same id.
            if let Some(prior) = self.store.get_webhook_event_by_delivery_id(&delivery_id).await? {
                return Ok(WebhookIngestResult {
                    delivery_id,
                    event_type: prior.event_type,
                    action: prior.action,
                    is_new_delivery: false,
                    issue_id: None,
                    prior_processed: Some(prior.processed),
                    prior_triggered_actions: Some(prior.triggered_actions),
                    prior_automation_results: Some(prior.automation_results),
                });
            }
        }

        let started = Instant::now();
        let dispatch_result = self.dispatch(&event_type, &repo_owner, &repo_name, &payload).await;

        let issue_id = match dispatch_result {
            Ok(id) => id,
            Err(err) => {
                let message = err.to_string();
                warn!(delivery_id, error = %message, "webhook dispatch failed, delivery will be retried");
                self.store
                    .mark_webhook_processed(&delivery_id, 0, started.elapsed().as_secs_f64() * 1000.0, Some(message.clone()), Utc::now())
                    .await?;
                return Err(DaemonError::Dispatch(message));
            }
        };

        self.store
            .mark_webhook_processed(&delivery_id, if issue_id.is_some() { 1 } else { 0 }, started.elapsed().as_secs_f64() * 1000.0, None, Utc::now())
            .await?;

        Ok(WebhookIngestResult {
            delivery_id,
            event_type,
            action,
            is_new_delivery: true,
            issue_id,
            prior_processed: None,
            prior_triggered_actions: None,
            prior_automation_results: None,
        })
    }

    /// Dispatch by event type, per the webhook surface in the configuration
    /// table: `issues` upserts the embedded snapshot; `issue_comment` and
    /// `pull_request` just bump the related issue so it re-enters the
    /// detector's due queue; anything else is acknowledged without
    /// further action.
    async fn dispatch(
        &self,
        event_type: &str,
        owner: &str,
        repo: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<Option<Uuid>, DaemonError> {
        match event_type {
            "issues" => {
                let issue_json = payload
                    .get("issue")
                    .ok_or_else(|| DaemonError::MalformedWebhook("issues event missing issue object".into()))?;
                let snapshot = issuectl_github::issue_snapshot_from_webhook_payload(owner, repo, issue_json)
                    .map_err(|e| DaemonError::MalformedWebhook(e.to_string()))?;
                let issue = self.store.upsert_issue(snapshot, Utc::now()).await?;
                Ok(Some(issue.id))
            }
            "issue_comment" | "pull_request" => {
                let number = payload
                    .get("issue")
                    .or_else(|| payload.get("pull_request"))
                    .and_then(|v| v.get("number"))
                    .and_then(|v| v.as_i64());
                let Some(number) = number else { return Ok(None) };
                match self.touch_issue_by_number(owner, repo, number).await? {
                    Some(id) => Ok(Some(id)),
                    None => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Mark an issue as updated "now" so it re-enters the detector's due
    /// queue, without a full re-fetch — used for cross-reference events
    /// (comments, linked pull requests) that don't carry a full issue
    /// payload of their own.
    async fn touch_issue_by_number(&self, owner: &str, repo: &str, number: i64) -> Result<Option<Uuid>> {
        let since = Some(Utc::now() - chrono::Duration::hours(1));
        let snapshots = self.gateway.list_repository_issues(owner, repo, since, 100).await?;
        for snapshot in snapshots {
            if snapshot.number == number {
                let issue = self.store.upsert_issue(snapshot, Utc::now()).await?;
                return Ok(Some(issue.id));
            }
        }
        Ok(None)
    }
}

fn repo_from_payload(payload: &serde_json::Value) -> Option<(String, String)> {
    let repository = payload.get("repository")?;
    let owner = repository.get("owner")?.get("login")?.as_str()?.to_string();
    let name = repository.get("name")?.as_str()?.to_string();
    Some((owner, name))
}

fn headers_to_json(headers: &HashMap<String, String>) -> serde_json::Value {
    serde_json::to_value(headers).unwrap_or(serde_json::json!({}))
}

/// `received_at` recorded at parse time, used by patrol to identify a
/// delivery received but never marked processed.
pub fn stale_before(event_timeout_seconds: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    now - chrono::Duration::seconds(event_timeout_seconds as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_from_payload_extracts_owner_and_name() {
        let payload = serde_json::json!({
            "repository": { "name": "widgets", "owner": { "login": "acme" } }
        });
        assert_eq!(repo_from_payload(&payload), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn repo_from_payload_is_none_when_missing() {
        assert_eq!(repo_from_payload(&serde_json::json!({})), None);
    }

    #[test]
    fn stale_before_subtracts_timeout() {
        let now = Utc::now();
        let cutoff = stale_before(30, now);
        assert_eq!((now - cutoff).num_seconds(), 30);
    }
}
