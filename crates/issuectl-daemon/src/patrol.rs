//! Reaper sweeping two kinds of stalled work a normal cycle never
//! revisits on its own: webhook deliveries left `processed = false` past
//! their timeout, and actions orphaned `in_progress` by a worker that
//! died mid-execution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use issuectl_core::store::Store;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ingestor::stale_before;

/// Result of a single patrol sweep.
#[derive(Debug, Clone, Serialize)]
pub struct PatrolReport {
    pub stale_webhook_events: Vec<String>,
    pub requeued_actions: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
}

pub struct Patrol {
    store: Arc<Store>,
    event_timeout_seconds: u64,
    stuck_action_ceiling_seconds: u64,
    sweep_limit: i64,
}

impl Patrol {
    pub fn new(store: Arc<Store>, event_timeout_seconds: u64, stuck_action_ceiling_seconds: u64) -> Self {
        Self {
            store,
            event_timeout_seconds,
            stuck_action_ceiling_seconds,
            sweep_limit: 100,
        }
    }

    /// Run one sweep. Stale webhook events are reported, not retried: a
    /// delivery that never resolved to a dispatched action within its
    /// timeout needs attention, not a blind replay against what may now
    /// be stale issue state. Stuck actions are requeued to `pending` so
    /// the next execution cycle claims and retries them.
    pub async fn run(&self) -> Result<PatrolReport> {
        let now = Utc::now();

        let stale_before_ts = stale_before(self.event_timeout_seconds, now);
        let stale_events = self.store.list_stale_webhook_events(stale_before_ts, self.sweep_limit).await?;
        for event in &stale_events {
            warn!(
                delivery_id = %event.github_delivery_id,
                event_type = %event.event_type,
                received_at = %event.received_at,
                "webhook event stalled past timeout, unprocessed"
            );
        }

        let stuck_before_ts = now - chrono::Duration::seconds(self.stuck_action_ceiling_seconds as i64);
        let requeued = self.store.reap_stuck_actions(stuck_before_ts, self.sweep_limit).await?;
        for action_id in &requeued {
            warn!(%action_id, "action stuck in_progress past ceiling, requeued as pending");
        }

        let report = PatrolReport {
            stale_webhook_events: stale_events.iter().map(|e| e.github_delivery_id.clone()).collect(),
            requeued_actions: requeued,
            timestamp: now,
        };

        info!(
            stale_webhook_events = report.stale_webhook_events.len(),
            requeued_actions = report.requeued_actions.len(),
            "patrol sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_with_stable_field_names() {
        let report = PatrolReport {
            stale_webhook_events: vec!["abc".to_string()],
            requeued_actions: vec![Uuid::nil()],
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("stale_webhook_events").is_some());
        assert!(value.get("requeued_actions").is_some());
    }
}
