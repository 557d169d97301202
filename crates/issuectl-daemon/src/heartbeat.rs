//! Health tracking: rate-limit headroom plus per-repository cycle
//! staleness. The scheduler records a timestamp here every time a cycle
//! for a repository completes; the health endpoint and the webhook
//! supplement call [`HealthMonitor::snapshot`] to answer "is automation
//! actually running" without re-deriving it from the store each time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use issuectl_core::rate_budget::RateBudget;
use issuectl_core::types::RateLimitBucket;
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct RepoStaleness {
    pub owner: String,
    pub repo: String,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateBucketHealth {
    pub bucket: RateLimitBucket,
    pub remaining: i64,
    pub seconds_to_reset: i64,
}

/// Returned by `get_automation_health`: a point-in-time view of whether
/// the daemon's background machinery is keeping up.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationHealth {
    pub generated_at: DateTime<Utc>,
    pub rate_limit_headroom: Vec<RateBucketHealth>,
    pub repositories: Vec<RepoStaleness>,
}

pub struct HealthMonitor {
    rate_budget: Arc<RateBudget>,
    last_cycle: Mutex<HashMap<(String, String), DateTime<Utc>>>,
    staleness_threshold: chrono::Duration,
}

impl HealthMonitor {
    pub fn new(rate_budget: Arc<RateBudget>, staleness_threshold: chrono::Duration) -> Self {
        Self {
            rate_budget,
            last_cycle: Mutex::new(HashMap::new()),
            staleness_threshold,
        }
    }

    pub async fn record_cycle_completed(&self, owner: &str, repo: &str, at: DateTime<Utc>) {
        let mut last = self.last_cycle.lock().await;
        last.insert((owner.to_string(), repo.to_string()), at);
    }

    pub async fn snapshot(&self, configured_repos: &[(String, String)]) -> AutomationHealth {
        let now = Utc::now();
        let last = self.last_cycle.lock().await;

        let repositories = configured_repos
            .iter()
            .map(|(owner, repo)| {
                let last_cycle_at = last.get(&(owner.clone(), repo.clone())).copied();
                let stale = match last_cycle_at {
                    Some(at) => now - at > self.staleness_threshold,
                    None => true,
                };
                RepoStaleness {
                    owner: owner.clone(),
                    repo: repo.clone(),
                    last_cycle_at,
                    stale,
                }
            })
            .collect();

        let rate_limit_headroom = [
            RateLimitBucket::Core,
            RateLimitBucket::Search,
            RateLimitBucket::Graphql,
            RateLimitBucket::IntegrationManifest,
        ]
        .into_iter()
        .map(|bucket| {
            let headroom = self.rate_budget.headroom(bucket);
            RateBucketHealth {
                bucket,
                remaining: headroom.remaining,
                seconds_to_reset: headroom.seconds_to_reset,
            }
        })
        .collect();

        AutomationHealth {
            generated_at: now,
            rate_limit_headroom,
            repositories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Arc<RateBudget> {
        Arc::new(RateBudget::new(0.05, 10))
    }

    #[tokio::test]
    async fn unconfigured_repo_with_no_recorded_cycle_is_stale() {
        let monitor = HealthMonitor::new(budget(), chrono::Duration::seconds(60));
        let health = monitor.snapshot(&[("acme".to_string(), "widgets".to_string())]).await;
        assert_eq!(health.repositories.len(), 1);
        assert!(health.repositories[0].stale);
    }

    #[tokio::test]
    async fn recent_cycle_clears_staleness() {
        let monitor = HealthMonitor::new(budget(), chrono::Duration::seconds(60));
        monitor.record_cycle_completed("acme", "widgets", Utc::now()).await;
        let health = monitor.snapshot(&[("acme".to_string(), "widgets".to_string())]).await;
        assert!(!health.repositories[0].stale);
    }
}
