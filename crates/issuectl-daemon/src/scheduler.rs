//! Periodic cycle scheduler: one task per configured repository, each
//! running cycles back to back on its own interval, so cycles stay
//! serial per `(owner, repo)` while different repositories' cycles run
//! concurrently against the shared store and rate budget.

use std::sync::Arc;
use std::time::Duration;

use issuectl_core::config::RepoRef;
use issuectl_harness::shutdown::ShutdownSignal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::heartbeat::HealthMonitor;
use crate::orchestrator::CycleController;

pub struct Scheduler {
    controller: Arc<CycleController>,
    health: Arc<HealthMonitor>,
    shutdown: ShutdownSignal,
}

impl Scheduler {
    pub fn new(controller: Arc<CycleController>, health: Arc<HealthMonitor>, shutdown: ShutdownSignal) -> Self {
        Self { controller, health, shutdown }
    }

    /// Spawn one background task per repository. Returns the join
    /// handles so the caller can await them during shutdown.
    pub fn spawn(&self, repositories: Vec<RepoRef>, cycle_interval: Duration) -> Vec<JoinHandle<()>> {
        repositories
            .into_iter()
            .map(|repo_ref| {
                let controller = Arc::clone(&self.controller);
                let health = Arc::clone(&self.health);
                let mut shutdown_rx = self.shutdown.subscribe();
                tokio::spawn(async move {
                    let owner = repo_ref.owner.clone();
                    let repo = repo_ref.name.clone();
                    info!(owner, repo, interval_secs = cycle_interval.as_secs(), "repository scheduler started");
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!(owner, repo, "repository scheduler stopping");
                                break;
                            }
                            _ = tokio::time::sleep(cycle_interval) => {
                                match controller.run_cycle(&owner, &repo, false).await {
                                    Ok(report) => {
                                        health.record_cycle_completed(&owner, &repo, report.started_at).await;
                                    }
                                    Err(err) => {
                                        error!(owner, repo, error = %err, "scheduled cycle failed");
                                    }
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
