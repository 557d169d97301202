use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use issuectl_core::config::Config;
use issuectl_core::rate_budget::RateBudget;
use issuectl_core::store::Store;
use issuectl_detector::detector::FeatureDetector;
use issuectl_detector::evidence::StaticEvidenceSource;
use issuectl_executor::executor::ActionExecutor;
use issuectl_github::{Gateway, GitHubClient, GitHubConfig as GatewayGitHubConfig};
use issuectl_harness::shutdown::ShutdownSignal;
use issuectl_planner::ActionPlanner;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::{DaemonError, Result};
use crate::evidence_source::GitHubEvidenceSource;
use crate::heartbeat::HealthMonitor;
use crate::ingestor::Ingestor;
use crate::orchestrator::CycleController;
use crate::patrol::Patrol;
use crate::scheduler::Scheduler;

/// Wires every automation crate into one running process: the periodic
/// scheduler, the webhook HTTP server, the patrol reaper, and the health
/// monitor, all sharing one `Store` and one `RateBudget`.
pub struct Daemon {
    config: Config,
    controller: Arc<CycleController>,
    health: Arc<HealthMonitor>,
    patrol: Arc<Patrol>,
    shutdown: ShutdownSignal,
}

#[derive(Clone)]
struct WebhookState {
    controller: Arc<CycleController>,
    health: Arc<HealthMonitor>,
    repositories: Vec<(String, String)>,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(Store::new(&config.store.database_path).await?);

        let token = config
            .github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .or_else(|| std::env::var("ISSUECTL_GITHUB_TOKEN").ok());
        let client = GitHubClient::new(GatewayGitHubConfig { token })?;

        let rate_budget = Arc::new(RateBudget::new(
            config.rate_budget.safety_reserve_fraction,
            config.rate_budget.safety_reserve_min,
        ));
        let gateway = Arc::new(Gateway::new(client, Arc::clone(&rate_budget), Arc::clone(&store)));

        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            config.executor.full_scan_window_hours,
        );

        let evidence_source: Arc<dyn issuectl_detector::evidence::EvidenceSource> = if config.github.token.is_some()
            || std::env::var("GITHUB_TOKEN").is_ok()
            || std::env::var("ISSUECTL_GITHUB_TOKEN").is_ok()
        {
            Arc::new(GitHubEvidenceSource::new(Arc::clone(&gateway), config.detector.clone()))
        } else {
            warn!("no GitHub token configured, falling back to a static evidence source");
            Arc::new(StaticEvidenceSource::new(issuectl_detector::evidence::IssueEvidence::default()))
        };
        let detector = FeatureDetector::new(Arc::clone(&store), evidence_source, config.detector.clone());

        let planner = ActionPlanner::new(Arc::clone(&store), config.planner.clone());

        let executor = ActionExecutor::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            config.executor.clone(),
            config.github.http_timeout_seconds,
        );

        let controller = Arc::new(CycleController::new(
            Arc::clone(&store),
            Arc::clone(&rate_budget),
            ingestor,
            detector,
            planner,
            executor,
            config.clone(),
        ));

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&rate_budget),
            chrono::Duration::seconds((config.general.cycle_interval_seconds * 2) as i64),
        ));

        let patrol = Arc::new(Patrol::new(
            Arc::clone(&store),
            config.webhook.event_timeout_seconds,
            config.executor.stuck_action_ceiling_seconds,
        ));

        Ok(Self {
            config,
            controller,
            health,
            patrol,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run the daemon until the shutdown signal fires: the webhook
    /// server, the per-repository scheduler, and the patrol loop all run
    /// concurrently and are joined on exit.
    pub async fn run(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.webhook.bind_addr)
            .await
            .map_err(|e| DaemonError::Dispatch(format!("failed to bind {}: {e}", self.config.webhook.bind_addr)))?;
        let bind_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Dispatch(e.to_string()))?;

        let repositories: Vec<(String, String)> = self
            .config
            .general
            .repositories
            .iter()
            .map(|r| (r.owner.clone(), r.name.clone()))
            .collect();
        let state = WebhookState {
            controller: Arc::clone(&self.controller),
            health: Arc::clone(&self.health),
            repositories,
        };
        let router = webhook_router(state);

        let mut server_shutdown_rx = self.shutdown.subscribe();
        let server_handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "webhook server error");
            }
        });
        info!(%bind_addr, "webhook server listening");

        let scheduler = Scheduler::new(Arc::clone(&self.controller), Arc::clone(&self.health), self.shutdown.clone());
        let scheduler_handles = scheduler.spawn(
            self.config.general.repositories.clone(),
            Duration::from_secs(self.config.general.cycle_interval_seconds),
        );

        let patrol = Arc::clone(&self.patrol);
        let mut patrol_shutdown_rx = self.shutdown.subscribe();
        let patrol_interval_secs = self.config.webhook.event_timeout_seconds.max(30);
        let patrol_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(patrol_interval_secs));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = patrol_shutdown_rx.recv() => {
                        info!("patrol loop stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = patrol.run().await {
                            error!(error = %err, "patrol sweep failed");
                        }
                    }
                }
            }
        });

        let _ = tokio::join!(server_handle, patrol_handle);
        for handle in scheduler_handles {
            let _ = handle.await;
        }
        info!("daemon stopped");
        Ok(())
    }
}

fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(handle_health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_lowercase(), v.to_string())))
        .collect();

    match state.controller.process_webhook_event(&body, &header_map).await {
        Ok(outcome) if outcome.is_new_delivery => {
            (StatusCode::ACCEPTED, Json(json!({ "processed": outcome.issue_processed, "delivery_id": outcome.delivery_id })))
        }
        Ok(outcome) => (
            StatusCode::CONFLICT,
            Json(json!({
                "delivery_id": outcome.delivery_id,
                "reason": "duplicate delivery",
                "processed": outcome.prior_processed.unwrap_or(false),
                "triggered_actions": outcome.prior_triggered_actions.unwrap_or(0),
                "automation_results": outcome.prior_automation_results.unwrap_or(json!({})),
            })),
        ),
        Err(DaemonError::InvalidSignature) => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid or missing signature" })))
        }
        Err(DaemonError::MalformedWebhook(msg)) => (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))),
        Err(err) => {
            error!(error = %err, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
        }
    }
}

async fn handle_health(State(state): State<WebhookState>) -> Json<serde_json::Value> {
    let health = state.health.snapshot(&state.repositories).await;
    Json(json!(health))
}
