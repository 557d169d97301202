use thiserror::Error;

/// Stable error surface for the daemon's ingestion, scheduling, and HTTP
/// layers. Maps onto the status codes in the webhook surface: signature
/// and malformed-body failures are client errors (400/401), everything
/// else propagated from a lower crate is a server-side failure the
/// caller should retry.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("webhook signature missing or invalid")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    MalformedWebhook(String),

    #[error("webhook dispatch failed: {0}")]
    Dispatch(String),

    #[error("cycle deadline exceeded for {owner}/{repo}")]
    DeadlineExceeded { owner: String, repo: String },

    #[error("store error: {0}")]
    Store(#[from] issuectl_core::store::StoreError),

    #[error("gateway error: {0}")]
    Gateway(#[from] issuectl_github::GatewayError),

    #[error("detector error: {0}")]
    Detector(#[from] issuectl_detector::DetectorError),

    #[error("planner error: {0}")]
    Planner(#[from] issuectl_planner::PlannerError),

    #[error("executor error: {0}")]
    Executor(#[from] issuectl_executor::ExecutorError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
