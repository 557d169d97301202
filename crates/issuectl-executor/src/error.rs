use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] issuectl_core::store::StoreError),
    #[error("gateway error: {0}")]
    Gateway(#[from] issuectl_github::GatewayError),
    #[error("action {0} not found")]
    UnknownAction(uuid::Uuid),
    #[error("action {0} has no issue to act on")]
    MissingIssue(uuid::Uuid),
    #[error("action {0} is not rollback-eligible")]
    NotRollbackEligible(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
