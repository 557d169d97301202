use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("store error: {0}")]
    Store(#[from] issuectl_core::store::StoreError),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
