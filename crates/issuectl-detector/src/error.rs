use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("store error: {0}")]
    Store(#[from] issuectl_core::store::StoreError),
    #[error("evidence gathering failed: {0}")]
    Evidence(String),
}

pub type Result<T> = std::result::Result<T, DetectorError>;
