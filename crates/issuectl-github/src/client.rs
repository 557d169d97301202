use octocrab::Octocrab;

use crate::error::{GatewayError, Result};
use crate::types::GitHubConfig;

/// Thin wrapper over an authenticated `Octocrab` instance. Owner/repo are
/// passed per-call rather than fixed here, since a single process may act
/// across several repositories.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    pub(crate) octocrab: Octocrab,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let token = config.token.ok_or(GatewayError::MissingToken)?;
        let octocrab = Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(crate::error::classify_octocrab_error)?;
        Ok(Self { octocrab })
    }

    /// Build a client from `GITHUB_TOKEN` or `ISSUECTL_GITHUB_TOKEN`.
    pub fn new_from_env() -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("ISSUECTL_GITHUB_TOKEN"))
            .map_err(|_| GatewayError::MissingToken)?;
        Self::new(GitHubConfig { token: Some(token) })
    }

    pub fn inner(&self) -> &Octocrab {
        &self.octocrab
    }
}
