use chrono::{DateTime, Utc};
use thiserror::Error;

/// Stable error surface for every gateway operation. Higher components
/// classify by these three kinds, never by raw HTTP status codes.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: status {status}: {body}")]
    Permanent { status: u16, body: String },

    #[error("missing GitHub token — set GITHUB_TOKEN or ISSUECTL_GITHUB_TOKEN")]
    MissingToken,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Substrings GitHub actually uses in the JSON `message` body of a rate
/// limit response (primary exhaustion and the secondary/abuse limiter),
/// since `octocrab::GitHubError` doesn't surface `X-RateLimit-Remaining`
/// to us here — the message is the only signal this layer has.
const RATE_LIMIT_MESSAGE_MARKERS: [&str; 3] = ["rate limit", "secondary rate limit", "abuse detection"];

/// Classify an octocrab error into the gateway's three-way error surface.
///
/// Per spec: a 403 is only `RateLimited` when it actually signals rate-limit
/// exhaustion; a 429 is always a rate limit. Any other 403/4xx (bad
/// credentials, insufficient scope, moved resource, etc.) is `Permanent` —
/// otherwise it would be retried forever as a deferral and never reach
/// `max_attempts`.
pub fn classify_octocrab_error(err: octocrab::Error) -> GatewayError {
    match &err {
        octocrab::Error::GitHub { source, .. } => {
            let status = source.status_code.as_u16();
            let message_lower = source.message.to_lowercase();
            let looks_rate_limited = RATE_LIMIT_MESSAGE_MARKERS.iter().any(|marker| message_lower.contains(marker));

            if status == 429 || (status == 403 && looks_rate_limited) {
                // Best-effort fallback reset; callers that already have a
                // fresh rate-limit snapshot should prefer that over this.
                GatewayError::RateLimited {
                    reset_at: Utc::now() + chrono::Duration::minutes(1),
                }
            } else if (500..600).contains(&status) {
                GatewayError::Transient(format!("{status}: {}", source.message))
            } else {
                GatewayError::Permanent {
                    status,
                    body: source.message.clone(),
                }
            }
        }
        octocrab::Error::Http { .. } | octocrab::Error::Hyper { .. } => {
            GatewayError::Transient(err.to_string())
        }
        other => GatewayError::Transient(other.to_string()),
    }
}
