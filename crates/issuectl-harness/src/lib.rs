//! Reliability infrastructure for calls to the GitHub API.
//!
//! This crate provides the foundational execution layer that sits between
//! the automation engine and GitHub's REST API. It coordinates:
//! - Reliability patterns (circuit breaker, rate limiter) for external calls
//! - Operational concerns (shutdown coordination for graceful cycle termination)

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod shutdown;
