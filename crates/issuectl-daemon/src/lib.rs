//! Background daemon wiring the automation core's components into a
//! long-running process: a periodic per-repository cycle scheduler, a
//! webhook HTTP server, a reaper for stalled work, and graceful shutdown.
//!
//! The daemon provides persistent background services including:
//! - Scheduled ingest→detect→plan→execute cycles per configured repository
//! - A webhook HTTP endpoint for event-driven ingestion
//! - A reaper sweeping stalled webhook events and stuck in-progress actions
//! - Rate-budget headroom and per-repo cycle staleness reporting

pub mod daemon;
pub mod error;
pub mod evidence_source;
pub mod heartbeat;
pub mod ingestor;
pub mod orchestrator;
pub mod patrol;
pub mod scheduler;
