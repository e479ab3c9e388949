//! Tracing setup for the escrow engine
//!
//! Structured fields everywhere: `transaction_id`, `listing_id`, `actor_id`,
//! `reference`. Secrets and plaintext credentials are never logged at any
//! level.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// Respects `RUST_LOG`, defaulting to `info`. Safe to call once per process;
/// later calls are ignored so tests can race it freely.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
