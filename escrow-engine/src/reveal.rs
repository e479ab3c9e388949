//! Reveal Session Manager - the one-time disclosure window
//!
//! Once a decrypt succeeds, the plaintext exists only inside a bounded
//! session: a fixed self-destruct window counted from `revealed_at`. The
//! engine never re-serves plaintext; a second decrypt always fails, and TTL
//! expiry never re-enables one. This manager is a guard and timestamp
//! authority, not a key-management component.

use crate::models::RevealEvent;
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

/// Configuration for reveal sessions
#[derive(Debug, Clone)]
pub struct RevealSessionConfig {
    /// Self-destruct window in seconds, counted from the reveal
    pub ttl_secs: i64,
}

impl Default for RevealSessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600, // 10 minutes
        }
    }
}

/// Reveal session manager
pub struct RevealSessionManager {
    config: RevealSessionConfig,
}

impl RevealSessionManager {
    pub fn new(config: RevealSessionConfig) -> Self {
        Self { config }
    }

    /// Open the single disclosure session for a transaction
    ///
    /// Caller must hold the transaction lock and have checked that no prior
    /// reveal exists; the returned event is attached to the transaction in
    /// the same critical section as the state transition.
    pub fn open_session(&self, transaction_id: Uuid, revealed_to: Uuid) -> RevealEvent {
        let event = RevealEvent::new(
            transaction_id,
            revealed_to,
            Utc::now() + Duration::seconds(self.config.ttl_secs),
        );
        info!(
            transaction_id = %transaction_id,
            reveal_id = %event.id,
            expires_at = %event.expires_at,
            "one-time reveal session opened"
        );
        event
    }

    /// Seconds left in the client-visible countdown, clamped at zero
    pub fn remaining_secs(&self, event: &RevealEvent) -> i64 {
        (event.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Whether the self-destruct window has elapsed
    ///
    /// Expiry ends the countdown; it does not and must not re-enable a
    /// reveal.
    pub fn is_expired(&self, event: &RevealEvent) -> bool {
        Utc::now() >= event.expires_at
    }

    /// Mark the session destroyed early at the holder's request
    pub fn destroy(&self, event: &mut RevealEvent) {
        event.consumed = true;
        info!(
            transaction_id = %event.transaction_id,
            reveal_id = %event.id,
            "reveal session destroyed by holder"
        );
    }
}

impl Default for RevealSessionManager {
    fn default() -> Self {
        Self::new(RevealSessionConfig::default())
    }
}
