//! Error types for the escrow engine
//!
//! Every guard in the transaction lifecycle fails with a typed error so
//! callers can distinguish recoverable failures (wrong password, wrong step)
//! from permanent ones (finalized transaction, consumed reveal).

use thiserror::Error;
use uuid::Uuid;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// A transition was attempted from a state that does not allow it
    #[error("invalid state transition: {from} -> {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// The transaction reached a terminal state and accepts no further events
    #[error("transaction {0} is finalized and accepts no further transitions")]
    TransactionFinalized(Uuid),

    /// The listing is already reserved or sold
    #[error("listing {0} is not available for purchase")]
    ListingUnavailable(Uuid),

    /// Signed name does not match the registered legal name
    #[error("signed name does not match the registered legal name")]
    NameMismatch,

    /// The transfer contract has already been signed
    #[error("contract has already been signed")]
    AlreadySigned,

    /// Password verification against the identity provider failed
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The one-time credential reveal has already happened
    #[error("credentials have already been revealed; the reveal is a one-time operation")]
    AlreadyRevealed,

    /// Credential decryption refused by a custody guard
    #[error("credential decryption denied: {0}")]
    DecryptionDenied(String),

    /// Actor lacks the privilege the operation requires
    #[error("actor lacks the privilege required for this operation")]
    PrivilegeDenied,

    /// Override reason shorter than the audit minimum
    #[error("override reason must be at least {min} characters")]
    ReasonTooShort { min: usize },

    /// Buyer has not accepted the platform agreements yet
    #[error("legal agreements must be accepted before initiating a purchase")]
    LegalAcknowledgmentRequired,

    /// Referenced entity does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// Payment processing errors
    #[error("payment error: {0}")]
    Payment(String),

    /// Cryptographic errors
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Request validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// External integration errors (gateway/identity/notification)
    #[error("integration error: {0}")]
    Integration(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Create an invalid-state-transition error
    pub fn invalid_transition<F, T, R>(from: F, to: T, reason: R) -> Self
    where
        F: ToString,
        T: ToString,
        R: Into<String>,
    {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    /// Create a payment error
    pub fn payment<S: Into<String>>(msg: S) -> Self {
        Self::Payment(msg.into())
    }

    /// Create a cryptographic error
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create a decryption-denied error
    pub fn decryption_denied<S: Into<String>>(msg: S) -> Self {
        Self::DecryptionDenied(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an integration error
    pub fn integration<S: Into<String>>(msg: S) -> Self {
        Self::Integration(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure is permanent and must not be retried.
    ///
    /// Everything else (wrong password, wrong step, reserved listing) is
    /// recoverable and may be re-prompted.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::TransactionFinalized(_) | Self::AlreadyRevealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors_are_flagged() {
        assert!(EscrowError::TransactionFinalized(Uuid::new_v4()).is_permanent());
        assert!(EscrowError::AlreadyRevealed.is_permanent());

        assert!(!EscrowError::AuthenticationFailed.is_permanent());
        assert!(!EscrowError::ListingUnavailable(Uuid::new_v4()).is_permanent());
        assert!(!EscrowError::NameMismatch.is_permanent());
    }
}
