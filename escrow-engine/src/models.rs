//! Core data models for the escrow engine
//!
//! This module contains the transaction state machine, the entities it
//! governs (listings, contracts, reveal events, audit entries) and the
//! status surface exposed to callers.

use crate::EscrowResult;
use crate::error::EscrowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction state machine for the escrow flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Purchase initiated, payment not yet confirmed
    Pending,
    /// Payment confirmed and held in custody
    FundsHeld,
    /// Buyer signed the transfer contract
    ContractSigned,
    /// Credentials revealed to the buyer (one-time)
    CredentialsReleased,
    /// Funds released to the seller
    Completed,
    /// Funds returned to the buyer
    Refunded,
    /// Dispute opened, awaiting privileged resolution
    Disputed,
}

impl TransactionState {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }

    /// Check if a party can open a dispute from this state
    pub fn can_dispute(&self) -> bool {
        matches!(
            self,
            Self::FundsHeld | Self::ContractSigned | Self::CredentialsReleased
        )
    }

    /// Check if a privileged override may force-resolve from this state
    pub fn can_force_resolve(&self) -> bool {
        self.can_dispute() || matches!(self, Self::Disputed)
    }

    /// Check if a state transition is valid
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        match (self, next) {
            (Pending, FundsHeld) => true,
            (FundsHeld, ContractSigned) => true,
            (ContractSigned, CredentialsReleased) => true,
            (CredentialsReleased, Completed) => true,
            // Dispute branch, open to every post-custody step
            (FundsHeld | ContractSigned | CredentialsReleased, Disputed) => true,
            // Privileged overrides force a terminal outcome
            (FundsHeld | ContractSigned | CredentialsReleased | Disputed, Completed) => true,
            (FundsHeld | ContractSigned | CredentialsReleased | Disputed, Refunded) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::FundsHeld => "funds_held",
            Self::ContractSigned => "contract_signed",
            Self::CredentialsReleased => "credentials_released",
            Self::Completed => "completed",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing state machine (engine-visible slice)
///
/// Moderation (draft/review) happens upstream; the engine only sees approved
/// listings and governs the reservation hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingState {
    /// Available for purchase
    Approved,
    /// Held by an active transaction
    Reserved,
    /// Ownership transferred, terminal
    Sold,
}

/// Listing being purchased (reservation authority slice)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    /// Price in minor currency units
    pub price_minor: i64,
    pub state: ListingState,
    /// Encrypted credential blob submitted by the seller
    pub credential_record_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Create an approved listing ready for sale
    pub fn new(seller_id: Uuid, price_minor: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            seller_id,
            price_minor,
            state: ListingState::Approved,
            credential_record_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// User roles as reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
    /// Elevated override privilege for dispute resolution
    SuperAdmin,
}

/// Engine-side view of an authenticated user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActingUser {
    pub id: Uuid,
    pub email: String,
    pub legal_name: String,
    pub role: Role,
}

impl ActingUser {
    pub fn new(email: impl Into<String>, legal_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            legal_name: legal_name.into(),
            role,
        }
    }

    /// Holds the elevated dispute-override privilege
    pub fn has_override_privilege(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

/// Signed transfer contract, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub transaction_id: Uuid,
    /// Buyer's full legal name, as typed (trimmed)
    pub signed_by_name: String,
    pub signed_at: DateTime<Utc>,
    pub version: String,
}

impl Contract {
    pub fn new(
        transaction_id: Uuid,
        signed_by_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            signed_by_name: signed_by_name.into(),
            signed_at: Utc::now(),
            version: version.into(),
        }
    }
}

/// The one-time disclosure event for a transaction
///
/// Immutable once created, except for the `consumed` flag. TTL expiry never
/// re-enables a reveal; it only ends the client-visible countdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealEvent {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub revealed_to: Uuid,
    pub revealed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Holder discarded the plaintext before the window elapsed
    pub consumed: bool,
}

impl RevealEvent {
    pub fn new(transaction_id: Uuid, revealed_to: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            revealed_to,
            revealed_at: Utc::now(),
            expires_at,
            consumed: false,
        }
    }
}

/// Privileged override actions recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ForceRelease,
    ForceRefund,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForceRelease => "force_release",
            Self::ForceRefund => "force_refund",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row for a privileged override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        transaction_id: Uuid,
        actor_id: Uuid,
        action: AuditAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            actor_id,
            action,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// Escrow transaction, the central aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,

    /// Amount in minor currency units, immutable once funds are held
    pub amount_minor: i64,
    pub state: TransactionState,

    /// Gateway reference minted at creation, never mutated
    pub payment_reference: String,

    /// Encrypted credential blob attached at creation, never replaced
    pub credential_record_id: Uuid,

    pub contract: Option<Contract>,
    pub reveal_event: Option<RevealEvent>,
    pub buyer_confirmed_access: bool,

    // Payout details, set at completion
    pub commission_minor: Option<i64>,
    pub payout_amount_minor: Option<i64>,
    pub payout_reference: Option<String>,

    pub notes: Option<String>,

    // State timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub funds_held_at: Option<DateTime<Utc>>,
    pub contract_signed_at: Option<DateTime<Utc>>,
    pub credentials_released_at: Option<DateTime<Utc>>,
    pub access_confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a pending transaction holding a reservation on `listing_id`
    pub fn new(
        listing_id: Uuid,
        buyer_id: Uuid,
        seller_id: Uuid,
        amount_minor: i64,
        payment_reference: String,
        credential_record_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            listing_id,
            buyer_id,
            seller_id,
            amount_minor,
            state: TransactionState::Pending,
            payment_reference,
            credential_record_id,
            contract: None,
            reveal_event: None,
            buyer_confirmed_access: false,
            commission_minor: None,
            payout_amount_minor: None,
            payout_reference: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            funds_held_at: None,
            contract_signed_at: None,
            credentials_released_at: None,
            access_confirmed_at: None,
            completed_at: None,
            refunded_at: None,
            disputed_at: None,
        }
    }

    /// Whether `user_id` is the buyer or seller of this transaction
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// Validate a state transition, leaving the transaction untouched
    pub fn validate_transition(&self, to: TransactionState) -> EscrowResult<()> {
        if self.state.is_terminal() {
            return Err(EscrowError::TransactionFinalized(self.id));
        }
        if !self.state.can_transition_to(to) {
            return Err(EscrowError::invalid_transition(
                self.state,
                to,
                "transition not allowed from the current state",
            ));
        }
        Ok(())
    }

    /// Apply a validated transition, stamping the state timestamp
    pub fn transition(&mut self, to: TransactionState) -> EscrowResult<()> {
        self.validate_transition(to)?;

        let now = Utc::now();
        self.state = to;
        self.updated_at = now;
        match to {
            TransactionState::FundsHeld => self.funds_held_at = Some(now),
            TransactionState::ContractSigned => self.contract_signed_at = Some(now),
            TransactionState::CredentialsReleased => self.credentials_released_at = Some(now),
            TransactionState::Completed => self.completed_at = Some(now),
            TransactionState::Refunded => self.refunded_at = Some(now),
            TransactionState::Disputed => self.disputed_at = Some(now),
            TransactionState::Pending => {}
        }
        Ok(())
    }
}

/// Step surface exposed to clients for countdowns and step locking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_id: Uuid,
    pub state: TransactionState,
    /// Guards for the next step are currently satisfiable
    pub can_proceed: bool,
    pub next_step_available: bool,
    /// Reveal-window deadline, present only after a reveal
    pub verification_deadline: Option<DateTime<Utc>>,
    pub time_remaining_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction_in(state: TransactionState) -> Transaction {
        let mut txn = Transaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            5_000,
            "ref-1".to_string(),
            Uuid::new_v4(),
        );
        txn.state = state;
        txn
    }

    #[test]
    fn happy_path_edges_are_allowed() {
        use TransactionState::*;
        assert!(Pending.can_transition_to(FundsHeld));
        assert!(FundsHeld.can_transition_to(ContractSigned));
        assert!(ContractSigned.can_transition_to(CredentialsReleased));
        assert!(CredentialsReleased.can_transition_to(Completed));
    }

    #[test]
    fn skipping_steps_is_rejected() {
        use TransactionState::*;
        assert!(!Pending.can_transition_to(ContractSigned));
        assert!(!Pending.can_transition_to(CredentialsReleased));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!FundsHeld.can_transition_to(CredentialsReleased));
        assert!(!ContractSigned.can_transition_to(FundsHeld));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        use TransactionState::*;
        for next in [
            Pending,
            FundsHeld,
            ContractSigned,
            CredentialsReleased,
            Completed,
            Refunded,
            Disputed,
        ] {
            assert!(!Completed.can_transition_to(next), "completed -> {next}");
            assert!(!Refunded.can_transition_to(next), "refunded -> {next}");
        }
    }

    #[test]
    fn disputes_open_only_after_custody() {
        use TransactionState::*;
        assert!(!Pending.can_dispute());
        assert!(FundsHeld.can_dispute());
        assert!(ContractSigned.can_dispute());
        assert!(CredentialsReleased.can_dispute());
        assert!(!Completed.can_dispute());
        assert!(!Refunded.can_dispute());
    }

    #[test]
    fn transition_stamps_timestamp() {
        let mut txn = transaction_in(TransactionState::Pending);
        txn.transition(TransactionState::FundsHeld).unwrap();
        assert_eq!(txn.state, TransactionState::FundsHeld);
        assert!(txn.funds_held_at.is_some());
    }

    #[test]
    fn transition_from_terminal_is_finalized_error() {
        let mut txn = transaction_in(TransactionState::Completed);
        let err = txn.transition(TransactionState::Disputed).unwrap_err();
        assert!(matches!(err, EscrowError::TransactionFinalized(_)));
        assert_eq!(txn.state, TransactionState::Completed);
    }

    #[test]
    fn invalid_transition_leaves_state_unchanged() {
        let mut txn = transaction_in(TransactionState::Pending);
        let err = txn.transition(TransactionState::Completed).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidStateTransition { .. }));
        assert_eq!(txn.state, TransactionState::Pending);
        assert!(txn.completed_at.is_none());
    }

    #[test]
    fn state_serializes_to_wire_names() {
        let json = serde_json::to_string(&TransactionState::FundsHeld).unwrap();
        assert_eq!(json, "\"funds_held\"");

        // Unknown states are rejected at the boundary
        let parsed: Result<TransactionState, _> = serde_json::from_str("\"limbo\"");
        assert!(parsed.is_err());
    }
}
