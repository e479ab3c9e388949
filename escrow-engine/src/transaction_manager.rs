//! Transaction Manager - the authoritative escrow state machine
//!
//! Owns every transaction aggregate and the listing reservations, and is the
//! only place state transitions happen. Each transaction sits behind its own
//! lock so operations on different transactions never contend, while racing
//! operations on the same transaction serialize and the loser sees a typed
//! error. Every transition either fully commits or leaves stored state
//! untouched.

use crate::EscrowResult;
use crate::audit::AuditLog;
use crate::contract_signer::ContractSigner;
use crate::error::EscrowError;
use crate::gateway::{IdentityProvider, PaymentGateway};
use crate::models::{
    ActingUser, AuditAction, AuditEntry, Contract, Listing, ListingState,
    Transaction, TransactionState, TransactionStatus,
};
use crate::reveal::RevealSessionManager;
use crate::vault::{CredentialRecord, CredentialVault, PlaintextSecrets};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the transaction manager
#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    /// Platform commission percentage taken from the sale amount
    pub commission_percent: u8,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            commission_percent: 10,
        }
    }
}

/// One-time reveal payload returned to the buyer
///
/// The engine offers no API to fetch this a second time; once the window
/// elapses the plaintext is gone for good.
#[derive(Debug)]
pub struct RevealedCredentials {
    pub secrets: PlaintextSecrets,
    pub revealed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The escrow state machine over independently lockable aggregates
pub struct TransactionManager {
    config: TransactionManagerConfig,
    /// Listing reservations; writes to this map are the reservation authority
    listings: Arc<RwLock<HashMap<Uuid, Listing>>>,
    /// Transaction aggregates, each behind its own lock
    transactions: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Transaction>>>>>,
    /// Encrypted credential records by id
    credentials: Arc<RwLock<HashMap<Uuid, CredentialRecord>>>,
    payment: Arc<dyn PaymentGateway>,
    identity: Arc<dyn IdentityProvider>,
    signer: Arc<ContractSigner>,
    vault: Arc<CredentialVault>,
    reveal: Arc<RevealSessionManager>,
    audit: Arc<AuditLog>,
}

impl TransactionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TransactionManagerConfig,
        payment: Arc<dyn PaymentGateway>,
        identity: Arc<dyn IdentityProvider>,
        signer: Arc<ContractSigner>,
        vault: Arc<CredentialVault>,
        reveal: Arc<RevealSessionManager>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            config,
            listings: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(HashMap::new())),
            credentials: Arc::new(RwLock::new(HashMap::new())),
            payment,
            identity,
            signer,
            vault,
            reveal,
            audit,
        }
    }

    // -----------------------------------------------------------------------
    // Listings and credential records
    // -----------------------------------------------------------------------

    /// Register an approved listing with the reservation authority
    pub async fn register_listing(&self, listing: Listing) -> EscrowResult<Listing> {
        let mut listings = self.listings.write().await;
        if listings.contains_key(&listing.id) {
            return Err(EscrowError::validation("listing is already registered"));
        }
        listings.insert(listing.id, listing.clone());
        info!(listing_id = %listing.id, seller_id = %listing.seller_id, "listing registered");
        Ok(listing)
    }

    /// Get a listing snapshot
    pub async fn listing(&self, listing_id: Uuid) -> EscrowResult<Listing> {
        self.listings
            .read()
            .await
            .get(&listing_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found("listing", listing_id))
    }

    /// Attach the seller's encrypted credential record to a listing
    ///
    /// A listing carries at most one record and it is never replaced.
    pub async fn attach_credentials(&self, record: CredentialRecord) -> EscrowResult<()> {
        let mut listings = self.listings.write().await;
        let listing = listings
            .get_mut(&record.listing_id)
            .ok_or_else(|| EscrowError::not_found("listing", record.listing_id))?;
        if listing.credential_record_id.is_some() {
            return Err(EscrowError::validation(
                "listing already has a credential record",
            ));
        }

        listing.credential_record_id = Some(record.id);
        listing.updated_at = Utc::now();
        info!(listing_id = %record.listing_id, record_id = %record.id, "credential record attached");

        self.credentials.write().await.insert(record.id, record);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// Create a transaction, atomically reserving the listing
    ///
    /// The reservation check-and-set happens under one write lock so two
    /// simultaneous purchases of the same listing cannot both succeed; the
    /// loser observes `ListingUnavailable`.
    pub async fn create_transaction(
        &self,
        listing_id: Uuid,
        buyer: &ActingUser,
        payment_reference: String,
    ) -> EscrowResult<Transaction> {
        let mut listings = self.listings.write().await;
        let listing = listings
            .get_mut(&listing_id)
            .ok_or_else(|| EscrowError::not_found("listing", listing_id))?;

        if listing.seller_id == buyer.id {
            return Err(EscrowError::validation(
                "sellers cannot purchase their own listing",
            ));
        }
        if listing.state != ListingState::Approved {
            return Err(EscrowError::ListingUnavailable(listing_id));
        }
        let credential_record_id = listing.credential_record_id.ok_or_else(|| {
            EscrowError::validation("listing has no credential record to transfer")
        })?;

        let transaction = Transaction::new(
            listing_id,
            buyer.id,
            listing.seller_id,
            listing.price_minor,
            payment_reference,
            credential_record_id,
        );

        listing.state = ListingState::Reserved;
        listing.updated_at = Utc::now();

        self.transactions
            .write()
            .await
            .insert(transaction.id, Arc::new(Mutex::new(transaction.clone())));

        info!(
            transaction_id = %transaction.id,
            listing_id = %listing_id,
            buyer_id = %buyer.id,
            amount_minor = transaction.amount_minor,
            "transaction created, listing reserved"
        );

        Ok(transaction)
    }

    /// Confirm the buyer's payment against the gateway
    ///
    /// Re-submitting an already-applied confirmation with the same reference
    /// is a no-op returning the current state, since gateway callbacks are
    /// retried over the network.
    pub async fn confirm_payment(
        &self,
        transaction_id: Uuid,
        reference: &str,
    ) -> EscrowResult<Transaction> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        // Idempotent retry of an already-accepted confirmation
        if txn.funds_held_at.is_some() && txn.payment_reference == reference {
            return Ok(txn.clone());
        }

        txn.validate_transition(TransactionState::FundsHeld)?;
        if txn.payment_reference != reference {
            return Err(EscrowError::payment(
                "reference does not match the one minted for this transaction",
            ));
        }

        let verification = self.payment.verify(reference).await?;
        if !verification.success {
            return Err(EscrowError::payment("payment has not been completed"));
        }
        if verification.amount_minor != txn.amount_minor {
            return Err(EscrowError::payment(format!(
                "verified amount {} does not match escrow amount {}",
                verification.amount_minor, txn.amount_minor
            )));
        }

        txn.transition(TransactionState::FundsHeld)?;
        info!(transaction_id = %txn.id, reference = %reference, "funds held in custody");
        Ok(txn.clone())
    }

    /// Sign the transfer contract as the buyer
    pub async fn sign_contract(
        &self,
        transaction_id: Uuid,
        acting_user: &ActingUser,
        signed_by_name: &str,
    ) -> EscrowResult<Contract> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        if txn.state.is_terminal() {
            return Err(EscrowError::TransactionFinalized(txn.id));
        }
        if txn.buyer_id != acting_user.id {
            return Err(EscrowError::PrivilegeDenied);
        }

        let contract = self.signer.sign(&txn, signed_by_name, acting_user)?;
        txn.contract = Some(contract.clone());
        txn.transition(TransactionState::ContractSigned)?;

        info!(transaction_id = %txn.id, contract_id = %contract.id, "contract attached");
        Ok(contract)
    }

    /// Reveal the seller's credentials to the buyer, exactly once
    ///
    /// The decrypt, the reveal-event creation and the transition to
    /// `credentials_released` commit together under the transaction lock;
    /// none of them happens without the others.
    pub async fn reveal_credentials(
        &self,
        transaction_id: Uuid,
        buyer_id: Uuid,
        password: &str,
    ) -> EscrowResult<RevealedCredentials> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        if txn.state.is_terminal() {
            return Err(EscrowError::TransactionFinalized(txn.id));
        }
        if txn.buyer_id != buyer_id {
            return Err(EscrowError::PrivilegeDenied);
        }
        if txn.reveal_event.is_some() {
            return Err(EscrowError::AlreadyRevealed);
        }
        if txn.state != TransactionState::ContractSigned {
            return Err(EscrowError::decryption_denied(format!(
                "transaction is {}, credentials unlock only after the contract is signed",
                txn.state
            )));
        }

        // The buyer's password is an independent authentication gate, not
        // key material.
        if !self.identity.verify_password(buyer_id, password).await? {
            warn!(transaction_id = %txn.id, "reveal rejected: password verification failed");
            return Err(EscrowError::AuthenticationFailed);
        }

        let record = self
            .credentials
            .read()
            .await
            .get(&txn.credential_record_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found("credential record", txn.credential_record_id))?;

        let secrets = self.vault.decrypt(&record, &txn)?;

        let event = self.reveal.open_session(txn.id, buyer_id);
        let revealed_at = event.revealed_at;
        let expires_at = event.expires_at;
        txn.reveal_event = Some(event);
        txn.transition(TransactionState::CredentialsReleased)?;

        info!(transaction_id = %txn.id, "credentials released to buyer");
        Ok(RevealedCredentials {
            secrets,
            revealed_at,
            expires_at,
        })
    }

    /// Mark the reveal session destroyed early at the holder's request
    pub async fn destroy_reveal_session(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
    ) -> EscrowResult<()> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        if txn.buyer_id != user_id {
            return Err(EscrowError::PrivilegeDenied);
        }
        let event = txn
            .reveal_event
            .as_mut()
            .ok_or_else(|| EscrowError::validation("no reveal session exists"))?;
        self.reveal.destroy(event);
        txn.updated_at = Utc::now();
        Ok(())
    }

    /// Buyer confirms control of the account; funds release to the seller
    ///
    /// The payout is part of the completion: if the gateway rejects the
    /// transfer the transition does not commit.
    pub async fn confirm_access(
        &self,
        transaction_id: Uuid,
        buyer_id: Uuid,
    ) -> EscrowResult<Transaction> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        if txn.state.is_terminal() {
            return Err(EscrowError::TransactionFinalized(txn.id));
        }
        if txn.buyer_id != buyer_id {
            return Err(EscrowError::PrivilegeDenied);
        }
        if txn.state != TransactionState::CredentialsReleased {
            return Err(EscrowError::invalid_transition(
                txn.state,
                TransactionState::Completed,
                "access can only be confirmed after credentials are released",
            ));
        }
        if txn.reveal_event.is_none() {
            return Err(EscrowError::internal(
                "credentials_released transaction has no reveal event",
            ));
        }

        let (commission, payout) = self.commission_split(txn.amount_minor);
        let payout_reference = self.payment.release(txn.seller_id, payout).await?;

        txn.buyer_confirmed_access = true;
        txn.access_confirmed_at = Some(Utc::now());
        txn.commission_minor = Some(commission);
        txn.payout_amount_minor = Some(payout);
        txn.payout_reference = Some(payout_reference);
        txn.transition(TransactionState::Completed)?;

        self.release_listing(txn.listing_id, ListingState::Sold).await;

        info!(
            transaction_id = %txn.id,
            commission_minor = commission,
            payout_minor = payout,
            "buyer confirmed access, funds released to seller"
        );
        Ok(txn.clone())
    }

    /// Open a dispute as a party to the transaction
    pub async fn open_dispute(
        &self,
        transaction_id: Uuid,
        actor: &ActingUser,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        if txn.state.is_terminal() {
            return Err(EscrowError::TransactionFinalized(txn.id));
        }
        if !txn.is_party(actor.id) {
            return Err(EscrowError::PrivilegeDenied);
        }
        if reason.trim().is_empty() {
            return Err(EscrowError::validation("dispute reason cannot be empty"));
        }
        if !txn.state.can_dispute() {
            return Err(EscrowError::invalid_transition(
                txn.state,
                TransactionState::Disputed,
                "disputes open only between payment and completion",
            ));
        }

        txn.notes = Some(format!("dispute opened: {}", reason.trim()));
        txn.transition(TransactionState::Disputed)?;

        warn!(transaction_id = %txn.id, actor_id = %actor.id, "dispute opened");
        Ok(txn.clone())
    }

    /// Force a terminal outcome outside the normal guard chain
    ///
    /// Privilege and reason checks belong to the dispute resolver; this
    /// method enforces the state guards and makes the gateway effect, the
    /// audit write and the transition one atomic unit.
    pub(crate) async fn force_resolve(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        action: AuditAction,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        let entry = self.entry(transaction_id).await?;
        let mut txn = entry.lock().await;

        if txn.state.is_terminal() {
            return Err(EscrowError::TransactionFinalized(txn.id));
        }
        if !txn.state.can_force_resolve() {
            return Err(EscrowError::invalid_transition(
                txn.state,
                match action {
                    AuditAction::ForceRelease => TransactionState::Completed,
                    AuditAction::ForceRefund => TransactionState::Refunded,
                },
                "overrides apply only once funds are held",
            ));
        }

        let mut payout_fields = None;
        match action {
            AuditAction::ForceRelease => {
                let (commission, payout) = self.commission_split(txn.amount_minor);
                let payout_reference = self.payment.release(txn.seller_id, payout).await?;
                payout_fields = Some((commission, payout, payout_reference));
            }
            AuditAction::ForceRefund => {
                self.payment.refund(&txn.payment_reference).await?;
            }
        }

        // Audit write is part of the same atomic unit: a failure here aborts
        // the transition.
        self.audit
            .append(AuditEntry::new(txn.id, actor_id, action, reason))
            .await?;

        match action {
            AuditAction::ForceRelease => {
                if let Some((commission, payout, reference)) = payout_fields {
                    txn.commission_minor = Some(commission);
                    txn.payout_amount_minor = Some(payout);
                    txn.payout_reference = Some(reference);
                }
                txn.notes = Some(format!("forced release by {actor_id}: {reason}"));
                txn.transition(TransactionState::Completed)?;
                self.release_listing(txn.listing_id, ListingState::Sold).await;
            }
            AuditAction::ForceRefund => {
                txn.notes = Some(format!("refunded by {actor_id}: {reason}"));
                txn.transition(TransactionState::Refunded)?;
                // Seller can re-list after a refund
                self.release_listing(txn.listing_id, ListingState::Approved)
                    .await;
            }
        }

        warn!(
            transaction_id = %txn.id,
            actor_id = %actor_id,
            action = %action,
            "privileged override applied"
        );
        Ok(txn.clone())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current snapshot of a transaction
    pub async fn snapshot(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        let entry = self.entry(transaction_id).await?;
        let txn = entry.lock().await;
        Ok(txn.clone())
    }

    /// Step surface for clients: what the next step is and any deadline
    pub async fn status(&self, transaction_id: Uuid) -> EscrowResult<TransactionStatus> {
        let entry = self.entry(transaction_id).await?;
        let txn = entry.lock().await;

        let actionable = matches!(
            txn.state,
            TransactionState::Pending
                | TransactionState::FundsHeld
                | TransactionState::ContractSigned
                | TransactionState::CredentialsReleased
        );
        let (deadline, remaining) = match (&txn.state, &txn.reveal_event) {
            (TransactionState::CredentialsReleased, Some(event)) => (
                Some(event.expires_at),
                Some(self.reveal.remaining_secs(event)),
            ),
            _ => (None, None),
        };

        Ok(TransactionStatus {
            transaction_id: txn.id,
            state: txn.state,
            can_proceed: actionable,
            next_step_available: actionable,
            verification_deadline: deadline,
            time_remaining_secs: remaining,
        })
    }

    /// Audit trail for a transaction
    pub async fn audit_trail(&self, transaction_id: Uuid) -> Vec<AuditEntry> {
        self.audit.entries_for(transaction_id).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn entry(&self, transaction_id: Uuid) -> EscrowResult<Arc<Mutex<Transaction>>> {
        self.transactions
            .read()
            .await
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found("transaction", transaction_id))
    }

    fn commission_split(&self, amount_minor: i64) -> (i64, i64) {
        let commission = amount_minor * i64::from(self.config.commission_percent) / 100;
        (commission, amount_minor - commission)
    }

    /// Release or finalize the listing reservation on a terminal transition
    async fn release_listing(&self, listing_id: Uuid, to: ListingState) {
        let mut listings = self.listings.write().await;
        match listings.get_mut(&listing_id) {
            Some(listing) => {
                listing.state = to;
                listing.updated_at = Utc::now();
            }
            None => warn!(listing_id = %listing_id, "terminal transition for unknown listing"),
        }
    }
}
