//! Escrow Node - high-level API for the escrow system
//!
//! Wires the vault, contract signer, reveal manager, dispute resolver and
//! transaction manager behind one interface, enforces purchase-initiation
//! preconditions, and informs the notification service on every transition
//! without ever letting delivery failures block one.

use crate::EscrowResult;
use crate::audit::AuditLog;
use crate::contract_signer::ContractSigner;
use crate::dispute::{DisputeResolver, DisputeResolverConfig};
use crate::error::EscrowError;
use crate::gateway::{
    IdentityProvider, LegalAcknowledgmentService, NotificationService, PaymentGateway,
    TransitionNotice,
};
use crate::models::{AuditEntry, Contract, Listing, Role, Transaction, TransactionStatus};
use crate::reveal::{RevealSessionConfig, RevealSessionManager};
use crate::transaction_manager::{
    RevealedCredentials, TransactionManager, TransactionManagerConfig,
};
use crate::vault::{CredentialVault, CredentialVaultConfig, SellerSecrets};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the escrow node
#[derive(Debug, Clone, Default)]
pub struct EscrowNodeConfig {
    pub manager: TransactionManagerConfig,
    pub vault: CredentialVaultConfig,
    pub reveal: RevealSessionConfig,
    pub dispute: DisputeResolverConfig,
}

/// Result of initiating a purchase: the pending transaction plus the
/// gateway checkout URL for the buyer
#[derive(Debug, Clone)]
pub struct PurchaseInitiation {
    pub transaction: Transaction,
    pub authorization_url: Option<String>,
}

/// Main escrow node coordinating all components
pub struct EscrowNode {
    manager: Arc<TransactionManager>,
    resolver: DisputeResolver,
    vault: Arc<CredentialVault>,
    payment: Arc<dyn PaymentGateway>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn NotificationService>,
    legal: Arc<dyn LegalAcknowledgmentService>,
}

impl EscrowNode {
    /// Create a new escrow node over the given collaborators
    pub fn new(
        config: EscrowNodeConfig,
        master_secret: SecretString,
        payment: Arc<dyn PaymentGateway>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn NotificationService>,
        legal: Arc<dyn LegalAcknowledgmentService>,
    ) -> Self {
        let vault = Arc::new(CredentialVault::new(config.vault, master_secret));
        let manager = Arc::new(TransactionManager::new(
            config.manager,
            payment.clone(),
            identity.clone(),
            Arc::new(ContractSigner::default()),
            vault.clone(),
            Arc::new(RevealSessionManager::new(config.reveal)),
            Arc::new(AuditLog::new()),
        ));
        let resolver = DisputeResolver::new(config.dispute, manager.clone());

        info!("escrow node initialized");
        Self {
            manager,
            resolver,
            vault,
            payment,
            identity,
            notifier,
            legal,
        }
    }

    // -----------------------------------------------------------------------
    // Seller side
    // -----------------------------------------------------------------------

    /// Register an approved listing for sale
    pub async fn register_listing(&self, listing: Listing) -> EscrowResult<Listing> {
        self.manager.register_listing(listing).await
    }

    /// Encrypt and attach the seller's account secrets to their listing
    ///
    /// The passphrase is the seller's account password, used as an
    /// authentication factor only; it never becomes key material and is
    /// never stored.
    pub async fn submit_credentials(
        &self,
        listing_id: Uuid,
        seller_id: Uuid,
        secrets: SellerSecrets,
        passphrase: &str,
    ) -> EscrowResult<()> {
        let listing = self.manager.listing(listing_id).await?;
        if listing.seller_id != seller_id {
            return Err(EscrowError::PrivilegeDenied);
        }
        if !self.identity.verify_password(seller_id, passphrase).await? {
            return Err(EscrowError::AuthenticationFailed);
        }

        let record = self.vault.encrypt(listing_id, &secrets)?;
        self.manager.attach_credentials(record).await
    }

    // -----------------------------------------------------------------------
    // Buyer flow
    // -----------------------------------------------------------------------

    /// Initiate a purchase: check preconditions, mint the payment reference
    /// and reserve the listing
    pub async fn initiate_purchase(
        &self,
        listing_id: Uuid,
        buyer_id: Uuid,
    ) -> EscrowResult<PurchaseInitiation> {
        if !self.legal.has_accepted(buyer_id).await? {
            return Err(EscrowError::LegalAcknowledgmentRequired);
        }
        let buyer = self.identity.lookup(buyer_id).await?;
        if buyer.role != Role::Buyer {
            return Err(EscrowError::PrivilegeDenied);
        }

        let listing = self.manager.listing(listing_id).await?;
        let intent = self.payment.initialize(&buyer, listing.price_minor).await?;
        let transaction = self
            .manager
            .create_transaction(listing_id, &buyer, intent.reference)
            .await?;

        self.notify(&transaction).await;
        Ok(PurchaseInitiation {
            transaction,
            authorization_url: intent.authorization_url,
        })
    }

    /// Confirm the gateway payment callback, advancing to `funds_held`
    pub async fn confirm_payment(
        &self,
        transaction_id: Uuid,
        reference: &str,
    ) -> EscrowResult<Transaction> {
        let transaction = self.manager.confirm_payment(transaction_id, reference).await?;
        self.notify(&transaction).await;
        Ok(transaction)
    }

    /// Sign the transfer contract by typing the full legal name
    pub async fn sign_contract(
        &self,
        transaction_id: Uuid,
        buyer_id: Uuid,
        signed_by_name: &str,
    ) -> EscrowResult<Contract> {
        let acting_user = self.identity.lookup(buyer_id).await?;
        let contract = self
            .manager
            .sign_contract(transaction_id, &acting_user, signed_by_name)
            .await?;
        let transaction = self.manager.snapshot(transaction_id).await?;
        self.notify(&transaction).await;
        Ok(contract)
    }

    /// One-time credential reveal for the buyer
    pub async fn reveal_credentials(
        &self,
        transaction_id: Uuid,
        buyer_id: Uuid,
        password: &str,
    ) -> EscrowResult<RevealedCredentials> {
        let revealed = self
            .manager
            .reveal_credentials(transaction_id, buyer_id, password)
            .await?;
        let transaction = self.manager.snapshot(transaction_id).await?;
        self.notify(&transaction).await;
        Ok(revealed)
    }

    /// Holder discards the revealed plaintext before the window elapses
    pub async fn destroy_reveal_session(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
    ) -> EscrowResult<()> {
        self.manager
            .destroy_reveal_session(transaction_id, user_id)
            .await
    }

    /// Buyer confirms control; funds release to the seller and the
    /// transaction completes
    pub async fn confirm_access(
        &self,
        transaction_id: Uuid,
        buyer_id: Uuid,
    ) -> EscrowResult<Transaction> {
        let transaction = self.manager.confirm_access(transaction_id, buyer_id).await?;
        self.notify(&transaction).await;
        Ok(transaction)
    }

    // -----------------------------------------------------------------------
    // Disputes
    // -----------------------------------------------------------------------

    /// Open a dispute as a party to the transaction
    pub async fn open_dispute(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        let actor = self.identity.lookup(user_id).await?;
        let transaction = self
            .manager
            .open_dispute(transaction_id, &actor, reason)
            .await?;
        self.notify(&transaction).await;
        Ok(transaction)
    }

    /// Privileged force-release of funds to the seller
    pub async fn force_release(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        let actor = self.identity.lookup(actor_id).await?;
        let transaction = self
            .resolver
            .force_release(transaction_id, &actor, reason)
            .await?;
        self.notify(&transaction).await;
        Ok(transaction)
    }

    /// Privileged force-refund of funds to the buyer
    pub async fn force_refund(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        let actor = self.identity.lookup(actor_id).await?;
        let transaction = self
            .resolver
            .force_refund(transaction_id, &actor, reason)
            .await?;
        self.notify(&transaction).await;
        Ok(transaction)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current transaction snapshot
    pub async fn transaction(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        self.manager.snapshot(transaction_id).await
    }

    /// Step surface for clients
    pub async fn status(&self, transaction_id: Uuid) -> EscrowResult<TransactionStatus> {
        self.manager.status(transaction_id).await
    }

    /// Listing snapshot
    pub async fn listing(&self, listing_id: Uuid) -> EscrowResult<Listing> {
        self.manager.listing(listing_id).await
    }

    /// Audit trail of privileged overrides for a transaction
    pub async fn audit_trail(&self, transaction_id: Uuid) -> Vec<AuditEntry> {
        self.manager.audit_trail(transaction_id).await
    }

    /// Fire-and-forget transition notice; delivery failures are logged and
    /// never block the transition that already committed
    async fn notify(&self, transaction: &Transaction) {
        let notice = TransitionNotice::new(transaction.id, transaction.state);
        if let Err(e) = self.notifier.notify(notice).await {
            warn!(
                transaction_id = %transaction.id,
                state = %transaction.state,
                error = %e,
                "transition notification failed"
            );
        }
    }
}
