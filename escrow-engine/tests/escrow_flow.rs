//! End-to-end tests for the escrow purchase lifecycle
//!
//! Drives the full flow through the node API with in-memory collaborators:
//! 1. Seller lists an account and submits encrypted credentials
//! 2. Buyer initiates purchase, pays, signs, reveals once, confirms access
//! 3. Alternate paths: double reveal, double sell, disputes and overrides

use escrow_engine::error::EscrowError;
use escrow_engine::gateway::{
    InMemoryIdentityProvider, InMemoryLegalAcknowledgments, InMemoryPaymentGateway,
    RecordingNotifier,
};
use escrow_engine::models::{ActingUser, Listing, ListingState, Role, TransactionState};
use escrow_engine::node::{EscrowNode, EscrowNodeConfig};
use escrow_engine::vault::{CredentialVaultConfig, SellerSecrets};
use secrecy::SecretString;
use std::sync::Arc;
use uuid::Uuid;

struct Marketplace {
    node: EscrowNode,
    payment: Arc<InMemoryPaymentGateway>,
    identity: Arc<InMemoryIdentityProvider>,
    legal: Arc<InMemoryLegalAcknowledgments>,
    buyer: ActingUser,
    seller: ActingUser,
    super_admin: ActingUser,
    listing: Listing,
}

/// Marketplace with one credentialed listing priced at 5000 minor units
async fn marketplace() -> Marketplace {
    let payment = Arc::new(InMemoryPaymentGateway::new());
    let identity = Arc::new(InMemoryIdentityProvider::new());
    let legal = Arc::new(InMemoryLegalAcknowledgments::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let config = EscrowNodeConfig {
        vault: CredentialVaultConfig {
            memory_kib: 8 * 1024,
            iterations: 1,
            lanes: 1,
            key_id: "e2e".to_string(),
        },
        ..EscrowNodeConfig::default()
    };
    let node = EscrowNode::new(
        config,
        SecretString::new("e2e-master-secret".into()),
        payment.clone(),
        identity.clone(),
        notifier,
        legal.clone(),
    );

    let buyer = ActingUser::new("jane@example.com", "Jane Doe", Role::Buyer);
    let seller = ActingUser::new("sam@example.com", "Sam Seller", Role::Seller);
    let super_admin = ActingUser::new("root@example.com", "Root Admin", Role::SuperAdmin);
    identity.register(buyer.clone(), "buyer-pass").await;
    identity.register(seller.clone(), "seller-pass").await;
    identity.register(super_admin.clone(), "admin-pass").await;
    legal.accept(buyer.id).await;

    let listing = node
        .register_listing(Listing::new(seller.id, 5_000))
        .await
        .unwrap();
    node.submit_credentials(
        listing.id,
        seller.id,
        SellerSecrets::new(
            "upwork_pro",
            "hunter2!",
            Some("recovery@example.com".to_string()),
            Some("JBSWY3DPEHPK3PXP".to_string()),
        ),
        "seller-pass",
    )
    .await
    .unwrap();

    Marketplace {
        node,
        payment,
        identity,
        legal,
        buyer,
        seller,
        super_admin,
        listing,
    }
}

/// Drive a transaction to `credentials_released`, returning its id
async fn revealed_purchase(m: &Marketplace) -> Uuid {
    let initiation = m
        .node
        .initiate_purchase(m.listing.id, m.buyer.id)
        .await
        .unwrap();
    let txn = initiation.transaction;

    m.node
        .confirm_payment(txn.id, &txn.payment_reference)
        .await
        .unwrap();
    m.node
        .sign_contract(txn.id, m.buyer.id, "Jane Doe")
        .await
        .unwrap();
    m.node
        .reveal_credentials(txn.id, m.buyer.id, "buyer-pass")
        .await
        .unwrap();
    txn.id
}

#[tokio::test]
async fn purchase_lifecycle_completes_and_releases_funds() {
    let m = marketplace().await;

    // Initiate: transaction pending, listing reserved, checkout URL minted
    let initiation = m
        .node
        .initiate_purchase(m.listing.id, m.buyer.id)
        .await
        .unwrap();
    let txn = initiation.transaction;
    assert_eq!(txn.state, TransactionState::Pending);
    assert_eq!(txn.amount_minor, 5_000);
    assert!(initiation.authorization_url.is_some());
    assert_eq!(
        m.node.listing(m.listing.id).await.unwrap().state,
        ListingState::Reserved
    );

    // Payment confirmed against the minted reference
    let paid = m
        .node
        .confirm_payment(txn.id, &txn.payment_reference)
        .await
        .unwrap();
    assert_eq!(paid.state, TransactionState::FundsHeld);

    // Contract signed with the registered legal name (case-insensitive)
    let contract = m
        .node
        .sign_contract(txn.id, m.buyer.id, "  JANE doe ")
        .await
        .unwrap();
    assert_eq!(contract.signed_by_name, "JANE doe");
    assert_eq!(
        m.node.transaction(txn.id).await.unwrap().state,
        TransactionState::ContractSigned
    );

    // One-time reveal with the buyer's account password
    let revealed = m
        .node
        .reveal_credentials(txn.id, m.buyer.id, "buyer-pass")
        .await
        .unwrap();
    assert_eq!(revealed.secrets.username, "upwork_pro");
    assert_eq!(revealed.secrets.password, "hunter2!");
    assert_eq!(
        revealed.secrets.recovery_email.as_deref(),
        Some("recovery@example.com")
    );
    assert!((revealed.expires_at - revealed.revealed_at).num_seconds() == 600);

    let snapshot = m.node.transaction(txn.id).await.unwrap();
    assert_eq!(snapshot.state, TransactionState::CredentialsReleased);
    assert!(snapshot.reveal_event.is_some());

    // Status surface exposes the countdown deadline
    let status = m.node.status(txn.id).await.unwrap();
    assert!(status.can_proceed);
    assert_eq!(status.verification_deadline, Some(snapshot.reveal_event.unwrap().expires_at));

    // Confirm access: transaction completes, listing sold, seller paid out
    let done = m.node.confirm_access(txn.id, m.buyer.id).await.unwrap();
    assert_eq!(done.state, TransactionState::Completed);
    assert!(done.buyer_confirmed_access);
    assert!(done.completed_at.is_some());
    assert_eq!(done.commission_minor, Some(500));
    assert_eq!(done.payout_amount_minor, Some(4_500));
    assert_eq!(
        m.node.listing(m.listing.id).await.unwrap().state,
        ListingState::Sold
    );
    assert_eq!(m.payment.released().await, vec![(m.seller.id, 4_500)]);
}

#[tokio::test]
async fn second_reveal_fails_and_state_is_unchanged() {
    let m = marketplace().await;
    let txn_id = revealed_purchase(&m).await;

    let err = m
        .node
        .reveal_credentials(txn_id, m.buyer.id, "buyer-pass")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::AlreadyRevealed));
    assert!(err.is_permanent());

    let snapshot = m.node.transaction(txn_id).await.unwrap();
    assert_eq!(snapshot.state, TransactionState::CredentialsReleased);
}

#[tokio::test]
async fn early_destroy_never_reopens_the_reveal() {
    let m = marketplace().await;
    let txn_id = revealed_purchase(&m).await;

    m.node
        .destroy_reveal_session(txn_id, m.buyer.id)
        .await
        .unwrap();
    let snapshot = m.node.transaction(txn_id).await.unwrap();
    assert!(snapshot.reveal_event.unwrap().consumed);

    // Destroyed or not, there is no second serving
    let err = m
        .node
        .reveal_credentials(txn_id, m.buyer.id, "buyer-pass")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::AlreadyRevealed));
}

#[tokio::test]
async fn double_sell_race_reserves_exactly_once() {
    let m = marketplace().await;
    let rival = ActingUser::new("bob@example.com", "Bob Buyer", Role::Buyer);
    m.identity.register(rival.clone(), "pw").await;
    m.legal.accept(rival.id).await;

    let (a, b) = tokio::join!(
        m.node.initiate_purchase(m.listing.id, m.buyer.id),
        m.node.initiate_purchase(m.listing.id, rival.id),
    );

    assert_eq!(a.is_ok() as usize + b.is_ok() as usize, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser.unwrap_err(),
        EscrowError::ListingUnavailable(_)
    ));
}

#[tokio::test]
async fn replayed_payment_callback_is_a_no_op() {
    let m = marketplace().await;
    let initiation = m
        .node
        .initiate_purchase(m.listing.id, m.buyer.id)
        .await
        .unwrap();
    let txn = initiation.transaction;

    let first = m
        .node
        .confirm_payment(txn.id, &txn.payment_reference)
        .await
        .unwrap();
    // Network retries replay the same callback
    let replayed = m
        .node
        .confirm_payment(txn.id, &txn.payment_reference)
        .await
        .unwrap();

    assert_eq!(first.state, TransactionState::FundsHeld);
    assert_eq!(replayed.state, TransactionState::FundsHeld);
    assert_eq!(first.funds_held_at, replayed.funds_held_at);
}

#[tokio::test]
async fn misnamed_signature_is_rejected_but_retriable() {
    let m = marketplace().await;
    let initiation = m
        .node
        .initiate_purchase(m.listing.id, m.buyer.id)
        .await
        .unwrap();
    let txn = initiation.transaction;
    m.node
        .confirm_payment(txn.id, &txn.payment_reference)
        .await
        .unwrap();

    let err = m
        .node
        .sign_contract(txn.id, m.buyer.id, "Janet Doe")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::NameMismatch));
    assert!(!err.is_permanent());

    // Correct name still goes through
    m.node
        .sign_contract(txn.id, m.buyer.id, "jane doe")
        .await
        .unwrap();
    assert_eq!(
        m.node.transaction(txn.id).await.unwrap().state,
        TransactionState::ContractSigned
    );
}

#[tokio::test]
async fn dispute_then_refund_reopens_the_listing() {
    let m = marketplace().await;
    let initiation = m
        .node
        .initiate_purchase(m.listing.id, m.buyer.id)
        .await
        .unwrap();
    let txn = initiation.transaction;
    m.node
        .confirm_payment(txn.id, &txn.payment_reference)
        .await
        .unwrap();

    let disputed = m
        .node
        .open_dispute(txn.id, m.buyer.id, "seller went silent after payment")
        .await
        .unwrap();
    assert_eq!(disputed.state, TransactionState::Disputed);

    let refunded = m
        .node
        .force_refund(txn.id, m.super_admin.id, "seller failed to deliver credentials")
        .await
        .unwrap();
    assert_eq!(refunded.state, TransactionState::Refunded);

    // Listing back on the market, refund issued, override audited
    assert_eq!(
        m.node.listing(m.listing.id).await.unwrap().state,
        ListingState::Approved
    );
    assert_eq!(m.payment.refunded().await, vec![txn.payment_reference]);

    let trail = m.node.audit_trail(txn.id).await;
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].actor_id, m.super_admin.id);
    assert_eq!(trail[0].reason, "seller failed to deliver credentials");
}

#[tokio::test]
async fn overrides_on_finalized_transactions_always_fail() {
    let m = marketplace().await;
    let txn_id = revealed_purchase(&m).await;
    m.node.confirm_access(txn_id, m.buyer.id).await.unwrap();

    for reason in ["post-completion release request", "post-completion refund"] {
        let release = m.node.force_release(txn_id, m.super_admin.id, reason).await;
        let refund = m.node.force_refund(txn_id, m.super_admin.id, reason).await;
        assert!(matches!(
            release.unwrap_err(),
            EscrowError::TransactionFinalized(_)
        ));
        assert!(matches!(
            refund.unwrap_err(),
            EscrowError::TransactionFinalized(_)
        ));
    }
}
