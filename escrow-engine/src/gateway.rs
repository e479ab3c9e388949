//! External collaborators consumed by the engine
//!
//! The engine talks to the outside world through these trait seams: the
//! payment gateway, the identity/auth provider, the notification service and
//! the legal-acknowledgment service. An HTTP gateway client is provided for
//! Paystack-style payment APIs, and in-memory implementations back tests and
//! embedded use.

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::{ActingUser, TransactionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Payment intent minted when a purchase is initiated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Opaque gateway reference, stored on the transaction
    pub reference: String,
    /// Checkout URL for the buyer to complete payment
    pub authorization_url: Option<String>,
}

/// Result of verifying a payment against the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub reference: String,
    pub success: bool,
    pub amount_minor: i64,
}

/// State-transition notice delivered to the notification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionNotice {
    pub transaction_id: Uuid,
    pub state: TransactionState,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionNotice {
    pub fn new(transaction_id: Uuid, state: TransactionState) -> Self {
        Self {
            transaction_id,
            state,
            occurred_at: Utc::now(),
        }
    }
}

/// Payment gateway holding buyer funds in custody
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Mint a payment reference and checkout URL for a purchase
    async fn initialize(&self, buyer: &ActingUser, amount_minor: i64)
    -> EscrowResult<PaymentIntent>;

    /// Verify a payment callback against the gateway
    async fn verify(&self, reference: &str) -> EscrowResult<PaymentVerification>;

    /// Release held funds to the seller, returning the transfer reference
    async fn release(&self, seller_id: Uuid, amount_minor: i64) -> EscrowResult<String>;

    /// Refund the held payment to the buyer
    async fn refund(&self, reference: &str) -> EscrowResult<()>;
}

/// Identity/auth provider supplying legal names, roles and password checks
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn lookup(&self, user_id: Uuid) -> EscrowResult<ActingUser>;

    /// Verify an account password; used as an authentication gate, never as
    /// key material
    async fn verify_password(&self, user_id: Uuid, password: &str) -> EscrowResult<bool>;
}

/// Fire-and-forget notification sink; failures never block a transition
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, notice: TransitionNotice) -> EscrowResult<()>;
}

/// Gate on prior acceptance of the platform's buyer/seller agreements
#[async_trait]
pub trait LegalAcknowledgmentService: Send + Sync {
    async fn has_accepted(&self, user_id: Uuid) -> EscrowResult<bool>;
}

// ---------------------------------------------------------------------------
// HTTP payment gateway (Paystack-style REST API)
// ---------------------------------------------------------------------------

/// Configuration for the HTTP payment gateway
#[derive(Debug, Clone)]
pub struct HttpPaymentGatewayConfig {
    /// Gateway API base URL
    pub base_url: String,
    /// Secret key sent as a bearer token
    pub secret_key: String,
    /// ISO currency code for charges
    pub currency: String,
}

impl Default for HttpPaymentGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            currency: "KES".to_string(),
        }
    }
}

/// Payment gateway backed by a Paystack-style REST API
pub struct HttpPaymentGateway {
    config: HttpPaymentGatewayConfig,
    client: reqwest::Client,
}

/// Gateway response envelope
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    reference: String,
    authorization_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    reference: String,
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    amount: i64,
    currency: &'a str,
    recipient: String,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    transaction: &'a str,
}

impl HttpPaymentGateway {
    pub fn new(config: HttpPaymentGatewayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Unwrap the gateway envelope, mapping declared failures to `Payment`
    fn unwrap_envelope<T>(envelope: ApiEnvelope<T>) -> EscrowResult<T> {
        if !envelope.status {
            return Err(EscrowError::payment(
                envelope
                    .message
                    .unwrap_or_else(|| "gateway reported failure".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| EscrowError::payment("gateway response missing data"))
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> EscrowResult<T> {
        let url = format!("{}{}", self.config.base_url, path);
        let envelope = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .json(body)
            .send()
            .await
            .map_err(|e| EscrowError::integration(format!("gateway request failed: {e}")))?
            .json::<ApiEnvelope<T>>()
            .await
            .map_err(|e| EscrowError::integration(format!("gateway response malformed: {e}")))?;
        Self::unwrap_envelope(envelope)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initialize(
        &self,
        buyer: &ActingUser,
        amount_minor: i64,
    ) -> EscrowResult<PaymentIntent> {
        let data: InitializeData = self
            .post_json(
                "/transaction/initialize",
                &InitializeRequest {
                    email: &buyer.email,
                    amount: amount_minor,
                    currency: &self.config.currency,
                },
            )
            .await?;

        debug!(reference = %data.reference, "payment initialized");
        Ok(PaymentIntent {
            reference: data.reference,
            authorization_url: data.authorization_url,
        })
    }

    async fn verify(&self, reference: &str) -> EscrowResult<PaymentVerification> {
        let url = format!("{}/transaction/verify/{reference}", self.config.base_url);
        let envelope = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| EscrowError::integration(format!("gateway request failed: {e}")))?
            .json::<ApiEnvelope<VerifyData>>()
            .await
            .map_err(|e| EscrowError::integration(format!("gateway response malformed: {e}")))?;
        let data = Self::unwrap_envelope(envelope)?;

        Ok(PaymentVerification {
            reference: reference.to_string(),
            success: data.status == "success",
            amount_minor: data.amount,
        })
    }

    async fn release(&self, seller_id: Uuid, amount_minor: i64) -> EscrowResult<String> {
        let data: TransferData = self
            .post_json(
                "/transfer",
                &TransferRequest {
                    amount: amount_minor,
                    currency: &self.config.currency,
                    recipient: seller_id.to_string(),
                    reason: "escrow payout",
                },
            )
            .await?;

        info!(seller_id = %seller_id, reference = %data.reference, "payout transfer created");
        Ok(data.reference)
    }

    async fn refund(&self, reference: &str) -> EscrowResult<()> {
        let _: serde_json::Value = self
            .post_json("/refund", &RefundRequest {
                transaction: reference,
            })
            .await?;

        info!(reference = %reference, "refund created");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations for tests and embedding
// ---------------------------------------------------------------------------

/// In-memory payment gateway tracking intents, payouts and refunds
pub struct InMemoryPaymentGateway {
    intents: RwLock<HashMap<String, i64>>,
    released: RwLock<Vec<(Uuid, i64)>>,
    refunded: RwLock<Vec<String>>,
    fail_release: AtomicBool,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self {
            intents: RwLock::new(HashMap::new()),
            released: RwLock::new(Vec::new()),
            refunded: RwLock::new(Vec::new()),
            fail_release: AtomicBool::new(false),
        }
    }

    /// Make the next release call fail, for atomicity tests
    pub fn fail_next_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    pub async fn released(&self) -> Vec<(Uuid, i64)> {
        self.released.read().await.clone()
    }

    pub async fn refunded(&self) -> Vec<String> {
        self.refunded.read().await.clone()
    }
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initialize(
        &self,
        _buyer: &ActingUser,
        amount_minor: i64,
    ) -> EscrowResult<PaymentIntent> {
        let reference = format!("PAY-{}", Uuid::new_v4());
        self.intents
            .write()
            .await
            .insert(reference.clone(), amount_minor);
        Ok(PaymentIntent {
            authorization_url: Some(format!("https://checkout.example/{reference}")),
            reference,
        })
    }

    async fn verify(&self, reference: &str) -> EscrowResult<PaymentVerification> {
        let amount = self.intents.read().await.get(reference).copied();
        Ok(PaymentVerification {
            reference: reference.to_string(),
            success: amount.is_some(),
            amount_minor: amount.unwrap_or(0),
        })
    }

    async fn release(&self, seller_id: Uuid, amount_minor: i64) -> EscrowResult<String> {
        if self.fail_release.swap(false, Ordering::SeqCst) {
            return Err(EscrowError::payment("transfer rejected by gateway"));
        }
        self.released.write().await.push((seller_id, amount_minor));
        Ok(format!("TRF-{}", Uuid::new_v4()))
    }

    async fn refund(&self, reference: &str) -> EscrowResult<()> {
        self.refunded.write().await.push(reference.to_string());
        Ok(())
    }
}

/// In-memory identity provider with registered users and passwords
pub struct InMemoryIdentityProvider {
    users: RwLock<HashMap<Uuid, (ActingUser, String)>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Register a user with an account password, returning their id
    pub async fn register(&self, user: ActingUser, password: impl Into<String>) -> Uuid {
        let id = user.id;
        self.users.write().await.insert(id, (user, password.into()));
        id
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn lookup(&self, user_id: Uuid) -> EscrowResult<ActingUser> {
        self.users
            .read()
            .await
            .get(&user_id)
            .map(|(user, _)| user.clone())
            .ok_or_else(|| EscrowError::not_found("user", user_id))
    }

    async fn verify_password(&self, user_id: Uuid, password: &str) -> EscrowResult<bool> {
        Ok(self
            .users
            .read()
            .await
            .get(&user_id)
            .is_some_and(|(_, stored)| stored == password))
    }
}

/// In-memory legal-acknowledgment registry
pub struct InMemoryLegalAcknowledgments {
    accepted: RwLock<HashSet<Uuid>>,
}

impl InMemoryLegalAcknowledgments {
    pub fn new() -> Self {
        Self {
            accepted: RwLock::new(HashSet::new()),
        }
    }

    pub async fn accept(&self, user_id: Uuid) {
        self.accepted.write().await.insert(user_id);
    }
}

impl Default for InMemoryLegalAcknowledgments {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LegalAcknowledgmentService for InMemoryLegalAcknowledgments {
    async fn has_accepted(&self, user_id: Uuid) -> EscrowResult<bool> {
        Ok(self.accepted.read().await.contains(&user_id))
    }
}

/// Notifier that records every notice, for assertions in tests
pub struct RecordingNotifier {
    notices: Arc<RwLock<Vec<TransitionNotice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            notices: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn notices(&self) -> Vec<TransitionNotice> {
        self.notices.read().await.clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn notify(&self, notice: TransitionNotice) -> EscrowResult<()> {
        self.notices.write().await.push(notice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn in_memory_gateway_verifies_only_minted_references() {
        let gateway = InMemoryPaymentGateway::new();
        let buyer = ActingUser::new("buyer@example.com", "Jane Doe", Role::Buyer);

        let intent = gateway.initialize(&buyer, 5_000).await.unwrap();
        let verified = gateway.verify(&intent.reference).await.unwrap();
        assert!(verified.success);
        assert_eq!(verified.amount_minor, 5_000);

        let unknown = gateway.verify("PAY-unknown").await.unwrap();
        assert!(!unknown.success);
    }

    #[tokio::test]
    async fn identity_provider_gates_on_password() {
        let identity = InMemoryIdentityProvider::new();
        let user = ActingUser::new("jane@example.com", "Jane Doe", Role::Buyer);
        let id = identity.register(user, "s3cret").await;

        assert!(identity.verify_password(id, "s3cret").await.unwrap());
        assert!(!identity.verify_password(id, "guess").await.unwrap());

        let looked_up = identity.lookup(id).await.unwrap();
        assert_eq!(looked_up.legal_name, "Jane Doe");
    }

    #[test]
    fn gateway_envelope_failures_surface_as_payment_errors() {
        let envelope: ApiEnvelope<InitializeData> = serde_json::from_str(
            r#"{"status": false, "message": "Invalid email address"}"#,
        )
        .unwrap();

        let err = HttpPaymentGateway::unwrap_envelope(envelope).unwrap_err();
        assert!(matches!(err, EscrowError::Payment(msg) if msg.contains("Invalid email")));
    }

    #[test]
    fn gateway_initialize_payload_parses() {
        let envelope: ApiEnvelope<InitializeData> = serde_json::from_str(
            r#"{
                "status": true,
                "message": "Authorization URL created",
                "data": {
                    "reference": "7PVGX8MEk85tgeEpVDtD",
                    "authorization_url": "https://checkout.paystack.com/0peioxfhpn"
                }
            }"#,
        )
        .unwrap();

        let data = HttpPaymentGateway::unwrap_envelope(envelope).unwrap();
        assert_eq!(data.reference, "7PVGX8MEk85tgeEpVDtD");
        assert!(data.authorization_url.is_some());
    }
}
