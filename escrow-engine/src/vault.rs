//! Credential Vault - custody of seller account secrets
//!
//! Secrets are encrypted with AES-256-GCM under a key derived with Argon2id
//! from a server-held master secret and a per-record salt. Party passwords
//! are authentication factors checked against the identity provider, never
//! key material, and are never persisted or logged.
//!
//! Decryption is offered exactly once per transaction: the engine calls
//! [`CredentialVault::decrypt`] only from inside the reveal transition, and
//! the vault re-checks the custody guards itself so the one-time contract
//! holds even for a misbehaving caller.

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::{Transaction, TransactionState};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-GCM nonce length in bytes (96 bits)
const NONCE_LEN: usize = 12;

/// KDF salt length in bytes
const SALT_LEN: usize = 16;

/// Configuration for the credential vault
#[derive(Debug, Clone)]
pub struct CredentialVaultConfig {
    /// Argon2id memory cost in KiB
    pub memory_kib: u32,
    /// Argon2id time cost (iterations)
    pub iterations: u32,
    /// Argon2id parallelism (lanes)
    pub lanes: u32,
    /// Key identifier stamped on records for rotation tracking
    pub key_id: String,
}

impl Default for CredentialVaultConfig {
    fn default() -> Self {
        Self {
            memory_kib: 65_536, // 64 MiB
            iterations: 3,
            lanes: 4,
            key_id: "v1".to_string(),
        }
    }
}

/// Account secrets as submitted by the seller
///
/// Zeroized on drop; never derive or log these.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SellerSecrets {
    pub username: String,
    pub password: String,
    pub recovery_email: Option<String>,
    pub totp_secret: Option<String>,
}

impl SellerSecrets {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        recovery_email: Option<String>,
        totp_secret: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            recovery_email,
            totp_secret,
        }
    }
}

impl fmt::Debug for SellerSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SellerSecrets").finish_non_exhaustive()
    }
}

/// Decrypted account secrets handed to the buyer exactly once
#[derive(Clone, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct PlaintextSecrets {
    pub username: String,
    pub password: String,
    pub recovery_email: Option<String>,
    pub totp_secret: Option<String>,
}

impl fmt::Debug for PlaintextSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextSecrets").finish_non_exhaustive()
    }
}

/// Non-secret shape metadata for a stored record
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CredentialFieldPresence {
    pub has_recovery_email: bool,
    pub has_totp_secret: bool,
}

/// Immutable ciphertext record owned by a listing until consumed by a reveal
///
/// Each field is stored as base64(nonce || ciphertext || tag) under the
/// record's own KDF salt, so fields never share a nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub listing_id: Uuid,
    /// Key-rotation tag
    pub key_id: String,
    /// Base64 salt for Argon2id key derivation
    pub kdf_salt: String,
    pub username: String,
    pub password: String,
    pub recovery_email: Option<String>,
    pub totp_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Which optional fields exist, without touching any plaintext
    pub fn field_presence(&self) -> CredentialFieldPresence {
        CredentialFieldPresence {
            has_recovery_email: self.recovery_email.is_some(),
            has_totp_secret: self.totp_secret.is_some(),
        }
    }
}

/// Credential vault service
pub struct CredentialVault {
    config: CredentialVaultConfig,
    master_secret: SecretString,
}

impl CredentialVault {
    /// Create a vault over the server-held master secret
    pub fn new(config: CredentialVaultConfig, master_secret: SecretString) -> Self {
        Self {
            config,
            master_secret,
        }
    }

    /// Encrypt seller secrets into an immutable record for `listing_id`
    pub fn encrypt(
        &self,
        listing_id: Uuid,
        secrets: &SellerSecrets,
    ) -> EscrowResult<CredentialRecord> {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let mut key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let record = CredentialRecord {
            id: Uuid::new_v4(),
            listing_id,
            key_id: self.config.key_id.clone(),
            kdf_salt: BASE64.encode(salt),
            username: seal_field(&cipher, &secrets.username)?,
            password: seal_field(&cipher, &secrets.password)?,
            recovery_email: secrets
                .recovery_email
                .as_deref()
                .map(|v| seal_field(&cipher, v))
                .transpose()?,
            totp_secret: secrets
                .totp_secret
                .as_deref()
                .map(|v| seal_field(&cipher, v))
                .transpose()?,
            created_at: Utc::now(),
        };
        drop(cipher);
        key.zeroize();

        info!(
            record_id = %record.id,
            listing_id = %listing_id,
            key_id = %record.key_id,
            "credential record sealed"
        );

        Ok(record)
    }

    /// Decrypt a record for the buyer of `transaction`, exactly once
    ///
    /// Guards: the transaction must be in the `contract_signed` precondition
    /// state (`DecryptionDenied` otherwise) and must carry no prior reveal
    /// (`AlreadyRevealed`). Password verification happens upstream against
    /// the identity provider; the engine makes the reveal-event creation and
    /// the state transition atomic with this call.
    pub fn decrypt(
        &self,
        record: &CredentialRecord,
        transaction: &Transaction,
    ) -> EscrowResult<PlaintextSecrets> {
        if transaction.reveal_event.is_some() {
            return Err(EscrowError::AlreadyRevealed);
        }
        if transaction.state != TransactionState::ContractSigned {
            return Err(EscrowError::decryption_denied(format!(
                "transaction is {}, credentials unlock only after the contract is signed",
                transaction.state
            )));
        }
        if transaction.credential_record_id != record.id {
            return Err(EscrowError::decryption_denied(
                "credential record does not belong to this transaction",
            ));
        }

        let salt = BASE64
            .decode(&record.kdf_salt)
            .map_err(|e| EscrowError::crypto(format!("invalid KDF salt encoding: {e}")))?;

        let mut key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let secrets = PlaintextSecrets {
            username: open_field(&cipher, &record.username)?,
            password: open_field(&cipher, &record.password)?,
            recovery_email: record
                .recovery_email
                .as_deref()
                .map(|v| open_field(&cipher, v))
                .transpose()?,
            totp_secret: record
                .totp_secret
                .as_deref()
                .map(|v| open_field(&cipher, v))
                .transpose()?,
        };
        drop(cipher);
        key.zeroize();

        Ok(secrets)
    }

    /// Derive the 256-bit record key with Argon2id
    fn derive_key(&self, salt: &[u8]) -> EscrowResult<[u8; 32]> {
        let params = Params::new(
            self.config.memory_kib,
            self.config.iterations,
            self.config.lanes,
            Some(32),
        )
        .map_err(|e| EscrowError::crypto(format!("invalid Argon2 parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(
                self.master_secret.expose_secret().as_bytes(),
                salt,
                &mut key,
            )
            .map_err(|e| EscrowError::crypto(format!("key derivation failed: {e}")))?;
        Ok(key)
    }
}

/// Encrypt one field: base64(nonce || ciphertext || tag)
fn seal_field(cipher: &Aes256Gcm, plaintext: &str) -> EscrowResult<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| EscrowError::crypto("field encryption failed"))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt one field sealed by [`seal_field`]
fn open_field(cipher: &Aes256Gcm, blob: &str) -> EscrowResult<String> {
    let data = BASE64
        .decode(blob)
        .map_err(|e| EscrowError::crypto(format!("invalid ciphertext encoding: {e}")))?;
    if data.len() < NONCE_LEN {
        return Err(EscrowError::crypto("ciphertext too short"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EscrowError::crypto("field decryption failed (tampered or wrong key)"))?;

    String::from_utf8(plaintext).map_err(|_| EscrowError::crypto("decrypted field is not UTF-8"))
}
