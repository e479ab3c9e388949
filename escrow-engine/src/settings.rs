//! Engine settings loaded from the environment
//!
//! Deployment knobs come from `ESCROW_*` environment variables with an
//! optional `escrow.toml` file underneath. Secrets stay in the environment;
//! the vault master secret is handed out wrapped and never logged.

use crate::gateway::HttpPaymentGatewayConfig;
use crate::node::EscrowNodeConfig;
use crate::reveal::RevealSessionConfig;
use crate::transaction_manager::TransactionManagerConfig;
use crate::vault::CredentialVaultConfig;
use anyhow::Context;
use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;

/// Deployment settings for the escrow engine
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Payment gateway API base URL
    pub payment_api_url: String,
    /// Payment gateway secret key (bearer token)
    pub payment_secret_key: String,
    /// ISO currency code for charges and payouts
    pub currency: String,
    /// Master secret for credential-vault key derivation
    pub vault_master_secret: String,
    /// Platform commission percentage
    pub commission_percent: u8,
    /// Reveal self-destruct window in seconds
    pub reveal_ttl_secs: i64,
}

impl Settings {
    /// Load settings from `escrow.toml` (optional) and `ESCROW_*` variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Config::builder()
            .set_default("payment_api_url", "https://api.paystack.co")?
            .set_default("currency", "KES")?
            .set_default("commission_percent", 10_i64)?
            .set_default("reveal_ttl_secs", 600_i64)?
            .add_source(File::with_name("escrow").required(false))
            .add_source(Environment::with_prefix("ESCROW"))
            .build()
            .context("failed to assemble configuration")?;

        config
            .try_deserialize()
            .context("invalid escrow configuration")
    }

    /// Node configuration derived from these settings
    pub fn node_config(&self) -> EscrowNodeConfig {
        EscrowNodeConfig {
            manager: TransactionManagerConfig {
                commission_percent: self.commission_percent,
            },
            vault: CredentialVaultConfig::default(),
            reveal: RevealSessionConfig {
                ttl_secs: self.reveal_ttl_secs,
            },
            dispute: Default::default(),
        }
    }

    /// Gateway client configuration derived from these settings
    pub fn gateway_config(&self) -> HttpPaymentGatewayConfig {
        HttpPaymentGatewayConfig {
            base_url: self.payment_api_url.clone(),
            secret_key: self.payment_secret_key.clone(),
            currency: self.currency.clone(),
        }
    }

    /// The vault master secret, wrapped so it never appears in logs
    pub fn master_secret(&self) -> SecretString {
        SecretString::new(self.vault_master_secret.clone())
    }
}
