//! Escrow engine for a freelance-account marketplace
//!
//! This crate implements the authoritative transaction lifecycle for selling
//! platform accounts through custody:
//! - Buyer funds are held by a payment gateway until control is confirmed
//! - Seller credentials live encrypted in a vault and are revealed exactly
//!   once, inside a bounded self-destruct window
//! - A legally binding transfer contract gates the reveal
//! - Privileged dispute overrides are always audit-logged

pub mod audit;
pub mod contract_signer;
pub mod dispute;
pub mod error;
pub mod gateway;
pub mod models;
pub mod node;
pub mod reveal;
pub mod settings;
pub mod telemetry;
pub mod transaction_manager;
pub mod vault;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
