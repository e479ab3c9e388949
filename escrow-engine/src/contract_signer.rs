//! Contract Signer - legally binding acceptance of the transfer contract
//!
//! The buyer signs by typing their full legal name. The signature is valid
//! only when the typed name matches the registered legal name under a
//! trimmed, case-insensitive comparison, and only while funds are held.

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::{ActingUser, Contract, Transaction, TransactionState};
use tracing::info;

/// Contract signer service
pub struct ContractSigner {
    /// Contract template version stamped on signatures
    version: String,
}

impl ContractSigner {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Record the buyer's acceptance of the transfer contract
    ///
    /// Fails with `AlreadySigned` when a contract exists, with
    /// `InvalidStateTransition` outside `funds_held`, and with
    /// `NameMismatch` unless the typed name normalizes to the registered
    /// legal name.
    pub fn sign(
        &self,
        transaction: &Transaction,
        signed_by_name: &str,
        acting_user: &ActingUser,
    ) -> EscrowResult<Contract> {
        if transaction.contract.is_some() {
            return Err(EscrowError::AlreadySigned);
        }
        if transaction.state != TransactionState::FundsHeld {
            return Err(EscrowError::invalid_transition(
                transaction.state,
                TransactionState::ContractSigned,
                "contract can only be signed while funds are held",
            ));
        }
        if normalize(signed_by_name) != normalize(&acting_user.legal_name) {
            return Err(EscrowError::NameMismatch);
        }

        let contract = Contract::new(transaction.id, signed_by_name.trim(), self.version.clone());
        info!(
            transaction_id = %transaction.id,
            contract_id = %contract.id,
            version = %contract.version,
            "transfer contract signed"
        );
        Ok(contract)
    }
}

impl Default for ContractSigner {
    fn default() -> Self {
        Self::new("1.0")
    }
}

/// Trimmed, case-folded form used for the legal-name comparison
fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
