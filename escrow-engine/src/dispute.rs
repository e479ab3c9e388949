//! Dispute Resolver - privileged overrides outside the normal guard chain
//!
//! Force-release and force-refund bypass the step order to impose a terminal
//! outcome. Both require the elevated override privilege and an audit reason
//! of useful length; the audit entry commits atomically with the transition.

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::{ActingUser, AuditAction, Transaction};
use crate::transaction_manager::TransactionManager;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Configuration for the dispute resolver
#[derive(Debug, Clone)]
pub struct DisputeResolverConfig {
    /// Minimum length of the override reason recorded for audit
    pub min_reason_len: usize,
}

impl Default for DisputeResolverConfig {
    fn default() -> Self {
        Self { min_reason_len: 10 }
    }
}

/// Privileged override path for disputed transactions
pub struct DisputeResolver {
    config: DisputeResolverConfig,
    manager: Arc<TransactionManager>,
}

impl DisputeResolver {
    pub fn new(config: DisputeResolverConfig, manager: Arc<TransactionManager>) -> Self {
        Self { config, manager }
    }

    /// Force funds to the seller and complete the transaction
    pub async fn force_release(
        &self,
        transaction_id: Uuid,
        actor: &ActingUser,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        self.authorize(transaction_id, actor, reason)?;
        self.manager
            .force_resolve(transaction_id, actor.id, AuditAction::ForceRelease, reason)
            .await
    }

    /// Force funds back to the buyer and refund the transaction
    pub async fn force_refund(
        &self,
        transaction_id: Uuid,
        actor: &ActingUser,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        self.authorize(transaction_id, actor, reason)?;
        self.manager
            .force_resolve(transaction_id, actor.id, AuditAction::ForceRefund, reason)
            .await
    }

    /// Privilege before reason: an unprivileged caller is rejected no matter
    /// what they wrote.
    fn authorize(&self, transaction_id: Uuid, actor: &ActingUser, reason: &str) -> EscrowResult<()> {
        if !actor.has_override_privilege() {
            warn!(
                transaction_id = %transaction_id,
                actor_id = %actor.id,
                "override attempted without privilege"
            );
            return Err(EscrowError::PrivilegeDenied);
        }
        if reason.trim().chars().count() < self.config.min_reason_len {
            return Err(EscrowError::ReasonTooShort {
                min: self.config.min_reason_len,
            });
        }
        Ok(())
    }
}
