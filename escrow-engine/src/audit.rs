//! Audit Log - append-only record of privileged overrides
//!
//! Every force-release and force-refund writes an entry here before the
//! transition commits. Entries are never mutated or deleted.

use crate::EscrowResult;
use crate::models::AuditEntry;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Append-only audit log
pub struct AuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append an entry, returning the stored copy
    ///
    /// Callers treat a failure here as aborting the transition the entry
    /// documents.
    pub async fn append(&self, entry: AuditEntry) -> EscrowResult<AuditEntry> {
        info!(
            transaction_id = %entry.transaction_id,
            actor_id = %entry.actor_id,
            action = %entry.action,
            "audit entry recorded"
        );
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    /// All entries for a transaction, in insertion order
    pub async fn entries_for(&self, transaction_id: Uuid) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    /// Total number of recorded entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;

    #[tokio::test]
    async fn entries_append_and_filter_by_transaction() {
        let log = AuditLog::new();
        let txn_a = Uuid::new_v4();
        let txn_b = Uuid::new_v4();
        let actor = Uuid::new_v4();

        log.append(AuditEntry::new(
            txn_a,
            actor,
            AuditAction::ForceRelease,
            "seller proved delivery",
        ))
        .await
        .unwrap();
        log.append(AuditEntry::new(
            txn_b,
            actor,
            AuditAction::ForceRefund,
            "credentials were invalid",
        ))
        .await
        .unwrap();

        assert_eq!(log.len().await, 2);

        let for_a = log.entries_for(txn_a).await;
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].action, AuditAction::ForceRelease);
        assert_eq!(for_a[0].reason, "seller proved delivery");
    }
}
