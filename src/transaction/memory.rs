//! In-memory transaction store
//!
//! The map's per-entry lock serves as the row lock: `update_status` and
//! `transition_if` hold the entry guard across the read-check-write, which
//! is exactly the claim discipline the Postgres backend gets from
//! `SELECT ... FOR UPDATE`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tracing::warn;

use super::state::TxStatus;
use super::store::{Page, StoreError, Transaction, TransactionStore, TxFilter};
use crate::core_types::TxId;

#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: DashMap<TxId, Transaction>,
    // Global uniqueness of bank references
    bank_references: DashSet<String>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(tx: &Transaction, filter: &TxFilter) -> bool {
        filter.user_id.is_none_or(|u| tx.user_id == u)
            && filter.kind.is_none_or(|k| tx.kind == k)
            && filter.status.is_none_or(|s| tx.status == s)
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<Transaction, StoreError> {
        self.rows.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn get(&self, id: TxId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.rows.get(&id).map(|r| r.clone()))
    }

    async fn list(
        &self,
        filter: TxFilter,
        page: Page,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let mut matched: Vec<Transaction> = self
            .rows
            .iter()
            .filter(|r| Self::matches(r.value(), &filter))
            .map(|r| r.clone())
            .collect();

        // Most-recent-first; id as tiebreak keeps the ordering stable
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matched.len() as u64;
        let rows = matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();

        Ok((rows, total))
    }

    async fn update_status(
        &self,
        id: TxId,
        status: TxStatus,
        bank_reference: Option<String>,
        error_message: Option<String>,
    ) -> Result<Transaction, StoreError> {
        // Bank reference uniqueness is checked before taking the row lock;
        // the set insert is what actually reserves it.
        if let Some(ref bank_ref) = bank_reference
            && !self.bank_references.insert(bank_ref.clone())
        {
            return Err(StoreError::DuplicateBankReference(bank_ref.clone()));
        }

        let result = {
            let mut row = match self.rows.get_mut(&id) {
                Some(row) => row,
                None => {
                    return Err(StoreError::NotFound(id));
                }
            };

            if row.status.is_terminal() {
                Err(StoreError::TerminalState {
                    id,
                    current: row.status,
                    requested: status,
                })
            } else if !row.status.can_transition_to(status) {
                Err(StoreError::IllegalTransition {
                    id,
                    current: row.status,
                    requested: status,
                })
            } else {
                row.status = status;
                if let Some(bank_ref) = bank_reference.clone() {
                    row.bank_reference = Some(bank_ref);
                }
                if let Some(msg) = error_message {
                    row.error_message = Some(msg);
                }
                row.updated_at = Utc::now();
                Ok(row.clone())
            }
        };

        // Release the reservation if the transition was refused
        if result.is_err()
            && let Some(ref bank_ref) = bank_reference
        {
            self.bank_references.remove(bank_ref);
        }

        result
    }

    async fn transition_if(
        &self,
        id: TxId,
        expected: TxStatus,
        new: TxStatus,
    ) -> Result<bool, StoreError> {
        let mut row = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if row.status != expected {
            return Ok(false);
        }
        if !expected.can_transition_to(new) {
            warn!(tx_id = %id, from = %expected, to = %new, "CAS requested an illegal transition");
            return Ok(false);
        }

        row.status = new;
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn remove(&self, id: TxId) -> Result<(), StoreError> {
        self.rows.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::store::TxKind;
    use rust_decimal_macros::dec;

    fn deposit(user_id: i64, amount: rust_decimal::Decimal) -> Transaction {
        Transaction::new(user_id, TxKind::Deposit, amount, None)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryTransactionStore::new();
        let tx = store.insert(deposit(1, dec!(10.00))).await.unwrap();

        let fetched = store.get(tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TxStatus::Pending);
        assert_eq!(fetched.amount, dec!(10.00));
    }

    #[tokio::test]
    async fn test_terminal_state_refuses_transition() {
        let store = InMemoryTransactionStore::new();
        let tx = store.insert(deposit(1, dec!(10.00))).await.unwrap();

        store
            .update_status(tx.id, TxStatus::Success, Some("DEP-AAA".into()), None)
            .await
            .unwrap();

        let err = store
            .update_status(tx.id, TxStatus::Failed, None, Some("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalState { .. }));

        // Nothing overwritten
        let fetched = store.get(tx.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TxStatus::Success);
        assert_eq!(fetched.bank_reference.as_deref(), Some("DEP-AAA"));
    }

    #[tokio::test]
    async fn test_bank_reference_unique() {
        let store = InMemoryTransactionStore::new();
        let a = store.insert(deposit(1, dec!(10.00))).await.unwrap();
        let b = store.insert(deposit(2, dec!(10.00))).await.unwrap();

        store
            .update_status(a.id, TxStatus::Success, Some("DEP-AAA".into()), None)
            .await
            .unwrap();

        let err = store
            .update_status(b.id, TxStatus::Success, Some("DEP-AAA".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateBankReference(_)));
    }

    #[tokio::test]
    async fn test_cas_claim_single_owner() {
        let store = InMemoryTransactionStore::new();
        let tx = store.insert(deposit(1, dec!(10.00))).await.unwrap();

        assert!(store
            .transition_if(tx.id, TxStatus::Pending, TxStatus::Processing)
            .await
            .unwrap());
        // Second claim loses
        assert!(!store
            .transition_if(tx.id, TxStatus::Pending, TxStatus::Processing)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_ordering_and_pagination() {
        let store = InMemoryTransactionStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut tx = deposit(1, dec!(1.00));
            // Force distinct, increasing timestamps
            tx.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            ids.push(store.insert(tx).await.unwrap().id);
        }

        let (rows, total) = store
            .list(TxFilter::default(), Page::new(2, 0))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
        // Most recent first
        assert_eq!(rows[0].id, ids[4]);
        assert_eq!(rows[1].id, ids[3]);

        let (rows, _) = store
            .list(TxFilter::default(), Page::new(2, 4))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = InMemoryTransactionStore::new();
        store.insert(deposit(1, dec!(1.00))).await.unwrap();
        store
            .insert(Transaction::new(2, TxKind::Withdrawal, dec!(2.00), None))
            .await
            .unwrap();

        let (rows, total) = store
            .list(
                TxFilter {
                    user_id: Some(2),
                    kind: Some(TxKind::Withdrawal),
                    status: None,
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].user_id, 2);
    }

    #[tokio::test]
    async fn test_page_limit_clamped() {
        let page = Page::new(0, 0);
        assert_eq!(page.limit, 1);
        let page = Page::new(1000, 0);
        assert_eq!(page.limit, Page::MAX_LIMIT);
    }
}
