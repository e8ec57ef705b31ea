//! Transaction Store & state machine
//!
//! Owns transaction records and every status transition. The settlement
//! worker and the intake path are the only writers of `status` and
//! `bank_reference`.

mod memory;
mod state;
mod store;

pub use memory::InMemoryTransactionStore;
pub use state::TxStatus;
pub use store::{Page, StoreError, Transaction, TransactionStore, TxFilter, TxKind};
