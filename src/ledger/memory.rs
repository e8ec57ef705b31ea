//! In-memory ledger backend
//!
//! Balances live in a sharded concurrent map; the map's per-entry lock is
//! the per-user critical section, held across check-and-write but never
//! across an await point.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::{BalanceLedger, Direction, LedgerError};
use crate::core_types::UserId;

#[derive(Default)]
pub struct InMemoryLedger {
    balances: DashMap<UserId, Decimal>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account with a starting balance. Accounts are created
    /// out-of-core (seeding, admin tooling), never by the settlement path.
    pub fn open_account(&self, user_id: UserId, initial: Decimal) {
        self.balances.insert(user_id, initial);
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn adjust(
        &self,
        user_id: UserId,
        amount: Decimal,
        direction: Direction,
    ) -> Result<Decimal, LedgerError> {
        // Entry guard is the exclusive per-user lock.
        let mut balance = self
            .balances
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound(user_id))?;

        match direction {
            Direction::Credit => {
                *balance += amount;
            }
            Direction::Debit => {
                if *balance < amount {
                    return Err(LedgerError::InsufficientBalance {
                        available: *balance,
                        required: amount,
                    });
                }
                *balance -= amount;
            }
        }

        Ok(*balance)
    }

    async fn balance_of(&self, user_id: UserId) -> Result<Decimal, LedgerError> {
        self.balances
            .get(&user_id)
            .map(|b| *b)
            .ok_or(LedgerError::UserNotFound(user_id))
    }
}
