//! Bank API simulator
//!
//! Stands in for real bank connectivity. The simulator introduces a
//! randomized processing delay and a configurable success probability,
//! returning a fresh prefixed bank reference on success or one of four
//! typed error kinds. Workers branch on [`BankError::is_retryable`].

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::BankConfig;
use crate::core_types::UserId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BankError {
    #[error("Bank API request timed out")]
    Timeout,

    #[error("Bank system is temporarily unavailable")]
    SystemUnavailable,

    /// Bank-side account check, distinct from our ledger balance
    #[error("Insufficient funds in bank account")]
    InsufficientFunds,

    #[error("Invalid request parameters")]
    InvalidRequest,
}

impl BankError {
    /// Transient errors are retried with backoff; the rest fail immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BankError::Timeout | BankError::SystemUnavailable)
    }
}

/// Settlement backend contract. The simulator implements it for every
/// environment; tests substitute scripted mocks.
#[async_trait]
pub trait BankApi: Send + Sync {
    /// Returns a `DEP-` prefixed bank reference on success.
    async fn process_deposit(&self, amount: Decimal, user_id: UserId)
    -> Result<String, BankError>;

    /// Returns a `WTH-` prefixed bank reference on success.
    async fn process_withdrawal(
        &self,
        amount: Decimal,
        user_id: UserId,
    ) -> Result<String, BankError>;
}

pub struct BankSimulator {
    min_delay: Duration,
    max_delay: Duration,
    success_rate: f64,
}

impl BankSimulator {
    pub fn new(config: &BankConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            success_rate: config.success_rate,
        }
    }

    /// Instant, always-successful simulator for tests and demos.
    pub fn instant() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            success_rate: 1.0,
        }
    }

    fn reference(prefix: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..12].to_uppercase();
        format!("{}-{}", prefix, suffix)
    }

    /// Draw the delay and failure outcome up front so no RNG handle is
    /// held across the await.
    fn draw(&self, withdrawal: bool) -> (Duration, Option<BankError>) {
        let mut rng = rand::thread_rng();

        let delay = if self.max_delay > self.min_delay {
            rng.gen_range(self.min_delay..=self.max_delay)
        } else {
            self.min_delay
        };

        if rng.r#gen::<f64>() > self.success_rate {
            let error = if withdrawal {
                match rng.gen_range(0..4) {
                    0 => BankError::Timeout,
                    1 => BankError::SystemUnavailable,
                    2 => BankError::InsufficientFunds,
                    _ => BankError::InvalidRequest,
                }
            } else {
                match rng.gen_range(0..3) {
                    0 => BankError::Timeout,
                    1 => BankError::SystemUnavailable,
                    _ => BankError::InvalidRequest,
                }
            };
            (delay, Some(error))
        } else {
            (delay, None)
        }
    }
}

#[async_trait]
impl BankApi for BankSimulator {
    async fn process_deposit(
        &self,
        _amount: Decimal,
        _user_id: UserId,
    ) -> Result<String, BankError> {
        let (delay, outcome) = self.draw(false);
        tokio::time::sleep(delay).await;

        match outcome {
            Some(error) => Err(error),
            None => Ok(Self::reference("DEP")),
        }
    }

    async fn process_withdrawal(
        &self,
        _amount: Decimal,
        _user_id: UserId,
    ) -> Result<String, BankError> {
        let (delay, outcome) = self.draw(true);
        tokio::time::sleep(delay).await;

        match outcome {
            Some(error) => Err(error),
            None => Ok(Self::reference("WTH")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryable_classification() {
        assert!(BankError::Timeout.is_retryable());
        assert!(BankError::SystemUnavailable.is_retryable());
        assert!(!BankError::InsufficientFunds.is_retryable());
        assert!(!BankError::InvalidRequest.is_retryable());
    }

    #[tokio::test]
    async fn test_instant_simulator_succeeds_with_prefixes() {
        let bank = BankSimulator::instant();

        let dep = bank.process_deposit(dec!(10.00), 1).await.unwrap();
        assert!(dep.starts_with("DEP-"));

        let wth = bank.process_withdrawal(dec!(10.00), 1).await.unwrap();
        assert!(wth.starts_with("WTH-"));

        assert_ne!(dep, wth);
    }

    #[tokio::test]
    async fn test_zero_success_rate_always_fails() {
        let bank = BankSimulator {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            success_rate: 0.0,
        };

        for _ in 0..20 {
            assert!(bank.process_deposit(dec!(1.00), 1).await.is_err());
        }
    }

    #[test]
    fn test_reference_format() {
        let r = BankSimulator::reference("DEP");
        assert_eq!(r.len(), "DEP-".len() + 12);
        assert!(r[4..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
