//! Core types used throughout the system
//!
//! Fundamental aliases shared by all modules. They provide semantic
//! meaning and enable future type evolution.

use uuid::Uuid;

/// User ID - globally unique, immutable after assignment.
///
/// Signed 64-bit to match the `users` primary key in PostgreSQL.
pub type UserId = i64;

/// Transaction ID - UUIDv4 generated at intake, no coordination needed.
pub type TxId = Uuid;
