//! chainwatch-storage — `Store` backends for chainwatch.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - `sqlite` — SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres` — PostgreSQL via `sqlx` (pooled, production deployments)
//!
//! All backends share one relational layout:
//! `block(id, block_num, block_hash, block_time, parent_hash, is_stable)`,
//! `transaction(id, tx_hash, from, to, nonce, data, value, block_id)`,
//! `log(id, index, data, transaction_id)`, cascading from block to log.

pub mod memory;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
