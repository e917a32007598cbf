//! Storage collaborator for the stock coordination system.
//!
//! The services never talk to a database directly; they read rows, mutate
//! them in memory through the domain types, and hand the store a
//! transaction describing every row the operation touches. The store
//! applies the transaction atomically, enforcing per-row optimistic
//! version checks, so concurrent writers are serialized by the version
//! column alone.
//!
//! Two implementations are provided: an in-memory twin for tests and
//! single-process runs, and a PostgreSQL implementation where the version
//! check is an `UPDATE … WHERE version = $n` with the affected-row count
//! inspected.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod txn;

pub use error::{Result, StoreError};
pub use memory::{InMemoryInventoryStore, InMemoryOrderStore};
pub use postgres::{PostgresInventoryStore, PostgresOrderStore};
pub use store::{InventoryStore, OrderStore, OutboxStore, ProcessedEventStore};
pub use txn::{
    Expected, InventoryTxn, LedgerWrite, OrderTxn, OrderWrite, ReservationWrite,
};
