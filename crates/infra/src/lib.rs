//! `tickethub-infra` — storage and orchestration for ticket sales.
//!
//! This crate wires the pure domain model (`tickethub-ticketing`) to durable
//! storage. It contains:
//!
//! - the [`store::TicketStore`] trait: the storage-engine contract (point
//!   reads, conditional purchase commit, ledger uniqueness, paged queries)
//! - an in-memory implementation for tests and development
//! - a Postgres implementation backed by `sqlx`
//! - the [`admission::AdmissionService`]: the purchase orchestration with
//!   bounded optimistic-concurrency retries

pub mod admission;
pub mod store;

pub use admission::{AdmissionService, PurchaseError, RetryConfig};
pub use store::{
    InMemoryTicketStore, Page, PageParams, PostgresTicketStore, StoreError, TicketStore,
};

#[cfg(test)]
mod integration_tests;
