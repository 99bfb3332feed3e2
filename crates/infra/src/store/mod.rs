//! Ticket inventory storage boundary.
//!
//! This module defines an infrastructure-facing abstraction for inventory
//! records and the ticket ledger without making any storage assumptions. The
//! one primitive everything hinges on is the conditional purchase commit:
//! increment-and-insert applied atomically, gated on the record version.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryTicketStore;
pub use postgres::PostgresTicketStore;
pub use query::{paginate, Page, PageOrder, PageParams};
pub use r#trait::{StoreError, TicketStore};
