//! `tickethub-ticketing` — ticket sales domain model.
//!
//! Pure domain logic: the event inventory record with its admission decision,
//! and the ticket ledger entry. No IO, no storage concerns.

pub mod event;
pub mod ticket;

pub use event::EventRecord;
pub use ticket::Ticket;
