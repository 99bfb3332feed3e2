//! Storage-engine contract for the admission path and the listing read path.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use tickethub_core::{BuyerId, EventId, ExpectedVersion, TicketId};
use tickethub_ticketing::{EventRecord, Ticket};

use super::query::{Page, PageParams};

/// Storage operation error.
///
/// These are **infrastructure errors** (concurrency, constraints, IO) as
/// opposed to domain errors (validation, capacity). The admission service
/// translates them into its own taxonomy; in particular `DuplicateTicket`
/// must never leak to callers as a generic storage fault.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Conditional update failed: the stored version no longer matches the
    /// version the writer observed at read time.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The `(event_id, buyer_id)` unique constraint rejected a ledger insert.
    #[error("ticket already issued for this event and buyer: {0}")]
    DuplicateTicket(String),

    /// An inventory record already exists under this event id.
    #[error("event already exists: {0}")]
    DuplicateEvent(String),

    /// The caller handed the store inconsistent data (e.g. a ticket that
    /// does not belong to the record being committed).
    #[error("invalid store operation: {0}")]
    Invalid(String),

    /// Opaque lower-layer fault (IO, connectivity, poisoned lock).
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Durable store for inventory records and the ticket ledger.
///
/// ## Contract
///
/// Implementations must provide:
///
/// - a point read of an inventory record **including its current version**
/// - a conditional purchase commit that applies the record update and the
///   ledger insert as a **single atomic unit**, succeeding only if the
///   stored version still matches `expected` (and advancing the version on
///   success)
/// - a uniqueness constraint on `(event_id, buyer_id)` for ledger inserts,
///   enforced by the store itself — pre-reads in the service are an
///   optimization, not the guarantee
/// - deterministic ordering for the paged read path (events by start date,
///   tickets by issue time, id as tie-break)
///
/// ## Concurrency
///
/// No caller-side locking is assumed. Concurrent commits against the same
/// record race at the store; exactly one writer per version wins
/// (first-committer-wins), the rest observe [`StoreError::Concurrency`].
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Create an inventory record (the event-creation path; zero sold).
    async fn insert_event(&self, record: EventRecord) -> Result<(), StoreError>;

    /// Point read of an inventory record, version included.
    async fn load_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError>;

    /// Conditionally commit one purchase.
    ///
    /// Applies `updated` (the incremented record) and inserts `ticket`
    /// atomically, but only if the stored version matches `expected`.
    /// Returns the record as persisted, with its advanced version.
    async fn commit_purchase(
        &self,
        updated: EventRecord,
        expected: ExpectedVersion,
        ticket: Ticket,
    ) -> Result<EventRecord, StoreError>;

    /// Ledger lookup for one `(event, buyer)` pair (the pre-check read).
    async fn ticket_for(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Point read of a ledger entry.
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError>;

    /// Paged event listing, ordered by `(starts_at, id)`.
    async fn events_page(&self, params: PageParams) -> Result<Page<EventRecord>, StoreError>;

    /// Paged ticket listing, optionally filtered to one buyer, ordered by
    /// `(issued_at, id)`.
    async fn tickets_page(
        &self,
        buyer: Option<BuyerId>,
        params: PageParams,
    ) -> Result<Page<Ticket>, StoreError>;
}

#[async_trait]
impl<S> TicketStore for Arc<S>
where
    S: TicketStore + ?Sized,
{
    async fn insert_event(&self, record: EventRecord) -> Result<(), StoreError> {
        (**self).insert_event(record).await
    }

    async fn load_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        (**self).load_event(id).await
    }

    async fn commit_purchase(
        &self,
        updated: EventRecord,
        expected: ExpectedVersion,
        ticket: Ticket,
    ) -> Result<EventRecord, StoreError> {
        (**self).commit_purchase(updated, expected, ticket).await
    }

    async fn ticket_for(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Ticket>, StoreError> {
        (**self).ticket_for(event_id, buyer_id).await
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        (**self).get_ticket(id).await
    }

    async fn events_page(&self, params: PageParams) -> Result<Page<EventRecord>, StoreError> {
        (**self).events_page(params).await
    }

    async fn tickets_page(
        &self,
        buyer: Option<BuyerId>,
        params: PageParams,
    ) -> Result<Page<Ticket>, StoreError> {
        (**self).tickets_page(buyer, params).await
    }
}
