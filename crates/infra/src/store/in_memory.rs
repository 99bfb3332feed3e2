//! In-memory ticket store.
//!
//! Intended for tests/dev. A single `RwLock` guards all three tables, so the
//! conditional purchase commit (version check + record update + ledger
//! insert + unique index) is one critical section — the same all-or-nothing
//! behavior a database transaction gives the Postgres implementation.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use tickethub_core::{BuyerId, Entity, EventId, ExpectedVersion, TicketId};
use tickethub_ticketing::{EventRecord, Ticket};

use super::query::{paginate, Page, PageParams};
use super::r#trait::{StoreError, TicketStore};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<EventId, EventRecord>,
    tickets: HashMap<TicketId, Ticket>,
    /// Unique index backing the one-ticket-per-buyer-per-event constraint.
    issued: HashSet<(EventId, BuyerId)>,
}

/// In-memory [`TicketStore`]. Not optimized for large data sets.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    tables: RwLock<Tables>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert_event(&self, record: EventRecord) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.events.contains_key(&record.id()) {
            return Err(StoreError::DuplicateEvent(record.id().to_string()));
        }
        tables.events.insert(record.id(), record);
        Ok(())
    }

    async fn load_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.read()?.events.get(&id).cloned())
    }

    async fn commit_purchase(
        &self,
        updated: EventRecord,
        expected: ExpectedVersion,
        ticket: Ticket,
    ) -> Result<EventRecord, StoreError> {
        if ticket.event_id() != updated.id() {
            return Err(StoreError::Invalid(format!(
                "ticket targets event {}, record is {}",
                ticket.event_id(),
                updated.id()
            )));
        }

        let mut tables = self.write()?;

        let stored = tables
            .events
            .get(&updated.id())
            .ok_or_else(|| StoreError::Storage(format!("event {} row missing", updated.id())))?;

        if !expected.matches(stored.version()) {
            return Err(StoreError::Concurrency(format!(
                "expected {expected:?}, found {}",
                stored.version()
            )));
        }

        let key = (ticket.event_id(), ticket.buyer_id());
        if tables.issued.contains(&key) {
            return Err(StoreError::DuplicateTicket(format!(
                "event {} buyer {}",
                key.0, key.1
            )));
        }

        // Past the checks: apply everything, nothing can fail from here.
        let committed = updated.with_version(stored.version().next());
        tables.events.insert(committed.id(), committed.clone());
        tables.tickets.insert(ticket.id(), ticket);
        tables.issued.insert(key);

        Ok(committed)
    }

    async fn ticket_for(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Ticket>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .tickets
            .values()
            .find(|t| t.event_id() == event_id && t.buyer_id() == buyer_id)
            .cloned())
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.read()?.tickets.get(&id).cloned())
    }

    async fn events_page(&self, params: PageParams) -> Result<Page<EventRecord>, StoreError> {
        let items: Vec<_> = self.read()?.events.values().cloned().collect();
        Ok(paginate(items, params))
    }

    async fn tickets_page(
        &self,
        buyer: Option<BuyerId>,
        params: PageParams,
    ) -> Result<Page<Ticket>, StoreError> {
        let items: Vec<_> = self
            .read()?
            .tickets
            .values()
            .filter(|t| buyer.is_none_or(|b| t.buyer_id() == b))
            .cloned()
            .collect();
        Ok(paginate(items, params))
    }
}
