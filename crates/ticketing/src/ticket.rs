//! Ticket ledger entry: one row per issued ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tickethub_core::{BuyerId, Entity, EventId, TicketId};

/// An issued ticket.
///
/// Immutable once created. At most one ticket exists per
/// `(event_id, buyer_id)` pair — the storage layer enforces that with a
/// unique constraint; the admission service's pre-read is only a shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    id: TicketId,
    event_id: EventId,
    buyer_id: BuyerId,
    issued_at: DateTime<Utc>,
}

impl Ticket {
    /// Issue a new ticket for a buyer.
    pub fn issue(event_id: EventId, buyer_id: BuyerId, issued_at: DateTime<Utc>) -> Self {
        Self {
            id: TicketId::new(),
            event_id,
            buyer_id,
            issued_at,
        }
    }

    /// Rebuild a ticket from stored fields. Storage-layer use only.
    pub fn from_stored(
        id: TicketId,
        event_id: EventId,
        buyer_id: BuyerId,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            buyer_id,
            issued_at,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn buyer_id(&self) -> BuyerId {
        self.buyer_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl Entity for Ticket {
    type Id = TicketId;

    fn id(&self) -> TicketId {
        self.id
    }
}
