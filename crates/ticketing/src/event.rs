//! Event inventory record: capacity, sold count, and version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tickethub_core::{DomainError, DomainResult, Entity, EventId, RecordVersion};

/// Durable inventory record for one sellable event.
///
/// `capacity` is fixed at creation. `sold_tickets` only moves through
/// [`EventRecord::admit_one`], which is the single admission decision point;
/// the storage layer owns advancing `version` when an update commits.
///
/// Invariant: `sold_tickets <= capacity` at all observable times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    id: EventId,
    name: String,
    starts_at: DateTime<Utc>,
    capacity: u32,
    sold_tickets: u32,
    version: RecordVersion,
}

impl EventRecord {
    /// Create a new inventory record with zero tickets sold.
    pub fn new(
        id: EventId,
        name: impl Into<String>,
        starts_at: DateTime<Utc>,
        capacity: u32,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if capacity == 0 {
            return Err(DomainError::validation("capacity must be positive"));
        }
        Ok(Self {
            id,
            name,
            starts_at,
            capacity,
            sold_tickets: 0,
            version: RecordVersion::initial(),
        })
    }

    /// Rebuild a record from stored fields. Storage-layer use only; the
    /// stored invariant (`sold_tickets <= capacity`) is re-checked.
    pub fn from_stored(
        id: EventId,
        name: String,
        starts_at: DateTime<Utc>,
        capacity: u32,
        sold_tickets: u32,
        version: RecordVersion,
    ) -> DomainResult<Self> {
        if sold_tickets > capacity {
            return Err(DomainError::validation(format!(
                "stored record oversold: {sold_tickets} > {capacity}"
            )));
        }
        Ok(Self {
            id,
            name,
            starts_at,
            capacity,
            sold_tickets,
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn sold_tickets(&self) -> u32 {
        self.sold_tickets
    }

    /// Version observed at read time; handed back to storage on commit.
    pub fn version(&self) -> RecordVersion {
        self.version
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.sold_tickets
    }

    pub fn is_sold_out(&self) -> bool {
        self.sold_tickets >= self.capacity
    }

    /// Admission decision: account for one more issued ticket.
    ///
    /// Pure: returns the incremented record, leaving `self` untouched. The
    /// version is deliberately carried over unchanged — it still names the
    /// state this decision was made against, which is what the storage
    /// layer's conditional update checks.
    pub fn admit_one(&self) -> DomainResult<Self> {
        if self.is_sold_out() {
            return Err(DomainError::conflict("capacity reached"));
        }
        let mut next = self.clone();
        next.sold_tickets += 1;
        Ok(next)
    }

    /// Storage-layer hook: the record as persisted after a committed update.
    #[must_use]
    pub fn with_version(mut self, version: RecordVersion) -> Self {
        self.version = version;
        self
    }
}

impl Entity for EventRecord {
    type Id = EventId;

    fn id(&self) -> EventId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_event(capacity: u32) -> EventRecord {
        EventRecord::new(EventId::new(), "Concert", Utc::now(), capacity).unwrap()
    }

    #[test]
    fn new_record_starts_with_zero_sold() {
        let event = test_event(100);
        assert_eq!(event.sold_tickets(), 0);
        assert_eq!(event.remaining(), 100);
        assert_eq!(event.version(), RecordVersion::initial());
        assert!(!event.is_sold_out());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = EventRecord::new(EventId::new(), "Concert", Utc::now(), 0).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = EventRecord::new(EventId::new(), "   ", Utc::now(), 10).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn admit_one_increments_without_mutating_original() {
        let event = test_event(2);
        let updated = event.admit_one().unwrap();
        assert_eq!(updated.sold_tickets(), 1);
        assert_eq!(event.sold_tickets(), 0);
        // Version names the state the decision was made against.
        assert_eq!(updated.version(), event.version());
    }

    #[test]
    fn admit_one_rejects_when_sold_out() {
        let event = test_event(1);
        let full = event.admit_one().unwrap();
        assert!(full.is_sold_out());
        let err = full.admit_one().unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn stored_record_oversold_is_rejected() {
        let err = EventRecord::from_stored(
            EventId::new(),
            "Concert".to_string(),
            Utc::now(),
            3,
            4,
            RecordVersion::from(7),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        /// However many admissions are attempted, successes never exceed
        /// capacity and the sold count tracks successes exactly.
        #[test]
        fn sold_never_exceeds_capacity(capacity in 1u32..64, attempts in 0u32..128) {
            let mut event = test_event(capacity);
            let mut successes = 0u32;
            for _ in 0..attempts {
                match event.admit_one() {
                    Ok(updated) => {
                        successes += 1;
                        event = updated;
                    }
                    Err(_) => prop_assert!(event.is_sold_out()),
                }
            }
            prop_assert_eq!(successes, attempts.min(capacity));
            prop_assert_eq!(event.sold_tickets(), successes);
            prop_assert!(event.sold_tickets() <= event.capacity());
        }
    }
}
