//! Integration tests for the full admission pipeline.
//!
//! Tests: AdmissionService → TicketStore (in-memory), under real task
//! concurrency.
//!
//! Verifies:
//! - the capacity invariant holds under concurrent buyers
//! - purchases are idempotent per (event, buyer), sequentially and racing
//! - conflict retries re-check capacity against fresh state
//! - the retry budget bounds contention and surfaces as its own error
//! - paged listings are deterministic and disjoint

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use tickethub_core::{BuyerId, Entity, EventId, ExpectedVersion, TicketId};
    use tickethub_ticketing::{EventRecord, Ticket};

    use crate::admission::{AdmissionService, PurchaseError, RetryConfig};
    use crate::store::{
        InMemoryTicketStore, Page, PageParams, StoreError, TicketStore,
    };

    fn test_event(id: EventId, capacity: u32) -> EventRecord {
        EventRecord::new(id, "Concert", Utc::now(), capacity).unwrap()
    }

    /// Retry budget large enough that, against the in-memory store, every
    /// contender either commits or observes a definitive sell-out. Each
    /// conflict round has exactly one winner, so a task can lose at most
    /// `capacity` races before the event is full.
    fn generous_retries() -> RetryConfig {
        RetryConfig {
            max_attempts: 8,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    async fn service_with_event(
        capacity: u32,
    ) -> (Arc<AdmissionService<Arc<InMemoryTicketStore>>>, EventId) {
        tickethub_observability::init_with_filter("warn");
        let store = Arc::new(InMemoryTicketStore::new());
        let service = Arc::new(AdmissionService::new(store).with_retry_config(generous_retries()));
        let event_id = EventId::new();
        service
            .register_event(test_event(event_id, capacity))
            .await
            .unwrap();
        (service, event_id)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn capacity_invariant_under_concurrent_buyers() {
        let capacity = 5u32;
        let buyers = 12usize;
        let (service, event_id) = service_with_event(capacity).await;

        let mut handles = Vec::with_capacity(buyers);
        for _ in 0..buyers {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.purchase(event_id, BuyerId::new()).await
            }));
        }

        let mut successes = 0u32;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(PurchaseError::EventFull) => {}
                Err(PurchaseError::ConcurrencyExhausted { .. }) => {}
                Err(other) => panic!("unexpected purchase error: {other:?}"),
            }
        }

        assert_eq!(successes, capacity);

        let store = service.store();
        let record = store.load_event(event_id).await.unwrap().unwrap();
        assert_eq!(record.sold_tickets(), capacity);
        assert!(record.is_sold_out());

        let ledger = store
            .tickets_page(None, PageParams::new(1, 49))
            .await
            .unwrap();
        assert_eq!(ledger.total_count, u64::from(capacity));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_one_race_admits_exactly_one_buyer() {
        let (service, event_id) = service_with_event(1).await;
        let buyer_a = BuyerId::new();
        let buyer_b = BuyerId::new();

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.purchase(event_id, buyer_a).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.purchase(event_id, buyer_b).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);

        for result in &results {
            if let Err(err) = result {
                assert!(
                    matches!(
                        err,
                        PurchaseError::EventFull | PurchaseError::ConcurrencyExhausted { .. }
                    ),
                    "loser saw {err:?}"
                );
            }
        }

        let record = service
            .store()
            .load_event(event_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.sold_tickets(), 1);
    }

    #[tokio::test]
    async fn second_purchase_by_the_same_buyer_is_rejected() {
        let (service, event_id) = service_with_event(10).await;
        let buyer = BuyerId::new();

        let ticket = service.purchase(event_id, buyer).await.unwrap();
        assert_eq!(ticket.event_id(), event_id);
        assert_eq!(ticket.buyer_id(), buyer);

        let err = service.purchase(event_id, buyer).await.unwrap_err();
        assert!(matches!(err, PurchaseError::AlreadyPurchased));

        let ledger = service
            .store()
            .tickets_page(Some(buyer), PageParams::default())
            .await
            .unwrap();
        assert_eq!(ledger.total_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_purchases_by_one_buyer_yield_one_ticket() {
        let (service, event_id) = service_with_event(10).await;
        let buyer = BuyerId::new();

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.purchase(event_id, buyer).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.purchase(event_id, buyer).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "unique constraint must stop the duplicate");
        for result in &results {
            if let Err(err) = result {
                assert!(matches!(err, PurchaseError::AlreadyPurchased));
            }
        }

        let ledger = service
            .store()
            .tickets_page(Some(buyer), PageParams::default())
            .await
            .unwrap();
        assert_eq!(ledger.total_count, 1);
    }

    #[tokio::test]
    async fn missing_event_is_reported_without_any_write() {
        let store = Arc::new(InMemoryTicketStore::new());
        let service = AdmissionService::new(store.clone());

        let err = service
            .purchase(EventId::new(), BuyerId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::EventNotFound));

        let ledger = store.tickets_page(None, PageParams::default()).await.unwrap();
        assert_eq!(ledger.total_count, 0);
    }

    /// Store that reports a version conflict on every commit, for driving
    /// the retry loop to exhaustion.
    struct AlwaysContended {
        inner: InMemoryTicketStore,
    }

    #[async_trait]
    impl TicketStore for AlwaysContended {
        async fn insert_event(&self, record: EventRecord) -> Result<(), StoreError> {
            self.inner.insert_event(record).await
        }

        async fn load_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
            self.inner.load_event(id).await
        }

        async fn commit_purchase(
            &self,
            _updated: EventRecord,
            _expected: ExpectedVersion,
            _ticket: Ticket,
        ) -> Result<EventRecord, StoreError> {
            Err(StoreError::Concurrency("always contended".to_string()))
        }

        async fn ticket_for(
            &self,
            event_id: EventId,
            buyer_id: BuyerId,
        ) -> Result<Option<Ticket>, StoreError> {
            self.inner.ticket_for(event_id, buyer_id).await
        }

        async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
            self.inner.get_ticket(id).await
        }

        async fn events_page(&self, params: PageParams) -> Result<Page<EventRecord>, StoreError> {
            self.inner.events_page(params).await
        }

        async fn tickets_page(
            &self,
            buyer: Option<BuyerId>,
            params: PageParams,
        ) -> Result<Page<Ticket>, StoreError> {
            self.inner.tickets_page(buyer, params).await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_their_own_error() {
        let store = AlwaysContended {
            inner: InMemoryTicketStore::new(),
        };
        let event_id = EventId::new();
        store.insert_event(test_event(event_id, 3)).await.unwrap();

        let retry = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        };
        let service = AdmissionService::new(store).with_retry_config(retry);

        let err = service
            .purchase(event_id, BuyerId::new())
            .await
            .unwrap_err();
        match err {
            PurchaseError::ConcurrencyExhausted { attempts } => assert_eq!(attempts, 3),
            other => panic!("expected ConcurrencyExhausted, got {other:?}"),
        }
    }

    /// Store whose first commit is beaten to the punch by a rival purchase,
    /// so the caller's commit hits a genuine version conflict and the retry
    /// sees the slot gone.
    struct Undercut {
        inner: Arc<InMemoryTicketStore>,
        rival: BuyerId,
        undercut_done: AtomicBool,
    }

    #[async_trait]
    impl TicketStore for Undercut {
        async fn insert_event(&self, record: EventRecord) -> Result<(), StoreError> {
            self.inner.insert_event(record).await
        }

        async fn load_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
            self.inner.load_event(id).await
        }

        async fn commit_purchase(
            &self,
            updated: EventRecord,
            expected: ExpectedVersion,
            ticket: Ticket,
        ) -> Result<EventRecord, StoreError> {
            if !self.undercut_done.swap(true, Ordering::SeqCst) {
                let record = self
                    .inner
                    .load_event(updated.id())
                    .await?
                    .expect("event seeded");
                let rival_update = record.admit_one().expect("slot still free");
                self.inner
                    .commit_purchase(
                        rival_update,
                        ExpectedVersion::Exact(record.version()),
                        Ticket::issue(record.id(), self.rival, Utc::now()),
                    )
                    .await?;
            }
            self.inner.commit_purchase(updated, expected, ticket).await
        }

        async fn ticket_for(
            &self,
            event_id: EventId,
            buyer_id: BuyerId,
        ) -> Result<Option<Ticket>, StoreError> {
            self.inner.ticket_for(event_id, buyer_id).await
        }

        async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
            self.inner.get_ticket(id).await
        }

        async fn events_page(&self, params: PageParams) -> Result<Page<EventRecord>, StoreError> {
            self.inner.events_page(params).await
        }

        async fn tickets_page(
            &self,
            buyer: Option<BuyerId>,
            params: PageParams,
        ) -> Result<Page<Ticket>, StoreError> {
            self.inner.tickets_page(buyer, params).await
        }
    }

    #[tokio::test]
    async fn retry_re_checks_capacity_against_fresh_state() {
        let inner = Arc::new(InMemoryTicketStore::new());
        let rival = BuyerId::new();
        let event_id = EventId::new();
        inner.insert_event(test_event(event_id, 1)).await.unwrap();

        let store = Undercut {
            inner: inner.clone(),
            rival,
            undercut_done: AtomicBool::new(false),
        };
        let service = AdmissionService::new(store).with_retry_config(generous_retries());

        // The rival takes the last slot while our commit is in flight; the
        // retry must conclude the event is full, not claim a phantom slot.
        let err = service
            .purchase(event_id, BuyerId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::EventFull), "got {err:?}");

        let record = inner.load_event(event_id).await.unwrap().unwrap();
        assert_eq!(record.sold_tickets(), 1);
        assert!(inner.ticket_for(event_id, rival).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn event_pages_are_stable_and_disjoint() {
        let store = Arc::new(InMemoryTicketStore::new());
        let base = Utc::now();
        for i in 0..25i64 {
            let record = EventRecord::new(
                EventId::new(),
                format!("event-{i}"),
                base + chrono::Duration::minutes(i),
                10,
            )
            .unwrap();
            store.insert_event(record).await.unwrap();
        }

        let p1 = store.events_page(PageParams::new(1, 10)).await.unwrap();
        let p2 = store.events_page(PageParams::new(2, 10)).await.unwrap();
        let p3 = store.events_page(PageParams::new(3, 10)).await.unwrap();

        assert_eq!(p1.items.len(), 10);
        assert_eq!(p2.items.len(), 10);
        assert_eq!(p3.items.len(), 5);
        for page in [&p1, &p2, &p3] {
            assert_eq!(page.total_count, 25);
        }

        let mut seen: Vec<EventId> = Vec::new();
        for page in [&p1, &p2, &p3] {
            for event in &page.items {
                assert!(!seen.contains(&event.id()), "pages overlap");
                seen.push(event.id());
            }
        }

        // Same calls, same pages.
        let p1_again = store.events_page(PageParams::new(1, 10)).await.unwrap();
        assert_eq!(p1, p1_again);
    }
}
