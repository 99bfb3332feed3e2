//! Ticket admission: the purchase orchestration.
//!
//! One purchase attempt is a short pipeline:
//!
//! ```text
//! PurchaseTicket(event_id, buyer_id)
//!   ↓
//! 1. Ledger pre-check (shortcut; the unique constraint is the guarantee)
//!   ↓
//! 2. Load the inventory record (fresh version token)
//!   ↓
//! 3. Admission decision (pure): capacity check + increment
//!   ↓
//! 4. Conditional commit: record update + ledger insert, atomic,
//!    gated on the version read in step 2
//! ```
//!
//! Steps 2–4 re-run on a version conflict — another purchase committed
//! between our read and our write. The capacity check is re-evaluated on
//! every attempt because the very update that beat us may have taken the
//! last slot. The retry budget is bounded so a popular event cannot pin
//! request handlers indefinitely; when it runs out the caller gets
//! [`PurchaseError::ConcurrencyExhausted`], which means "unknown, try
//! again", never "sold out".

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use tickethub_core::{BuyerId, EventId, ExpectedVersion};
use tickethub_ticketing::{EventRecord, Ticket};

use crate::store::{StoreError, TicketStore};

/// Purchase failure, as seen by the caller.
///
/// All variants are ordinary business outcomes for this layer; none of
/// them indicate a defect and none should crash the process.
#[derive(Debug, Error)]
pub enum PurchaseError {
    /// The referenced event does not exist. Not retried.
    #[error("event not found")]
    EventNotFound,

    /// Capacity reached at the time of the check. Business state, not a
    /// defect; deliberately distinct from `ConcurrencyExhausted`.
    #[error("event is sold out")]
    EventFull,

    /// The buyer already holds a ticket for this event. Idempotent signal,
    /// raised by the pre-check or by the storage unique constraint.
    #[error("buyer already holds a ticket for this event")]
    AlreadyPurchased,

    /// The optimistic-concurrency retry budget ran out. Transient: the true
    /// state is unknown and the caller should retry the whole request after
    /// a delay.
    #[error("purchase contention not resolved after {attempts} attempts")]
    ConcurrencyExhausted { attempts: u32 },

    /// Opaque lower-layer fault. Not retried here.
    #[error("storage failure")]
    Storage(#[source] StoreError),
}

/// Retry behavior for optimistic-concurrency conflicts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the per-retry delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt (exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), with jitter to
    /// spread out competing writers.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64;
        let max = self.max_delay.as_millis() as f64;

        let delay = base * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(max);

        // ±25% jitter.
        let mut rng = rand::thread_rng();
        let jitter = delay * 0.25 * (rng.r#gen::<f64>() - 0.5) * 2.0;
        let final_delay = (delay + jitter).clamp(0.0, max) as u64;

        Duration::from_millis(final_delay)
    }
}

/// Outcome of a single reservation attempt (internal).
enum Attempt {
    /// Lost a write race; worth retrying from a fresh read.
    Conflict,
    /// Terminal outcome; retrying cannot change it.
    Fatal(PurchaseError),
}

/// The admission controller: gates ticket issuance against event capacity.
///
/// Owns the write path to both the inventory record and the ticket ledger.
/// Holds no state of its own beyond configuration — all shared mutable
/// state lives in the store, and contention is resolved there via
/// compare-and-swap on the record version (first-committer-wins).
#[derive(Debug)]
pub struct AdmissionService<S> {
    store: S,
    retry: RetryConfig,
}

impl<S> AdmissionService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Borrow the underlying store (read paths, tests).
    pub fn store(&self) -> &S {
        &self.store
    }

}

impl<S> AdmissionService<S>
where
    S: TicketStore,
{
    /// Purchase one ticket for `buyer_id` to `event_id`.
    ///
    /// On success exactly one inventory increment and one ledger insert
    /// have been committed, atomically. On failure nothing was written.
    /// Concurrency retries happen inside this call and are invisible to
    /// the caller except as latency.
    #[instrument(skip(self), fields(event_id = %event_id, buyer_id = %buyer_id))]
    pub async fn purchase(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Ticket, PurchaseError> {
        // Pre-check: cheap early exit for repeat buyers. Correctness does
        // not depend on it — a race past this read still dies on the
        // store's unique constraint.
        let existing = self
            .store
            .ticket_for(event_id, buyer_id)
            .await
            .map_err(PurchaseError::Storage)?;
        if existing.is_some() {
            return Err(PurchaseError::AlreadyPurchased);
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_reserve(event_id, buyer_id).await {
                Ok(ticket) => {
                    if attempt > 1 {
                        debug!(attempt, "purchase committed after retry");
                    }
                    return Ok(ticket);
                }
                Err(Attempt::Conflict) if attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "purchase lost a write race, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Conflict) => {
                    warn!(attempts = attempt, "purchase retry budget exhausted");
                    return Err(PurchaseError::ConcurrencyExhausted { attempts: attempt });
                }
                Err(Attempt::Fatal(err)) => return Err(err),
            }
        }
    }

    /// One reservation attempt: fresh read, capacity decision, conditional
    /// commit. Every attempt re-reads so the decision is always made
    /// against current state.
    async fn try_reserve(&self, event_id: EventId, buyer_id: BuyerId) -> Result<Ticket, Attempt> {
        let record = self
            .store
            .load_event(event_id)
            .await
            .map_err(|e| Attempt::Fatal(PurchaseError::Storage(e)))?
            .ok_or(Attempt::Fatal(PurchaseError::EventNotFound))?;

        let updated = record
            .admit_one()
            .map_err(|_| Attempt::Fatal(PurchaseError::EventFull))?;

        let ticket = Ticket::issue(event_id, buyer_id, Utc::now());
        let expected = ExpectedVersion::Exact(record.version());

        match self
            .store
            .commit_purchase(updated, expected, ticket.clone())
            .await
        {
            Ok(_) => Ok(ticket),
            Err(StoreError::Concurrency(_)) => Err(Attempt::Conflict),
            Err(StoreError::DuplicateTicket(_)) => {
                Err(Attempt::Fatal(PurchaseError::AlreadyPurchased))
            }
            Err(e) => Err(Attempt::Fatal(PurchaseError::Storage(e))),
        }
    }

    /// Creation path: register an event's inventory record (zero sold).
    pub async fn register_event(&self, record: EventRecord) -> Result<(), StoreError> {
        self.store.insert_event(record).await
    }
}
