//! Postgres-backed ticket store.
//!
//! Persistent [`TicketStore`] using PostgreSQL. Optimistic concurrency and
//! ledger uniqueness are enforced at the database level, so correctness
//! holds even across multiple processes sharing one database.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` on `tickets` | `DuplicateTicket` | `(event_id, buyer_id)` already in the ledger |
//! | `23505` on `events` | `DuplicateEvent` | inventory record already created |
//! | `23514` | `Invalid` | CHECK constraint (capacity/sold bounds) rejected the row |
//! | other database errors | `Storage` | connectivity, pool, unexpected faults |
//!
//! A conditional UPDATE that matches zero rows is reported as
//! `StoreError::Concurrency` — the version moved underneath the writer.
//!
//! ## Schema
//!
//! The `sold_tickets <= capacity` invariant is also declared as a CHECK
//! constraint, a second line of defense behind the version-gated update.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use tickethub_core::{BuyerId, Entity, EventId, ExpectedVersion, RecordVersion, TicketId};
use tickethub_ticketing::{EventRecord, Ticket};

use super::query::{Page, PageParams};
use super::r#trait::{StoreError, TicketStore};

use async_trait::async_trait;

/// Postgres-backed [`TicketStore`].
///
/// Cloneable and `Send + Sync`; all operations go through the SQLx
/// connection pool.
#[derive(Debug, Clone)]
pub struct PostgresTicketStore {
    pool: Arc<PgPool>,
}

impl PostgresTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables and constraints this store relies on.
    ///
    /// Idempotent; meant for development and test setups. Production
    /// deployments run the same DDL through their migration tooling.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id           UUID PRIMARY KEY,
                name         TEXT NOT NULL,
                starts_at    TIMESTAMPTZ NOT NULL,
                capacity     BIGINT NOT NULL CHECK (capacity > 0),
                sold_tickets BIGINT NOT NULL DEFAULT 0
                             CHECK (sold_tickets >= 0 AND sold_tickets <= capacity),
                version      BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_events_table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id        UUID PRIMARY KEY,
                event_id  UUID NOT NULL REFERENCES events (id),
                buyer_id  UUID NOT NULL,
                issued_at TIMESTAMPTZ NOT NULL,
                UNIQUE (event_id, buyer_id)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_tickets_table", e))?;

        Ok(())
    }
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    #[instrument(skip(self, record), fields(event_id = %record.id()), err)]
    async fn insert_event(&self, record: EventRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO events (id, name, starts_at, capacity, sold_tickets, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.name())
        .bind(record.starts_at())
        .bind(i64::from(record.capacity()))
        .bind(i64::from(record.sold_tickets()))
        .bind(record.version().as_u64() as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateEvent(record.id().to_string())
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    async fn load_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, starts_at, capacity, sold_tickets, version
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_event", e))?;

        row.map(event_from_row).transpose()
    }

    /// Conditional commit: one UPDATE gated on the version, one INSERT into
    /// the ledger, inside a single transaction. Zero rows matched by the
    /// UPDATE means another purchase committed first.
    #[instrument(
        skip(self, updated, ticket),
        fields(
            event_id = %updated.id(),
            buyer_id = %ticket.buyer_id(),
            expected = ?expected
        ),
        err
    )]
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let result = match expected {
            ExpectedVersion::Exact(version) => {
                sqlx::query(
                    r#"
                    UPDATE events
                    SET name = $2, starts_at = $3, sold_tickets = $4, version = version + 1
                    WHERE id = $1 AND version = $5
                    "#,
                )
                .bind(updated.id().as_uuid())
                .bind(updated.name())
                .bind(updated.starts_at())
                .bind(i64::from(updated.sold_tickets()))
                .bind(version.as_u64() as i64)
                .execute(&mut *tx)
                .await
            }
            ExpectedVersion::Any => {
                sqlx::query(
                    r#"
                    UPDATE events
                    SET name = $2, starts_at = $3, sold_tickets = $4, version = version + 1
                    WHERE id = $1
                    "#,
                )
                .bind(updated.id().as_uuid())
                .bind(updated.name())
                .bind(updated.starts_at())
                .bind(i64::from(updated.sold_tickets()))
                .execute(&mut *tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("update_event", e))?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::Concurrency(format!(
                "event {} moved past {:?}",
                updated.id(),
                expected
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO tickets (id, event_id, buyer_id, issued_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(ticket.id().as_uuid())
        .bind(ticket.event_id().as_uuid())
        .bind(ticket.buyer_id().as_uuid())
        .bind(ticket.issued_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateTicket(format!(
                    "event {} buyer {}",
                    ticket.event_id(),
                    ticket.buyer_id()
                ))
            } else {
                map_sqlx_error("insert_ticket", e)
            }
        })?;

        let row = sqlx::query(
            r#"
            SELECT id, name, starts_at, capacity, sold_tickets, version
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(updated.id().as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reload_event", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        event_from_row(row)
    }

    #[instrument(skip(self), fields(event_id = %event_id, buyer_id = %buyer_id), err)]
    async fn ticket_for(
        &self,
        event_id: EventId,
        buyer_id: BuyerId,
    ) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, event_id, buyer_id, issued_at
            FROM tickets
            WHERE event_id = $1 AND buyer_id = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(buyer_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ticket_for", e))?;

        row.map(ticket_from_row).transpose()
    }

    #[instrument(skip(self), fields(ticket_id = %id), err)]
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, event_id, buyer_id, issued_at
            FROM tickets
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_ticket", e))?;

        row.map(ticket_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn events_page(&self, params: PageParams) -> Result<Page<EventRecord>, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_events", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, name, starts_at, capacity, sold_tickets, version
            FROM events
            ORDER BY starts_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(params.page_size()))
        .bind(params.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("events_page", e))?;

        let items = rows
            .into_iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total_count: total as u64,
            page_number: params.page_number(),
            page_size: params.page_size(),
        })
    }

    #[instrument(skip(self), fields(buyer = ?buyer), err)]
    async fn tickets_page(
        &self,
        buyer: Option<BuyerId>,
        params: PageParams,
    ) -> Result<Page<Ticket>, StoreError> {
        let (total, rows) = match buyer {
            Some(buyer_id) => {
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE buyer_id = $1")
                        .bind(buyer_id.as_uuid())
                        .fetch_one(&*self.pool)
                        .await
                        .map_err(|e| map_sqlx_error("count_tickets", e))?;

                let rows = sqlx::query(
                    r#"
                    SELECT id, event_id, buyer_id, issued_at
                    FROM tickets
                    WHERE buyer_id = $1
                    ORDER BY issued_at ASC, id ASC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(buyer_id.as_uuid())
                .bind(i64::from(params.page_size()))
                .bind(params.offset() as i64)
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("tickets_page", e))?;

                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets")
                    .fetch_one(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("count_tickets", e))?;

                let rows = sqlx::query(
                    r#"
                    SELECT id, event_id, buyer_id, issued_at
                    FROM tickets
                    ORDER BY issued_at ASC, id ASC
                    LIMIT $1 OFFSET $2
                    "#,
                )
                .bind(i64::from(params.page_size()))
                .bind(params.offset() as i64)
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("tickets_page", e))?;

                (total, rows)
            }
        };

        let items = rows
            .into_iter()
            .map(ticket_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total_count: total as u64,
            page_number: params.page_number(),
            page_size: params.page_size(),
        })
    }
}

fn event_from_row(row: sqlx::postgres::PgRow) -> Result<EventRecord, StoreError> {
    let id: uuid::Uuid = row
        .try_get("id")
        .map_err(|e| StoreError::Storage(format!("failed to read event row: {e}")))?;
    let name: String = row
        .try_get("name")
        .map_err(|e| StoreError::Storage(format!("failed to read event row: {e}")))?;
    let starts_at: DateTime<Utc> = row
        .try_get("starts_at")
        .map_err(|e| StoreError::Storage(format!("failed to read event row: {e}")))?;
    let capacity: i64 = row
        .try_get("capacity")
        .map_err(|e| StoreError::Storage(format!("failed to read event row: {e}")))?;
    let sold_tickets: i64 = row
        .try_get("sold_tickets")
        .map_err(|e| StoreError::Storage(format!("failed to read event row: {e}")))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Storage(format!("failed to read event row: {e}")))?;

    let capacity = u32::try_from(capacity)
        .map_err(|_| StoreError::Invalid(format!("capacity out of range: {capacity}")))?;
    let sold_tickets = u32::try_from(sold_tickets)
        .map_err(|_| StoreError::Invalid(format!("sold_tickets out of range: {sold_tickets}")))?;

    EventRecord::from_stored(
        EventId::from_uuid(id),
        name,
        starts_at,
        capacity,
        sold_tickets,
        RecordVersion::from(version as u64),
    )
    .map_err(|e| StoreError::Invalid(e.to_string()))
}

fn ticket_from_row(row: sqlx::postgres::PgRow) -> Result<Ticket, StoreError> {
    let id: uuid::Uuid = row
        .try_get("id")
        .map_err(|e| StoreError::Storage(format!("failed to read ticket row: {e}")))?;
    let event_id: uuid::Uuid = row
        .try_get("event_id")
        .map_err(|e| StoreError::Storage(format!("failed to read ticket row: {e}")))?;
    let buyer_id: uuid::Uuid = row
        .try_get("buyer_id")
        .map_err(|e| StoreError::Storage(format!("failed to read ticket row: {e}")))?;
    let issued_at: DateTime<Utc> = row
        .try_get("issued_at")
        .map_err(|e| StoreError::Storage(format!("failed to read ticket row: {e}")))?;

    Ok(Ticket::from_stored(
        TicketId::from_uuid(id),
        EventId::from_uuid(event_id),
        BuyerId::from_uuid(buyer_id),
        issued_at,
    ))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation (code `23505`).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505")
    )
}
