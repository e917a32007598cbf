//! PostgreSQL-backed store implementations.
//!
//! Optimistic locking is an explicit compare-and-swap: every update runs
//! `UPDATE … WHERE id = $1 AND version = $2` and inspects the affected-row
//! count. A zero count is resolved into `VersionConflict` (row moved on) or
//! `RowMissing` (row never existed) by re-reading the current version
//! inside the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ProductId, ReservationId, Version};
use domain::{
    Order, OrderLine, OrderStatus, OutboxEvent, OutboxStatus, Reservation, ReservationItem,
    ReservationStatus, StockLedgerEntry,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{InventoryStore, OrderStore, OutboxStore, ProcessedEventStore};
use crate::txn::{Expected, InventoryTxn, LedgerWrite, OrderTxn, OrderWrite, ReservationWrite};

/// Runs the workspace migrations against the given pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

fn invalid_row(detail: String) -> StoreError {
    StoreError::Serialization(serde_json::Error::io(std::io::Error::other(detail)))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| invalid_row(format!("negative {column}: {value}")))
}

fn parse_reservation_status(s: &str) -> Result<ReservationStatus> {
    match s {
        "Pending" => Ok(ReservationStatus::Pending),
        "Confirmed" => Ok(ReservationStatus::Confirmed),
        "Cancelled" => Ok(ReservationStatus::Cancelled),
        "Expired" => Ok(ReservationStatus::Expired),
        other => Err(invalid_row(format!("unknown reservation status: {other}"))),
    }
}

fn parse_order_status(s: &str) -> Result<OrderStatus> {
    match s {
        "Pending" => Ok(OrderStatus::Pending),
        "Confirmed" => Ok(OrderStatus::Confirmed),
        "Cancelled" => Ok(OrderStatus::Cancelled),
        other => Err(invalid_row(format!("unknown order status: {other}"))),
    }
}

fn parse_outbox_status(s: &str) -> Result<OutboxStatus> {
    match s {
        "Pending" => Ok(OutboxStatus::Pending),
        "Published" => Ok(OutboxStatus::Published),
        "Failed" => Ok(OutboxStatus::Failed),
        other => Err(invalid_row(format!("unknown outbox status: {other}"))),
    }
}

fn row_to_entry(row: PgRow) -> Result<StockLedgerEntry> {
    Ok(StockLedgerEntry::from_parts(
        ProductId::new(row.try_get::<String, _>("product_id")?),
        to_u32(row.try_get("available")?, "available")?,
        to_u32(row.try_get("reserved")?, "reserved")?,
        to_u32(row.try_get("total")?, "total")?,
        Version::new(row.try_get("version")?),
        row.try_get("updated_at")?,
    ))
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    let items: Vec<ReservationItem> = serde_json::from_value(row.try_get("items")?)?;
    Ok(Reservation::from_parts(
        ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        items,
        parse_reservation_status(row.try_get::<String, _>("status")?.as_str())?,
        row.try_get("created_at")?,
        row.try_get("expires_at")?,
        Version::new(row.try_get("version")?),
    ))
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let lines: Vec<OrderLine> = serde_json::from_value(row.try_get("lines")?)?;
    Ok(Order::from_parts(
        OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        common::CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        lines,
        common::Money::from_cents(row.try_get("total_cents")?),
        parse_order_status(row.try_get::<String, _>("status")?.as_str())?,
        row.try_get("cancel_reason")?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
        Version::new(row.try_get("version")?),
    ))
}

fn row_to_outbox(row: PgRow) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        correlation_id: row.try_get("correlation_id")?,
        payload: row.try_get("payload")?,
        status: parse_outbox_status(row.try_get::<String, _>("status")?.as_str())?,
        created_at: row.try_get("created_at")?,
        retry_count: to_u32(row.try_get("retry_count")?, "retry_count")?,
    })
}

/// Resolves a zero-affected-row CAS update into the precise error.
async fn cas_miss(
    conn: &mut PgConnection,
    entity: &'static str,
    version_query: &str,
    id: String,
    bind_uuid: Option<Uuid>,
    bind_text: Option<&str>,
    expected: Version,
) -> StoreError {
    let mut query = sqlx::query_scalar::<_, i64>(version_query);
    if let Some(uuid) = bind_uuid {
        query = query.bind(uuid);
    }
    if let Some(text) = bind_text {
        query = query.bind(text.to_string());
    }
    match query.fetch_optional(conn).await {
        Ok(Some(actual)) => {
            metrics::counter!("store_version_conflicts_total").increment(1);
            tracing::debug!(entity, %id, %expected, actual, "version conflict");
            StoreError::VersionConflict {
                entity,
                id,
                expected,
                actual: Version::new(actual),
            }
        }
        Ok(None) => StoreError::RowMissing { entity, id },
        Err(e) => StoreError::Database(e),
    }
}

fn duplicate_event_on(constraint: &'static str, id: EventId) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some(constraint)
        {
            return StoreError::DuplicateEvent(id);
        }
        StoreError::Database(e)
    }
}

async fn insert_outbox_row(
    conn: &mut PgConnection,
    table: &'static str,
    pkey: &'static str,
    event: &OutboxEvent,
) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (id, aggregate_id, event_type, correlation_id, payload, status, created_at, retry_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    ))
    .bind(event.id.as_uuid())
    .bind(&event.aggregate_id)
    .bind(&event.event_type)
    .bind(event.correlation_id)
    .bind(&event.payload)
    .bind(event.status.as_str())
    .bind(event.created_at)
    .bind(i64::from(event.retry_count))
    .execute(conn)
    .await
    .map_err(duplicate_event_on(pkey, event.id))?;
    Ok(())
}

async fn insert_processed_row(
    conn: &mut PgConnection,
    table: &'static str,
    pkey: &'static str,
    marker: &domain::ProcessedEvent,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {table} (event_id, event_type, processed_at) VALUES ($1, $2, $3)",
    ))
    .bind(marker.event_id.as_uuid())
    .bind(&marker.event_type)
    .bind(marker.processed_at)
    .execute(conn)
    .await
    .map_err(duplicate_event_on(pkey, marker.event_id))?;
    Ok(())
}

async fn publishable_rows(
    pool: &PgPool,
    table: &'static str,
    limit: usize,
    max_retries: u32,
) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT id, aggregate_id, event_type, correlation_id, payload, status, created_at, retry_count
        FROM {table}
        WHERE status <> 'Published' AND retry_count < $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    ))
    .bind(i64::from(max_retries))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_outbox).collect()
}

async fn set_published(pool: &PgPool, table: &'static str, id: EventId) -> Result<()> {
    let result = sqlx::query(&format!(
        "UPDATE {table} SET status = 'Published' WHERE id = $1",
    ))
    .bind(id.as_uuid())
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::RowMissing {
            entity: "outbox event",
            id: id.to_string(),
        });
    }
    Ok(())
}

async fn set_failed(pool: &PgPool, table: &'static str, id: EventId) -> Result<()> {
    let result = sqlx::query(&format!(
        "UPDATE {table} SET status = 'Failed', retry_count = retry_count + 1 WHERE id = $1",
    ))
    .bind(id.as_uuid())
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::RowMissing {
            entity: "outbox event",
            id: id.to_string(),
        });
    }
    Ok(())
}

async fn count_exhausted(pool: &PgPool, table: &'static str, max_retries: u32) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} WHERE status = 'Failed' AND retry_count >= $1",
    ))
    .bind(i64::from(max_retries))
    .fetch_one(pool)
    .await?;
    Ok(count as u64)
}

/// PostgreSQL-backed inventory store.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_ledger_write(conn: &mut PgConnection, write: &LedgerWrite) -> Result<()> {
        let entry = &write.entry;
        match write.expected {
            Expected::Absent => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO stock_ledger (product_id, available, reserved, total, version, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (product_id) DO NOTHING
                    "#,
                )
                .bind(entry.product_id().as_str())
                .bind(i64::from(entry.available()))
                .bind(i64::from(entry.reserved()))
                .bind(i64::from(entry.total()))
                .bind(entry.version().as_i64())
                .bind(entry.updated_at())
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::DuplicateRow {
                        entity: "ledger entry",
                        id: entry.product_id().to_string(),
                    });
                }
            }
            Expected::Version(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE stock_ledger
                    SET available = $2, reserved = $3, total = $4, version = $5, updated_at = $6
                    WHERE product_id = $1 AND version = $7
                    "#,
                )
                .bind(entry.product_id().as_str())
                .bind(i64::from(entry.available()))
                .bind(i64::from(entry.reserved()))
                .bind(i64::from(entry.total()))
                .bind(entry.version().as_i64())
                .bind(entry.updated_at())
                .bind(expected.as_i64())
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(cas_miss(
                        conn,
                        "ledger entry",
                        "SELECT version FROM stock_ledger WHERE product_id = $1",
                        entry.product_id().to_string(),
                        None,
                        Some(entry.product_id().as_str()),
                        expected,
                    )
                    .await);
                }
            }
        }
        Ok(())
    }

    async fn apply_reservation_write(
        conn: &mut PgConnection,
        write: &ReservationWrite,
    ) -> Result<()> {
        let reservation = &write.reservation;
        let items = serde_json::to_value(reservation.items())?;
        match write.expected {
            Expected::Absent => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO reservations (id, order_id, items, status, created_at, expires_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(reservation.id().as_uuid())
                .bind(reservation.order_id().as_uuid())
                .bind(&items)
                .bind(reservation.status().as_str())
                .bind(reservation.created_at())
                .bind(reservation.expires_at())
                .bind(reservation.version().as_i64())
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::DuplicateRow {
                        entity: "reservation",
                        id: reservation.id().to_string(),
                    });
                }
            }
            Expected::Version(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE reservations
                    SET status = $2, version = $3
                    WHERE id = $1 AND version = $4
                    "#,
                )
                .bind(reservation.id().as_uuid())
                .bind(reservation.status().as_str())
                .bind(reservation.version().as_i64())
                .bind(expected.as_i64())
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(cas_miss(
                        conn,
                        "reservation",
                        "SELECT version FROM reservations WHERE id = $1",
                        reservation.id().to_string(),
                        Some(reservation.id().as_uuid()),
                        None,
                        expected,
                    )
                    .await);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn ledger_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, available, reserved, total, version, updated_at
            FROM stock_ledger
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_entry).transpose()
    }

    async fn ledger_entries(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>> {
        let ids: Vec<String> = product_ids.iter().map(|p| p.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT product_id, available, reserved, total, version, updated_at
            FROM stock_ledger
            WHERE product_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, items, status, created_at, expires_at, version
            FROM reservations
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_reservation).transpose()
    }

    async fn expired_pending_reservations(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, items, status, created_at, expires_at, version
            FROM reservations
            WHERE status = 'Pending' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_reservation).collect()
    }

    async fn commit(&self, txn: InventoryTxn) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for write in &txn.ledger {
            Self::apply_ledger_write(&mut tx, write).await?;
        }
        if let Some(write) = &txn.reservation {
            Self::apply_reservation_write(&mut tx, write).await?;
        }
        for event in &txn.outbox {
            insert_outbox_row(&mut tx, "inventory_outbox", "inventory_outbox_pkey", event).await?;
        }
        if let Some(marker) = &txn.processed {
            insert_processed_row(
                &mut tx,
                "inventory_processed_events",
                "inventory_processed_events_pkey",
                marker,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresInventoryStore {
    async fn publishable_events(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEvent>> {
        publishable_rows(&self.pool, "inventory_outbox", limit, max_retries).await
    }

    async fn mark_published(&self, id: EventId) -> Result<()> {
        set_published(&self.pool, "inventory_outbox", id).await
    }

    async fn mark_failed(&self, id: EventId) -> Result<()> {
        set_failed(&self.pool, "inventory_outbox", id).await
    }

    async fn exhausted_events(&self, max_retries: u32) -> Result<u64> {
        count_exhausted(&self.pool, "inventory_outbox", max_retries).await
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresInventoryStore {
    async fn is_processed(&self, event_id: EventId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inventory_processed_events WHERE event_id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn apply_order_write(conn: &mut PgConnection, write: &OrderWrite) -> Result<()> {
        let order = &write.order;
        let lines = serde_json::to_value(order.lines())?;
        match write.expected {
            Expected::Absent => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO orders (id, customer_id, lines, total_cents, status, cancel_reason, created_at, updated_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(order.id().as_uuid())
                .bind(order.customer_id().as_uuid())
                .bind(&lines)
                .bind(order.total_amount().cents())
                .bind(order.status().as_str())
                .bind(order.cancel_reason())
                .bind(order.created_at())
                .bind(order.updated_at())
                .bind(order.version().as_i64())
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::DuplicateRow {
                        entity: "order",
                        id: order.id().to_string(),
                    });
                }
            }
            Expected::Version(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = $2, cancel_reason = $3, updated_at = $4, version = $5
                    WHERE id = $1 AND version = $6
                    "#,
                )
                .bind(order.id().as_uuid())
                .bind(order.status().as_str())
                .bind(order.cancel_reason())
                .bind(order.updated_at())
                .bind(order.version().as_i64())
                .bind(expected.as_i64())
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(cas_miss(
                        conn,
                        "order",
                        "SELECT version FROM orders WHERE id = $1",
                        order.id().to_string(),
                        Some(order.id().as_uuid()),
                        None,
                        expected,
                    )
                    .await);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, lines, total_cents, status, cancel_reason, created_at, updated_at, version
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn commit(&self, txn: OrderTxn) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(write) = &txn.order {
            Self::apply_order_write(&mut tx, write).await?;
        }
        for event in &txn.outbox {
            insert_outbox_row(&mut tx, "order_outbox", "order_outbox_pkey", event).await?;
        }
        if let Some(marker) = &txn.processed {
            insert_processed_row(
                &mut tx,
                "order_processed_events",
                "order_processed_events_pkey",
                marker,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOrderStore {
    async fn publishable_events(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEvent>> {
        publishable_rows(&self.pool, "order_outbox", limit, max_retries).await
    }

    async fn mark_published(&self, id: EventId) -> Result<()> {
        set_published(&self.pool, "order_outbox", id).await
    }

    async fn mark_failed(&self, id: EventId) -> Result<()> {
        set_failed(&self.pool, "order_outbox", id).await
    }

    async fn exhausted_events(&self, max_retries: u32) -> Result<u64> {
        count_exhausted(&self.pool, "order_outbox", max_retries).await
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresOrderStore {
    async fn is_processed(&self, event_id: EventId) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM order_processed_events WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }
}
