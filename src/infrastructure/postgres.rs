//! Postgres adapters
//!
//! Stock moves only through `UPDATE ... WHERE stock = $expected` or an in-row
//! increment. Hold placement locks the product row so that reading other sessions'
//! holds and writing this one happen as one step. Orders and return cases are stored
//! as JSONB documents next to an integer version column used for conditional writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::application::ports::{HoldOutcome, HoldRequest, HoldStore, OrderStore, ReturnStore, StockStore};
use crate::domain::aggregates::reservation;
use crate::domain::aggregates::{Hold, Order, OrderRecord, Product, ReturnCase, ReturnRecord};
use crate::domain::value_objects::{Money, OrderId, PaymentReference, ProductId, ReturnCaseId, SessionId};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: i64, name: String, price: Decimal, currency: String, stock: i32 }

impl TryFrom<ProductRow> for Product {
    type Error = EcommerceError;
    fn try_from(row: ProductRow) -> Result<Self> {
        Ok(Product { id: ProductId(row.id), name: row.name, price: Money::new(row.price, &row.currency), stock: from_db(row.stock)? })
    }
}

#[derive(sqlx::FromRow)]
struct HoldRow { session_id: String, product_id: i64, quantity: i32, reserved_at: DateTime<Utc>, expires_at: DateTime<Utc> }

impl TryFrom<HoldRow> for Hold {
    type Error = EcommerceError;
    fn try_from(row: HoldRow) -> Result<Self> {
        Ok(Hold {
            session_id: SessionId::new(row.session_id).map_err(|e| EcommerceError::Storage(e.to_string()))?,
            product_id: ProductId(row.product_id),
            quantity: from_db(row.quantity)?,
            reserved_at: row.reserved_at,
            expires_at: row.expires_at,
        })
    }
}

fn to_db(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| EcommerceError::Validation(format!("quantity {value} out of range")))
}

fn from_db(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| EcommerceError::Storage(format!("negative quantity {value} in store")))
}

const HOLD_COLUMNS: &str = "session_id, product_id, quantity, reserved_at, expires_at";

fn holds(rows: Vec<HoldRow>) -> Result<Vec<Hold>> {
    rows.into_iter().map(Hold::try_from).collect()
}

#[async_trait]
impl StockStore for PgStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT id, name, price, currency, stock FROM products WHERE id = $1")
            .bind(id.0).fetch_optional(&self.pool).await?
            .map(Product::try_from).transpose()
    }

    async fn read_stock(&self, id: ProductId) -> Result<Option<u32>> {
        let stock: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(id.0).fetch_optional(&self.pool).await?;
        stock.map(from_db).transpose()
    }

    async fn compare_and_set_stock(&self, id: ProductId, expected: u32, new: u32) -> Result<bool> {
        let done = sqlx::query("UPDATE products SET stock = $1, updated_at = NOW() WHERE id = $2 AND stock = $3")
            .bind(to_db(new)?).bind(id.0).bind(to_db(expected)?)
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn add_stock(&self, id: ProductId, quantity: u32) -> Result<u32> {
        let stock: Option<i32> = sqlx::query_scalar("UPDATE products SET stock = stock + $1, updated_at = NOW() WHERE id = $2 RETURNING stock")
            .bind(to_db(quantity)?).bind(id.0)
            .fetch_optional(&self.pool).await?;
        from_db(stock.ok_or(EcommerceError::ProductNotFound(id))?)
    }
}

#[async_trait]
impl HoldStore for PgStore {
    async fn place_hold(&self, request: HoldRequest) -> Result<HoldOutcome> {
        let mut tx = self.pool.begin().await?;
        let stock: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1 FOR UPDATE")
            .bind(request.product_id.0).fetch_optional(&mut *tx).await?;
        let stock = from_db(stock.ok_or(EcommerceError::ProductNotFound(request.product_id))?)?;

        let rows: Vec<HoldRow> = sqlx::query_as(&format!("SELECT {HOLD_COLUMNS} FROM reservations WHERE product_id = $1"))
            .bind(request.product_id.0).fetch_all(&mut *tx).await?;
        let current = holds(rows)?;
        let (mine, others): (Vec<_>, Vec<_>) = current.iter().partition(|h| h.session_id == request.session_id);
        let held_by_others = reservation::held_quantity(others.iter().copied(), request.product_id, request.now);

        let hold = match reservation::place(
            mine.first().copied(), held_by_others, stock, &request.session_id,
            request.product_id, request.quantity, request.now, request.ttl,
        ) {
            Ok(hold) => hold,
            Err(available) => {
                tx.rollback().await?;
                return Ok(HoldOutcome::Refused { available });
            }
        };

        sqlx::query(
            "INSERT INTO reservations (session_id, product_id, quantity, reserved_at, expires_at) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (session_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity, reserved_at = EXCLUDED.reserved_at, expires_at = EXCLUDED.expires_at",
        )
        .bind(hold.session_id.as_str()).bind(hold.product_id.0).bind(to_db(hold.quantity)?)
        .bind(hold.reserved_at).bind(hold.expires_at)
        .execute(&mut *tx).await?;
        tx.commit().await?;

        let available = stock.saturating_sub(held_by_others).saturating_sub(hold.quantity);
        Ok(HoldOutcome::Placed { hold, available })
    }

    async fn release_hold(&self, session_id: &SessionId, product_id: ProductId) -> Result<Option<Hold>> {
        let row: Option<HoldRow> = sqlx::query_as(&format!(
            "DELETE FROM reservations WHERE session_id = $1 AND product_id = $2 RETURNING {HOLD_COLUMNS}"
        ))
        .bind(session_id.as_str()).bind(product_id.0)
        .fetch_optional(&self.pool).await?;
        row.map(Hold::try_from).transpose()
    }

    async fn release_session(&self, session_id: &SessionId) -> Result<Vec<Hold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!("DELETE FROM reservations WHERE session_id = $1 RETURNING {HOLD_COLUMNS}"))
            .bind(session_id.as_str()).fetch_all(&self.pool).await?;
        holds(rows)
    }

    async fn live_holds(&self, product_id: ProductId, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!("SELECT {HOLD_COLUMNS} FROM reservations WHERE product_id = $1 AND expires_at > $2"))
            .bind(product_id.0).bind(now).fetch_all(&self.pool).await?;
        holds(rows)
    }

    async fn session_holds(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!("SELECT {HOLD_COLUMNS} FROM reservations WHERE session_id = $1 AND expires_at > $2"))
            .bind(session_id.as_str()).bind(now).fetch_all(&self.pool).await?;
        holds(rows)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM reservations WHERE expires_at <= $1").bind(now).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }
}

// =============================================================================
// Orders and return cases
// =============================================================================

fn stored_order(order: &Order) -> OrderRecord {
    let mut record = order.record().clone();
    record.version += 1;
    record.updated_at = Utc::now();
    record
}

fn stored_return(case: &ReturnCase) -> ReturnRecord {
    let mut record = case.record().clone();
    record.version += 1;
    record.updated_at = Utc::now();
    record
}

async fn write_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<bool> {
    let record = stored_order(order);
    let done = sqlx::query("UPDATE orders SET status = $2, record = $3, version = $4, updated_at = $5 WHERE id = $1 AND version = $6")
        .bind(order.id().0).bind(record.status.as_str()).bind(Json(&record)).bind(record.version)
        .bind(record.updated_at).bind(order.version())
        .execute(&mut **tx).await?;
    Ok(done.rows_affected() == 1)
}

async fn write_return(tx: &mut Transaction<'_, Postgres>, case: &ReturnCase) -> Result<bool> {
    let record = stored_return(case);
    let done = sqlx::query("UPDATE return_cases SET status = $2, record = $3, version = $4, updated_at = $5 WHERE id = $1 AND version = $6")
        .bind(case.id().0).bind(record.status.as_str()).bind(Json(&record)).bind(record.version)
        .bind(record.updated_at).bind(case.version())
        .execute(&mut **tx).await?;
    Ok(done.rows_affected() == 1)
}

fn order_from_row((Json(mut record), version): (Json<OrderRecord>, i64)) -> Order {
    record.version = version;
    Order::restore(record)
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<bool> {
        let record = stored_order(order);
        let done = sqlx::query(
            "INSERT INTO orders (id, payment_reference, status, record, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (payment_reference) DO NOTHING",
        )
        .bind(record.id.0).bind(&record.payment_reference.0).bind(record.status.as_str()).bind(Json(&record))
        .bind(record.version).bind(record.created_at).bind(record.updated_at)
        .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<(Json<OrderRecord>, i64)> = sqlx::query_as("SELECT record, version FROM orders WHERE id = $1")
            .bind(id.0).fetch_optional(&self.pool).await?;
        Ok(row.map(order_from_row))
    }

    async fn order_by_payment(&self, payment_reference: &PaymentReference) -> Result<Option<Order>> {
        let row: Option<(Json<OrderRecord>, i64)> = sqlx::query_as("SELECT record, version FROM orders WHERE payment_reference = $1")
            .bind(&payment_reference.0).fetch_optional(&self.pool).await?;
        Ok(row.map(order_from_row))
    }

    async fn update_order(&self, order: &Order) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !write_order(&mut tx, order).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl ReturnStore for PgStore {
    async fn open_return(&self, case: &ReturnCase, order: &Order) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !write_order(&mut tx, order).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        let record = stored_return(case);
        sqlx::query(
            "INSERT INTO return_cases (id, order_id, status, record, version, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id.0).bind(record.order_id.0).bind(record.status.as_str()).bind(Json(&record))
        .bind(record.version).bind(record.created_at).bind(record.updated_at)
        .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn return_case(&self, id: ReturnCaseId) -> Result<Option<ReturnCase>> {
        let row: Option<(Json<ReturnRecord>, i64)> = sqlx::query_as("SELECT record, version FROM return_cases WHERE id = $1")
            .bind(id.0).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(mut record), version)| {
            record.version = version;
            ReturnCase::restore(record)
        }))
    }

    async fn update_return(&self, case: &ReturnCase) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !write_return(&mut tx, case).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn resolve_return(&self, case: &ReturnCase, order: &Order) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !write_return(&mut tx, case).await? || !write_order(&mut tx, order).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }
}
