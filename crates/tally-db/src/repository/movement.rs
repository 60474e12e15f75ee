//! # Stock Movement Repository
//!
//! Append-only. There is no UPDATE or DELETE on `stock_movements`;
//! corrections are new rows.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};

use tally_core::{MovementType, ReferenceKind, StockMovement};

use super::parse_decimal;
use crate::error::{DbError, DbResult};

const MOVEMENT_COLUMNS: &str = "id, product_id, movement_type, quantity, unit_id, \
     quantity_in_main_unit, reference_kind, reference_id, movement_date, actor, notes";

#[derive(Debug, FromRow)]
struct MovementRow {
    id: String,
    product_id: String,
    movement_type: MovementType,
    quantity: String,
    unit_id: String,
    quantity_in_main_unit: String,
    reference_kind: ReferenceKind,
    reference_id: Option<String>,
    movement_date: DateTime<Utc>,
    actor: Option<String>,
    notes: Option<String>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = DbError;

    fn try_from(row: MovementRow) -> DbResult<Self> {
        Ok(StockMovement {
            quantity: parse_decimal("stock_movements.quantity", &row.quantity)?,
            quantity_in_main_unit: parse_decimal(
                "stock_movements.quantity_in_main_unit",
                &row.quantity_in_main_unit,
            )?,
            id: row.id,
            product_id: row.product_id,
            movement_type: row.movement_type,
            unit_id: row.unit_id,
            reference_kind: row.reference_kind,
            reference_id: row.reference_id,
            movement_date: row.movement_date,
            actor: row.actor,
            notes: row.notes,
        })
    }
}

pub(crate) async fn insert_movement(
    conn: &mut SqliteConnection,
    movement: &StockMovement,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO stock_movements (id, product_id, movement_type, quantity, unit_id, \
            quantity_in_main_unit, reference_kind, reference_id, movement_date, actor, notes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .bind(&movement.id)
    .bind(&movement.product_id)
    .bind(movement.movement_type)
    .bind(movement.quantity.to_string())
    .bind(&movement.unit_id)
    .bind(movement.quantity_in_main_unit.to_string())
    .bind(movement.reference_kind)
    .bind(&movement.reference_id)
    .bind(movement.movement_date)
    .bind(&movement.actor)
    .bind(&movement.notes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Full history of a product, oldest first.
pub async fn fetch_for_product(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<Vec<StockMovement>> {
    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
          WHERE product_id = ?1 ORDER BY movement_date, rowid"
    );
    sqlx::query_as::<_, MovementRow>(&sql)
        .bind(product_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(StockMovement::try_from)
        .collect()
}

/// Movements written by one document, ticket or count, oldest first.
pub async fn fetch_for_reference(
    conn: &mut SqliteConnection,
    kind: ReferenceKind,
    reference_id: &str,
) -> DbResult<Vec<StockMovement>> {
    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
          WHERE reference_kind = ?1 AND reference_id = ?2 ORDER BY movement_date, rowid"
    );
    sqlx::query_as::<_, MovementRow>(&sql)
        .bind(kind)
        .bind(reference_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(StockMovement::try_from)
        .collect()
}

/// Read access to movement history.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    pub async fn for_product(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        fetch_for_product(&mut conn, product_id).await
    }

    pub async fn for_reference(
        &self,
        kind: ReferenceKind,
        reference_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        fetch_for_reference(&mut conn, kind, reference_id).await
    }

    /// Number of movements for a product.
    pub async fn count_for_product(&self, product_id: &str) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE product_id = ?1")
            .bind(product_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
