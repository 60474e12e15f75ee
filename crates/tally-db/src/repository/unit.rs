//! # Unit Repository
//!
//! Units of measure and per-product conversion rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use tally_core::validation::{validate_code, validate_conversion_factor, validate_name};
use tally_core::{CoreError, EntityKind, Unit, UnitConversion};

use super::{new_id, parse_decimal};
use crate::error::{DbError, DbResult};
use crate::repository::product::fetch_product;

#[derive(Debug, FromRow)]
struct UnitRow {
    id: String,
    name: String,
    symbol: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<UnitRow> for Unit {
    fn from(row: UnitRow) -> Self {
        Unit {
            id: row.id,
            name: row.name,
            symbol: row.symbol,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversionRow {
    id: String,
    product_id: String,
    unit_id: String,
    conversion_factor: String,
    is_active: bool,
}

impl TryFrom<ConversionRow> for UnitConversion {
    type Error = DbError;

    fn try_from(row: ConversionRow) -> DbResult<Self> {
        Ok(UnitConversion {
            conversion_factor: parse_decimal(
                "unit_conversions.conversion_factor",
                &row.conversion_factor,
            )?,
            id: row.id,
            product_id: row.product_id,
            unit_id: row.unit_id,
            is_active: row.is_active,
        })
    }
}

// =============================================================================
// Unit-of-work functions
// =============================================================================

pub async fn fetch_unit(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Unit>> {
    let row = sqlx::query_as::<_, UnitRow>(
        "SELECT id, name, symbol, is_active, created_at FROM units WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(Unit::from))
}

/// All conversion rows of a product, active or not.
pub async fn fetch_conversions(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> DbResult<Vec<UnitConversion>> {
    sqlx::query_as::<_, ConversionRow>(
        "SELECT id, product_id, unit_id, conversion_factor, is_active \
           FROM unit_conversions WHERE product_id = ?1",
    )
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(UnitConversion::try_from)
    .collect()
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct UnitRepository {
    pool: SqlitePool,
}

impl UnitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UnitRepository { pool }
    }

    pub async fn create(&self, name: &str, symbol: &str) -> DbResult<Unit> {
        validate_name("name", name)?;
        validate_code("symbol", symbol)?;

        let unit = Unit {
            id: new_id(),
            name: name.trim().to_string(),
            symbol: symbol.trim().to_string(),
            is_active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO units (id, name, symbol, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&unit.id)
        .bind(&unit.name)
        .bind(&unit.symbol)
        .bind(unit.is_active)
        .bind(unit.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, unit.symbol.clone()),
            other => other,
        })?;

        debug!(symbol = %unit.symbol, "Unit created");
        Ok(unit)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Unit>> {
        let mut conn = self.pool.acquire().await?;
        fetch_unit(&mut conn, id).await
    }

    pub async fn list(&self) -> DbResult<Vec<Unit>> {
        let rows = sqlx::query_as::<_, UnitRow>(
            "SELECT id, name, symbol, is_active, created_at FROM units ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Unit::from).collect())
    }

    /// Maps `unit_id` to `factor` main units for a product.
    ///
    /// ## Errors
    /// - `Validation` if the factor is not positive
    /// - `NotFound` for an unknown product or unit
    /// - `ReferentialIntegrity` if `unit_id` is the product's main unit
    /// - `UniqueViolation` if the pair is already mapped
    pub async fn add_conversion(
        &self,
        product_id: &str,
        unit_id: &str,
        factor: Decimal,
    ) -> DbResult<UnitConversion> {
        validate_conversion_factor(factor)?;

        let mut conn = self.pool.acquire().await?;
        let product = fetch_product(&mut conn, product_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Product, product_id))?;
        if fetch_unit(&mut conn, unit_id).await?.is_none() {
            return Err(CoreError::not_found(EntityKind::Unit, unit_id).into());
        }
        if product.main_unit_id == unit_id {
            return Err(CoreError::integrity(
                EntityKind::UnitConversion,
                unit_id,
                "the main unit needs no conversion row",
            )
            .into());
        }

        let conversion = UnitConversion {
            id: new_id(),
            product_id: product_id.to_string(),
            unit_id: unit_id.to_string(),
            conversion_factor: factor,
            is_active: true,
        };

        sqlx::query(
            "INSERT INTO unit_conversions (id, product_id, unit_id, conversion_factor, is_active) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&conversion.id)
        .bind(&conversion.product_id)
        .bind(&conversion.unit_id)
        .bind(conversion.conversion_factor.to_string())
        .bind(conversion.is_active)
        .execute(&mut *conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => {
                DbError::duplicate(field, format!("{product_id}/{unit_id}"))
            }
            other => other,
        })?;

        debug!(product_id, unit_id, factor = %factor, "Conversion added");
        Ok(conversion)
    }

    /// Switches a conversion row on or off. Inactive rows fail conversion.
    pub async fn set_conversion_active(&self, conversion_id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE unit_conversions SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(conversion_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(EntityKind::UnitConversion, conversion_id).into());
        }
        Ok(())
    }

    pub async fn conversions_for(&self, product_id: &str) -> DbResult<Vec<UnitConversion>> {
        let mut conn = self.pool.acquire().await?;
        fetch_conversions(&mut conn, product_id).await
    }
}
