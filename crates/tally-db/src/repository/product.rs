//! # Product Repository
//!
//! Product master data and the versioned stock column.
//!
//! `current_stock` is only written by [`update_stock`], which the stock
//! ledger calls inside a unit of work:
//!
//! ```text
//! UPDATE products
//!    SET current_stock = ?new, version = version + 1
//!  WHERE id = ? AND version = ?seen      ── 0 rows ──► DbError::Conflict
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use tally_core::validation::{validate_code, validate_name, validate_non_negative, validate_non_negative_money};
use tally_core::{Money, Product};

use super::{new_id, parse_decimal, parse_money};
use crate::error::{DbError, DbResult};

const PRODUCT_COLUMNS: &str = "id, code, name, category_id, main_unit_id, current_stock, \
     min_stock, purchase_price, sale_price, is_active, version, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ProductRow {
    id: String,
    code: String,
    name: String,
    category_id: Option<String>,
    main_unit_id: String,
    current_stock: String,
    min_stock: String,
    purchase_price: String,
    sale_price: String,
    is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> DbResult<Self> {
        Ok(Product {
            current_stock: parse_decimal("products.current_stock", &row.current_stock)?,
            min_stock: parse_decimal("products.min_stock", &row.min_stock)?,
            purchase_price: parse_money("products.purchase_price", &row.purchase_price)?,
            sale_price: parse_money("products.sale_price", &row.sale_price)?,
            id: row.id,
            code: row.code,
            name: row.name,
            category_id: row.category_id,
            main_unit_id: row.main_unit_id,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Input for [`ProductRepository::create`]. Products always start with zero
/// stock; opening quantities go through the inventory service.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub category_id: Option<String>,
    pub main_unit_id: String,
    pub min_stock: Decimal,
    pub purchase_price: Money,
    pub sale_price: Money,
}

// =============================================================================
// Unit-of-work functions
// =============================================================================

pub async fn fetch_product(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
    sqlx::query_as::<_, ProductRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Product::try_from)
        .transpose()
}

/// Writes a new stock figure if the row is still at `expected_version`.
///
/// Returns the new version.
pub(crate) async fn update_stock(
    conn: &mut SqliteConnection,
    id: &str,
    new_stock: Decimal,
    expected_version: i64,
) -> DbResult<i64> {
    let result = sqlx::query(
        "UPDATE products \
            SET current_stock = ?1, version = version + 1, updated_at = ?2 \
          WHERE id = ?3 AND version = ?4",
    )
    .bind(new_stock.to_string())
    .bind(Utc::now())
    .bind(id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict("Product", id));
    }

    debug!(product_id = %id, stock = %new_stock, version = expected_version + 1, "Stock updated");
    Ok(expected_version + 1)
}

/// Updates the purchase price. Not versioned: prices are not ledgered.
pub(crate) async fn update_purchase_price(
    conn: &mut SqliteConnection,
    id: &str,
    price: Money,
) -> DbResult<()> {
    sqlx::query("UPDATE products SET purchase_price = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(price.amount().to_string())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for product master data.
///
/// ## Usage
/// ```rust,ignore
/// let product = db.products().get_by_code("WATER-500").await?;
/// let low = db.products().low_stock().await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Creates a product with zero stock.
    ///
    /// ## Errors
    /// - `Validation` for a malformed code or name, negative prices
    /// - `UniqueViolation` if the code is taken
    /// - `ForeignKeyViolation` if the main unit doesn't exist
    pub async fn create(&self, input: NewProduct) -> DbResult<Product> {
        validate_code("code", &input.code)?;
        validate_name("name", &input.name)?;
        validate_non_negative("min_stock", input.min_stock)?;
        validate_non_negative_money("purchase_price", input.purchase_price)?;
        validate_non_negative_money("sale_price", input.sale_price)?;

        let now = Utc::now();
        let product = Product {
            id: new_id(),
            code: input.code.trim().to_string(),
            name: input.name.trim().to_string(),
            category_id: input.category_id,
            main_unit_id: input.main_unit_id,
            current_stock: Decimal::ZERO,
            min_stock: input.min_stock,
            purchase_price: input.purchase_price,
            sale_price: input.sale_price,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        debug!(code = %product.code, "Inserting product");

        sqlx::query(
            "INSERT INTO products (id, code, name, category_id, main_unit_id, current_stock, \
                min_stock, purchase_price, sale_price, is_active, version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&product.id)
        .bind(&product.code)
        .bind(&product.name)
        .bind(&product.category_id)
        .bind(&product.main_unit_id)
        .bind(product.current_stock.to_string())
        .bind(product.min_stock.to_string())
        .bind(product.purchase_price.amount().to_string())
        .bind(product.sale_price.amount().to_string())
        .bind(product.is_active)
        .bind(product.version)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, product.code.clone()),
            other => other,
        })?;

        Ok(product)
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id).await
    }

    /// Gets a product by its business code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?
            .map(Product::try_from)
            .transpose()
    }

    /// Lists active products ordered by name.
    pub async fn list_active(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY name");
        sqlx::query_as::<_, ProductRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Product::try_from)
            .collect()
    }

    /// Active products at or below their minimum stock.
    ///
    /// Compared in Rust: TEXT decimals don't order numerically in SQL.
    pub async fn low_stock(&self) -> DbResult<Vec<Product>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(Product::is_low_on_stock)
            .collect())
    }

    /// Soft-deletes a product. Its history stays intact.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = 0, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_create_and_get_product() {
        let db = test_support::database().await;
        let pcs = test_support::unit(&db, "Piece", "pcs").await;

        let created = db
            .products()
            .create(NewProduct {
                code: "WATER-500".into(),
                name: "Water 500ml".into(),
                category_id: None,
                main_unit_id: pcs.id.clone(),
                min_stock: dec!(5),
                purchase_price: Money::new(dec!(0.40)),
                sale_price: Money::new(dec!(1.00)),
            })
            .await
            .unwrap();

        assert_eq!(created.current_stock, Decimal::ZERO);
        assert_eq!(created.version, 0);

        let fetched = db.products().get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.code, "WATER-500");
        assert_eq!(fetched.sale_price, Money::new(dec!(1.00)));
        assert_eq!(fetched.min_stock, dec!(5));

        let by_code = db.products().get_by_code("WATER-500").await.unwrap();
        assert_eq!(by_code.map(|p| p.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let db = test_support::database().await;
        let pcs = test_support::unit(&db, "Piece", "pcs").await;
        test_support::product(&db, "DUP", &pcs.id).await;

        let err = db
            .products()
            .create(NewProduct {
                code: "DUP".into(),
                name: "Other".into(),
                category_id: None,
                main_unit_id: pcs.id.clone(),
                min_stock: Decimal::ZERO,
                purchase_price: Money::zero(),
                sale_price: Money::zero(),
            })
            .await
            .unwrap_err();

        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_unknown_main_unit_rejected() {
        let db = test_support::database().await;

        let err = db
            .products()
            .create(NewProduct {
                code: "ORPHAN".into(),
                name: "Orphan".into(),
                category_id: None,
                main_unit_id: "missing".into(),
                min_stock: Decimal::ZERO,
                purchase_price: Money::zero(),
                sale_price: Money::zero(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let db = test_support::database().await;
        let pcs = test_support::unit(&db, "Piece", "pcs").await;
        let product = test_support::product(&db, "P1", &pcs.id).await;

        let mut uow = db.begin().await.unwrap();
        let v1 = update_stock(uow.conn(), &product.id, dec!(3), product.version)
            .await
            .unwrap();
        assert_eq!(v1, product.version + 1);

        let err = update_stock(uow.conn(), &product.id, dec!(4), product.version)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_corrupt_stock_value() {
        let db = test_support::database().await;
        let pcs = test_support::unit(&db, "Piece", "pcs").await;
        let product = test_support::product(&db, "P1", &pcs.id).await;

        sqlx::query("UPDATE products SET current_stock = 'lots' WHERE id = ?1")
            .bind(&product.id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.products().get_by_id(&product.id).await.unwrap_err();
        assert!(matches!(err, DbError::CorruptValue { .. }));
    }

    #[tokio::test]
    async fn test_low_stock() {
        let db = test_support::database().await;
        let pcs = test_support::unit(&db, "Piece", "pcs").await;
        // min_stock 5, stock 0
        let low = test_support::product(&db, "LOW", &pcs.id).await;

        let products = db.products().low_stock().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, low.id);

        db.products().deactivate(&low.id).await.unwrap();
        assert!(db.products().low_stock().await.unwrap().is_empty());
    }
}
