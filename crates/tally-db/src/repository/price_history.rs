//! # Price History Repository
//!
//! Purchase price changes captured while posting purchase invoices.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};

use tally_core::Money;

use super::{new_id, parse_money};
use crate::error::{DbError, DbResult};

/// One recorded purchase price change.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub id: String,
    pub product_id: String,
    pub old_price: Money,
    pub new_price: Money,
    pub invoice_id: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PriceChangeRow {
    id: String,
    product_id: String,
    old_price: String,
    new_price: String,
    invoice_id: Option<String>,
    changed_at: DateTime<Utc>,
}

impl TryFrom<PriceChangeRow> for PriceChange {
    type Error = DbError;

    fn try_from(row: PriceChangeRow) -> DbResult<Self> {
        Ok(PriceChange {
            old_price: parse_money("price_history.old_price", &row.old_price)?,
            new_price: parse_money("price_history.new_price", &row.new_price)?,
            id: row.id,
            product_id: row.product_id,
            invoice_id: row.invoice_id,
            changed_at: row.changed_at,
        })
    }
}

pub(crate) async fn insert_change(
    conn: &mut SqliteConnection,
    product_id: &str,
    old_price: Money,
    new_price: Money,
    invoice_id: &str,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO price_history (id, product_id, old_price, new_price, invoice_id, changed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(new_id())
    .bind(product_id)
    .bind(old_price.amount().to_string())
    .bind(new_price.amount().to_string())
    .bind(invoice_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Price changes of a product, oldest first.
pub async fn history_for(pool: &SqlitePool, product_id: &str) -> DbResult<Vec<PriceChange>> {
    sqlx::query_as::<_, PriceChangeRow>(
        "SELECT id, product_id, old_price, new_price, invoice_id, changed_at \
           FROM price_history WHERE product_id = ?1 ORDER BY changed_at, rowid",
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(PriceChange::try_from)
    .collect()
}
