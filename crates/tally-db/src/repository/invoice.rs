//! # Invoice Repository
//!
//! Headers and lines of sales and purchase invoices.
//!
//! Status changes are guarded by the status the caller read:
//! `UPDATE invoices SET status = ... WHERE id = ? AND status = ?seen`.
//! Two concurrent posts of the same draft cannot both succeed; the loser
//! gets `Conflict`, retries, and then sees `AlreadyPosted`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use tally_core::{DocumentStatus, InvoiceDocument, InvoiceKind, InvoiceLine};

use super::{parse_decimal, parse_money, parse_percentage};
use crate::error::{DbError, DbResult};

const INVOICE_COLUMNS: &str = "id, kind, number, date, counterparty_id, status, is_posted, \
     discount_percent, tax_rate, subtotal, discount_amount, tax_amount, net_total, paid_amount, \
     remaining_amount, notes, created_at, updated_at, posted_at, cancelled_at";

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: String,
    kind: InvoiceKind,
    number: String,
    date: DateTime<Utc>,
    counterparty_id: String,
    status: DocumentStatus,
    is_posted: bool,
    discount_percent: String,
    tax_rate: String,
    subtotal: String,
    discount_amount: String,
    tax_amount: String,
    net_total: String,
    paid_amount: String,
    remaining_amount: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl InvoiceRow {
    fn into_document(self, lines: Vec<InvoiceLine>) -> DbResult<InvoiceDocument> {
        Ok(InvoiceDocument {
            discount_percent: parse_percentage("invoices.discount_percent", &self.discount_percent)?,
            tax_rate: parse_percentage("invoices.tax_rate", &self.tax_rate)?,
            subtotal: parse_money("invoices.subtotal", &self.subtotal)?,
            discount_amount: parse_money("invoices.discount_amount", &self.discount_amount)?,
            tax_amount: parse_money("invoices.tax_amount", &self.tax_amount)?,
            net_total: parse_money("invoices.net_total", &self.net_total)?,
            paid_amount: parse_money("invoices.paid_amount", &self.paid_amount)?,
            remaining_amount: parse_money("invoices.remaining_amount", &self.remaining_amount)?,
            id: self.id,
            kind: self.kind,
            number: self.number,
            date: self.date,
            counterparty_id: self.counterparty_id,
            status: self.status,
            is_posted: self.is_posted,
            notes: self.notes,
            lines,
            created_at: self.created_at,
            updated_at: self.updated_at,
            posted_at: self.posted_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    id: String,
    line_no: i64,
    product_id: String,
    unit_id: String,
    quantity: String,
    unit_price: String,
    line_discount: String,
    line_total: String,
    net_amount: String,
}

impl TryFrom<LineRow> for InvoiceLine {
    type Error = DbError;

    fn try_from(row: LineRow) -> DbResult<Self> {
        Ok(InvoiceLine {
            quantity: parse_decimal("invoice_lines.quantity", &row.quantity)?,
            unit_price: parse_money("invoice_lines.unit_price", &row.unit_price)?,
            line_discount: parse_money("invoice_lines.line_discount", &row.line_discount)?,
            line_total: parse_money("invoice_lines.line_total", &row.line_total)?,
            net_amount: parse_money("invoice_lines.net_amount", &row.net_amount)?,
            id: row.id,
            line_no: row.line_no,
            product_id: row.product_id,
            unit_id: row.unit_id,
        })
    }
}

// =============================================================================
// Unit-of-work functions
// =============================================================================

pub async fn fetch_lines(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Vec<InvoiceLine>> {
    sqlx::query_as::<_, LineRow>(
        "SELECT id, line_no, product_id, unit_id, quantity, unit_price, line_discount, \
                line_total, net_amount \
           FROM invoice_lines WHERE invoice_id = ?1 ORDER BY line_no",
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(InvoiceLine::try_from)
    .collect()
}

/// Loads a document with its lines in `line_no` order.
pub async fn fetch_invoice(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<InvoiceDocument>> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1");
    let Some(row) = sqlx::query_as::<_, InvoiceRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let lines = fetch_lines(conn, id).await?;
    row.into_document(lines).map(Some)
}

async fn insert_lines(conn: &mut SqliteConnection, doc: &InvoiceDocument) -> DbResult<()> {
    for line in &doc.lines {
        sqlx::query(
            "INSERT INTO invoice_lines (id, invoice_id, line_no, product_id, unit_id, quantity, \
                unit_price, line_discount, line_total, net_amount) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&line.id)
        .bind(&doc.id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(&line.unit_id)
        .bind(line.quantity.to_string())
        .bind(line.unit_price.amount().to_string())
        .bind(line.line_discount.amount().to_string())
        .bind(line.line_total.amount().to_string())
        .bind(line.net_amount.amount().to_string())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Inserts a new document with its lines.
pub(crate) async fn insert_invoice(conn: &mut SqliteConnection, doc: &InvoiceDocument) -> DbResult<()> {
    let sql = format!(
        "INSERT INTO invoices ({INVOICE_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
    );
    sqlx::query(&sql)
        .bind(&doc.id)
        .bind(doc.kind)
        .bind(&doc.number)
        .bind(doc.date)
        .bind(&doc.counterparty_id)
        .bind(doc.status)
        .bind(doc.is_posted)
        .bind(doc.discount_percent.value().to_string())
        .bind(doc.tax_rate.value().to_string())
        .bind(doc.subtotal.amount().to_string())
        .bind(doc.discount_amount.amount().to_string())
        .bind(doc.tax_amount.amount().to_string())
        .bind(doc.net_total.amount().to_string())
        .bind(doc.paid_amount.amount().to_string())
        .bind(doc.remaining_amount.amount().to_string())
        .bind(&doc.notes)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(doc.posted_at)
        .bind(doc.cancelled_at)
        .execute(&mut *conn)
        .await?;

    insert_lines(conn, doc).await?;

    debug!(invoice_id = %doc.id, number = %doc.number, lines = doc.lines.len(), "Invoice inserted");
    Ok(())
}

/// Rewrites header fields and lines of a draft.
pub(crate) async fn replace_draft(conn: &mut SqliteConnection, doc: &InvoiceDocument) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE invoices \
            SET date = ?1, counterparty_id = ?2, discount_percent = ?3, tax_rate = ?4, \
                subtotal = ?5, discount_amount = ?6, tax_amount = ?7, net_total = ?8, \
                paid_amount = ?9, remaining_amount = ?10, notes = ?11, updated_at = ?12 \
          WHERE id = ?13 AND status = ?14",
    )
    .bind(doc.date)
    .bind(&doc.counterparty_id)
    .bind(doc.discount_percent.value().to_string())
    .bind(doc.tax_rate.value().to_string())
    .bind(doc.subtotal.amount().to_string())
    .bind(doc.discount_amount.amount().to_string())
    .bind(doc.tax_amount.amount().to_string())
    .bind(doc.net_total.amount().to_string())
    .bind(doc.paid_amount.amount().to_string())
    .bind(doc.remaining_amount.amount().to_string())
    .bind(&doc.notes)
    .bind(doc.updated_at)
    .bind(&doc.id)
    .bind(DocumentStatus::Draft)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict("Invoice", &doc.id));
    }

    sqlx::query("DELETE FROM invoice_lines WHERE invoice_id = ?1")
        .bind(&doc.id)
        .execute(&mut *conn)
        .await?;
    insert_lines(conn, doc).await?;

    debug!(invoice_id = %doc.id, lines = doc.lines.len(), "Draft replaced");
    Ok(())
}

/// Persists status and totals of `doc` if the stored status is still `seen`.
pub(crate) async fn update_status(
    conn: &mut SqliteConnection,
    doc: &InvoiceDocument,
    seen: DocumentStatus,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE invoices \
            SET status = ?1, is_posted = ?2, posted_at = ?3, cancelled_at = ?4, updated_at = ?5, \
                subtotal = ?6, discount_amount = ?7, tax_amount = ?8, net_total = ?9, \
                remaining_amount = ?10 \
          WHERE id = ?11 AND status = ?12",
    )
    .bind(doc.status)
    .bind(doc.is_posted)
    .bind(doc.posted_at)
    .bind(doc.cancelled_at)
    .bind(doc.updated_at)
    .bind(doc.subtotal.amount().to_string())
    .bind(doc.discount_amount.amount().to_string())
    .bind(doc.tax_amount.amount().to_string())
    .bind(doc.net_total.amount().to_string())
    .bind(doc.remaining_amount.amount().to_string())
    .bind(&doc.id)
    .bind(seen)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict("Invoice", &doc.id));
    }
    debug!(invoice_id = %doc.id, status = ?doc.status, "Invoice status updated");
    Ok(())
}

/// Deletes a draft and, by cascade, its lines. Returns false if no draft
/// with that id exists.
pub(crate) async fn delete_draft(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM invoices WHERE id = ?1 AND status = ?2")
        .bind(id)
        .bind(DocumentStatus::Draft)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Repository
// =============================================================================

/// Read access to invoices. Writes go through `InvoiceService`.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<InvoiceDocument>> {
        let mut conn = self.pool.acquire().await?;
        fetch_invoice(&mut conn, id).await
    }

    pub async fn get_by_number(&self, number: &str) -> DbResult<Option<InvoiceDocument>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM invoices WHERE number = ?1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        match id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    /// Headers of one kind, newest first. Lines are not loaded.
    pub async fn list(
        &self,
        kind: InvoiceKind,
        status: Option<DocumentStatus>,
    ) -> DbResult<Vec<InvoiceDocument>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
              WHERE kind = ?1 AND (?2 IS NULL OR status = ?2) \
              ORDER BY date DESC, number DESC"
        );
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(kind)
            .bind(status)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_document(Vec::new()))
            .collect()
    }
}
