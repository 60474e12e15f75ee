//! # Ticket Repository
//!
//! POS tickets with their lines and payments.
//!
//! A ticket is saved whole: header update plus delete-and-reinsert of lines
//! and payments, inside the caller's unit of work. Line order is kept in
//! the `position` column.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use tally_core::pos::{PaymentMethod, Ticket, TicketLine, TicketPayment, TicketStatus, TicketType};

use super::{parse_decimal, parse_money, parse_percentage};
use crate::error::{DbError, DbResult};

const TICKET_COLUMNS: &str = "id, number, ticket_type, cashier_id, session_id, status, subtotal, \
     discount_percent, discount_amount, tax_rate, tax_amount, total, amount_paid, change_amount, \
     created_at, updated_at, completed_at, voided_at";

#[derive(Debug, FromRow)]
struct TicketRow {
    id: String,
    number: String,
    ticket_type: TicketType,
    cashier_id: String,
    session_id: Option<String>,
    status: TicketStatus,
    subtotal: String,
    discount_percent: String,
    discount_amount: String,
    tax_rate: String,
    tax_amount: String,
    total: String,
    amount_paid: String,
    change_amount: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    voided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct TicketLineRow {
    id: String,
    product_id: String,
    unit_id: String,
    quantity: String,
    unit_price: String,
    discount_percent: String,
    discount_amount: String,
    line_total: String,
}

impl TryFrom<TicketLineRow> for TicketLine {
    type Error = DbError;

    fn try_from(row: TicketLineRow) -> DbResult<Self> {
        Ok(TicketLine {
            quantity: parse_decimal("pos_ticket_lines.quantity", &row.quantity)?,
            unit_price: parse_money("pos_ticket_lines.unit_price", &row.unit_price)?,
            discount_percent: parse_percentage(
                "pos_ticket_lines.discount_percent",
                &row.discount_percent,
            )?,
            discount_amount: parse_money("pos_ticket_lines.discount_amount", &row.discount_amount)?,
            line_total: parse_money("pos_ticket_lines.line_total", &row.line_total)?,
            id: row.id,
            product_id: row.product_id,
            unit_id: row.unit_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: String,
    method: PaymentMethod,
    amount: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for TicketPayment {
    type Error = DbError;

    fn try_from(row: PaymentRow) -> DbResult<Self> {
        Ok(TicketPayment {
            amount: parse_money("pos_payments.amount", &row.amount)?,
            id: row.id,
            method: row.method,
            created_at: row.created_at,
        })
    }
}

impl TicketRow {
    fn into_ticket(self, lines: Vec<TicketLine>, payments: Vec<TicketPayment>) -> DbResult<Ticket> {
        Ok(Ticket {
            subtotal: parse_money("pos_tickets.subtotal", &self.subtotal)?,
            discount_percent: parse_percentage("pos_tickets.discount_percent", &self.discount_percent)?,
            discount_amount: parse_money("pos_tickets.discount_amount", &self.discount_amount)?,
            tax_rate: parse_percentage("pos_tickets.tax_rate", &self.tax_rate)?,
            tax_amount: parse_money("pos_tickets.tax_amount", &self.tax_amount)?,
            total: parse_money("pos_tickets.total", &self.total)?,
            amount_paid: parse_money("pos_tickets.amount_paid", &self.amount_paid)?,
            change_amount: parse_money("pos_tickets.change_amount", &self.change_amount)?,
            id: self.id,
            number: self.number,
            ticket_type: self.ticket_type,
            cashier_id: self.cashier_id,
            session_id: self.session_id,
            status: self.status,
            lines,
            payments,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            voided_at: self.voided_at,
        })
    }
}

// =============================================================================
// Unit-of-work functions
// =============================================================================

pub async fn fetch_ticket(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Ticket>> {
    let sql = format!("SELECT {TICKET_COLUMNS} FROM pos_tickets WHERE id = ?1");
    let Some(row) = sqlx::query_as::<_, TicketRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let lines = sqlx::query_as::<_, TicketLineRow>(
        "SELECT id, product_id, unit_id, quantity, unit_price, discount_percent, \
                discount_amount, line_total \
           FROM pos_ticket_lines WHERE ticket_id = ?1 ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(TicketLine::try_from)
    .collect::<DbResult<Vec<_>>>()?;

    let payments = sqlx::query_as::<_, PaymentRow>(
        "SELECT id, method, amount, created_at FROM pos_payments \
          WHERE ticket_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(TicketPayment::try_from)
    .collect::<DbResult<Vec<_>>>()?;

    row.into_ticket(lines, payments).map(Some)
}

async fn insert_children(conn: &mut SqliteConnection, ticket: &Ticket) -> DbResult<()> {
    for (position, line) in ticket.lines.iter().enumerate() {
        sqlx::query(
            "INSERT INTO pos_ticket_lines (id, ticket_id, position, product_id, unit_id, quantity, \
                unit_price, discount_percent, discount_amount, line_total) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&line.id)
        .bind(&ticket.id)
        .bind(position as i64)
        .bind(&line.product_id)
        .bind(&line.unit_id)
        .bind(line.quantity.to_string())
        .bind(line.unit_price.amount().to_string())
        .bind(line.discount_percent.value().to_string())
        .bind(line.discount_amount.amount().to_string())
        .bind(line.line_total.amount().to_string())
        .execute(&mut *conn)
        .await?;
    }

    for payment in &ticket.payments {
        sqlx::query(
            "INSERT INTO pos_payments (id, ticket_id, method, amount, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&payment.id)
        .bind(&ticket.id)
        .bind(payment.method)
        .bind(payment.amount.amount().to_string())
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn insert_ticket(conn: &mut SqliteConnection, ticket: &Ticket) -> DbResult<()> {
    let sql = format!(
        "INSERT INTO pos_tickets ({TICKET_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
    );
    sqlx::query(&sql)
        .bind(&ticket.id)
        .bind(&ticket.number)
        .bind(ticket.ticket_type)
        .bind(&ticket.cashier_id)
        .bind(&ticket.session_id)
        .bind(ticket.status)
        .bind(ticket.subtotal.amount().to_string())
        .bind(ticket.discount_percent.value().to_string())
        .bind(ticket.discount_amount.amount().to_string())
        .bind(ticket.tax_rate.value().to_string())
        .bind(ticket.tax_amount.amount().to_string())
        .bind(ticket.total.amount().to_string())
        .bind(ticket.amount_paid.amount().to_string())
        .bind(ticket.change_amount.amount().to_string())
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .bind(ticket.completed_at)
        .bind(ticket.voided_at)
        .execute(&mut *conn)
        .await?;

    insert_children(conn, ticket).await?;
    debug!(ticket_id = %ticket.id, number = %ticket.number, "Ticket inserted");
    Ok(())
}

/// Saves the whole ticket if its stored status is still `seen`.
pub(crate) async fn save_ticket(
    conn: &mut SqliteConnection,
    ticket: &Ticket,
    seen: TicketStatus,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE pos_tickets \
            SET status = ?1, subtotal = ?2, discount_percent = ?3, discount_amount = ?4, \
                tax_rate = ?5, tax_amount = ?6, total = ?7, amount_paid = ?8, change_amount = ?9, \
                updated_at = ?10, completed_at = ?11, voided_at = ?12 \
          WHERE id = ?13 AND status = ?14",
    )
    .bind(ticket.status)
    .bind(ticket.subtotal.amount().to_string())
    .bind(ticket.discount_percent.value().to_string())
    .bind(ticket.discount_amount.amount().to_string())
    .bind(ticket.tax_rate.value().to_string())
    .bind(ticket.tax_amount.amount().to_string())
    .bind(ticket.total.amount().to_string())
    .bind(ticket.amount_paid.amount().to_string())
    .bind(ticket.change_amount.amount().to_string())
    .bind(ticket.updated_at)
    .bind(ticket.completed_at)
    .bind(ticket.voided_at)
    .bind(&ticket.id)
    .bind(seen)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict("Ticket", &ticket.id));
    }

    sqlx::query("DELETE FROM pos_ticket_lines WHERE ticket_id = ?1")
        .bind(&ticket.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM pos_payments WHERE ticket_id = ?1")
        .bind(&ticket.id)
        .execute(&mut *conn)
        .await?;
    insert_children(conn, ticket).await?;

    debug!(ticket_id = %ticket.id, status = ?ticket.status, "Ticket saved");
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Read access to tickets. Writes go through `TicketService`.
#[derive(Debug, Clone)]
pub struct TicketRepository {
    pool: SqlitePool,
}

impl TicketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TicketRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Ticket>> {
        let mut conn = self.pool.acquire().await?;
        fetch_ticket(&mut conn, id).await
    }

    /// Ids of a session's tickets in creation order.
    pub async fn ids_for_session(&self, session_id: &str) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM pos_tickets WHERE session_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
