//! # Cash Drawer Repository
//!
//! Signed cash entries per POS session. Positive amounts entered the drawer.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};

use tally_core::{CashDrawerEntry, CashEntryType, Money};

use super::parse_money;
use crate::error::{DbError, DbResult};

#[derive(Debug, FromRow)]
struct EntryRow {
    id: String,
    session_id: String,
    ticket_id: String,
    entry_type: CashEntryType,
    amount: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for CashDrawerEntry {
    type Error = DbError;

    fn try_from(row: EntryRow) -> DbResult<Self> {
        Ok(CashDrawerEntry {
            amount: parse_money("cash_drawer_entries.amount", &row.amount)?,
            id: row.id,
            session_id: row.session_id,
            ticket_id: row.ticket_id,
            entry_type: row.entry_type,
            created_at: row.created_at,
        })
    }
}

pub(crate) async fn insert_entry(conn: &mut SqliteConnection, entry: &CashDrawerEntry) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO cash_drawer_entries (id, session_id, ticket_id, entry_type, amount, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&entry.id)
    .bind(&entry.session_id)
    .bind(&entry.ticket_id)
    .bind(entry.entry_type)
    .bind(entry.amount.amount().to_string())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn entries_for_session(pool: &SqlitePool, session_id: &str) -> DbResult<Vec<CashDrawerEntry>> {
    sqlx::query_as::<_, EntryRow>(
        "SELECT id, session_id, ticket_id, entry_type, amount, created_at \
           FROM cash_drawer_entries WHERE session_id = ?1 ORDER BY created_at, rowid",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(CashDrawerEntry::try_from)
    .collect()
}

/// Net cash a session should hold.
pub async fn session_total(pool: &SqlitePool, session_id: &str) -> DbResult<Money> {
    Ok(entries_for_session(pool, session_id)
        .await?
        .iter()
        .map(|e| e.amount)
        .sum())
}
