//! # Counterparty Repository
//!
//! Customers and suppliers, their versioned balance and the transaction
//! records written alongside every balance change.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use tally_core::validation::{validate_code, validate_name};
use tally_core::{
    Counterparty, CounterpartyKind, CounterpartyTransaction, Money, ReferenceKind, TransactionType,
};

use super::{new_id, parse_money};
use crate::error::{DbError, DbResult};

const COUNTERPARTY_COLUMNS: &str =
    "id, kind, code, name, balance, is_active, version, created_at, updated_at";

#[derive(Debug, FromRow)]
struct CounterpartyRow {
    id: String,
    kind: CounterpartyKind,
    code: String,
    name: String,
    balance: String,
    is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CounterpartyRow> for Counterparty {
    type Error = DbError;

    fn try_from(row: CounterpartyRow) -> DbResult<Self> {
        Ok(Counterparty {
            balance: parse_money("counterparties.balance", &row.balance)?,
            id: row.id,
            kind: row.kind,
            code: row.code,
            name: row.name,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: String,
    counterparty_id: String,
    transaction_type: TransactionType,
    amount: String,
    description: String,
    reference_kind: ReferenceKind,
    reference_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for CounterpartyTransaction {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> DbResult<Self> {
        Ok(CounterpartyTransaction {
            amount: parse_money("counterparty_transactions.amount", &row.amount)?,
            id: row.id,
            counterparty_id: row.counterparty_id,
            transaction_type: row.transaction_type,
            description: row.description,
            reference_kind: row.reference_kind,
            reference_id: row.reference_id,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Unit-of-work functions
// =============================================================================

pub async fn fetch_counterparty(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<Counterparty>> {
    let sql = format!("SELECT {COUNTERPARTY_COLUMNS} FROM counterparties WHERE id = ?1");
    sqlx::query_as::<_, CounterpartyRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Counterparty::try_from)
        .transpose()
}

/// Writes a new balance if the row is still at `expected_version`.
pub(crate) async fn update_balance(
    conn: &mut SqliteConnection,
    id: &str,
    new_balance: Money,
    expected_version: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE counterparties \
            SET balance = ?1, version = version + 1, updated_at = ?2 \
          WHERE id = ?3 AND version = ?4",
    )
    .bind(new_balance.amount().to_string())
    .bind(Utc::now())
    .bind(id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict("Counterparty", id));
    }

    debug!(counterparty_id = %id, balance = %new_balance, "Balance updated");
    Ok(())
}

pub(crate) async fn insert_transaction(
    conn: &mut SqliteConnection,
    tx: &CounterpartyTransaction,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO counterparty_transactions (id, counterparty_id, transaction_type, amount, \
            description, reference_kind, reference_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&tx.id)
    .bind(&tx.counterparty_id)
    .bind(tx.transaction_type)
    .bind(tx.amount.amount().to_string())
    .bind(&tx.description)
    .bind(tx.reference_kind)
    .bind(&tx.reference_id)
    .bind(tx.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct CounterpartyRepository {
    pool: SqlitePool,
}

impl CounterpartyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CounterpartyRepository { pool }
    }

    /// Creates a customer or supplier with a zero balance.
    pub async fn create(
        &self,
        kind: CounterpartyKind,
        code: &str,
        name: &str,
    ) -> DbResult<Counterparty> {
        validate_code("code", code)?;
        validate_name("name", name)?;

        let now = Utc::now();
        let party = Counterparty {
            id: new_id(),
            kind,
            code: code.trim().to_string(),
            name: name.trim().to_string(),
            balance: Money::zero(),
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO counterparties (id, kind, code, name, balance, is_active, version, \
                created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&party.id)
        .bind(party.kind)
        .bind(&party.code)
        .bind(&party.name)
        .bind(party.balance.amount().to_string())
        .bind(party.is_active)
        .bind(party.version)
        .bind(party.created_at)
        .bind(party.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, party.code.clone()),
            other => other,
        })?;

        debug!(kind = ?party.kind, code = %party.code, "Counterparty created");
        Ok(party)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Counterparty>> {
        let mut conn = self.pool.acquire().await?;
        fetch_counterparty(&mut conn, id).await
    }

    pub async fn list(&self, kind: CounterpartyKind) -> DbResult<Vec<Counterparty>> {
        let sql = format!(
            "SELECT {COUNTERPARTY_COLUMNS} FROM counterparties WHERE kind = ?1 ORDER BY name"
        );
        sqlx::query_as::<_, CounterpartyRow>(&sql)
            .bind(kind)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Counterparty::try_from)
            .collect()
    }

    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE counterparties SET is_active = 0, updated_at = ?1 WHERE id = ?2")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Counterparty", id));
        }
        Ok(())
    }

    /// Transaction records of a counterparty, oldest first.
    pub async fn transactions_for(
        &self,
        counterparty_id: &str,
    ) -> DbResult<Vec<CounterpartyTransaction>> {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT id, counterparty_id, transaction_type, amount, description, reference_kind, \
                    reference_id, created_at \
               FROM counterparty_transactions \
              WHERE counterparty_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(counterparty_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CounterpartyTransaction::try_from)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_counterparties() {
        let db = crate::test_support::database().await;
        let repo = db.counterparties();

        let customer = repo
            .create(CounterpartyKind::Customer, "C-001", "Acme")
            .await
            .unwrap();
        repo.create(CounterpartyKind::Supplier, "C-001", "Same code, other kind")
            .await
            .unwrap();

        assert!(customer.balance.is_zero());
        assert_eq!(repo.list(CounterpartyKind::Customer).await.unwrap().len(), 1);
        assert_eq!(repo.list(CounterpartyKind::Supplier).await.unwrap().len(), 1);

        let err = repo
            .create(CounterpartyKind::Customer, "C-001", "Duplicate")
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }
}
