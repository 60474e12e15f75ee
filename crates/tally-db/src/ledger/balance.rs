//! # Counterparty Balance Ledger
//!
//! Applies signed deltas to a customer's receivable or a supplier's payable
//! and appends a transaction record for each change.

use chrono::Utc;
use tracing::debug;

use tally_core::{CoreError, CounterpartyTransaction, EntityKind, Money, ReferenceKind, TransactionType};

use crate::error::DbResult;
use crate::pool::UnitOfWork;
use crate::repository::counterparty::{fetch_counterparty, insert_transaction, update_balance};
use crate::repository::new_id;

pub struct BalanceLedger;

impl BalanceLedger {
    /// Adds `delta` to the balance. A zero delta writes nothing.
    ///
    /// Positive deltas are recorded as `Income`, negative ones as `Expense`
    /// with the magnitude as amount.
    pub async fn apply_delta(
        uow: &mut UnitOfWork,
        counterparty_id: &str,
        delta: Money,
        description: &str,
        reference_kind: ReferenceKind,
        reference_id: Option<&str>,
    ) -> DbResult<()> {
        if delta.is_zero() {
            return Ok(());
        }

        let party = fetch_counterparty(uow.conn(), counterparty_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Counterparty, counterparty_id))?;

        let balance = party.balance + delta;
        update_balance(uow.conn(), counterparty_id, balance, party.version).await?;

        let record = CounterpartyTransaction {
            id: new_id(),
            counterparty_id: counterparty_id.to_string(),
            transaction_type: TransactionType::for_delta(delta),
            amount: delta.abs(),
            description: description.to_string(),
            reference_kind,
            reference_id: reference_id.map(str::to_string),
            created_at: Utc::now(),
        };
        insert_transaction(uow.conn(), &record).await?;

        debug!(
            counterparty_id,
            kind = ?party.kind,
            delta = %delta,
            balance = %balance,
            "Balance delta applied"
        );
        Ok(())
    }
}
