//! # Inventory Service
//!
//! Administrative stock operations outside the document flow:
//!
//! | Operation                | Semantics                           | Reference        |
//! |--------------------------|-------------------------------------|------------------|
//! | `adjust_stock`           | signed delta, result must stay >= 0 | `StockAdjustment`|
//! | `apply_stock_count`      | absolute set per counted product    | `StockCount`     |
//! | `receive_opening_stock`  | `In` movement                       | `OpeningBalance` |
//! | `rebuild_stock`          | replay history into the stock field | (none written)   |

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tally_core::stock;
use tally_core::{
    CoreError, CounterpartyTransaction, EntityKind, MovementType, Product, ReferenceKind,
    StockMovement,
};

use super::Engine;
use crate::audit::{self, AuditAction};
use crate::error::DbResult;
use crate::ledger::{MovementRecorder, NewMovement, StockChange, StockLedger};
use crate::repository::movement::fetch_for_product;
use crate::repository::product::fetch_product;
use crate::repository::new_id;
use crate::retry::with_retry;

/// One counted product in a stock count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCountEntry {
    pub product_id: String,
    pub unit_id: String,
    /// Quantity found on the shelf, in `unit_id`.
    pub counted_quantity: Decimal,
}

/// Result of an applied stock count.
#[derive(Debug, Clone)]
pub struct StockCountOutcome {
    /// Reference id carried by the count's movements.
    pub count_id: String,
    pub changes: Vec<(String, StockChange)>,
}

#[derive(Debug, Clone)]
pub struct InventoryService {
    engine: Engine,
}

impl InventoryService {
    pub fn new(engine: Engine) -> Self {
        InventoryService { engine }
    }

    /// Adds a signed quantity entered in `unit_id` to the product's stock.
    ///
    /// ## Errors
    /// - `InvalidQuantity` for a zero quantity
    /// - `InsufficientStock` if the result would be negative
    /// - `Conversion` for a unit without an active mapping
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        signed_quantity: Decimal,
        unit_id: &str,
        notes: Option<&str>,
        actor: Option<&str>,
    ) -> DbResult<Decimal> {
        if signed_quantity.is_zero() {
            return Err(CoreError::invalid_quantity("adjustment quantity must not be zero").into());
        }

        with_retry(&self.engine.retry, "adjust_stock", move || {
            self.adjust_stock_once(product_id, signed_quantity, unit_id, notes, actor)
        })
        .await
        .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::AdjustStock, product_id, e))
    }

    async fn adjust_stock_once(
        &self,
        product_id: &str,
        signed_quantity: Decimal,
        unit_id: &str,
        notes: Option<&str>,
        actor: Option<&str>,
    ) -> DbResult<Decimal> {
        let mut uow = self.engine.db.begin().await?;
        let delta = StockLedger::resolve(&mut uow, product_id, unit_id, signed_quantity).await?;
        let current = StockLedger::adjust_by(&mut uow, product_id, delta).await?;
        MovementRecorder::record(
            &mut uow,
            NewMovement {
                product_id: product_id.to_string(),
                movement_type: MovementType::Adjustment,
                quantity: signed_quantity,
                unit_id: unit_id.to_string(),
                quantity_in_main_unit: delta,
                reference_kind: ReferenceKind::StockAdjustment,
                reference_id: None,
                notes: notes.map(str::to_string),
                actor: actor.map(str::to_string),
            },
        )
        .await?;
        uow.commit().await?;

        info!(product_id, delta = %delta, current = %current, "Stock adjusted");
        Ok(current)
    }

    /// Replaces stock with counted quantities, all entries in one unit of work.
    ///
    /// Each changed product gets an `Adjustment` movement carrying the signed
    /// difference in the main unit, so replaying history gives the counted
    /// value. Unchanged products write nothing.
    pub async fn apply_stock_count(
        &self,
        entries: &[StockCountEntry],
        actor: Option<&str>,
    ) -> DbResult<StockCountOutcome> {
        let count_id = new_id();
        let count_ref = count_id.as_str();

        with_retry(&self.engine.retry, "stock_count", move || {
            self.apply_stock_count_once(count_ref, entries, actor)
        })
        .await
        .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::StockCount, count_ref, e))
    }

    async fn apply_stock_count_once(
        &self,
        count_id: &str,
        entries: &[StockCountEntry],
        actor: Option<&str>,
    ) -> DbResult<StockCountOutcome> {
        let mut uow = self.engine.db.begin().await?;
        let mut changes = Vec::with_capacity(entries.len());

        for entry in entries {
            let target =
                StockLedger::resolve(&mut uow, &entry.product_id, &entry.unit_id, entry.counted_quantity).await?;
            let change = StockLedger::set_absolute(&mut uow, &entry.product_id, target).await?;
            if !change.delta.is_zero() {
                let product = StockLedger::active_product(&mut uow, &entry.product_id).await?;
                MovementRecorder::record(
                    &mut uow,
                    NewMovement {
                        product_id: entry.product_id.clone(),
                        movement_type: MovementType::Adjustment,
                        quantity: change.delta,
                        unit_id: product.main_unit_id,
                        quantity_in_main_unit: change.delta,
                        reference_kind: ReferenceKind::StockCount,
                        reference_id: Some(count_id.to_string()),
                        notes: Some(format!("Counted {} (was {})", change.current, change.previous)),
                        actor: actor.map(str::to_string),
                    },
                )
                .await?;
            }
            changes.push((entry.product_id.clone(), change));
        }
        uow.commit().await?;

        let adjusted = changes.iter().filter(|(_, c)| !c.delta.is_zero()).count();
        info!(count_id, entries = entries.len(), adjusted, "Stock count applied");
        Ok(StockCountOutcome {
            count_id: count_id.to_string(),
            changes,
        })
    }

    /// Books initial stock for a product.
    pub async fn receive_opening_stock(
        &self,
        product_id: &str,
        quantity: Decimal,
        unit_id: &str,
        actor: Option<&str>,
    ) -> DbResult<Decimal> {
        if quantity <= Decimal::ZERO {
            return Err(CoreError::invalid_quantity(format!("opening stock {} must be positive", quantity)).into());
        }

        with_retry(&self.engine.retry, "opening_stock", move || {
            self.receive_opening_stock_once(product_id, quantity, unit_id, actor)
        })
        .await
        .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::AdjustStock, product_id, e))
    }

    async fn receive_opening_stock_once(
        &self,
        product_id: &str,
        quantity: Decimal,
        unit_id: &str,
        actor: Option<&str>,
    ) -> DbResult<Decimal> {
        let mut uow = self.engine.db.begin().await?;
        let main_qty = StockLedger::resolve(&mut uow, product_id, unit_id, quantity).await?;
        let current = StockLedger::apply_delta(&mut uow, product_id, main_qty, MovementType::In).await?;
        MovementRecorder::record(
            &mut uow,
            NewMovement {
                product_id: product_id.to_string(),
                movement_type: MovementType::In,
                quantity,
                unit_id: unit_id.to_string(),
                quantity_in_main_unit: main_qty,
                reference_kind: ReferenceKind::OpeningBalance,
                reference_id: None,
                notes: Some("Opening stock".to_string()),
                actor: actor.map(str::to_string),
            },
        )
        .await?;
        uow.commit().await?;

        info!(product_id, quantity = %main_qty, current = %current, "Opening stock received");
        Ok(current)
    }

    /// Recomputes stock from the movement history and stores it.
    ///
    /// ## Errors
    /// - `InvalidQuantity` if the history sums to a negative stock
    pub async fn rebuild_stock(&self, product_id: &str) -> DbResult<StockChange> {
        with_retry(&self.engine.retry, "rebuild_stock", move || self.rebuild_stock_once(product_id))
            .await
            .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::AdjustStock, product_id, e))
    }

    async fn rebuild_stock_once(&self, product_id: &str) -> DbResult<StockChange> {
        let mut uow = self.engine.db.begin().await?;
        let product = fetch_product(uow.conn(), product_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Product, product_id))?;

        let history = fetch_for_product(uow.conn(), product_id).await?;
        let replayed = stock::replay(&history);
        if replayed < Decimal::ZERO {
            return Err(CoreError::invalid_quantity(format!(
                "movement history of {} sums to {}",
                product_id, replayed
            ))
            .into());
        }

        let change = StockChange {
            previous: product.current_stock,
            current: replayed,
            delta: replayed - product.current_stock,
        };
        if !change.delta.is_zero() {
            warn!(
                product_id,
                stored = %change.previous,
                replayed = %change.current,
                "Stored stock drifted from movement history"
            );
            StockLedger::overwrite(&mut uow, &product, replayed).await?;
        }
        uow.commit().await?;
        Ok(change)
    }

    /// Active products at or below their minimum stock.
    pub async fn low_stock_products(&self) -> DbResult<Vec<Product>> {
        self.engine.db.products().low_stock().await
    }

    pub async fn movements_for_product(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        self.engine.db.movements().for_product(product_id).await
    }

    pub async fn movements_for_reference(
        &self,
        kind: ReferenceKind,
        reference_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        self.engine.db.movements().for_reference(kind, reference_id).await
    }

    /// Balance history of a customer or supplier, oldest first.
    pub async fn transactions_for(&self, counterparty_id: &str) -> DbResult<Vec<CounterpartyTransaction>> {
        self.engine.db.counterparties().transactions_for(counterparty_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::{self, new_invoice, sales_line};
    use rust_decimal_macros::dec;
    use tally_core::InvoiceKind;

    #[tokio::test]
    async fn test_adjust_stock_signed_delta() {
        let fx = test_support::fixture().await;
        let inventory = fx.engine.inventory();

        let after = inventory
            .adjust_stock(&fx.product.id, dec!(2), &fx.boxes.id, Some("found in back room"), Some("alice"))
            .await
            .unwrap();
        assert_eq!(after, dec!(24));

        let after = inventory
            .adjust_stock(&fx.product.id, dec!(-4), &fx.pcs.id, None, Some("alice"))
            .await
            .unwrap();
        assert_eq!(after, dec!(20));

        let err = inventory
            .adjust_stock(&fx.product.id, dec!(-21), &fx.pcs.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InsufficientStock { .. })));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(20));

        let err = inventory
            .adjust_stock(&fx.product.id, dec!(0), &fx.pcs.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidQuantity { .. })));

        let history = inventory.movements_for_product(&fx.product.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].quantity, dec!(2));
        assert_eq!(history[0].quantity_in_main_unit, dec!(24));
        assert_eq!(history[1].quantity_in_main_unit, dec!(-4));
        assert_eq!(history[0].actor.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_stock_count_sets_absolute_values() {
        let fx = test_support::fixture().await;
        let other = test_support::product(&fx.db, "P-OTHER", &fx.pcs.id).await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        test_support::stock_up(&fx.db, &other.id, dec!(3)).await;
        let inventory = fx.engine.inventory();

        let outcome = inventory
            .apply_stock_count(
                &[
                    StockCountEntry {
                        product_id: fx.product.id.clone(),
                        unit_id: fx.boxes.id.clone(),
                        counted_quantity: dec!(1),
                    },
                    StockCountEntry {
                        product_id: other.id.clone(),
                        unit_id: fx.pcs.id.clone(),
                        counted_quantity: dec!(3),
                    },
                ],
                Some("bob"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(outcome.changes[0].1.delta, dec!(2));
        assert!(outcome.changes[1].1.delta.is_zero());
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(12));
        assert_eq!(test_support::stock_of(&fx.db, &other.id).await, dec!(3));

        let movements = inventory
            .movements_for_reference(ReferenceKind::StockCount, &outcome.count_id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity_in_main_unit, dec!(2));

        let rebuilt = inventory.rebuild_stock(&fx.product.id).await.unwrap();
        assert!(rebuilt.delta.is_zero());
    }

    #[tokio::test]
    async fn test_stock_count_is_all_or_nothing() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let inventory = fx.engine.inventory();

        let err = inventory
            .apply_stock_count(
                &[
                    StockCountEntry {
                        product_id: fx.product.id.clone(),
                        unit_id: fx.pcs.id.clone(),
                        counted_quantity: dec!(4),
                    },
                    StockCountEntry {
                        product_id: fx.product.id.clone(),
                        unit_id: fx.kg.id.clone(),
                        counted_quantity: dec!(1),
                    },
                ],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Conversion { .. })));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));

        let err = inventory
            .apply_stock_count(
                &[StockCountEntry {
                    product_id: fx.product.id.clone(),
                    unit_id: fx.pcs.id.clone(),
                    counted_quantity: dec!(-1),
                }],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidQuantity { .. })));
    }

    #[tokio::test]
    async fn test_opening_stock() {
        let fx = test_support::fixture().await;
        let inventory = fx.engine.inventory();

        let current = inventory
            .receive_opening_stock(&fx.product.id, dec!(3), &fx.boxes.id, Some("setup"))
            .await
            .unwrap();
        assert_eq!(current, dec!(36));

        let movements = inventory
            .movements_for_product(&fx.product.id)
            .await
            .unwrap();
        assert_eq!(movements[0].reference_kind, ReferenceKind::OpeningBalance);
        assert_eq!(movements[0].movement_type, MovementType::In);

        let err = inventory
            .receive_opening_stock(&fx.product.id, dec!(0), &fx.pcs.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidQuantity { .. })));
    }

    #[tokio::test]
    async fn test_rebuild_repairs_drift() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let invoices = fx.engine.invoices();
        let sale = invoices
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(4), dec!(1))]),
            )
            .await
            .unwrap();
        invoices.post(&sale.id).await.unwrap();

        sqlx::query("UPDATE products SET current_stock = '99' WHERE id = ?1")
            .bind(&fx.product.id)
            .execute(fx.db.pool())
            .await
            .unwrap();

        let change = fx.engine.inventory().rebuild_stock(&fx.product.id).await.unwrap();
        assert_eq!(change.previous, dec!(99));
        assert_eq!(change.current, dec!(6));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(6));
    }

    #[tokio::test]
    async fn test_low_stock_and_transactions() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(8)).await;
        let inventory = fx.engine.inventory();
        assert!(inventory.low_stock_products().await.unwrap().is_empty());

        let invoices = fx.engine.invoices();
        let sale = invoices
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(3), dec!(2))]),
            )
            .await
            .unwrap();
        invoices.post(&sale.id).await.unwrap();

        let low = inventory.low_stock_products().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, fx.product.id);

        let txs = inventory.transactions_for(&fx.customer.id).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].reference_id.as_deref(), Some(sale.id.as_str()));
    }
}
