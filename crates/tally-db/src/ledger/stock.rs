//! # Product Stock Ledger
//!
//! Check-and-write of `products.current_stock` with an optimistic version
//! check. The arithmetic lives in `tally_core::stock`; this module loads the
//! row, applies it and writes back `WHERE version = ?seen`.
//!
//! ## Race Handling
//! ```text
//! Posting A                           Posting B
//! read P (stock 10, v4)               read P (stock 10, v4)
//! check 8 <= 10 ✓                     check 8 <= 10 ✓
//! UPDATE ... WHERE v = 4 ✓ (v5)       UPDATE ... WHERE v = 4 ✗ → Conflict
//! commit                              rollback, retry whole posting
//!                                     read P (stock 2, v5)
//!                                     check 8 <= 2 ✗ → InsufficientStock
//! ```
//! SQLite also serialises writers, so B may instead see "database is
//! locked"; that is retried the same way.

use rust_decimal::Decimal;
use tracing::debug;

use tally_core::conversion::ConversionTable;
use tally_core::stock;
use tally_core::{CoreError, EntityKind, MovementType, Product};

use crate::error::DbResult;
use crate::pool::UnitOfWork;
use crate::repository::product::{fetch_product, update_stock};
use crate::repository::unit::{fetch_conversions, fetch_unit};

/// Outcome of an absolute stock set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub previous: Decimal,
    pub current: Decimal,
    /// `current - previous`, the quantity the Adjustment movement carries.
    pub delta: Decimal,
}

pub struct StockLedger;

impl StockLedger {
    /// Loads an active product, or fails with `NotFound`/`ReferentialIntegrity`.
    pub async fn active_product(uow: &mut UnitOfWork, product_id: &str) -> DbResult<Product> {
        let product = fetch_product(uow.conn(), product_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Product, product_id))?;
        if !product.is_active {
            return Err(CoreError::integrity(EntityKind::Product, product_id, "product is inactive").into());
        }
        Ok(product)
    }

    /// Converts `quantity` of `unit_id` into the product's main unit.
    ///
    /// ## Errors
    /// - `NotFound` / `ReferentialIntegrity` for a missing or inactive
    ///   product or unit
    /// - `Conversion` for an unmapped, inactive or non-positive mapping
    pub async fn resolve(
        uow: &mut UnitOfWork,
        product_id: &str,
        unit_id: &str,
        quantity: Decimal,
    ) -> DbResult<Decimal> {
        let product = Self::active_product(uow, product_id).await?;

        let unit = fetch_unit(uow.conn(), unit_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Unit, unit_id))?;
        if !unit.is_active {
            return Err(CoreError::integrity(EntityKind::Unit, unit_id, "unit is inactive").into());
        }

        let rows = if unit_id == product.main_unit_id {
            Vec::new()
        } else {
            fetch_conversions(uow.conn(), product_id).await?
        };
        let canonical = ConversionTable::new(&product, &rows).resolve(quantity, unit_id)?;
        Ok(canonical)
    }

    /// Applies an `In` or `Out` movement of `quantity` main units, or a
    /// signed `Adjustment`. Returns the new stock.
    ///
    /// ## Errors
    /// - `InsufficientStock` when `Out` exceeds stock; stock is unchanged
    /// - `InvalidQuantity` for a negative `In`/`Out` magnitude
    /// - `Conflict` if the row changed since it was read
    pub async fn apply_delta(
        uow: &mut UnitOfWork,
        product_id: &str,
        quantity: Decimal,
        movement_type: MovementType,
    ) -> DbResult<Decimal> {
        let product = fetch_product(uow.conn(), product_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Product, product_id))?;

        let next = stock::apply_delta(product_id, product.current_stock, quantity, movement_type)?;
        update_stock(uow.conn(), product_id, next, product.version).await?;

        debug!(
            product_id,
            ?movement_type,
            quantity = %quantity,
            previous = %product.current_stock,
            current = %next,
            "Stock delta applied"
        );
        Ok(next)
    }

    /// Point adjustment: adds a signed delta, rejecting a negative result.
    pub async fn adjust_by(uow: &mut UnitOfWork, product_id: &str, delta: Decimal) -> DbResult<Decimal> {
        Self::apply_delta(uow, product_id, delta, MovementType::Adjustment).await
    }

    /// Count correction: replaces stock with `target` main units.
    pub async fn set_absolute(
        uow: &mut UnitOfWork,
        product_id: &str,
        target: Decimal,
    ) -> DbResult<StockChange> {
        let product = fetch_product(uow.conn(), product_id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Product, product_id))?;

        let delta = stock::validate_absolute(product.current_stock, target)?;
        if !delta.is_zero() {
            update_stock(uow.conn(), product_id, target, product.version).await?;
        }

        debug!(product_id, previous = %product.current_stock, current = %target, "Stock set");
        Ok(StockChange {
            previous: product.current_stock,
            current: target,
            delta,
        })
    }

    /// Overwrites stock with a replayed figure. Repair only.
    pub(crate) async fn overwrite(uow: &mut UnitOfWork, product: &Product, value: Decimal) -> DbResult<()> {
        update_stock(uow.conn(), &product.id, value, product.version).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_out_beyond_stock_leaves_stock_unchanged() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;

        let mut uow = fx.db.begin().await.unwrap();
        let err = StockLedger::apply_delta(&mut uow, &fx.product.id, dec!(11), MovementType::Out)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { requested, available, .. })
                if requested == dec!(11) && available == dec!(10)
        ));
        drop(uow);

        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
    }

    #[tokio::test]
    async fn test_in_and_out() {
        let fx = test_support::fixture().await;

        let mut uow = fx.db.begin().await.unwrap();
        let after_in = StockLedger::apply_delta(&mut uow, &fx.product.id, dec!(5), MovementType::In)
            .await
            .unwrap();
        let after_out = StockLedger::apply_delta(&mut uow, &fx.product.id, dec!(5), MovementType::Out)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(after_in, dec!(5));
        assert_eq!(after_out, dec!(0));
    }

    #[tokio::test]
    async fn test_signed_adjustment_and_absolute_set() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;

        let mut uow = fx.db.begin().await.unwrap();
        assert_eq!(
            StockLedger::adjust_by(&mut uow, &fx.product.id, dec!(-4)).await.unwrap(),
            dec!(6)
        );
        let err = StockLedger::adjust_by(&mut uow, &fx.product.id, dec!(-7))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InsufficientStock { .. })));

        let change = StockLedger::set_absolute(&mut uow, &fx.product.id, dec!(2))
            .await
            .unwrap();
        assert_eq!(change.previous, dec!(6));
        assert_eq!(change.delta, dec!(-4));

        let err = StockLedger::set_absolute(&mut uow, &fx.product.id, dec!(-1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidQuantity { .. })));
        uow.commit().await.unwrap();

        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(2));
    }

    #[tokio::test]
    async fn test_resolve_units() {
        let fx = test_support::fixture().await;

        let mut uow = fx.db.begin().await.unwrap();
        let main = StockLedger::resolve(&mut uow, &fx.product.id, &fx.pcs.id, dec!(7))
            .await
            .unwrap();
        let boxed = StockLedger::resolve(&mut uow, &fx.product.id, &fx.boxes.id, dec!(2))
            .await
            .unwrap();
        let err = StockLedger::resolve(&mut uow, &fx.product.id, &fx.kg.id, dec!(1))
            .await
            .unwrap_err();
        let missing = StockLedger::resolve(&mut uow, "nope", &fx.pcs.id, dec!(1))
            .await
            .unwrap_err();

        assert_eq!(main, dec!(7));
        assert_eq!(boxed, dec!(24));
        assert!(matches!(err, DbError::Domain(CoreError::Conversion { .. })));
        assert!(matches!(missing, DbError::Domain(CoreError::NotFound { .. })));
    }
}
