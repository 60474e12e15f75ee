//! # Unit Conversion
//!
//! Resolves a quantity entered in any unit to the product's main unit.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  resolve(product, qty, unit)                                            │
//! │                                                                         │
//! │  unit == main unit ─────────────────────────────► qty                   │
//! │  active row (product, unit), factor > 0 ────────► qty × factor          │
//! │  no row / inactive row / factor <= 0 ───────────► Conversion error      │
//! │                                                                         │
//! │  There is no implicit factor of 1 for an unmapped unit.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::Decimal;

use crate::error::{CoreError, CoreResult};
use crate::types::{Product, UnitConversion};

/// Converts `quantity` of `unit_id` to the product's main unit.
///
/// `conversion` is the row stored for `(product.id, unit_id)`, if any. It is
/// ignored when `unit_id` is the main unit.
///
/// ## Example
/// ```rust,ignore
/// // 1 box = 12 pcs
/// let canonical = resolve_main_unit_quantity(&product, dec!(2), "box", Some(&box_row))?;
/// assert_eq!(canonical, dec!(24));
/// ```
pub fn resolve_main_unit_quantity(
    product: &Product,
    quantity: Decimal,
    unit_id: &str,
    conversion: Option<&UnitConversion>,
) -> CoreResult<Decimal> {
    if unit_id == product.main_unit_id {
        return Ok(quantity);
    }

    let fail = |reason: &str| CoreError::Conversion {
        product_id: product.id.clone(),
        unit_id: unit_id.to_string(),
        reason: reason.to_string(),
    };

    let row = conversion.ok_or_else(|| fail("no conversion to the main unit"))?;

    if row.product_id != product.id || row.unit_id != unit_id {
        return Err(fail("conversion row belongs to another product or unit"));
    }
    if !row.is_active {
        return Err(fail("conversion is inactive"));
    }
    if row.conversion_factor <= Decimal::ZERO {
        return Err(fail("conversion factor must be positive"));
    }

    Ok(quantity * row.conversion_factor)
}

/// A product together with all of its conversion rows.
///
/// Useful when many quantities are resolved for one product, e.g. when the
/// same product appears on several lines.
#[derive(Debug, Clone)]
pub struct ConversionTable<'a> {
    product: &'a Product,
    rows: &'a [UnitConversion],
}

impl<'a> ConversionTable<'a> {
    pub fn new(product: &'a Product, rows: &'a [UnitConversion]) -> Self {
        ConversionTable { product, rows }
    }

    /// See [`resolve_main_unit_quantity`].
    pub fn resolve(&self, quantity: Decimal, unit_id: &str) -> CoreResult<Decimal> {
        let row = self
            .rows
            .iter()
            .find(|r| r.product_id == self.product.id && r.unit_id == unit_id);
        resolve_main_unit_quantity(self.product, quantity, unit_id, row)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product() -> Product {
        Product {
            id: "p-1".to_string(),
            code: "WATER".to_string(),
            name: "Water 500ml".to_string(),
            category_id: None,
            main_unit_id: "pcs".to_string(),
            current_stock: dec!(10),
            min_stock: dec!(0),
            purchase_price: Money::zero(),
            sale_price: Money::new(dec!(100)),
            is_active: true,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn row(unit_id: &str, factor: Decimal) -> UnitConversion {
        UnitConversion {
            id: format!("c-{}", unit_id),
            product_id: "p-1".to_string(),
            unit_id: unit_id.to_string(),
            conversion_factor: factor,
            is_active: true,
        }
    }

    #[test]
    fn test_main_unit_is_identity() {
        let p = product();
        for q in [dec!(0), dec!(1), dec!(2.5), dec!(1000)] {
            assert_eq!(resolve_main_unit_quantity(&p, q, "pcs", None).unwrap(), q);
        }
    }

    #[test]
    fn test_alternate_unit_multiplies_by_factor() {
        let p = product();
        let boxes = row("box", dec!(12));
        assert_eq!(
            resolve_main_unit_quantity(&p, dec!(1), "box", Some(&boxes)).unwrap(),
            dec!(12)
        );
        assert_eq!(
            resolve_main_unit_quantity(&p, dec!(0), "box", Some(&boxes)).unwrap(),
            dec!(0)
        );
        assert_eq!(
            resolve_main_unit_quantity(&p, dec!(0.5), "box", Some(&boxes)).unwrap(),
            dec!(6)
        );
    }

    #[test]
    fn test_missing_row_is_an_error() {
        let err = resolve_main_unit_quantity(&product(), dec!(1), "box", None).unwrap_err();
        assert!(matches!(err, CoreError::Conversion { ref unit_id, .. } if unit_id == "box"));
    }

    #[test]
    fn test_non_positive_factor_is_an_error() {
        let p = product();
        for factor in [dec!(0), dec!(-3)] {
            let bad = row("box", factor);
            let err = resolve_main_unit_quantity(&p, dec!(1), "box", Some(&bad)).unwrap_err();
            assert!(matches!(err, CoreError::Conversion { .. }));
        }
    }

    #[test]
    fn test_inactive_row_is_an_error() {
        let mut boxes = row("box", dec!(12));
        boxes.is_active = false;
        let err = resolve_main_unit_quantity(&product(), dec!(1), "box", Some(&boxes)).unwrap_err();
        assert!(matches!(err, CoreError::Conversion { .. }));
    }

    #[test]
    fn test_table_picks_matching_row() {
        let p = product();
        let rows = vec![row("box", dec!(12)), row("pack", dec!(6))];
        let table = ConversionTable::new(&p, &rows);
        assert_eq!(table.resolve(dec!(2), "pack").unwrap(), dec!(12));
        assert_eq!(table.resolve(dec!(3), "pcs").unwrap(), dec!(3));
        assert!(table.resolve(dec!(1), "crate").is_err());
    }
}
