//! # Stock Arithmetic
//!
//! The pure half of the product stock ledger. Every function takes the current
//! canonical stock and returns the new value or an error; nothing here writes.
//!
//! ## Operations
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ apply_delta(In)      │ stock + q                                        │
//! │ apply_delta(Out)     │ stock − q, InsufficientStock if q > stock        │
//! │ apply_signed_adjust  │ stock + d (d may be negative), never below 0     │
//! │ validate_absolute    │ replace stock with t, t >= 0                     │
//! │ replay               │ Σ signed movement quantities                     │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Point adjustments and blanket stock counts are separate operations with
//! separate names. `apply_delta` with `MovementType::Adjustment` uses the
//! signed semantics.

use rust_decimal::Decimal;

use crate::error::{CoreError, CoreResult};
use crate::types::{MovementType, StockMovement};

/// Applies an `In`/`Out` movement of `quantity` (main unit) to `current`.
///
/// `quantity` must not be negative for `In`/`Out`; direction comes from the
/// movement type.
pub fn apply_delta(
    product_id: &str,
    current: Decimal,
    quantity: Decimal,
    movement_type: MovementType,
) -> CoreResult<Decimal> {
    match movement_type {
        MovementType::In => {
            ensure_magnitude(quantity)?;
            Ok(current + quantity)
        }
        MovementType::Out => {
            ensure_magnitude(quantity)?;
            if quantity > current {
                return Err(CoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                    requested: quantity,
                    available: current,
                });
            }
            Ok(current - quantity)
        }
        MovementType::Adjustment => apply_signed_adjustment(product_id, current, quantity),
    }
}

/// Adds a signed delta, rejecting results below zero.
///
/// A decrease larger than the stock fails with `InsufficientStock` carrying
/// the magnitude of the decrease.
pub fn apply_signed_adjustment(
    product_id: &str,
    current: Decimal,
    delta: Decimal,
) -> CoreResult<Decimal> {
    let next = current + delta;
    if next < Decimal::ZERO {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            requested: delta.abs(),
            available: current,
        });
    }
    Ok(next)
}

/// Validates an absolute stock value for a count correction.
///
/// Returns the signed difference that a movement must carry so that
/// replaying history arrives at `target`.
pub fn validate_absolute(current: Decimal, target: Decimal) -> CoreResult<Decimal> {
    if target < Decimal::ZERO {
        return Err(CoreError::invalid_quantity(format!(
            "counted stock {} is negative",
            target
        )));
    }
    Ok(target - current)
}

/// Recomputes stock from a movement history.
pub fn replay<'a, I>(movements: I) -> Decimal
where
    I: IntoIterator<Item = &'a StockMovement>,
{
    movements
        .into_iter()
        .map(StockMovement::signed_quantity)
        .fold(Decimal::ZERO, |acc, q| acc + q)
}

fn ensure_magnitude(quantity: Decimal) -> CoreResult<()> {
    if quantity < Decimal::ZERO {
        return Err(CoreError::invalid_quantity(format!(
            "movement quantity {} is negative",
            quantity
        )));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
