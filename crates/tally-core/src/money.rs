//! # Money Module
//!
//! Provides the `Money` and `Percentage` types used by every monetary field.
//!
//! ## Why Decimal Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  Quantities are fractional too (2.5 kg at 13.40 per kg), so integer     │
//! │  cents alone cannot express a line total.                               │
//! │                                                                         │
//! │  OUR SOLUTION: base-10 Decimal                                          │
//! │    2.5 × 13.40 = 33.500 exactly                                         │
//! │    Only tax is rounded, to 2 places, half away from zero                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use tally_core::money::{Money, Percentage};
//!
//! let price = Money::new(Decimal::new(1099, 2)); // 10.99
//! let line = price * Decimal::new(3, 0);         // 32.97
//! assert_eq!(line.amount(), Decimal::new(3297, 2));
//!
//! let ten_percent = Percentage::new(Decimal::new(10, 0));
//! assert_eq!(line.percent(ten_percent).amount(), Decimal::new(3297, 3));
//! ```

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::MONEY_SCALE;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in the ledger's single currency.
///
/// ## Design Decisions
/// - **Decimal (signed)**: negative values exist transiently (balance deltas,
///   cash refunds); stored document fields are clamped where a rule says so
/// - **No implicit rounding**: arithmetic keeps natural decimal precision,
///   [`Money::calculate_tax`] is the only rounding point
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  InvoiceLine.unit_price × quantity ──► line_total ──► net_amount        │
/// │                                                           │             │
/// │  Σ net_amount ──► subtotal ──► − discount ──► + tax ──► net_total       │
/// │                                                           │             │
/// │  net_total − paid ──► remaining_amount ──► Counterparty.balance delta   │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Wraps a decimal amount.
    #[inline]
    pub const fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    /// Returns the underlying decimal.
    #[inline]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    /// Checks if the value is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Returns the absolute value.
    #[inline]
    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Floors the amount at zero.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use tally_core::money::Money;
    ///
    /// assert!(Money::new(Decimal::new(-5, 0)).clamp_non_negative().is_zero());
    /// ```
    #[inline]
    pub fn clamp_non_negative(self) -> Self {
        if self.is_negative() {
            Money::zero()
        } else {
            self
        }
    }

    /// Returns the smaller of two amounts.
    #[inline]
    pub fn min(self, other: Money) -> Money {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// Rounds to two places, half away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use tally_core::money::Money;
    ///
    /// assert_eq!(Money::new(Decimal::new(2525, 3)).round().amount(), Decimal::new(253, 2));
    /// assert_eq!(Money::new(Decimal::new(-2525, 3)).round().amount(), Decimal::new(-253, 2));
    /// ```
    #[inline]
    pub fn round(self) -> Self {
        Money(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Returns `rate` percent of this amount without rounding.
    #[inline]
    pub fn percent(&self, rate: Percentage) -> Money {
        Money(self.0 * rate.fraction())
    }

    /// Calculates tax on this taxable base.
    ///
    /// ## Rounding
    /// ```text
    /// ┌─────────────────────────────────────────────────────────────────────┐
    /// │  ROUND HALF AWAY FROM ZERO, 2 PLACES                                │
    /// │                                                                     │
    /// │    0.125 → 0.13     0.124 → 0.12     -0.125 → -0.13                 │
    /// │                                                                     │
    /// │  Applied once, to the tax on (subtotal − discount).                 │
    /// │  Recalculating twice gives the same figure.                         │
    /// └─────────────────────────────────────────────────────────────────────┘
    /// ```
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use tally_core::money::{Money, Percentage};
    ///
    /// let base = Money::new(Decimal::new(180, 0));
    /// let tax = base.calculate_tax(Percentage::new(Decimal::new(14, 0)));
    /// assert_eq!(tax.amount(), Decimal::new(2520, 2));
    /// ```
    pub fn calculate_tax(&self, rate: Percentage) -> Money {
        self.percent(rate).round()
    }
}

// =============================================================================
// Percentage Type
// =============================================================================

/// A percentage expressed in percent units: `14` means 14%.
///
/// Used for the header discount percent and the flat tax rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(Decimal);

impl Percentage {
    /// Creates a percentage from percent units.
    #[inline]
    pub const fn new(percent: Decimal) -> Self {
        Percentage(percent)
    }

    /// Zero percent.
    #[inline]
    pub const fn zero() -> Self {
        Percentage(Decimal::ZERO)
    }

    /// Returns the value in percent units.
    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Returns the multiplier (`14` → `0.14`).
    #[inline]
    pub fn fraction(&self) -> Decimal {
        self.0 / Decimal::ONE_HUNDRED
    }

    /// Checks if the rate is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checks if the rate is above zero.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl Default for Percentage {
    fn default() -> Self {
        Percentage::zero()
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the amount with two decimals, for logs and debugging.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money(amount)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

/// Multiplication by a quantity.
impl Mul<Decimal> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: Decimal) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tax_rounds_half_away_from_zero() {
        let rate = Percentage::new(dec!(10));
        assert_eq!(Money::new(dec!(1.25)).calculate_tax(rate).amount(), dec!(0.13));
        assert_eq!(Money::new(dec!(1.24)).calculate_tax(rate).amount(), dec!(0.12));
        assert_eq!(Money::new(dec!(-1.25)).calculate_tax(rate).amount(), dec!(-0.13));
    }

    #[test]
    fn test_tax_on_taxable_base() {
        let tax = Money::new(dec!(180)).calculate_tax(Percentage::new(dec!(14)));
        assert_eq!(tax.amount(), dec!(25.20));
    }

    #[test]
    fn test_percent_is_not_rounded() {
        let part = Money::new(dec!(33.33)).percent(Percentage::new(dec!(10)));
        assert_eq!(part.amount(), dec!(3.333));
    }

    #[test]
    fn test_clamp_and_min() {
        assert_eq!(Money::new(dec!(-0.01)).clamp_non_negative(), Money::zero());
        assert_eq!(Money::new(dec!(7)).clamp_non_negative().amount(), dec!(7));
        assert_eq!(Money::new(dec!(5)).min(Money::new(dec!(3))).amount(), dec!(3));
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::new(dec!(10.50));
        let b = Money::new(dec!(2.25));
        assert_eq!((a + b).amount(), dec!(12.75));
        assert_eq!((a - b).amount(), dec!(8.25));
        assert_eq!((a * dec!(2.5)).amount(), dec!(26.250));
        assert_eq!((-a).amount(), dec!(-10.50));

        let total: Money = [a, b].iter().sum();
        assert_eq!(total.amount(), dec!(12.75));
    }

    #[test]
    fn test_display_two_decimals() {
        assert_eq!(Money::new(dec!(205.2)).to_string(), "205.20");
        assert_eq!(Percentage::new(dec!(14)).to_string(), "14%");
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&Money::new(dec!(12.50))).unwrap();
        assert_eq!(json, "\"12.50\"");
    }
}
