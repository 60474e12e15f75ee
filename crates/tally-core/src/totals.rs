//! # Document Totals Calculator
//!
//! Derives every monetary field of a document from its lines and header
//! inputs. Shared by invoices and POS tickets.
//!
//! ## Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  per line:  line_total = quantity × unit_price                          │
//! │             net_amount = max(0, line_total − line_discount)             │
//! │                                                                         │
//! │  subtotal        = Σ net_amount                                         │
//! │  discount_amount = subtotal × pct / 100       (pct > 0)                 │
//! │                  = given amount               (pct = 0)                 │
//! │  tax_amount      = round2(max(0, subtotal − discount) × rate / 100)     │
//! │  net_total       = max(0, subtotal − discount + tax)                    │
//! │  remaining       = max(0, net_total − min(paid, net_total))             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the tax is rounded. Running the calculation twice on an unchanged
//! document gives the same figures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::{Money, Percentage};
use crate::types::InvoiceDocument;

/// Derived amounts for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub line_total: Money,
    pub net_amount: Money,
}

/// Computes `line_total` and `net_amount` for a line.
pub fn line_amounts(quantity: Decimal, unit_price: Money, line_discount: Money) -> LineAmounts {
    let line_total = unit_price * quantity;
    LineAmounts {
        line_total,
        net_amount: (line_total - line_discount).clamp_non_negative(),
    }
}

/// Header fields that feed the totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInputs {
    pub discount_percent: Percentage,
    /// Used only when `discount_percent` is zero.
    pub discount_amount: Money,
    pub tax_rate: Percentage,
    pub paid_amount: Money,
}

/// All derived header amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub net_total: Money,
    pub paid_amount: Money,
    pub remaining_amount: Money,
}

/// Computes header totals from the sum of line net amounts.
pub fn compute_totals(subtotal: Money, header: &HeaderInputs) -> DocumentTotals {
    let discount_amount = if header.discount_percent.is_positive() {
        subtotal.percent(header.discount_percent)
    } else {
        header.discount_amount
    };

    let taxable = (subtotal - discount_amount).clamp_non_negative();
    let tax_amount = taxable.calculate_tax(header.tax_rate);
    let net_total = (subtotal - discount_amount + tax_amount).clamp_non_negative();
    let settled = header.paid_amount.min(net_total);
    let remaining_amount = (net_total - settled).clamp_non_negative();

    DocumentTotals {
        subtotal,
        discount_amount,
        tax_amount,
        net_total,
        paid_amount: header.paid_amount,
        remaining_amount,
    }
}

/// Recalculates an invoice's line and header amounts in place.
///
/// ## Example
/// ```rust,ignore
/// invoice.discount_percent = Percentage::new(dec!(10));
/// invoice.tax_rate = Percentage::new(dec!(14));
/// recalculate(&mut invoice); // subtotal 200
/// assert_eq!(invoice.net_total.amount(), dec!(205.20));
/// ```
pub fn recalculate(doc: &mut InvoiceDocument) {
    for line in &mut doc.lines {
        let amounts = line_amounts(line.quantity, line.unit_price, line.line_discount);
        line.line_total = amounts.line_total;
        line.net_amount = amounts.net_amount;
    }

    let subtotal: Money = doc.lines.iter().map(|l| l.net_amount).sum();
    let totals = compute_totals(
        subtotal,
        &HeaderInputs {
            discount_percent: doc.discount_percent,
            discount_amount: doc.discount_amount,
            tax_rate: doc.tax_rate,
            paid_amount: doc.paid_amount,
        },
    );

    doc.subtotal = totals.subtotal;
    doc.discount_amount = totals.discount_amount;
    doc.tax_amount = totals.tax_amount;
    doc.net_total = totals.net_total;
    doc.remaining_amount = totals.remaining_amount;
}

// =============================================================================
// Unit Tests
// =============================================================================
