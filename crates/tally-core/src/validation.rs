//! # Validation Module
//!
//! Shape checks run before orchestration begins.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: THIS MODULE (shape)                                           │
//! │  ├── counterparty present, at least one line                            │
//! │  └── prices, discounts and rates in range                               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Posting orchestrator (business)                               │
//! │  ├── product/unit/counterparty exist and are active                     │
//! │  └── conversion, stock sufficiency                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  └── NOT NULL, UNIQUE, FOREIGN KEY                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Line quantities are deliberately not checked here: a negative quantity is
//! rejected at posting time with `InvalidQuantity`.

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::money::{Money, Percentage};
use crate::types::NewInvoice;
use crate::MAX_DOCUMENT_LINES;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a business code (product code, counterparty code).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_code;
///
/// assert!(validate_code("code", "WATER-500").is_ok());
/// assert!(validate_code("code", "").is_err());
/// assert!(validate_code("code", "has space").is_err());
/// ```
pub fn validate_code(field: &str, code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 50,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name: non-empty, at most 200 characters.
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Rejects negative money.
pub fn validate_non_negative_money(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Rejects negative decimals (stock thresholds, counted quantities).
pub fn validate_non_negative(field: &str, value: Decimal) -> ValidationResult<()> {
    if value < Decimal::ZERO {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Requires `0 <= pct <= 100`.
pub fn validate_percentage(field: &str, pct: Percentage) -> ValidationResult<()> {
    if pct.value() < Decimal::ZERO || pct.value() > Decimal::ONE_HUNDRED {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: "0".to_string(),
            max: "100".to_string(),
        });
    }
    Ok(())
}

/// A conversion factor must be strictly positive.
pub fn validate_conversion_factor(factor: Decimal) -> ValidationResult<()> {
    if factor <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "conversion_factor".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Document Validators
// =============================================================================

/// Validates the shape of a draft invoice.
pub fn validate_new_invoice(input: &NewInvoice) -> ValidationResult<()> {
    if input.counterparty_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "counterparty_id".to_string(),
        });
    }

    if input.lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if input.lines.len() > MAX_DOCUMENT_LINES {
        return Err(ValidationError::TooMany {
            field: "lines".to_string(),
            max: MAX_DOCUMENT_LINES,
        });
    }

    validate_percentage("discount_percent", input.discount_percent)?;
    validate_percentage("tax_rate", input.tax_rate)?;
    validate_non_negative_money("discount_amount", input.discount_amount)?;
    validate_non_negative_money("paid_amount", input.paid_amount)?;

    for line in &input.lines {
        if line.product_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "product_id".to_string(),
            });
        }
        if line.unit_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "unit_id".to_string(),
            });
        }
        validate_non_negative_money("unit_price", line.unit_price)?;
        validate_non_negative_money("line_discount", line.line_discount)?;
    }

    if let Some(notes) = &input.notes {
        if notes.chars().count() > 1000 {
            return Err(ValidationError::TooLong {
                field: "notes".to_string(),
                max: 1000,
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewInvoiceLine;
    use rust_decimal_macros::dec;

    fn input() -> NewInvoice {
        NewInvoice {
            counterparty_id: "c-1".to_string(),
            date: None,
            discount_percent: Percentage::zero(),
            discount_amount: Money::zero(),
            tax_rate: Percentage::new(dec!(14)),
            paid_amount: Money::zero(),
            notes: None,
            lines: vec![NewInvoiceLine {
                product_id: "p-1".to_string(),
                unit_id: "pcs".to_string(),
                quantity: dec!(1),
                unit_price: Money::new(dec!(100)),
                line_discount: Money::zero(),
            }],
        }
    }

    #[test]
    fn test_valid_invoice() {
        assert!(validate_new_invoice(&input()).is_ok());
    }

    #[test]
    fn test_missing_counterparty() {
        let mut i = input();
        i.counterparty_id = "  ".to_string();
        assert!(matches!(
            validate_new_invoice(&i),
            Err(ValidationError::Required { field }) if field == "counterparty_id"
        ));
    }

    #[test]
    fn test_no_lines() {
        let mut i = input();
        i.lines.clear();
        assert!(validate_new_invoice(&i).is_err());
    }

    #[test]
    fn test_rate_out_of_range() {
        let mut i = input();
        i.tax_rate = Percentage::new(dec!(101));
        assert!(matches!(
            validate_new_invoice(&i),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_negative_quantity_passes_shape_check() {
        let mut i = input();
        i.lines[0].quantity = dec!(-1);
        assert!(validate_new_invoice(&i).is_ok());
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut i = input();
        i.lines[0].unit_price = Money::new(dec!(-1));
        assert!(validate_new_invoice(&i).is_err());
    }

    #[test]
    fn test_conversion_factor() {
        assert!(validate_conversion_factor(dec!(12)).is_ok());
        assert!(validate_conversion_factor(dec!(0)).is_err());
    }

    #[test]
    fn test_name_length() {
        assert!(validate_name("name", "Water").is_ok());
        assert!(validate_name("name", &"x".repeat(201)).is_err());
    }
}
