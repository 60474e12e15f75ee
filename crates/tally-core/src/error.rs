//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                          │
//! │  ├── CoreError        - Ledger and posting rule violations              │
//! │  └── ValidationError  - Document shape failures                         │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                       │
//! │  └── DbError          - Storage failures, wraps CoreError unchanged     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product id, requested, available)
//! 3. Errors are enum variants, never String
//! 4. The caller translates variants to display text; no variant is retryable

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Entity Kind
// =============================================================================

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Unit,
    UnitConversion,
    Counterparty,
    Invoice,
    InvoiceLine,
    Ticket,
    TicketLine,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Product => "Product",
            EntityKind::Unit => "Unit",
            EntityKind::UnitConversion => "Unit conversion",
            EntityKind::Counterparty => "Counterparty",
            EntityKind::Invoice => "Invoice",
            EntityKind::InvoiceLine => "Invoice line",
            EntityKind::Ticket => "Ticket",
            EntityKind::TicketLine => "Ticket line",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// Every failure raised while posting, cancelling or completing a document is
/// one of these variants. They abort the whole unit of work and reach the
/// caller unmodified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// A referenced record exists but cannot be used.
    ///
    /// ## When This Occurs
    /// - Product, unit or counterparty is inactive
    /// - A supplier is referenced by a sales invoice (or the reverse)
    /// - A line references a product the ticket does not contain
    #[error("{entity} {id} cannot be used: {reason}")]
    ReferentialIntegrity {
        entity: EntityKind,
        id: String,
        reason: String,
    },

    /// No usable conversion from the entered unit to the product's main unit.
    ///
    /// An unmapped unit is never treated as factor 1.
    #[error("Cannot convert unit {unit_id} for product {product_id}: {reason}")]
    Conversion {
        product_id: String,
        unit_id: String,
        reason: String,
    },

    /// Outbound quantity exceeds the product's canonical stock.
    ///
    /// ## User Workflow
    /// ```text
    /// Post sales invoice (1 box = 12 pcs)
    ///      │
    ///      ▼
    /// Check stock: available=10
    ///      │
    ///      ▼
    /// InsufficientStock { requested: 12, available: 10 }
    ///      │
    ///      ▼
    /// Nothing is written; stock stays at 10
    /// ```
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: Decimal,
        available: Decimal,
    },

    /// Document has already been posted.
    #[error("Document {document_id} is already posted")]
    AlreadyPosted { document_id: String },

    /// Document is not posted, so it cannot be cancelled.
    #[error("Document {document_id} is not posted")]
    NotPosted { document_id: String },

    /// Quantity is negative, or a stock operation would leave a negative value.
    #[error("Invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    /// Record is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Deleting or editing a confirmed invoice
    /// - Posting a cancelled invoice
    /// - Adding lines to a completed or voided ticket
    #[error("{entity} {id} is {status}, cannot {operation}")]
    InvalidState {
        entity: EntityKind,
        id: String,
        status: String,
        operation: String,
    },

    /// Payment amount is invalid.
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Shorthand for [`CoreError::NotFound`].
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for [`CoreError::ReferentialIntegrity`].
    pub fn integrity(entity: EntityKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::ReferentialIntegrity {
            entity,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CoreError::InvalidState`].
    pub fn invalid_state(
        entity: EntityKind,
        id: impl Into<String>,
        status: impl fmt::Debug,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::InvalidState {
            entity,
            id: id.into(),
            status: format!("{:?}", status),
            operation: operation.into(),
        }
    }

    /// Shorthand for [`CoreError::InvalidQuantity`].
    pub fn invalid_quantity(reason: impl Into<String>) -> Self {
        CoreError::InvalidQuantity {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before orchestration starts, when a document does not have the
/// basic shape the engine expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Collection has too many entries.
    #[error("{field} cannot have more than {max} entries")]
    TooMany { field: String, max: usize },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: String,
        min: String,
        max: String,
    },

    /// Invalid format (e.g., code with spaces).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            requested: dec!(12),
            available: dec!(10),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p-1: requested 12, available 10"
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = CoreError::not_found(EntityKind::UnitConversion, "box");
        assert_eq!(err.to_string(), "Unit conversion not found: box");
    }

    #[test]
    fn test_invalid_state_uses_debug_status() {
        #[derive(Debug)]
        enum Status {
            Confirmed,
        }
        let err = CoreError::invalid_state(EntityKind::Invoice, "inv-1", Status::Confirmed, "delete");
        assert_eq!(err.to_string(), "Invoice inv-1 is Confirmed, cannot delete");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "counterparty_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
