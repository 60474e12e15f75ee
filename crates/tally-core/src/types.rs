//! # Domain Types
//!
//! Core domain types used throughout Tally.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Reference data           Ledgered state            Documents           │
//! │  ┌───────────────┐        ┌───────────────┐         ┌───────────────┐   │
//! │  │ Unit          │        │ Product       │         │InvoiceDocument│   │
//! │  │ UnitConversion│───────►│ current_stock │◄────────│ + InvoiceLine │   │
//! │  └───────────────┘        │ version       │         └──────┬────────┘   │
//! │                           └──────┬────────┘                │            │
//! │                                  │                         ▼            │
//! │                           ┌──────▼────────┐         ┌───────────────┐   │
//! │                           │ StockMovement │         │ Counterparty  │   │
//! │                           │ (append-only) │         │ balance       │   │
//! │                           └───────────────┘         │ + Transaction │   │
//! │                                                     └───────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tagged Enumerations
//! Movement direction, reference kind, status and counterparty kind are all
//! closed enums. With the `sqlx` feature they map to lowercase TEXT columns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::{Money, Percentage};

// =============================================================================
// Unit of Measure
// =============================================================================

/// A unit of measure (pcs, box, kg).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-product conversion from an alternate unit to the product's main unit.
///
/// `1 unit_id == conversion_factor × main unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub id: String,
    pub product_id: String,
    pub unit_id: String,
    pub conversion_factor: Decimal,
    pub is_active: bool,
}

// =============================================================================
// Product
// =============================================================================

/// A stocked product.
///
/// `current_stock` is always in the main unit and never negative after a
/// committed operation. It is only changed through the stock ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Business code, unique.
    pub code: String,

    /// Display name.
    pub name: String,

    /// Optional category reference.
    pub category_id: Option<String>,

    /// The canonical unit all stock figures are expressed in.
    pub main_unit_id: String,

    /// Stock in the main unit.
    pub current_stock: Decimal,

    /// Low-stock threshold, main unit.
    pub min_stock: Decimal,

    pub purchase_price: Money,
    pub sale_price: Money,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    /// Optimistic concurrency counter, bumped on every stock write.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// True when stock is at or below the configured minimum.
    pub fn is_low_on_stock(&self) -> bool {
        self.current_stock <= self.min_stock
    }
}

// =============================================================================
// Stock Movements
// =============================================================================

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Stock received.
    In,
    /// Stock issued.
    Out,
    /// Administrative correction; quantity carries its sign.
    Adjustment,
}

impl MovementType {
    /// The opposite direction, used when a posted document is reversed.
    pub fn reversed(self) -> MovementType {
        match self {
            MovementType::In => MovementType::Out,
            MovementType::Out => MovementType::In,
            MovementType::Adjustment => MovementType::Adjustment,
        }
    }
}

/// What originated a movement, balance change or drawer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    SalesInvoice,
    SalesInvoiceCancellation,
    PurchaseInvoice,
    PurchaseInvoiceCancellation,
    PosSale,
    PosReturn,
    PosVoid,
    StockAdjustment,
    StockCount,
    OpeningBalance,
}

/// An immutable stock history record.
///
/// `quantity`/`unit_id` are as entered; `quantity_in_main_unit` is the
/// converted magnitude. For `In`/`Out` it is positive and the type carries the
/// direction; for `Adjustment` it is the signed delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_id: String,
    pub quantity_in_main_unit: Decimal,
    pub reference_kind: ReferenceKind,
    pub reference_id: Option<String>,
    pub movement_date: DateTime<Utc>,
    pub actor: Option<String>,
    pub notes: Option<String>,
}

impl StockMovement {
    /// Signed effect of this movement on stock.
    pub fn signed_quantity(&self) -> Decimal {
        match self.movement_type {
            MovementType::In => self.quantity_in_main_unit,
            MovementType::Out => -self.quantity_in_main_unit,
            MovementType::Adjustment => self.quantity_in_main_unit,
        }
    }
}

// =============================================================================
// Counterparties
// =============================================================================

/// Customer (receivable) or supplier (payable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyKind {
    Customer,
    Supplier,
}

/// A customer or supplier with an outstanding balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: String,
    pub kind: CounterpartyKind,
    pub code: String,
    pub name: String,
    /// Outstanding receivable (customer) or payable (supplier).
    pub balance: Money,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a counterparty transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Balance increased.
    Income,
    /// Balance decreased.
    Expense,
}

impl TransactionType {
    /// Classifies a non-zero balance delta.
    pub fn for_delta(delta: Money) -> TransactionType {
        if delta.is_negative() {
            TransactionType::Expense
        } else {
            TransactionType::Income
        }
    }
}

/// One balance change, with a positive `amount` and a typed direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyTransaction {
    pub id: String,
    pub counterparty_id: String,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub description: String,
    pub reference_kind: ReferenceKind,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Invoice Documents
// =============================================================================

/// Document lifecycle state.
///
/// ```text
/// Draft ──post──► Confirmed ──cancel──► Cancelled
///   │
///   └──delete──► (gone)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl Default for DocumentStatus {
    fn default() -> Self {
        DocumentStatus::Draft
    }
}

/// Sales and purchase invoices share one structure; the kind decides
/// stock direction and which counterparty they bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Sales,
    Purchase,
}

impl InvoiceKind {
    /// Stock direction applied when posting.
    pub fn posting_movement(self) -> MovementType {
        match self {
            InvoiceKind::Sales => MovementType::Out,
            InvoiceKind::Purchase => MovementType::In,
        }
    }

    pub fn posting_reference(self) -> ReferenceKind {
        match self {
            InvoiceKind::Sales => ReferenceKind::SalesInvoice,
            InvoiceKind::Purchase => ReferenceKind::PurchaseInvoice,
        }
    }

    pub fn cancellation_reference(self) -> ReferenceKind {
        match self {
            InvoiceKind::Sales => ReferenceKind::SalesInvoiceCancellation,
            InvoiceKind::Purchase => ReferenceKind::PurchaseInvoiceCancellation,
        }
    }

    /// The counterparty kind a document of this kind must reference.
    pub fn counterparty_kind(self) -> CounterpartyKind {
        match self {
            InvoiceKind::Sales => CounterpartyKind::Customer,
            InvoiceKind::Purchase => CounterpartyKind::Supplier,
        }
    }

    pub fn document_type(self) -> DocumentType {
        match self {
            InvoiceKind::Sales => DocumentType::SalesInvoice,
            InvoiceKind::Purchase => DocumentType::PurchaseInvoice,
        }
    }
}

/// Key used by the number sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    SalesInvoice,
    PurchaseInvoice,
    PosTicket,
}

/// A line on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: String,
    /// 1-based position on the document.
    pub line_no: i64,
    pub product_id: String,
    /// Unit the quantity was entered in.
    pub unit_id: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub line_discount: Money,
    /// `quantity × unit_price`.
    pub line_total: Money,
    /// `max(0, line_total − line_discount)`.
    pub net_amount: Money,
}

/// A sales or purchase invoice with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub id: String,
    pub kind: InvoiceKind,
    /// Externally generated, unique.
    pub number: String,
    pub date: DateTime<Utc>,
    pub counterparty_id: String,
    pub status: DocumentStatus,
    pub is_posted: bool,

    /// Header discount percent; when zero, `discount_amount` is taken as given.
    pub discount_percent: Percentage,
    pub tax_rate: Percentage,

    pub subtotal: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub net_total: Money,
    pub paid_amount: Money,
    pub remaining_amount: Money,

    pub notes: Option<String>,
    pub lines: Vec<InvoiceLine>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Caller input for a new or edited draft line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub product_id: String,
    pub unit_id: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    #[serde(default)]
    pub line_discount: Money,
}

/// Caller input for a new or edited draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub counterparty_id: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discount_percent: Percentage,
    #[serde(default)]
    pub discount_amount: Money,
    #[serde(default)]
    pub tax_rate: Percentage,
    #[serde(default)]
    pub paid_amount: Money,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<NewInvoiceLine>,
}

// =============================================================================
// Cash Drawer
// =============================================================================

/// Why cash moved in or out of a POS session drawer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum CashEntryType {
    Sale,
    Refund,
    Reversal,
}

/// One signed cash movement for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashDrawerEntry {
    pub id: String,
    pub session_id: String,
    pub ticket_id: String,
    pub entry_type: CashEntryType,
    /// Positive when cash entered the drawer.
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
