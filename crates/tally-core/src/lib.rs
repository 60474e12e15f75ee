//! # tally-core: Pure Business Logic for the Tally ledger
//!
//! This crate holds every rule of the inventory ledger and invoice posting
//! engine that can be expressed without I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Tally Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Application services (callers)                  │   │
//! │  │   create_draft ──► post ──► cancel        open_ticket ──► pay   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               tally-db (ledgers + orchestrators)                │   │
//! │  │      UnitOfWork, StockLedger, BalanceLedger, InvoicePosting     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  totals   │  │conversion │  │    pos    │  │   │
//! │  │   │  Product  │  │ Recalc    │  │ main unit │  │  Ticket   │  │   │
//! │  │   │  Invoice  │  │ Tax round │  │  factors  │  │ Payments  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Unit, StockMovement, InvoiceDocument, ...)
//! - [`money`] - Decimal money and percentage types, tax rounding
//! - [`conversion`] - Alternate unit to main unit resolution
//! - [`stock`] - Stock arithmetic: in, out, signed adjustment, absolute set
//! - [`totals`] - Document totals calculator
//! - [`pos`] - POS ticket engine (lines, discounts, tenders)
//! - [`error`] - Domain error taxonomy
//! - [`validation`] - Field and shape validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same input, same output
//! 2. **No I/O**: persistence lives in `tally-db`
//! 3. **Exact Decimals**: quantities and money are `rust_decimal::Decimal`, never floats
//! 4. **Explicit Errors**: every failure is a typed [`CoreError`] variant
//!
//! ## Example Usage
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use tally_core::money::{Money, Percentage};
//!
//! let base = Money::new(Decimal::new(180, 0));
//! let tax = base.calculate_tax(Percentage::new(Decimal::new(14, 0)));
//! assert_eq!(tax.amount(), Decimal::new(2520, 2));
//! ```

pub mod conversion;
pub mod error;
pub mod money;
pub mod pos;
pub mod stock;
pub mod totals;
pub mod types;
pub mod validation;

pub use error::{CoreError, CoreResult, EntityKind, ValidationError};
pub use money::{Money, Percentage};
pub use types::*;

/// Number of decimal places money is rounded to when a rule demands rounding.
pub const MONEY_SCALE: u32 = 2;

/// Maximum lines accepted on one invoice document or POS ticket.
pub const MAX_DOCUMENT_LINES: usize = 500;
