//! # Repository Module
//!
//! SQL for every table lives here.
//!
//! ## Two Access Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Reads / reference data                Ledger writes                    │
//! │  ──────────────────────                ─────────────                    │
//! │  db.products().get_by_id(id)           fetch_product(uow.conn(), id)    │
//! │       │                                update_stock(uow.conn(), ...)    │
//! │       ▼                                     │                           │
//! │  XRepository { pool }                       ▼                           │
//! │  (one pooled connection per call)      free fns over &mut SqliteConnection│
//! │                                        (enlisted in the caller's        │
//! │                                         unit of work)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock and balance writers are `pub(crate)`: only the ledgers call them.
//!
//! ## Decimal Columns
//! Quantities and amounts are TEXT. Rows are fetched as strings and parsed
//! with [`parse_decimal`]; garbage surfaces as [`DbError::CorruptValue`].

pub mod cash_drawer;
pub mod counterparty;
pub mod invoice;
pub mod movement;
pub mod price_history;
pub mod product;
pub mod sequence;
pub mod ticket;
pub mod unit;

use std::str::FromStr;

use rust_decimal::Decimal;
use tally_core::{Money, Percentage};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> DbResult<Decimal> {
    Decimal::from_str(value).map_err(|_| DbError::corrupt(column, value))
}

pub(crate) fn parse_money(column: &str, value: &str) -> DbResult<Money> {
    parse_decimal(column, value).map(Money::new)
}

pub(crate) fn parse_percentage(column: &str, value: &str) -> DbResult<Percentage> {
    parse_decimal(column, value).map(Percentage::new)
}
