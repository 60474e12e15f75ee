//! # Ledgers
//!
//! The only writers of `products.current_stock`, `stock_movements` and
//! `counterparties.balance`. Every operation takes the caller's
//! [`UnitOfWork`](crate::pool::UnitOfWork), so stock, history, balance and
//! document status commit or roll back together.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  InvoiceService::post / TicketService::complete / InventoryService      │
//! │       │                                                                 │
//! │       ├──► StockLedger::resolve       unit → main-unit quantity         │
//! │       ├──► StockLedger::apply_delta   check + versioned UPDATE          │
//! │       ├──► MovementRecorder::record   append-only history               │
//! │       └──► BalanceLedger::apply_delta versioned UPDATE + transaction    │
//! │                                                                         │
//! │  all on one SqliteConnection, inside one transaction                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod balance;
pub mod movement;
pub mod stock;

pub use balance::BalanceLedger;
pub use movement::{MovementRecorder, NewMovement};
pub use stock::{StockChange, StockLedger};
