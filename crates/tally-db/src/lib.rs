//! # tally-db: Storage, Ledgers and Posting for Tally
//!
//! Everything that touches the SQLite store: the connection pool, the unit
//! of work, the stock and balance ledgers and the services that sequence
//! them into atomic operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Data Flow                                  │
//! │                                                                         │
//! │  Caller (CLI, API, seed binary)                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   services  ── InvoiceService / InventoryService / TicketService│   │
//! │  │      │            retry + audit around one unit of work        │   │
//! │  │      ▼                                                          │   │
//! │  │   ledger    ── StockLedger / MovementRecorder / BalanceLedger   │   │
//! │  │      │                                                          │   │
//! │  │      ▼                                                          │   │
//! │  │   repository── SQL per table, versioned updates                 │   │
//! │  │      │                                                          │   │
//! │  │      ▼                                                          │   │
//! │  │   pool      ── SqlitePool, UnitOfWork, embedded migrations      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig, Engine};
//! use tally_core::InvoiceKind;
//!
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//! let engine = Engine::new(db);
//!
//! let draft = engine.invoices().create_draft(InvoiceKind::Sales, input).await?;
//! let posted = engine.invoices().post(&draft.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{AuditAction, AuditError, AuditEvent, AuditSink, TracingAuditSink};
pub use config::{EngineConfig, NumberingSettings};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, UnitOfWork};
pub use retry::{with_retry, RetryPolicy};
pub use services::{Engine, InventoryService, InvoiceService, StockCountEntry, TicketService};

// Repository re-exports for convenience
pub use repository::counterparty::CounterpartyRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::movement::MovementRepository;
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::sequence::{NumberSequence, SqliteNumberSequence};
pub use repository::ticket::TicketRepository;
pub use repository::unit::UnitRepository;
