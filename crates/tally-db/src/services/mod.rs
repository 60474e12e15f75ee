//! # Services
//!
//! Orchestrators that sequence the ledgers inside one unit of work and wrap
//! each whole operation in the retry policy.
//!
//! ```text
//! Engine (db + retry policy + number sequence + audit sink)
//!    ├── invoices()  ──► InvoiceService    draft / post / cancel / delete
//!    ├── inventory() ──► InventoryService  adjustments, counts, repair
//!    └── tickets()   ──► TicketService     POS tickets, cash drawer
//! ```

pub mod inventory;
pub mod invoice;
pub mod pos;

use std::sync::Arc;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::EngineConfig;
use crate::pool::Database;
use crate::repository::sequence::{NumberSequence, SqliteNumberSequence};
use crate::retry::RetryPolicy;

pub use inventory::{InventoryService, StockCountEntry};
pub use invoice::InvoiceService;
pub use pos::TicketService;

/// Shared collaborators for all services. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) db: Database,
    pub(crate) retry: RetryPolicy,
    pub(crate) sequence: Arc<dyn NumberSequence>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) max_collision_retries: u32,
}

impl Engine {
    /// Engine with default retry policy, numbering and a tracing audit sink.
    pub fn new(db: Database) -> Self {
        Engine {
            db,
            retry: RetryPolicy::default(),
            sequence: Arc::new(SqliteNumberSequence::default()),
            audit: Arc::new(TracingAuditSink),
            max_collision_retries: 3,
        }
    }

    pub fn from_config(db: Database, config: &EngineConfig) -> Self {
        Engine {
            db,
            retry: config.retry_policy(),
            sequence: Arc::new(SqliteNumberSequence::new(config.numbering.clone())),
            audit: Arc::new(TracingAuditSink),
            max_collision_retries: config.numbering.max_collision_retries,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sequence(mut self, sequence: Arc<dyn NumberSequence>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn invoices(&self) -> InvoiceService {
        InvoiceService::new(self.clone())
    }

    pub fn inventory(&self) -> InventoryService {
        InventoryService::new(self.clone())
    }

    pub fn tickets(&self) -> TicketService {
        TicketService::new(self.clone())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("db", &self.db)
            .field("retry", &self.retry)
            .field("max_collision_retries", &self.max_collision_retries)
            .finish_non_exhaustive()
    }
}
