//! # Number Sequence
//!
//! Hands out document numbers such as `SI-000042`.
//!
//! The counter row is bumped inside the caller's unit of work, so a rolled
//! back draft gives its number back. Uniqueness is still enforced by the
//! UNIQUE index on the document table; callers retry on collision.

use async_trait::async_trait;
use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use tally_core::DocumentType;

use crate::config::NumberingSettings;
use crate::error::DbResult;

/// Source of unique document numbers.
#[async_trait]
pub trait NumberSequence: Send + Sync {
    async fn next_number(
        &self,
        conn: &mut SqliteConnection,
        document_type: DocumentType,
    ) -> DbResult<String>;
}

/// Counter rows in `number_sequences`, one per document type.
#[derive(Debug, Clone, Default)]
pub struct SqliteNumberSequence {
    settings: NumberingSettings,
}

impl SqliteNumberSequence {
    pub fn new(settings: NumberingSettings) -> Self {
        SqliteNumberSequence { settings }
    }

    fn format(&self, document_type: DocumentType, value: i64) -> String {
        format!("{}-{:06}", self.settings.prefix(document_type), value)
    }
}

#[async_trait]
impl NumberSequence for SqliteNumberSequence {
    async fn next_number(
        &self,
        conn: &mut SqliteConnection,
        document_type: DocumentType,
    ) -> DbResult<String> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO number_sequences (document_type, last_value) VALUES (?1, 1) \
             ON CONFLICT (document_type) DO UPDATE SET last_value = last_value + 1 \
             RETURNING last_value",
        )
        .bind(document_type)
        .fetch_one(&mut *conn)
        .await?;

        let number = self.format(document_type, value);
        debug!(?document_type, %number, "Number issued");
        Ok(number)
    }
}
