//! # Invoice Service
//!
//! Draft lifecycle, posting and cancellation of sales and purchase invoices.
//!
//! ## Posting Flow
//! ```text
//! post(id)
//!   │
//!   ├─► begin unit of work
//!   ├─► load document, reject non-drafts
//!   ├─► check counterparty (exists, active, right kind)
//!   ├─► resolve every line to main units      ── any failure ─► rollback
//!   ├─► per line: stock delta + movement      ── any failure ─► rollback
//!   ├─► balance delta (remaining amount)
//!   ├─► status Draft → Confirmed (guarded by status read)
//!   ├─► commit
//!   └─► purchase prices (separate unit of work, failure only logged)
//! ```
//!
//! The whole unit of work is re-run on `Busy`/`Conflict`. Business failures
//! are reported to the audit sink and returned unchanged.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use tally_core::totals;
use tally_core::validation::validate_new_invoice;
use tally_core::{
    CoreError, DocumentStatus, EntityKind, InvoiceDocument, InvoiceKind, InvoiceLine, Money,
    NewInvoice, NewInvoiceLine,
};

use super::Engine;
use crate::audit::{self, AuditAction};
use crate::error::{DbError, DbResult};
use crate::ledger::{BalanceLedger, MovementRecorder, NewMovement, StockLedger};
use crate::pool::UnitOfWork;
use crate::repository::counterparty::fetch_counterparty;
use crate::repository::invoice::{
    delete_draft, fetch_invoice, insert_invoice, replace_draft, update_status,
};
use crate::repository::movement::fetch_for_reference;
use crate::repository::new_id;
use crate::repository::price_history::insert_change;
use crate::repository::product::{fetch_product, update_purchase_price};
use crate::repository::unit::fetch_unit;
use crate::retry::with_retry;

/// Main-unit purchase price observed on a posted purchase line.
#[derive(Debug, Clone)]
struct PriceObservation {
    product_id: String,
    price: Money,
}

/// Result of a committed posting.
struct Posted {
    document: InvoiceDocument,
    prices: Vec<PriceObservation>,
}

/// Invoice operations. Obtain one with [`Engine::invoices`].
#[derive(Debug, Clone)]
pub struct InvoiceService {
    engine: Engine,
}

impl InvoiceService {
    pub fn new(engine: Engine) -> Self {
        InvoiceService { engine }
    }

    // =========================================================================
    // Drafts
    // =========================================================================

    /// Creates a draft with a freshly issued number and computed totals.
    ///
    /// ## Errors
    /// - `Validation` for malformed input
    /// - `NotFound` for an unknown counterparty, product or unit
    /// - `ReferentialIntegrity` for a counterparty of the wrong kind or an
    ///   inactive one
    /// - `UniqueViolation` if every number attempt collided
    pub async fn create_draft(&self, kind: InvoiceKind, input: NewInvoice) -> DbResult<InvoiceDocument> {
        validate_new_invoice(&input)?;
        let input = &input;
        with_retry(&self.engine.retry, "create_invoice", move || {
            self.create_draft_once(kind, input)
        })
        .await
    }

    async fn create_draft_once(&self, kind: InvoiceKind, input: &NewInvoice) -> DbResult<InvoiceDocument> {
        let mut uow = self.engine.db.begin().await?;
        ensure_counterparty(&mut uow, &input.counterparty_id, kind).await?;
        ensure_line_references(&mut uow, &input.lines).await?;

        let now = Utc::now();
        let mut doc = InvoiceDocument {
            id: new_id(),
            kind,
            number: String::new(),
            date: input.date.unwrap_or(now),
            counterparty_id: input.counterparty_id.clone(),
            status: DocumentStatus::Draft,
            is_posted: false,
            discount_percent: input.discount_percent,
            tax_rate: input.tax_rate,
            subtotal: Money::zero(),
            discount_amount: input.discount_amount,
            tax_amount: Money::zero(),
            net_total: Money::zero(),
            paid_amount: input.paid_amount,
            remaining_amount: Money::zero(),
            notes: input.notes.clone(),
            lines: build_lines(&input.lines),
            created_at: now,
            updated_at: now,
            posted_at: None,
            cancelled_at: None,
        };
        totals::recalculate(&mut doc);

        self.insert_numbered(&mut uow, &mut doc).await?;
        uow.commit().await?;

        info!(
            document_id = %doc.id,
            number = %doc.number,
            ?kind,
            lines = doc.lines.len(),
            net_total = %doc.net_total,
            "Draft invoice created"
        );
        Ok(doc)
    }

    /// Issues a number and inserts, regenerating on a number collision.
    async fn insert_numbered(&self, uow: &mut UnitOfWork, doc: &mut InvoiceDocument) -> DbResult<()> {
        let mut collisions = 0;
        loop {
            doc.number = self
                .engine
                .sequence
                .next_number(uow.conn(), doc.kind.document_type())
                .await?;

            match insert_invoice(uow.conn(), doc).await {
                Ok(()) => return Ok(()),
                Err(DbError::UniqueViolation { field, .. }) if field.ends_with(".number") => {
                    if collisions >= self.engine.max_collision_retries {
                        return Err(DbError::duplicate("invoice number", doc.number.clone()));
                    }
                    collisions += 1;
                    warn!(number = %doc.number, collisions, "Invoice number already taken, issuing another");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Replaces header fields and lines of a draft and recomputes totals.
    pub async fn update_draft(&self, id: &str, input: NewInvoice) -> DbResult<InvoiceDocument> {
        validate_new_invoice(&input)?;
        let input = &input;
        with_retry(&self.engine.retry, "update_invoice", move || {
            self.update_draft_once(id, input)
        })
        .await
    }

    async fn update_draft_once(&self, id: &str, input: &NewInvoice) -> DbResult<InvoiceDocument> {
        let mut uow = self.engine.db.begin().await?;
        let mut doc = load(&mut uow, id).await?;
        if doc.status != DocumentStatus::Draft {
            return Err(CoreError::invalid_state(EntityKind::Invoice, id, doc.status, "update").into());
        }
        ensure_counterparty(&mut uow, &input.counterparty_id, doc.kind).await?;
        ensure_line_references(&mut uow, &input.lines).await?;

        if let Some(date) = input.date {
            doc.date = date;
        }
        doc.counterparty_id = input.counterparty_id.clone();
        doc.discount_percent = input.discount_percent;
        doc.discount_amount = input.discount_amount;
        doc.tax_rate = input.tax_rate;
        doc.paid_amount = input.paid_amount;
        doc.notes = input.notes.clone();
        doc.lines = build_lines(&input.lines);
        doc.updated_at = Utc::now();
        totals::recalculate(&mut doc);

        replace_draft(uow.conn(), &doc).await?;
        uow.commit().await?;

        info!(document_id = %doc.id, number = %doc.number, "Draft invoice updated");
        Ok(doc)
    }

    /// Deletes a draft. Posted and cancelled documents are kept for history.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        with_retry(&self.engine.retry, "delete_invoice", move || self.delete_once(id))
            .await
            .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::DeleteInvoice, id, e))
    }

    async fn delete_once(&self, id: &str) -> DbResult<()> {
        let mut uow = self.engine.db.begin().await?;
        let doc = load(&mut uow, id).await?;
        if doc.status != DocumentStatus::Draft {
            return Err(CoreError::invalid_state(EntityKind::Invoice, id, doc.status, "delete").into());
        }
        if !delete_draft(uow.conn(), id).await? {
            return Err(DbError::conflict("Invoice", id));
        }
        uow.commit().await?;

        info!(document_id = id, number = %doc.number, "Draft invoice deleted");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<InvoiceDocument> {
        self.engine
            .db
            .invoices()
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Invoice, id).into())
    }

    /// Lines of a document in `line_no` order.
    pub async fn lines(&self, id: &str) -> DbResult<Vec<InvoiceLine>> {
        Ok(self.get(id).await?.lines)
    }

    // =========================================================================
    // Posting
    // =========================================================================

    /// Posts a draft: moves stock, updates the counterparty balance and
    /// confirms the document, all or nothing.
    ///
    /// ## Errors
    /// - `AlreadyPosted` for a confirmed document
    /// - `InvalidState` for a cancelled document
    /// - `InsufficientStock` when a sales line exceeds stock
    /// - `Conversion` for a unit without an active mapping
    /// - `InvalidQuantity` for a negative line quantity
    pub async fn post(&self, id: &str) -> DbResult<InvoiceDocument> {
        let posted = with_retry(&self.engine.retry, "post_invoice", move || self.post_once(id))
            .await
            .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::PostInvoice, id, e))?;

        if !posted.prices.is_empty() {
            self.capture_purchase_prices(&posted.document.id, &posted.prices).await;
        }
        Ok(posted.document)
    }

    async fn post_once(&self, id: &str) -> DbResult<Posted> {
        let mut uow = self.engine.db.begin().await?;
        let mut doc = load(&mut uow, id).await?;
        match doc.status {
            DocumentStatus::Draft => {}
            DocumentStatus::Confirmed => {
                return Err(CoreError::AlreadyPosted { document_id: doc.id }.into());
            }
            DocumentStatus::Cancelled => {
                return Err(CoreError::invalid_state(EntityKind::Invoice, id, doc.status, "post").into());
            }
        }
        ensure_counterparty(&mut uow, &doc.counterparty_id, doc.kind).await?;

        // Resolve everything before the first write.
        let mut canonical = Vec::with_capacity(doc.lines.len());
        for line in &doc.lines {
            if line.quantity < Decimal::ZERO {
                return Err(CoreError::invalid_quantity(format!(
                    "line {} has negative quantity {}",
                    line.line_no, line.quantity
                ))
                .into());
            }
            canonical.push(StockLedger::resolve(&mut uow, &line.product_id, &line.unit_id, line.quantity).await?);
        }

        totals::recalculate(&mut doc);

        let movement_type = doc.kind.posting_movement();
        let reference = doc.kind.posting_reference();
        let mut prices = Vec::new();
        for (line, main_qty) in doc.lines.iter().zip(canonical) {
            if main_qty.is_zero() {
                continue;
            }
            StockLedger::apply_delta(&mut uow, &line.product_id, main_qty, movement_type).await?;
            MovementRecorder::record(
                &mut uow,
                NewMovement {
                    product_id: line.product_id.clone(),
                    movement_type,
                    quantity: line.quantity,
                    unit_id: line.unit_id.clone(),
                    quantity_in_main_unit: main_qty,
                    reference_kind: reference,
                    reference_id: Some(doc.id.clone()),
                    notes: Some(format!("Invoice {}", doc.number)),
                    actor: None,
                },
            )
            .await?;

            if doc.kind == InvoiceKind::Purchase {
                prices.push(PriceObservation {
                    product_id: line.product_id.clone(),
                    price: main_unit_price(line, main_qty),
                });
            }
        }

        BalanceLedger::apply_delta(
            &mut uow,
            &doc.counterparty_id,
            doc.remaining_amount,
            &format!("Invoice {}", doc.number),
            reference,
            Some(&doc.id),
        )
        .await?;

        let now = Utc::now();
        doc.status = DocumentStatus::Confirmed;
        doc.is_posted = true;
        doc.posted_at = Some(now);
        doc.updated_at = now;
        update_status(uow.conn(), &doc, DocumentStatus::Draft).await?;
        uow.commit().await?;

        info!(
            document_id = %doc.id,
            number = %doc.number,
            kind = ?doc.kind,
            net_total = %doc.net_total,
            remaining = %doc.remaining_amount,
            "Invoice posted"
        );
        Ok(Posted { document: doc, prices })
    }

    /// Records purchase price changes after a committed purchase posting.
    ///
    /// Runs in its own unit of work. A failure here never undoes the posting.
    async fn capture_purchase_prices(&self, invoice_id: &str, prices: &[PriceObservation]) {
        if let Err(err) = self.capture_purchase_prices_once(invoice_id, prices).await {
            warn!(invoice_id, error = %err, "Purchase price capture failed; posting kept");
        }
    }

    async fn capture_purchase_prices_once(&self, invoice_id: &str, prices: &[PriceObservation]) -> DbResult<()> {
        let mut uow = self.engine.db.begin().await?;
        for observed in prices {
            let Some(product) = fetch_product(uow.conn(), &observed.product_id).await? else {
                continue;
            };
            if product.purchase_price == observed.price {
                continue;
            }
            insert_change(uow.conn(), &product.id, product.purchase_price, observed.price, invoice_id).await?;
            update_purchase_price(uow.conn(), &product.id, observed.price).await?;
        }
        uow.commit().await
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Reverses a posted document: every posting movement is mirrored, the
    /// balance delta is undone and the document becomes `Cancelled`.
    ///
    /// ## Errors
    /// - `NotPosted` for drafts and cancelled documents
    /// - `InsufficientStock` when purchased goods have since been consumed
    pub async fn cancel(&self, id: &str) -> DbResult<InvoiceDocument> {
        with_retry(&self.engine.retry, "cancel_invoice", move || self.cancel_once(id))
            .await
            .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::CancelInvoice, id, e))
    }

    async fn cancel_once(&self, id: &str) -> DbResult<InvoiceDocument> {
        let mut uow = self.engine.db.begin().await?;
        let mut doc = load(&mut uow, id).await?;
        if !doc.is_posted {
            return Err(CoreError::NotPosted { document_id: doc.id }.into());
        }

        let posted = fetch_for_reference(uow.conn(), doc.kind.posting_reference(), &doc.id).await?;
        let reference = doc.kind.cancellation_reference();
        for movement in &posted {
            let reversed = movement.movement_type.reversed();
            StockLedger::apply_delta(&mut uow, &movement.product_id, movement.quantity_in_main_unit, reversed)
                .await?;
            MovementRecorder::record(
                &mut uow,
                NewMovement {
                    product_id: movement.product_id.clone(),
                    movement_type: reversed,
                    quantity: movement.quantity,
                    unit_id: movement.unit_id.clone(),
                    quantity_in_main_unit: movement.quantity_in_main_unit,
                    reference_kind: reference,
                    reference_id: Some(doc.id.clone()),
                    notes: Some(format!("Cancellation of invoice {}", doc.number)),
                    actor: None,
                },
            )
            .await?;
        }

        BalanceLedger::apply_delta(
            &mut uow,
            &doc.counterparty_id,
            -doc.remaining_amount,
            &format!("Cancellation of invoice {}", doc.number),
            reference,
            Some(&doc.id),
        )
        .await?;

        let now = Utc::now();
        doc.status = DocumentStatus::Cancelled;
        doc.is_posted = false;
        doc.cancelled_at = Some(now);
        doc.updated_at = now;
        update_status(uow.conn(), &doc, DocumentStatus::Confirmed).await?;
        uow.commit().await?;

        info!(
            document_id = %doc.id,
            number = %doc.number,
            reversed_movements = posted.len(),
            "Invoice cancelled"
        );
        Ok(doc)
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn load(uow: &mut UnitOfWork, id: &str) -> DbResult<InvoiceDocument> {
    fetch_invoice(uow.conn(), id)
        .await?
        .ok_or_else(|| CoreError::not_found(EntityKind::Invoice, id).into())
}

/// The counterparty must exist, be active and match the document kind.
async fn ensure_counterparty(uow: &mut UnitOfWork, counterparty_id: &str, kind: InvoiceKind) -> DbResult<()> {
    let party = fetch_counterparty(uow.conn(), counterparty_id)
        .await?
        .ok_or_else(|| CoreError::not_found(EntityKind::Counterparty, counterparty_id))?;

    let expected = kind.counterparty_kind();
    if party.kind != expected {
        return Err(CoreError::integrity(
            EntityKind::Counterparty,
            counterparty_id,
            format!("{:?} invoice requires a {:?}", kind, expected),
        )
        .into());
    }
    if !party.is_active {
        return Err(CoreError::integrity(EntityKind::Counterparty, counterparty_id, "counterparty is inactive").into());
    }
    Ok(())
}

/// Products and units named by draft lines must exist.
async fn ensure_line_references(uow: &mut UnitOfWork, lines: &[NewInvoiceLine]) -> DbResult<()> {
    for line in lines {
        if fetch_product(uow.conn(), &line.product_id).await?.is_none() {
            return Err(CoreError::not_found(EntityKind::Product, &line.product_id).into());
        }
        if fetch_unit(uow.conn(), &line.unit_id).await?.is_none() {
            return Err(CoreError::not_found(EntityKind::Unit, &line.unit_id).into());
        }
    }
    Ok(())
}

fn build_lines(input: &[NewInvoiceLine]) -> Vec<InvoiceLine> {
    input
        .iter()
        .enumerate()
        .map(|(index, line)| InvoiceLine {
            id: new_id(),
            line_no: index as i64 + 1,
            product_id: line.product_id.clone(),
            unit_id: line.unit_id.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_discount: line.line_discount,
            line_total: Money::zero(),
            net_amount: Money::zero(),
        })
        .collect()
}

/// Net price of one main unit, after the line discount.
fn main_unit_price(line: &InvoiceLine, main_qty: Decimal) -> Money {
    Money::new(line.net_amount.amount() / main_qty).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::audit::tests::RecordingSink;
    use crate::repository::price_history::history_for;
    use crate::test_support::{self, new_invoice, sales_line};
    use rust_decimal_macros::dec;
    use tally_core::{MovementType, Percentage, ReferenceKind};

    #[tokio::test]
    async fn test_box_line_beyond_stock_rolls_back() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.boxes.id, dec!(1), dec!(12))]),
            )
            .await
            .unwrap();

        let err = service.post(&draft.id).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { requested, available, .. })
                if requested == dec!(12) && available == dec!(10)
        ));

        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
        assert_eq!(test_support::balance_of(&fx.db, &fx.customer.id).await, Money::zero());
        let reloaded = service.get(&draft.id).await.unwrap();
        assert_eq!(reloaded.status, DocumentStatus::Draft);
        assert!(!reloaded.is_posted);
        let movements = fx
            .db
            .movements()
            .for_reference(ReferenceKind::SalesInvoice, &draft.id)
            .await
            .unwrap();
        assert!(movements.is_empty());
    }

    #[tokio::test]
    async fn test_zero_quantity_line_posts_without_movement() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.boxes.id, dec!(0), dec!(12))]),
            )
            .await
            .unwrap();
        let posted = service.post(&draft.id).await.unwrap();

        assert_eq!(posted.status, DocumentStatus::Confirmed);
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
        let movements = fx
            .db
            .movements()
            .for_reference(ReferenceKind::SalesInvoice, &draft.id)
            .await
            .unwrap();
        assert!(movements.is_empty());
    }

    #[tokio::test]
    async fn test_draft_totals() {
        let fx = test_support::fixture().await;
        let service = fx.engine.invoices();

        let mut input = new_invoice(
            &fx.customer.id,
            vec![
                sales_line(&fx.product.id, &fx.pcs.id, dec!(2), dec!(50)),
                sales_line(&fx.product.id, &fx.boxes.id, dec!(1), dec!(100)),
            ],
        );
        input.discount_percent = Percentage::new(dec!(10));
        input.tax_rate = Percentage::new(dec!(14));
        input.paid_amount = Money::new(dec!(5.20));

        let draft = service.create_draft(InvoiceKind::Sales, input).await.unwrap();

        assert!(draft.number.starts_with("SI-"));
        assert_eq!(draft.subtotal, Money::new(dec!(200)));
        assert_eq!(draft.discount_amount, Money::new(dec!(20)));
        assert_eq!(draft.tax_amount, Money::new(dec!(25.20)));
        assert_eq!(draft.net_total, Money::new(dec!(205.20)));
        assert_eq!(draft.remaining_amount, Money::new(dec!(200)));
        assert_eq!(draft.lines[0].line_no, 1);
        assert_eq!(draft.lines[1].line_no, 2);

        let lines = service.lines(&draft.id).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].net_amount, Money::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_post_moves_stock_and_balance() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(30)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(
                    &fx.customer.id,
                    vec![
                        sales_line(&fx.product.id, &fx.pcs.id, dec!(3), dec!(1)),
                        sales_line(&fx.product.id, &fx.boxes.id, dec!(2), dec!(10)),
                    ],
                ),
            )
            .await
            .unwrap();
        let posted = service.post(&draft.id).await.unwrap();

        assert!(posted.is_posted);
        assert!(posted.posted_at.is_some());
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(3));
        assert_eq!(test_support::balance_of(&fx.db, &fx.customer.id).await, Money::new(dec!(23)));

        let movements = fx
            .db
            .movements()
            .for_reference(ReferenceKind::SalesInvoice, &draft.id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements.iter().all(|m| m.movement_type == MovementType::Out));
        assert_eq!(movements[1].quantity, dec!(2));
        assert_eq!(movements[1].unit_id, fx.boxes.id);
        assert_eq!(movements[1].quantity_in_main_unit, dec!(24));
    }

    #[tokio::test]
    async fn test_failing_second_line_leaves_first_unapplied() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(
                    &fx.customer.id,
                    vec![
                        sales_line(&fx.product.id, &fx.pcs.id, dec!(4), dec!(1)),
                        sales_line(&fx.product.id, &fx.pcs.id, dec!(7), dec!(1)),
                    ],
                ),
            )
            .await
            .unwrap();

        let err = service.post(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InsufficientStock { .. })));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
        assert_eq!(fx.db.movements().count_for_product(&fx.product.id).await.unwrap(), 1);
        assert_eq!(test_support::balance_of(&fx.db, &fx.customer.id).await, Money::zero());
    }

    #[tokio::test]
    async fn test_unmapped_unit_fails_before_any_write() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(
                    &fx.customer.id,
                    vec![
                        sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(1)),
                        sales_line(&fx.product.id, &fx.kg.id, dec!(1), dec!(1)),
                    ],
                ),
            )
            .await
            .unwrap();

        let err = service.post(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Conversion { .. })));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
    }

    #[tokio::test]
    async fn test_double_post_and_cancel_of_draft() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(5))]),
            )
            .await
            .unwrap();

        let err = service.cancel(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NotPosted { .. })));

        service.post(&draft.id).await.unwrap();
        let err = service.post(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::AlreadyPosted { .. })));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(9));
    }

    #[tokio::test]
    async fn test_post_then_cancel_restores_stock_and_balance() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(50)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(
                    &fx.customer.id,
                    vec![
                        sales_line(&fx.product.id, &fx.boxes.id, dec!(2), dec!(30)),
                        sales_line(&fx.product.id, &fx.pcs.id, dec!(5), dec!(2)),
                    ],
                ),
            )
            .await
            .unwrap();
        service.post(&draft.id).await.unwrap();
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(21));

        let cancelled = service.cancel(&draft.id).await.unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Cancelled);
        assert!(!cancelled.is_posted);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(50));
        assert_eq!(test_support::balance_of(&fx.db, &fx.customer.id).await, Money::zero());

        let reversals = fx
            .db
            .movements()
            .for_reference(ReferenceKind::SalesInvoiceCancellation, &draft.id)
            .await
            .unwrap();
        assert_eq!(reversals.len(), 2);
        assert!(reversals.iter().all(|m| m.movement_type == MovementType::In));

        let err = service.cancel(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NotPosted { .. })));
        let err = service.post(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_purchase_cancel_after_consumption_fails() {
        let fx = test_support::fixture().await;
        let service = fx.engine.invoices();

        let purchase = service
            .create_draft(
                InvoiceKind::Purchase,
                new_invoice(&fx.supplier.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(5), dec!(1))]),
            )
            .await
            .unwrap();
        service.post(&purchase.id).await.unwrap();
        assert_eq!(test_support::balance_of(&fx.db, &fx.supplier.id).await, Money::new(dec!(5)));

        let sale = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(3), dec!(2))]),
            )
            .await
            .unwrap();
        service.post(&sale.id).await.unwrap();

        let err = service.cancel(&purchase.id).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock { requested, available, .. })
                if requested == dec!(5) && available == dec!(2)
        ));
        assert_eq!(service.get(&purchase.id).await.unwrap().status, DocumentStatus::Confirmed);
        assert_eq!(test_support::balance_of(&fx.db, &fx.supplier.id).await, Money::new(dec!(5)));
    }

    #[tokio::test]
    async fn test_purchase_records_main_unit_price() {
        let fx = test_support::fixture().await;
        let service = fx.engine.invoices();

        let purchase = service
            .create_draft(
                InvoiceKind::Purchase,
                new_invoice(&fx.supplier.id, vec![sales_line(&fx.product.id, &fx.boxes.id, dec!(2), dec!(6))]),
            )
            .await
            .unwrap();
        service.post(&purchase.id).await.unwrap();

        let product = fx.db.products().get_by_id(&fx.product.id).await.unwrap().unwrap();
        assert_eq!(product.purchase_price, Money::new(dec!(0.50)));
        assert_eq!(product.current_stock, dec!(24));

        let history = history_for(fx.db.pool(), &fx.product.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_price, fx.product.purchase_price);
        assert_eq!(history[0].new_price, Money::new(dec!(0.50)));
        assert_eq!(history[0].invoice_id.as_deref(), Some(purchase.id.as_str()));
    }

    #[tokio::test]
    async fn test_purchase_price_is_net_of_line_discount() {
        let fx = test_support::fixture().await;
        let service = fx.engine.invoices();

        // 2 boxes at 6.00 less 2.40 discount = 9.60 for 24 pcs.
        let mut line = sales_line(&fx.product.id, &fx.boxes.id, dec!(2), dec!(6));
        line.line_discount = Money::new(dec!(2.40));
        let purchase = service
            .create_draft(InvoiceKind::Purchase, new_invoice(&fx.supplier.id, vec![line]))
            .await
            .unwrap();
        service.post(&purchase.id).await.unwrap();

        let product = fx.db.products().get_by_id(&fx.product.id).await.unwrap().unwrap();
        assert_eq!(product.purchase_price, Money::new(dec!(0.40)));
        let history = history_for(fx.db.pool(), &fx.product.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_price, Money::new(dec!(0.40)));
    }

    #[tokio::test]
    async fn test_counterparty_checks() {
        let fx = test_support::fixture().await;
        let service = fx.engine.invoices();
        let lines = vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(1))];

        let err = service
            .create_draft(InvoiceKind::Sales, new_invoice(&fx.supplier.id, lines.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ReferentialIntegrity { .. })));

        let err = service
            .create_draft(InvoiceKind::Sales, new_invoice("ghost", lines.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NotFound { .. })));

        let err = service
            .create_draft(InvoiceKind::Sales, new_invoice(&fx.customer.id, Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));

        let draft = service
            .create_draft(InvoiceKind::Sales, new_invoice(&fx.customer.id, lines))
            .await
            .unwrap();
        fx.db.counterparties().deactivate(&fx.customer.id).await.unwrap();
        let err = service.post(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ReferentialIntegrity { .. })));
    }

    #[tokio::test]
    async fn test_update_and_delete_draft() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(1))]),
            )
            .await
            .unwrap();

        let updated = service
            .update_draft(
                &draft.id,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(4), dec!(2.50))]),
            )
            .await
            .unwrap();
        assert_eq!(updated.number, draft.number);
        assert_eq!(updated.net_total, Money::new(dec!(10)));
        assert_eq!(service.lines(&draft.id).await.unwrap()[0].quantity, dec!(4));

        service.delete(&draft.id).await.unwrap();
        let err = service.get(&draft.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NotFound { .. })));

        let posted = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(1))]),
            )
            .await
            .unwrap();
        service.post(&posted.id).await.unwrap();

        let err = service.delete(&posted.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidState { .. })));
        let err = service
            .update_draft(
                &posted.id,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(2), dec!(1))]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_number_collision_issues_next_number() {
        let fx = test_support::fixture().await;
        let service = fx.engine.invoices();
        let input = new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(1))]);

        let first = service.create_draft(InvoiceKind::Sales, input.clone()).await.unwrap();
        sqlx::query("UPDATE number_sequences SET last_value = 0")
            .execute(fx.db.pool())
            .await
            .unwrap();

        let second = service.create_draft(InvoiceKind::Sales, input).await.unwrap();
        assert_eq!(first.number, "SI-000001");
        assert_eq!(second.number, "SI-000002");
    }

    #[tokio::test]
    async fn test_failures_reach_audit_sink() {
        let fx = test_support::fixture().await;
        let sink = Arc::new(RecordingSink::default());
        let service = fx.engine.clone().with_audit_sink(sink.clone()).invoices();

        let draft = service
            .create_draft(
                InvoiceKind::Sales,
                new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(1), dec!(1))]),
            )
            .await
            .unwrap();
        service.post(&draft.id).await.unwrap_err();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::PostInvoice);
        assert_eq!(events[0].subject_id, draft.id);
        assert!(!events[0].retryable);
    }

    #[tokio::test]
    async fn test_concurrent_posts_never_oversell() {
        let (db, path) = test_support::file_database("concurrent-posts").await;
        let fx = test_support::fixture_in(db).await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let service = fx.engine.invoices();

        let mut drafts = Vec::new();
        for _ in 0..2 {
            let draft = service
                .create_draft(
                    InvoiceKind::Sales,
                    new_invoice(&fx.customer.id, vec![sales_line(&fx.product.id, &fx.pcs.id, dec!(6), dec!(1))]),
                )
                .await
                .unwrap();
            drafts.push(draft);
        }

        let (a, b) = tokio::join!(service.post(&drafts[0].id), service.post(&drafts[1].id));
        let outcomes = [a, b];
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        let short = outcomes
            .iter()
            .filter(|r| matches!(r, Err(DbError::Domain(CoreError::InsufficientStock { .. }))))
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(short, 1);
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(4));
        assert_eq!(test_support::balance_of(&fx.db, &fx.customer.id).await, Money::new(dec!(6)));

        fx.db.close().await;
        test_support::remove_database(&path);
    }
}
