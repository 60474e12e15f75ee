//! # POS Ticket Service
//!
//! Persists the ticket engine from `tally_core::pos` and performs the stock
//! and cash-drawer side effects of completion and void.
//!
//! ## Ticket Lifecycle
//! ```text
//!  open_ticket ──► New ◄──────► Paid ──complete──► Completed
//!                   │  add_payment │                  │
//!                   │              │                  │ void (reverses stock
//!                   └────void──────┴──► Voided ◄──────┘  and drawer cash)
//! ```
//!
//! Every mutation loads the ticket, applies the engine and saves header,
//! lines and payments in one unit of work guarded by the status that was
//! read.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use tally_core::pos::{PaymentMethod, Ticket, TicketStatus, TicketType};
use tally_core::{
    CashDrawerEntry, CashEntryType, CoreError, CoreResult, DocumentType, EntityKind, Money,
    Percentage, ReferenceKind,
};

use super::Engine;
use crate::audit::{self, AuditAction};
use crate::error::{DbError, DbResult};
use crate::ledger::{MovementRecorder, NewMovement, StockLedger};
use crate::pool::UnitOfWork;
use crate::repository::cash_drawer::{entries_for_session, insert_entry, session_total};
use crate::repository::movement::fetch_for_reference;
use crate::repository::new_id;
use crate::repository::ticket::{fetch_ticket, insert_ticket, save_ticket};
use crate::retry::with_retry;

#[derive(Debug, Clone)]
pub struct TicketService {
    engine: Engine,
}

impl TicketService {
    pub fn new(engine: Engine) -> Self {
        TicketService { engine }
    }

    /// Opens an empty ticket with the next POS number.
    pub async fn open_ticket(
        &self,
        ticket_type: TicketType,
        cashier_id: &str,
        session_id: Option<&str>,
        tax_rate: Percentage,
    ) -> DbResult<Ticket> {
        with_retry(&self.engine.retry, "open_ticket", move || {
            self.open_ticket_once(ticket_type, cashier_id, session_id, tax_rate)
        })
        .await
    }

    async fn open_ticket_once(
        &self,
        ticket_type: TicketType,
        cashier_id: &str,
        session_id: Option<&str>,
        tax_rate: Percentage,
    ) -> DbResult<Ticket> {
        let mut uow = self.engine.db.begin().await?;
        let mut ticket = Ticket::new(
            String::new(),
            ticket_type,
            cashier_id,
            session_id.map(str::to_string),
            tax_rate,
        );
        self.insert_numbered(&mut uow, &mut ticket).await?;
        uow.commit().await?;

        info!(ticket_id = %ticket.id, number = %ticket.number, ?ticket_type, "Ticket opened");
        Ok(ticket)
    }

    /// Issues a POS number and inserts, regenerating on a number collision.
    async fn insert_numbered(&self, uow: &mut UnitOfWork, ticket: &mut Ticket) -> DbResult<()> {
        let mut collisions = 0;
        loop {
            ticket.number = self
                .engine
                .sequence
                .next_number(uow.conn(), DocumentType::PosTicket)
                .await?;

            match insert_ticket(uow.conn(), ticket).await {
                Ok(()) => return Ok(()),
                Err(DbError::UniqueViolation { field, .. }) if field.ends_with(".number") => {
                    if collisions >= self.engine.max_collision_retries {
                        return Err(DbError::duplicate(field, ticket.number.clone()));
                    }
                    collisions += 1;
                    warn!(number = %ticket.number, collisions, "Ticket number already taken, issuing another");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn get(&self, id: &str) -> DbResult<Ticket> {
        self.engine
            .db
            .tickets()
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Ticket, id).into())
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Adds `quantity` of a product in `unit_id`.
    ///
    /// Without an explicit price the product's sale price is used, scaled to
    /// the entered unit. Returns the updated ticket and the line id.
    pub async fn add_line(
        &self,
        ticket_id: &str,
        product_id: &str,
        unit_id: &str,
        quantity: Decimal,
        unit_price: Option<Money>,
    ) -> DbResult<(Ticket, String)> {
        if quantity <= Decimal::ZERO {
            return Err(CoreError::invalid_quantity(format!("ticket quantity {} must be positive", quantity)).into());
        }
        with_retry(&self.engine.retry, "ticket_add_line", move || {
            self.add_line_once(ticket_id, product_id, unit_id, quantity, unit_price)
        })
        .await
    }

    async fn add_line_once(
        &self,
        ticket_id: &str,
        product_id: &str,
        unit_id: &str,
        quantity: Decimal,
        unit_price: Option<Money>,
    ) -> DbResult<(Ticket, String)> {
        let mut uow = self.engine.db.begin().await?;
        let mut ticket = load(&mut uow, ticket_id).await?;
        let seen = ticket.status;

        let product = StockLedger::active_product(&mut uow, product_id).await?;
        let main_qty = StockLedger::resolve(&mut uow, product_id, unit_id, quantity).await?;
        let price = unit_price
            .unwrap_or_else(|| Money::new(product.sale_price.amount() * main_qty / quantity).round());

        let line_id = ticket.add_line(product_id, unit_id, quantity, price)?;
        save_ticket(uow.conn(), &ticket, seen).await?;
        uow.commit().await?;
        Ok((ticket, line_id))
    }

    /// Sets a line's quantity and optional discount. Zero removes the line.
    pub async fn update_line(
        &self,
        ticket_id: &str,
        line_id: &str,
        quantity: Decimal,
        discount_percent: Option<Percentage>,
    ) -> DbResult<Ticket> {
        self.mutate(ticket_id, "ticket_update_line", |ticket| {
            ticket.update_line(line_id, quantity, discount_percent)
        })
        .await
        .map(|(ticket, ())| ticket)
    }

    pub async fn remove_line(&self, ticket_id: &str, line_id: &str) -> DbResult<Ticket> {
        self.mutate(ticket_id, "ticket_remove_line", |ticket| ticket.remove_line(line_id))
            .await
            .map(|(ticket, ())| ticket)
    }

    /// Header discount; a positive percent wins over the amount.
    pub async fn apply_discount(&self, ticket_id: &str, percent: Percentage, amount: Money) -> DbResult<Ticket> {
        self.mutate(ticket_id, "ticket_discount", |ticket| ticket.apply_discount(percent, amount))
            .await
            .map(|(ticket, ())| ticket)
    }

    /// Records a tender. The ticket becomes `Paid` once tenders cover the total.
    pub async fn add_payment(
        &self,
        ticket_id: &str,
        method: PaymentMethod,
        amount: Money,
    ) -> DbResult<(Ticket, String)> {
        self.mutate(ticket_id, "ticket_add_payment", |ticket| ticket.add_payment(method, amount))
            .await
    }

    async fn mutate<T, F>(&self, ticket_id: &str, operation: &str, apply: F) -> DbResult<(Ticket, T)>
    where
        F: Fn(&mut Ticket) -> CoreResult<T>,
    {
        let apply = &apply;
        with_retry(&self.engine.retry, operation, move || self.mutate_once(ticket_id, apply)).await
    }

    async fn mutate_once<T, F>(&self, ticket_id: &str, apply: &F) -> DbResult<(Ticket, T)>
    where
        F: Fn(&mut Ticket) -> CoreResult<T>,
    {
        let mut uow = self.engine.db.begin().await?;
        let mut ticket = load(&mut uow, ticket_id).await?;
        let seen = ticket.status;

        let value = apply(&mut ticket)?;
        save_ticket(uow.conn(), &ticket, seen).await?;
        uow.commit().await?;
        Ok((ticket, value))
    }

    // =========================================================================
    // Completion and void
    // =========================================================================

    /// Completes a paid ticket: stock out for sales (in for returns) and a
    /// drawer entry for the net cash, all or nothing.
    ///
    /// ## Errors
    /// - `InvalidState` unless the ticket is `Paid`
    /// - `InsufficientStock` when a sale line exceeds stock
    pub async fn complete(&self, ticket_id: &str) -> DbResult<Ticket> {
        with_retry(&self.engine.retry, "complete_ticket", move || self.complete_once(ticket_id))
            .await
            .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::CompleteTicket, ticket_id, e))
    }

    async fn complete_once(&self, ticket_id: &str) -> DbResult<Ticket> {
        let mut uow = self.engine.db.begin().await?;
        let mut ticket = load(&mut uow, ticket_id).await?;
        let seen = ticket.status;
        ticket.complete()?;

        let movement_type = ticket.ticket_type.completion_movement();
        let reference = ticket.ticket_type.completion_reference();
        for line in &ticket.lines {
            let main_qty = StockLedger::resolve(&mut uow, &line.product_id, &line.unit_id, line.quantity).await?;
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
                    reference_id: Some(ticket.id.clone()),
                    notes: Some(format!("Ticket {}", ticket.number)),
                    actor: Some(ticket.cashier_id.clone()),
                },
            )
            .await?;
        }

        let entry_type = match ticket.ticket_type {
            TicketType::Sale => CashEntryType::Sale,
            TicketType::Return => CashEntryType::Refund,
        };
        record_cash(&mut uow, &ticket, entry_type, ticket.net_cash()).await?;

        save_ticket(uow.conn(), &ticket, seen).await?;
        uow.commit().await?;

        info!(
            ticket_id = %ticket.id,
            number = %ticket.number,
            total = %ticket.total,
            change = %ticket.change_amount,
            "Ticket completed"
        );
        Ok(ticket)
    }

    /// Voids a ticket. A completed ticket has its stock movements and drawer
    /// cash reversed in the same unit of work.
    pub async fn void(&self, ticket_id: &str) -> DbResult<Ticket> {
        with_retry(&self.engine.retry, "void_ticket", move || self.void_once(ticket_id))
            .await
            .map_err(|e| audit::report(self.engine.audit.as_ref(), AuditAction::VoidTicket, ticket_id, e))
    }

    async fn void_once(&self, ticket_id: &str) -> DbResult<Ticket> {
        let mut uow = self.engine.db.begin().await?;
        let mut ticket = load(&mut uow, ticket_id).await?;
        let seen = ticket.status;
        let was_completed = ticket.void()?;

        if was_completed {
            let completed =
                fetch_for_reference(uow.conn(), ticket.ticket_type.completion_reference(), &ticket.id).await?;
            for movement in &completed {
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
                        reference_kind: ReferenceKind::PosVoid,
                        reference_id: Some(ticket.id.clone()),
                        notes: Some(format!("Void of ticket {}", ticket.number)),
                        actor: Some(ticket.cashier_id.clone()),
                    },
                )
                .await?;
            }
            record_cash(&mut uow, &ticket, CashEntryType::Reversal, -ticket.net_cash()).await?;
        }

        save_ticket(uow.conn(), &ticket, seen).await?;
        uow.commit().await?;

        info!(ticket_id = %ticket.id, number = %ticket.number, was_completed, "Ticket voided");
        Ok(ticket)
    }

    // =========================================================================
    // Cash drawer
    // =========================================================================

    /// Net cash a session's drawer should hold.
    pub async fn session_cash_total(&self, session_id: &str) -> DbResult<Money> {
        session_total(self.engine.db.pool(), session_id).await
    }

    pub async fn session_entries(&self, session_id: &str) -> DbResult<Vec<CashDrawerEntry>> {
        entries_for_session(self.engine.db.pool(), session_id).await
    }
}

async fn load(uow: &mut UnitOfWork, ticket_id: &str) -> DbResult<Ticket> {
    fetch_ticket(uow.conn(), ticket_id)
        .await?
        .ok_or_else(|| CoreError::not_found(EntityKind::Ticket, ticket_id).into())
}

/// Writes a drawer entry when the ticket belongs to a session and cash moved.
async fn record_cash(uow: &mut UnitOfWork, ticket: &Ticket, entry_type: CashEntryType, amount: Money) -> DbResult<()> {
    let Some(session_id) = &ticket.session_id else {
        return Ok(());
    };
    if amount.is_zero() {
        return Ok(());
    }

    let entry = CashDrawerEntry {
        id: new_id(),
        session_id: session_id.clone(),
        ticket_id: ticket.id.clone(),
        entry_type,
        amount,
        created_at: Utc::now(),
    };
    insert_entry(uow.conn(), &entry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::audit::tests::RecordingSink;
    use crate::test_support;
    use rust_decimal_macros::dec;
    use tally_core::MovementType;

    async fn paid_sale(fx: &test_support::Fixture, quantity: Decimal, cash: Decimal) -> Ticket {
        let pos = fx.engine.tickets();
        let ticket = pos
            .open_ticket(TicketType::Sale, "cashier-1", Some("session-1"), Percentage::zero())
            .await
            .unwrap();
        pos.add_line(&ticket.id, &fx.product.id, &fx.pcs.id, quantity, None)
            .await
            .unwrap();
        let (ticket, _) = pos
            .add_payment(&ticket.id, PaymentMethod::Cash, Money::new(cash))
            .await
            .unwrap();
        ticket
    }

    #[tokio::test]
    async fn test_sale_ticket_flow() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let pos = fx.engine.tickets();

        let ticket = paid_sale(&fx, dec!(4), dec!(20)).await;
        assert!(ticket.number.starts_with("POS-"));
        assert_eq!(ticket.status, TicketStatus::Paid);
        assert_eq!(ticket.total, Money::new(dec!(10)));
        assert_eq!(ticket.change_amount, Money::new(dec!(10)));

        let completed = pos.complete(&ticket.id).await.unwrap();
        assert_eq!(completed.status, TicketStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(6));
        assert_eq!(pos.session_cash_total("session-1").await.unwrap(), Money::new(dec!(10)));

        let movements = fx
            .db
            .movements()
            .for_reference(ReferenceKind::PosSale, &ticket.id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Out);
        assert_eq!(movements[0].actor.as_deref(), Some("cashier-1"));

        let stored = pos.get(&ticket.id).await.unwrap();
        assert_eq!(stored.status, TicketStatus::Completed);
        assert_eq!(stored.payments.len(), 1);
    }

    #[tokio::test]
    async fn test_default_price_scales_with_unit() {
        let fx = test_support::fixture().await;
        let pos = fx.engine.tickets();

        let ticket = pos
            .open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap();
        let (ticket, _) = pos
            .add_line(&ticket.id, &fx.product.id, &fx.boxes.id, dec!(1), None)
            .await
            .unwrap();
        assert_eq!(ticket.lines[0].unit_price, Money::new(dec!(30)));

        let (ticket, _) = pos
            .add_line(&ticket.id, &fx.product.id, &fx.pcs.id, dec!(2), Some(Money::new(dec!(2))))
            .await
            .unwrap();
        assert_eq!(ticket.total, Money::new(dec!(34)));

        let err = pos
            .add_line(&ticket.id, &fx.product.id, &fx.kg.id, dec!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Conversion { .. })));
    }

    #[tokio::test]
    async fn test_edits_persist() {
        let fx = test_support::fixture().await;
        let pos = fx.engine.tickets();

        let ticket = pos
            .open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap();
        let (_, line_id) = pos
            .add_line(&ticket.id, &fx.product.id, &fx.pcs.id, dec!(2), None)
            .await
            .unwrap();

        pos.update_line(&ticket.id, &line_id, dec!(4), Some(Percentage::new(dec!(10))))
            .await
            .unwrap();
        let discounted = pos
            .apply_discount(&ticket.id, Percentage::zero(), Money::new(dec!(1)))
            .await
            .unwrap();
        assert_eq!(discounted.subtotal, Money::new(dec!(9)));
        assert_eq!(discounted.total, Money::new(dec!(8)));

        let stored = pos.get(&ticket.id).await.unwrap();
        assert_eq!(stored.lines[0].quantity, dec!(4));
        assert_eq!(stored.total, Money::new(dec!(8)));

        let emptied = pos.remove_line(&ticket.id, &line_id).await.unwrap();
        assert!(emptied.lines.is_empty());
        assert!(pos.get(&ticket.id).await.unwrap().lines.is_empty());
    }

    #[tokio::test]
    async fn test_complete_requires_payment() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let pos = fx.engine.tickets();

        let ticket = pos
            .open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap();
        pos.add_line(&ticket.id, &fx.product.id, &fx.pcs.id, dec!(1), None)
            .await
            .unwrap();

        let err = pos.complete(&ticket.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidState { .. })));
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
    }

    #[tokio::test]
    async fn test_complete_beyond_stock_rolls_back() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(2)).await;
        let sink = Arc::new(RecordingSink::default());
        let pos = fx.engine.clone().with_audit_sink(sink.clone()).tickets();

        let ticket = paid_sale(&fx, dec!(3), dec!(10)).await;
        let err = pos.complete(&ticket.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InsufficientStock { .. })));

        assert_eq!(pos.get(&ticket.id).await.unwrap().status, TicketStatus::Paid);
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(2));
        assert!(pos.session_cash_total("session-1").await.unwrap().is_zero());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::CompleteTicket);
    }

    #[tokio::test]
    async fn test_void_completed_reverses_stock_and_cash() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let pos = fx.engine.tickets();

        let ticket = paid_sale(&fx, dec!(4), dec!(10)).await;
        pos.complete(&ticket.id).await.unwrap();

        let voided = pos.void(&ticket.id).await.unwrap();
        assert_eq!(voided.status, TicketStatus::Voided);
        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(10));
        assert!(pos.session_cash_total("session-1").await.unwrap().is_zero());

        let entries = pos.session_entries("session-1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].entry_type, CashEntryType::Reversal);

        let reversals = fx
            .db
            .movements()
            .for_reference(ReferenceKind::PosVoid, &ticket.id)
            .await
            .unwrap();
        assert_eq!(reversals.len(), 1);
        assert_eq!(reversals[0].movement_type, MovementType::In);

        let err = pos.void(&ticket.id).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_void_open_ticket_only_flips_status() {
        let fx = test_support::fixture().await;
        test_support::stock_up(&fx.db, &fx.product.id, dec!(10)).await;
        let pos = fx.engine.tickets();

        let ticket = paid_sale(&fx, dec!(1), dec!(5)).await;
        let voided = pos.void(&ticket.id).await.unwrap();

        assert_eq!(voided.status, TicketStatus::Voided);
        assert_eq!(fx.db.movements().count_for_product(&fx.product.id).await.unwrap(), 1);
        assert!(pos.session_entries("session-1").await.unwrap().is_empty());

        let err = pos
            .add_line(&ticket.id, &fx.product.id, &fx.pcs.id, dec!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_return_ticket_restocks_and_pays_out() {
        let fx = test_support::fixture().await;
        let pos = fx.engine.tickets();

        let ticket = pos
            .open_ticket(TicketType::Return, "cashier-1", Some("session-2"), Percentage::zero())
            .await
            .unwrap();
        pos.add_line(&ticket.id, &fx.product.id, &fx.pcs.id, dec!(2), None)
            .await
            .unwrap();
        pos.add_payment(&ticket.id, PaymentMethod::Cash, Money::new(dec!(5)))
            .await
            .unwrap();
        pos.complete(&ticket.id).await.unwrap();

        assert_eq!(test_support::stock_of(&fx.db, &fx.product.id).await, dec!(2));
        assert_eq!(pos.session_cash_total("session-2").await.unwrap(), Money::new(dec!(-5)));
        let entries = pos.session_entries("session-2").await.unwrap();
        assert_eq!(entries[0].entry_type, CashEntryType::Refund);
    }

    #[tokio::test]
    async fn test_ticket_number_collision_issues_next_number() {
        let fx = test_support::fixture().await;
        let pos = fx.engine.tickets();

        let first = pos
            .open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap();
        sqlx::query("UPDATE number_sequences SET last_value = 0")
            .execute(fx.db.pool())
            .await
            .unwrap();

        let second = pos
            .open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap();
        assert_eq!(first.number, "POS-000001");
        assert_eq!(second.number, "POS-000002");
        assert_eq!(pos.get(&second.id).await.unwrap().number, "POS-000002");
    }

    #[tokio::test]
    async fn test_ticket_number_collision_budget_exhausted() {
        let fx = test_support::fixture().await;
        let mut engine = fx.engine.clone();
        engine.max_collision_retries = 0;
        let pos = engine.tickets();

        pos.open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap();
        sqlx::query("UPDATE number_sequences SET last_value = 0")
            .execute(fx.db.pool())
            .await
            .unwrap();

        let err = pos
            .open_ticket(TicketType::Sale, "cashier-1", None, Percentage::zero())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref field, ref value }
                if field == "pos_tickets.number" && value == "POS-000001"
        ));
    }
}
