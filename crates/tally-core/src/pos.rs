//! # POS Ticket Engine
//!
//! In-memory mutation of a point-of-sale ticket. `tally-db` loads a ticket,
//! calls one of these methods and persists the result; stock and cash-drawer
//! effects of completion live there.
//!
//! ## Ticket Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   add/update/remove line, discount        add_payment (paid >= total)   │
//! │        ┌──────┐                         ┌─────────────────────┐         │
//! │        ▼      │                         │                     ▼         │
//! │     ┌─────┐───┘                         │                 ┌──────┐      │
//! │     │ New │─────────────────────────────┘                 │ Paid │      │
//! │     └─────┘◄──────────── total grows above paid ──────────└──────┘      │
//! │        │                                                     │          │
//! │        │ void                                       complete │          │
//! │        ▼                                                     ▼          │
//! │   ┌────────┐               void (reverses stock)      ┌───────────┐     │
//! │   │ Voided │◄─────────────────────────────────────────│ Completed │     │
//! │   └────────┘                                          └───────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - Lines are unique by `(product_id, unit_id)`; adding the same product
//!   again increases its quantity
//! - Every mutation ends with [`Ticket::recalculate`]
//! - Only `New` and `Paid` tickets can be edited

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, EntityKind, ValidationError};
use crate::money::{Money, Percentage};
use crate::totals::{compute_totals, HeaderInputs};
use crate::types::{MovementType, ReferenceKind};
use crate::MAX_DOCUMENT_LINES;

// =============================================================================
// Enumerations
// =============================================================================

/// The status of a POS ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Lines being rung up, not fully paid.
    New,
    /// Tendered amount covers the total.
    Paid,
    /// Stock and cash effects applied.
    Completed,
    /// Cancelled; effects reversed if it had been completed.
    Voided,
}

impl TicketStatus {
    pub fn is_editable(self) -> bool {
        matches!(self, TicketStatus::New | TicketStatus::Paid)
    }
}

/// Sale tickets issue stock; return tickets receive it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Sale,
    Return,
}

impl TicketType {
    /// Stock direction applied on completion.
    pub fn completion_movement(self) -> MovementType {
        match self {
            TicketType::Sale => MovementType::Out,
            TicketType::Return => MovementType::In,
        }
    }

    pub fn completion_reference(self) -> ReferenceKind {
        match self {
            TicketType::Sale => ReferenceKind::PosSale,
            TicketType::Return => ReferenceKind::PosReturn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash; the only method that touches the drawer.
    Cash,
    Card,
    BankTransfer,
}

// =============================================================================
// Ticket Parts
// =============================================================================

/// A line on a ticket.
///
/// Price is frozen when the line is added, like a cart item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketLine {
    pub id: String,
    pub product_id: String,
    pub unit_id: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    /// When positive, the line discount is this percent of the gross line.
    pub discount_percent: Percentage,
    pub discount_amount: Money,
    /// `max(0, quantity × unit_price − discount_amount)`.
    pub line_total: Money,
}

impl TicketLine {
    fn recalculate(&mut self) {
        let gross = self.unit_price * self.quantity;
        if self.discount_percent.is_positive() {
            self.discount_amount = gross.percent(self.discount_percent);
        }
        self.line_total = (gross - self.discount_amount).clamp_non_negative();
    }
}

/// One tender towards a ticket. A ticket may be split across methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPayment {
    pub id: String,
    pub method: PaymentMethod,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Ticket
// =============================================================================

/// A point-of-sale ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub number: String,
    pub ticket_type: TicketType,
    pub cashier_id: String,
    pub session_id: Option<String>,
    pub status: TicketStatus,
    pub lines: Vec<TicketLine>,
    pub payments: Vec<TicketPayment>,

    pub subtotal: Money,
    pub discount_percent: Percentage,
    pub discount_amount: Money,
    pub tax_rate: Percentage,
    pub tax_amount: Money,
    pub total: Money,
    pub amount_paid: Money,
    pub change_amount: Money,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Opens an empty ticket.
    pub fn new(
        number: impl Into<String>,
        ticket_type: TicketType,
        cashier_id: impl Into<String>,
        session_id: Option<String>,
        tax_rate: Percentage,
    ) -> Self {
        let now = Utc::now();
        Ticket {
            id: Uuid::new_v4().to_string(),
            number: number.into(),
            ticket_type,
            cashier_id: cashier_id.into(),
            session_id,
            status: TicketStatus::New,
            lines: Vec::new(),
            payments: Vec::new(),
            subtotal: Money::zero(),
            discount_percent: Percentage::zero(),
            discount_amount: Money::zero(),
            tax_rate,
            tax_amount: Money::zero(),
            total: Money::zero(),
            amount_paid: Money::zero(),
            change_amount: Money::zero(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            voided_at: None,
        }
    }

    /// Adds a product line, or increases the quantity of an existing line for
    /// the same product and unit.
    ///
    /// ## Returns
    /// The id of the line that was created or merged into.
    pub fn add_line(
        &mut self,
        product_id: &str,
        unit_id: &str,
        quantity: Decimal,
        unit_price: Money,
    ) -> CoreResult<String> {
        self.ensure_editable("add line")?;
        ensure_positive_quantity(quantity)?;

        let line_id = if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id && l.unit_id == unit_id)
        {
            line.quantity += quantity;
            line.id.clone()
        } else {
            if self.lines.len() >= MAX_DOCUMENT_LINES {
                return Err(ValidationError::TooMany {
                    field: "lines".to_string(),
                    max: MAX_DOCUMENT_LINES,
                }
                .into());
            }
            let line = TicketLine {
                id: Uuid::new_v4().to_string(),
                product_id: product_id.to_string(),
                unit_id: unit_id.to_string(),
                quantity,
                unit_price,
                discount_percent: Percentage::zero(),
                discount_amount: Money::zero(),
                line_total: Money::zero(),
            };
            let id = line.id.clone();
            self.lines.push(line);
            id
        };

        self.recalculate();
        Ok(line_id)
    }

    /// Sets a line's quantity and, optionally, its discount percent.
    ///
    /// A quantity of zero removes the line.
    pub fn update_line(
        &mut self,
        line_id: &str,
        quantity: Decimal,
        discount_percent: Option<Percentage>,
    ) -> CoreResult<()> {
        self.ensure_editable("update line")?;
        if quantity.is_zero() {
            return self.remove_line(line_id);
        }
        ensure_positive_quantity(quantity)?;
        if let Some(pct) = discount_percent {
            ensure_percent("line discount", pct)?;
        }

        let line = self
            .lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| CoreError::not_found(EntityKind::TicketLine, line_id))?;
        line.quantity = quantity;
        if let Some(pct) = discount_percent {
            line.discount_percent = pct;
            if !pct.is_positive() {
                line.discount_amount = Money::zero();
            }
        }

        self.recalculate();
        Ok(())
    }

    /// Removes a line by id.
    pub fn remove_line(&mut self, line_id: &str) -> CoreResult<()> {
        self.ensure_editable("remove line")?;
        let before = self.lines.len();
        self.lines.retain(|l| l.id != line_id);
        if self.lines.len() == before {
            return Err(CoreError::not_found(EntityKind::TicketLine, line_id));
        }
        self.recalculate();
        Ok(())
    }

    /// Sets the header discount. A positive percent wins over the amount.
    pub fn apply_discount(&mut self, percent: Percentage, amount: Money) -> CoreResult<()> {
        self.ensure_editable("apply discount")?;
        ensure_percent("discount", percent)?;
        if amount.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: "discount".to_string(),
            }
            .into());
        }
        self.discount_percent = percent;
        self.discount_amount = amount;
        self.recalculate();
        Ok(())
    }

    /// Records a tender and flips to `Paid` once it covers the total.
    pub fn add_payment(&mut self, method: PaymentMethod, amount: Money) -> CoreResult<String> {
        if self.status != TicketStatus::New {
            return Err(CoreError::invalid_state(
                EntityKind::Ticket,
                &self.id,
                self.status,
                "add payment",
            ));
        }
        if !amount.is_positive() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "payment amount must be positive".to_string(),
            });
        }
        if self.lines.is_empty() {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "ticket has no lines".to_string(),
            });
        }

        let payment = TicketPayment {
            id: Uuid::new_v4().to_string(),
            method,
            amount,
            created_at: Utc::now(),
        };
        let id = payment.id.clone();
        self.payments.push(payment);
        self.recalculate();
        Ok(id)
    }

    /// Moves a fully paid ticket to `Completed`.
    pub fn complete(&mut self) -> CoreResult<()> {
        if self.status != TicketStatus::Paid {
            return Err(CoreError::invalid_state(
                EntityKind::Ticket,
                &self.id,
                self.status,
                "complete",
            ));
        }
        let now = Utc::now();
        self.status = TicketStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Voids the ticket.
    ///
    /// ## Returns
    /// `true` when the ticket had been completed, so stock and cash must be
    /// reversed by the caller.
    pub fn void(&mut self) -> CoreResult<bool> {
        let was_completed = match self.status {
            TicketStatus::New | TicketStatus::Paid => false,
            TicketStatus::Completed => true,
            TicketStatus::Voided => {
                return Err(CoreError::invalid_state(
                    EntityKind::Ticket,
                    &self.id,
                    self.status,
                    "void",
                ))
            }
        };
        let now = Utc::now();
        self.status = TicketStatus::Voided;
        self.voided_at = Some(now);
        self.updated_at = now;
        Ok(was_completed)
    }

    /// Recomputes line totals, header totals, change and the New/Paid status.
    pub fn recalculate(&mut self) {
        for line in &mut self.lines {
            line.recalculate();
        }

        let subtotal: Money = self.lines.iter().map(|l| l.line_total).sum();
        let amount_paid: Money = self.payments.iter().map(|p| p.amount).sum();
        let totals = compute_totals(
            subtotal,
            &HeaderInputs {
                discount_percent: self.discount_percent,
                discount_amount: self.discount_amount,
                tax_rate: self.tax_rate,
                paid_amount: amount_paid,
            },
        );

        self.subtotal = totals.subtotal;
        self.discount_amount = totals.discount_amount;
        self.tax_amount = totals.tax_amount;
        self.total = totals.net_total;
        self.amount_paid = amount_paid;
        self.change_amount = (amount_paid - self.total).clamp_non_negative();

        if self.status.is_editable() {
            self.status = if !self.payments.is_empty() && self.amount_paid >= self.total {
                TicketStatus::Paid
            } else {
                TicketStatus::New
            };
        }
        self.updated_at = Utc::now();
    }

    /// Cash kept in the drawer for this ticket: cash tendered minus change.
    ///
    /// Negative for returns, where the tender is paid out.
    pub fn net_cash(&self) -> Money {
        let cash: Money = self
            .payments
            .iter()
            .filter(|p| p.method == PaymentMethod::Cash)
            .map(|p| p.amount)
            .sum();
        let kept = (cash - self.change_amount).clamp_non_negative();
        match self.ticket_type {
            TicketType::Sale => kept,
            TicketType::Return => -kept,
        }
    }

    fn ensure_editable(&self, operation: &str) -> CoreResult<()> {
        if !self.status.is_editable() {
            return Err(CoreError::invalid_state(
                EntityKind::Ticket,
                &self.id,
                self.status,
                operation,
            ));
        }
        Ok(())
    }
}

fn ensure_positive_quantity(quantity: Decimal) -> CoreResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(CoreError::invalid_quantity(format!(
            "ticket quantity {} must be positive",
            quantity
        )));
    }
    Ok(())
}

fn ensure_percent(field: &str, pct: Percentage) -> CoreResult<()> {
    if pct.value() < Decimal::ZERO || pct.value() > Decimal::ONE_HUNDRED {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: "0".to_string(),
            max: "100".to_string(),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
