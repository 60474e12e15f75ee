//! # Stock Movement Recorder
//!
//! Pure append. Validation happens upstream; this only stamps an id and a
//! date and writes the row.

use chrono::Utc;
use rust_decimal::Decimal;

use tally_core::{MovementType, ReferenceKind, StockMovement};

use crate::error::DbResult;
use crate::pool::UnitOfWork;
use crate::repository::movement::insert_movement;
use crate::repository::new_id;

/// A movement to append.
///
/// `quantity` and `unit_id` are as entered. `quantity_in_main_unit` is a
/// positive magnitude for `In`/`Out`; `Adjustment` carries its sign.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub product_id: String,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_id: String,
    pub quantity_in_main_unit: Decimal,
    pub reference_kind: ReferenceKind,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    pub actor: Option<String>,
}

pub struct MovementRecorder;

impl MovementRecorder {
    /// Appends a movement and returns its id.
    pub async fn record(uow: &mut UnitOfWork, movement: NewMovement) -> DbResult<String> {
        let movement = StockMovement {
            id: new_id(),
            product_id: movement.product_id,
            movement_type: movement.movement_type,
            quantity: movement.quantity,
            unit_id: movement.unit_id,
            quantity_in_main_unit: movement.quantity_in_main_unit,
            reference_kind: movement.reference_kind,
            reference_id: movement.reference_id,
            movement_date: Utc::now(),
            actor: movement.actor,
            notes: movement.notes,
        };
        insert_movement(uow.conn(), &movement).await?;
        Ok(movement.id)
    }
}
