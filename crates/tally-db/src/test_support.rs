//! Shared fixtures for the crate's tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tally_core::{
    Counterparty, CounterpartyKind, Money, MovementType, NewInvoice, NewInvoiceLine, Percentage,
    Product, ReferenceKind, Unit,
};

use crate::ledger::{MovementRecorder, NewMovement, StockLedger};
use crate::pool::{Database, DbConfig};
use crate::repository::product::NewProduct;
use crate::retry::RetryPolicy;
use crate::services::Engine;

pub async fn database() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// A WAL database file with several connections, for contention tests.
pub async fn file_database(name: &str) -> (Database, PathBuf) {
    let path = std::env::temp_dir().join(format!("tally-{}-{}.db", name, uuid::Uuid::new_v4()));
    let db = Database::new(DbConfig::new(&path).max_connections(4))
        .await
        .unwrap();
    (db, path)
}

pub fn remove_database(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

pub async fn unit(db: &Database, name: &str, symbol: &str) -> Unit {
    db.units().create(name, symbol).await.unwrap()
}

/// Product with min stock 5, purchase price 1.00 and sale price 2.50.
pub async fn product(db: &Database, code: &str, main_unit_id: &str) -> Product {
    db.products()
        .create(NewProduct {
            code: code.to_string(),
            name: format!("Product {}", code),
            category_id: None,
            main_unit_id: main_unit_id.to_string(),
            min_stock: dec!(5),
            purchase_price: Money::new(dec!(1.00)),
            sale_price: Money::new(dec!(2.50)),
        })
        .await
        .unwrap()
}

/// Engine with a short retry budget so failing tests stay fast.
pub fn engine(db: &Database) -> Engine {
    Engine::new(db.clone()).with_retry_policy(RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(100),
        multiplier: 2.0,
    })
}

pub struct Fixture {
    pub db: Database,
    pub engine: Engine,
    /// Main unit of `product`.
    pub pcs: Unit,
    /// 1 box = 12 pcs for `product`.
    pub boxes: Unit,
    /// Active unit with no mapping for `product`.
    pub kg: Unit,
    pub product: Product,
    pub customer: Counterparty,
    pub supplier: Counterparty,
}

pub async fn fixture() -> Fixture {
    fixture_in(database().await).await
}

pub async fn fixture_in(db: Database) -> Fixture {
    let pcs = unit(&db, "Piece", "pcs").await;
    let boxes = unit(&db, "Box", "box").await;
    let kg = unit(&db, "Kilogram", "kg").await;
    let product = product(&db, "WIDGET", &pcs.id).await;
    db.units()
        .add_conversion(&product.id, &boxes.id, dec!(12))
        .await
        .unwrap();

    let customer = db
        .counterparties()
        .create(CounterpartyKind::Customer, "C001", "Acme Retail")
        .await
        .unwrap();
    let supplier = db
        .counterparties()
        .create(CounterpartyKind::Supplier, "S001", "Widget Works")
        .await
        .unwrap();

    Fixture {
        engine: engine(&db),
        db,
        pcs,
        boxes,
        kg,
        product,
        customer,
        supplier,
    }
}

/// Books `quantity` main units as opening stock.
pub async fn stock_up(db: &Database, product_id: &str, quantity: Decimal) {
    let product = db.products().get_by_id(product_id).await.unwrap().unwrap();
    let mut uow = db.begin().await.unwrap();
    StockLedger::apply_delta(&mut uow, product_id, quantity, MovementType::In)
        .await
        .unwrap();
    MovementRecorder::record(
        &mut uow,
        NewMovement {
            product_id: product_id.to_string(),
            movement_type: MovementType::In,
            quantity,
            unit_id: product.main_unit_id,
            quantity_in_main_unit: quantity,
            reference_kind: ReferenceKind::OpeningBalance,
            reference_id: None,
            notes: None,
            actor: None,
        },
    )
    .await
    .unwrap();
    uow.commit().await.unwrap();
}

pub async fn stock_of(db: &Database, product_id: &str) -> Decimal {
    db.products()
        .get_by_id(product_id)
        .await
        .unwrap()
        .unwrap()
        .current_stock
}

pub async fn balance_of(db: &Database, counterparty_id: &str) -> Money {
    db.counterparties()
        .get_by_id(counterparty_id)
        .await
        .unwrap()
        .unwrap()
        .balance
}

pub fn sales_line(product_id: &str, unit_id: &str, quantity: Decimal, unit_price: Decimal) -> NewInvoiceLine {
    NewInvoiceLine {
        product_id: product_id.to_string(),
        unit_id: unit_id.to_string(),
        quantity,
        unit_price: Money::new(unit_price),
        line_discount: Money::zero(),
    }
}

/// Draft input without discount, tax or payment.
pub fn new_invoice(counterparty_id: &str, lines: Vec<NewInvoiceLine>) -> NewInvoice {
    NewInvoice {
        counterparty_id: counterparty_id.to_string(),
        date: None,
        discount_percent: Percentage::zero(),
        discount_amount: Money::zero(),
        tax_rate: Percentage::zero(),
        paid_amount: Money::zero(),
        notes: None,
        lines,
    }
}
