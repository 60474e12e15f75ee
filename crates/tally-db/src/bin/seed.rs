//! # Seed Data Generator
//!
//! Populates a database with demo master data and opening stock.
//!
//! ## Usage
//! ```bash
//! # Seed ./tally_dev.db
//! cargo run -p tally-db --bin seed
//!
//! # Specify database path
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db
//!
//! # Use an engine.toml for retry and numbering settings
//! cargo run -p tally-db --bin seed -- --config ./engine.toml
//! ```
//!
//! ## Generated Data
//! - Units: piece, box, pack, kilogram
//! - Products in pieces, with box/pack conversions
//! - Two customers and two suppliers
//! - Opening stock for every product
//! - One posted purchase invoice and one posted sales invoice

use std::env;
use std::path::PathBuf;

use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::{CounterpartyKind, InvoiceKind, Money, NewInvoice, NewInvoiceLine, Percentage};
use tally_db::{Database, Engine, EngineConfig, NewProduct};

/// (code, name, sale price, purchase price, min stock, box factor, pack factor)
const PRODUCTS: &[(&str, &str, i64, i64, i64, Option<i64>, Option<i64>)] = &[
    ("WATER-500", "Mineral Water 500ml", 100, 40, 48, Some(24), Some(6)),
    ("COLA-330", "Cola Can 330ml", 150, 70, 48, Some(24), Some(6)),
    ("JUICE-1L", "Orange Juice 1L", 350, 180, 12, Some(12), None),
    ("CHIPS-150", "Potato Chips 150g", 250, 110, 20, Some(20), None),
    ("COFFEE-250", "Ground Coffee 250g", 899, 520, 6, Some(10), None),
    ("RICE-1KG", "Basmati Rice 1kg", 420, 260, 10, Some(10), None),
    ("SOAP-100", "Hand Soap 100g", 199, 80, 15, None, Some(4)),
    ("TISSUE-10", "Tissues 10-pack", 299, 150, 10, Some(8), None),
];

const CUSTOMERS: &[(&str, &str)] = &[("C001", "Corner Cafe"), ("C002", "Hillside Market")];
const SUPPLIERS: &[(&str, &str)] = &[("S001", "Northern Beverages"), ("S002", "Pantry Wholesale")];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally_db=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cents(value: i64) -> Money {
    Money::new(Decimal::new(value, 2))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: ./tally_dev.db)");
                println!("  -c, --config <PATH>   Engine config file (engine.toml)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            other => warn!(argument = other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = EngineConfig::load(config_path)?;
    config.database.path = db_path.unwrap_or_else(|| PathBuf::from("./tally_dev.db"));

    info!(path = %config.database.path.display(), "Seeding database");
    let db = Database::new(config.db_config()).await?;
    let engine = Engine::from_config(db.clone(), &config);

    if !db.products().list_active().await?.is_empty() {
        warn!("Database already has products, skipping seed. Delete the file to regenerate.");
        return Ok(());
    }

    // Units
    let pcs = db.units().create("Piece", "pcs").await?;
    let boxes = db.units().create("Box", "box").await?;
    let pack = db.units().create("Pack", "pack").await?;
    db.units().create("Kilogram", "kg").await?;

    // Products and conversions
    let mut product_ids = Vec::with_capacity(PRODUCTS.len());
    for &(code, name, sale, purchase, min_stock, box_factor, pack_factor) in PRODUCTS {
        let product = db
            .products()
            .create(NewProduct {
                code: code.to_string(),
                name: name.to_string(),
                category_id: None,
                main_unit_id: pcs.id.clone(),
                min_stock: Decimal::from(min_stock),
                purchase_price: cents(purchase),
                sale_price: cents(sale),
            })
            .await?;

        if let Some(factor) = box_factor {
            db.units().add_conversion(&product.id, &boxes.id, Decimal::from(factor)).await?;
        }
        if let Some(factor) = pack_factor {
            db.units().add_conversion(&product.id, &pack.id, Decimal::from(factor)).await?;
        }
        product_ids.push(product.id);
    }
    info!(count = product_ids.len(), "Products created");

    // Counterparties
    let mut customers = Vec::new();
    for &(code, name) in CUSTOMERS {
        customers.push(db.counterparties().create(CounterpartyKind::Customer, code, name).await?);
    }
    let mut suppliers = Vec::new();
    for &(code, name) in SUPPLIERS {
        suppliers.push(db.counterparties().create(CounterpartyKind::Supplier, code, name).await?);
    }
    info!(customers = customers.len(), suppliers = suppliers.len(), "Counterparties created");

    // Opening stock
    let inventory = engine.inventory();
    for (index, product_id) in product_ids.iter().enumerate() {
        let quantity = Decimal::from(60 + (index as i64 * 17) % 90);
        inventory
            .receive_opening_stock(product_id, quantity, &pcs.id, Some("seed"))
            .await?;
    }
    info!("Opening stock booked");

    // One purchase and one sale through the posting engine
    let invoices = engine.invoices();
    let purchase = invoices
        .create_draft(
            InvoiceKind::Purchase,
            NewInvoice {
                counterparty_id: suppliers[0].id.clone(),
                date: None,
                discount_percent: Percentage::zero(),
                discount_amount: Money::zero(),
                tax_rate: Percentage::new(Decimal::from(14)),
                paid_amount: Money::zero(),
                notes: Some("Seed restock".to_string()),
                lines: vec![
                    NewInvoiceLine {
                        product_id: product_ids[0].clone(),
                        unit_id: boxes.id.clone(),
                        quantity: Decimal::from(2),
                        unit_price: cents(960),
                        line_discount: Money::zero(),
                    },
                    NewInvoiceLine {
                        product_id: product_ids[1].clone(),
                        unit_id: pack.id.clone(),
                        quantity: Decimal::from(4),
                        unit_price: cents(420),
                        line_discount: Money::zero(),
                    },
                ],
            },
        )
        .await?;
    let purchase = invoices.post(&purchase.id).await?;
    info!(number = %purchase.number, total = %purchase.net_total, "Purchase invoice posted");

    let sale = invoices
        .create_draft(
            InvoiceKind::Sales,
            NewInvoice {
                counterparty_id: customers[0].id.clone(),
                date: None,
                discount_percent: Percentage::new(Decimal::from(5)),
                discount_amount: Money::zero(),
                tax_rate: Percentage::new(Decimal::from(14)),
                paid_amount: cents(1000),
                notes: None,
                lines: vec![NewInvoiceLine {
                    product_id: product_ids[2].clone(),
                    unit_id: pcs.id.clone(),
                    quantity: Decimal::from(6),
                    unit_price: cents(350),
                    line_discount: Money::zero(),
                }],
            },
        )
        .await?;
    let sale = invoices.post(&sale.id).await?;
    info!(number = %sale.number, remaining = %sale.remaining_amount, "Sales invoice posted");

    let low = inventory.low_stock_products().await?;
    info!(low_stock = low.len(), "Seed complete");

    db.close().await;
    Ok(())
}
