//! `guardrail-gen` — a synthetic telemetry generator for exercising the
//! guardrail pipeline end to end, grounded in
//! `original_source/src/data/generator.py`'s `SyntheticStoreGenerator`.
//!
//! Emits newline-delimited JSON telemetry records to stdout; pipe into
//! `curl`/`xargs` against `/api/v1/ingest`, or redirect to a file for replay.
//! Kept deliberately dependency-light (no HTTP client) since its only job
//! is to produce records, not deliver them.

use std::io::{self, Write};

use chrono::Utc;
use clap::Parser;
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultType {
    None,
    PriceJump,
    UnitErrorCents,
    UnitErrorDollars,
    NegativeStock,
    BotSpike,
    StaleTimestamp,
    TimezoneShift,
}

const FAULT_TYPES: [FaultType; 8] = [
    FaultType::None,
    FaultType::PriceJump,
    FaultType::UnitErrorCents,
    FaultType::UnitErrorDollars,
    FaultType::NegativeStock,
    FaultType::BotSpike,
    FaultType::StaleTimestamp,
    FaultType::TimezoneShift,
];

#[derive(Serialize)]
struct GeneratedRecord {
    timestamp: chrono::DateTime<Utc>,
    sku: String,
    price: f64,
    stock: i64,
    views: u64,
    add_to_cart: u64,
    purchases: u64,
    referrer: Option<String>,
}

#[derive(Parser, Debug)]
#[command(name = "guardrail-gen", about = "Synthetic e-commerce telemetry generator")]
struct Cli {
    /// Number of records to emit.
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Number of distinct SKUs to rotate through.
    #[arg(long, default_value_t = 20)]
    skus: usize,

    /// Probability in [0, 1] that a given record carries an injected fault.
    #[arg(long, default_value_t = 0.05)]
    fault_probability: f64,

    /// RNG seed, for reproducible fixture generation.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

const REFERRERS: [&str; 5] = ["search", "social", "direct", "email", "affiliate"];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);

    let skus: Vec<String> = (0..cli.skus).map(|i| format!("SKU-{:04}", i)).collect();
    let fault_weights = [
        1.0 - cli.fault_probability,
        cli.fault_probability / 7.0,
        cli.fault_probability / 7.0,
        cli.fault_probability / 7.0,
        cli.fault_probability / 7.0,
        cli.fault_probability / 7.0,
        cli.fault_probability / 7.0,
        cli.fault_probability / 7.0,
    ];
    let fault_dist = WeightedIndex::new(fault_weights)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut base_prices: Vec<f64> = skus.iter().map(|_| rng.gen_range(10.0..500.0)).collect();
    let mut base_stocks: Vec<i64> = skus.iter().map(|_| rng.gen_range(0..1000)).collect();

    for _ in 0..cli.count {
        let idx = rng.gen_range(0..skus.len());
        let sku = skus[idx].clone();
        let fault = FAULT_TYPES[fault_dist.sample(&mut rng)];

        let mut price = base_prices[idx] * rng.gen_range(0.98..1.02);
        let mut stock = base_stocks[idx] + rng.gen_range(-5..5);
        let mut timestamp = Utc::now();
        let views = rng.gen_range(10..500);
        let add_to_cart = rng.gen_range(0..=(views / 3).max(1));
        let mut purchases = rng.gen_range(0..=(add_to_cart / 2).max(1));

        match fault {
            FaultType::None => {}
            FaultType::PriceJump => price *= rng.gen_range(5.0..20.0),
            FaultType::UnitErrorCents => price *= 100.0,
            FaultType::UnitErrorDollars => price /= 100.0,
            FaultType::NegativeStock => stock = -rng.gen_range(1..50),
            FaultType::BotSpike => {
                purchases = add_to_cart;
            }
            FaultType::StaleTimestamp => {
                timestamp = timestamp - chrono::Duration::hours(rng.gen_range(48..240));
            }
            FaultType::TimezoneShift => {
                timestamp = timestamp + chrono::Duration::hours(rng.gen_range(6..14));
            }
        }

        base_prices[idx] = price.max(1.0);
        base_stocks[idx] = stock.max(0);

        let record = GeneratedRecord {
            timestamp,
            sku,
            price,
            stock,
            views,
            add_to_cart,
            purchases,
            referrer: Some(REFERRERS[rng.gen_range(0..REFERRERS.len())].to_string()),
        };

        writeln!(out, "{}", serde_json::to_string(&record)?)?;
    }

    Ok(())
}
