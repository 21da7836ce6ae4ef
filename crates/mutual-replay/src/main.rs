//! Staking pool replay tool
//!
//! Runs a JSON script of pool operations against a fresh pool, printing each
//! step's outcome and the events it emitted, then a summary of the pool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mutual_common::{ProductId, PRICE_DENOMINATOR};
use mutual_staking::{EngineConfig, ProtocolConfig, StakingPool, StaticProtocolConfig};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod script;

use script::Script;

/// Replay a staking pool scenario
#[derive(Parser)]
#[command(name = "mutual-replay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Script file (JSON)
    script: PathBuf,

    /// Engine config file (TOML or JSON)
    #[arg(short, long, env = "MUTUAL_CONFIG")]
    config: Option<PathBuf>,

    /// Stop at the first failing step
    #[arg(long)]
    fail_fast: bool,
}

/// Per-product line of the final report
#[derive(Debug, Serialize)]
struct ProductReport {
    product_id: ProductId,
    target_weight: u32,
    effective_weight: u32,
    /// Stored base price as an annual rate
    base_rate: Decimal,
    /// Share of the product's capacity in use
    utilization: Decimal,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref())?;
    info!(max_expiration_steps = config.max_expiration_steps, "Loaded engine config");

    let raw = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("reading {}", cli.script.display()))?;
    let script: Script = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", cli.script.display()))?;
    info!(steps = script.steps.len(), start = script.start, "Loaded script");

    let mut pool = StakingPool::new(script.pool.clone(), config, script.protocol.clone(), script.start)?;
    let mut failures = 0usize;

    for (index, step) in script.steps.iter().enumerate() {
        match script::apply(&mut pool, step) {
            Ok(outcome) => {
                println!(
                    "#{index} {} @{} by {}: {}",
                    step.command.name(),
                    step.at,
                    step.caller,
                    serde_json::to_string(&outcome)?
                );
            }
            Err(err) => {
                failures += 1;
                warn!(step = index, command = step.command.name(), error = %err, "Step failed");
                println!("#{index} {} @{} by {}: error: {err}", step.command.name(), step.at, step.caller);
                if cli.fail_fast {
                    anyhow::bail!("step {index} failed: {err}");
                }
            }
        }

        for event in pool.drain_events() {
            println!("    {} {}", event.kind(), serde_json::to_string(&event)?);
        }
    }

    println!("summary: {}", serde_json::to_string_pretty(&pool.summary())?);
    for report in product_reports(&pool)? {
        println!("product: {}", serde_json::to_string(&report)?);
    }

    info!(steps = script.steps.len(), failures, "Replay finished");
    Ok(())
}

fn product_reports(pool: &StakingPool<StaticProtocolConfig>) -> Result<Vec<ProductReport>> {
    let protocol = pool.protocol();
    let mut reports = Vec::new();

    for product_id in pool.product_ids() {
        let Some(product) = pool.product(product_id) else {
            continue;
        };
        let reduction = protocol
            .product(product_id)
            .map(|catalog| catalog.capacity_reduction_ratio)
            .unwrap_or(0);
        let utilization = pool.utilization(product_id, protocol.global_capacity_ratio(), reduction)?;

        reports.push(ProductReport {
            product_id,
            target_weight: product.target_weight,
            effective_weight: product.last_effective_weight,
            base_rate: Decimal::from(product.bumped_price) / Decimal::from(PRICE_DENOMINATOR),
            utilization: utilization.round_dp(4),
        });
    }
    Ok(reports)
}
