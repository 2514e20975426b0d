#![deny(warnings)]

//! Headless CLI for running the factory simulation and printing a KPI
//! summary. Resumes from `--save` when the file exists.

use anyhow::Result;
use chrono::Utc;
use persistence::{FileStorage, MemoryStorage, Storage};
use sim_core::LogNotifier;
use sim_runtime::{GameWorld, SessionConfig};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Fixed simulation step in seconds.
const TICK_SECONDS: f64 = 0.1;

struct Args {
    seed: u64,
    days: u32,
    save: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        seed: 42,
        days: 30,
        save: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seed" => {
                if let Some(seed) = it.next().and_then(|s| s.parse().ok()) {
                    args.seed = seed;
                }
            }
            "--days" => {
                if let Some(days) = it.next().and_then(|s| s.parse().ok()) {
                    args.days = days;
                }
            }
            "--save" => args.save = it.next(),
            _ => {}
        }
    }
    args
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(seed = args.seed, days = args.days, save = ?args.save, "starting factory");

    let config = SessionConfig {
        rng_seed: args.seed,
        ..SessionConfig::default()
    };
    let mut storage: Box<dyn Storage> = match &args.save {
        Some(path) => Box::new(FileStorage::new(path)),
        None => Box::new(MemoryStorage::new()),
    };
    let mut world = GameWorld::load_or_new(&*storage, Utc::now(), config, Box::new(LogNotifier));

    // Automated stages complete at most one unit per tick, so the step
    // must stay sub-second for output to track the stage rates.
    world.run_days(args.days, TICK_SECONDS, &mut *storage);
    if args.save.is_some() && !world.save(&mut *storage) {
        anyhow::bail!("failed to write save file");
    }

    let kpi = world.kpi();
    println!(
        "Day {} | money: ${:.2} | earned: ${:.2} | cars: {}",
        kpi.day, kpi.money, kpi.money_earned, kpi.cars_produced
    );
    println!(
        "Research: {:.1} pts | reputation: {:.2} | contracts offered/accepted: {}/{}",
        kpi.research_points, kpi.reputation_total, kpi.offered_contracts, kpi.accepted_contracts
    );

    Ok(())
}
