#![deny(warnings)]

//! Composition root and tick loop for the Auto Factory simulation.
//!
//! [`GameWorld`] owns typed references to every engine and drives them
//! with the same `dt` in a fixed order: production, research, market.
//! The order matters: the market's auto-sale reads the delivery stock
//! produced earlier in the same tick, so reordering changes trajectories.
//!
//! Engine updates are plain state transitions that cannot fail, so a
//! tick always runs to completion; the only fallible work per tick is
//! the autosave, whose failure is reported by the storage layer without
//! stopping the loop.

use chrono::{DateTime, Utc};
use persistence::{SaveData, Storage};
use rand_chacha::ChaCha8Rng;
use rand::SeedableRng;
use sim_core::{GameState, Notifier, Severity};
use sim_market::{MarketEngine, DAY_SECONDS};
use sim_production::ProductionEngine;
use sim_research::ResearchEngine;
use tracing::info;

/// Autosave cadence in sim-seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL: f64 = 60.0;

/// Session parameters.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Seed for the deterministic RNG driving contracts and auto-assembly.
    pub rng_seed: u64,
    /// Sim-seconds between autosaves.
    pub autosave_interval: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            rng_seed: 42,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }
}

/// Point-in-time health summary, for the CLI and dashboards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KpiSnapshot {
    pub day: u64,
    pub money: f64,
    pub cars_produced: u64,
    pub money_earned: f64,
    pub research_points: f64,
    pub reputation_total: f64,
    pub offered_contracts: usize,
    pub accepted_contracts: usize,
}

/// The simulation world: shared ledger plus the three engines.
pub struct GameWorld {
    pub state: GameState,
    pub production: ProductionEngine,
    pub research: ResearchEngine,
    pub market: MarketEngine,
    rng: ChaCha8Rng,
    notifier: Box<dyn Notifier>,
    autosave_interval: f64,
    /// Sim-seconds accumulated toward the next day boundary.
    day_timer: f64,
    /// Sim-seconds since the last (auto)save.
    save_timer: f64,
}

impl GameWorld {
    /// Fresh game: default engines, an initial contract offer board.
    pub fn new_game(config: SessionConfig, notifier: Box<dyn Notifier>) -> Self {
        let mut world = GameWorld {
            state: GameState::new(),
            production: ProductionEngine::new(),
            research: ResearchEngine::new(),
            market: MarketEngine::new(),
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            notifier,
            autosave_interval: config.autosave_interval,
            day_timer: 0.0,
            save_timer: 0.0,
        };
        world.market.generate_initial_contracts(
            world.state.day,
            &world.production,
            &mut world.rng,
            &mut *world.notifier,
        );
        world
    }

    /// Resume from a save blob, projecting offline progress from the gap
    /// between `now` and the blob's `last_update`. Missing sub-objects
    /// fall back to per-engine defaults.
    pub fn from_save(
        save: SaveData,
        now: DateTime<Utc>,
        config: SessionConfig,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let mut world = GameWorld {
            state: save.game_state.unwrap_or_default(),
            production: save.production.unwrap_or_default(),
            research: ResearchEngine::from_snapshot(save.research),
            market: MarketEngine::from_snapshot(save.market),
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            notifier,
            autosave_interval: config.autosave_interval,
            day_timer: 0.0,
            save_timer: 0.0,
        };
        if let Some(last_update) = save.last_update {
            let elapsed = (now - last_update).num_milliseconds() as f64 / 1_000.0;
            if elapsed > 0.0 {
                world.process_offline_time(elapsed);
            }
        }
        world
    }

    /// Load a session from storage, or start fresh when nothing loads.
    pub fn load_or_new(
        storage: &dyn Storage,
        now: DateTime<Utc>,
        config: SessionConfig,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        match storage.load() {
            Some(save) => Self::from_save(save, now, config, notifier),
            None => Self::new_game(config, notifier),
        }
    }

    /// One-shot offline projection, in engine order. Closed-form per
    /// engine rather than a tick replay, so results approximate (and are
    /// documented to differ from) continuous simulation.
    fn process_offline_time(&mut self, seconds: f64) {
        info!(seconds, "projecting offline progress");
        if seconds > 60.0 {
            let minutes = (seconds / 60.0).floor();
            self.notifier.notify(
                &format!("You were away for {minutes:.0} minutes. Your factory kept running!"),
                Severity::Success,
            );
        }
        self.production
            .process_offline_time(seconds, &mut self.state, &mut *self.notifier);
        self.research.process_offline_time(seconds, &mut *self.notifier);
        self.market.process_offline_time(
            seconds,
            self.state.day,
            &self.production,
            &mut self.rng,
            &mut *self.notifier,
        );
    }

    /// Advance the simulation by `dt` seconds and run the autosave check.
    /// Returns `true` when an autosave was written this tick.
    pub fn tick(&mut self, dt: f64, storage: &mut dyn Storage) -> bool {
        self.production
            .update(dt, &mut self.state, &mut self.rng, &mut *self.notifier);
        self.research.update(dt);
        self.market.update(
            dt,
            self.state.day,
            &mut self.production,
            &mut self.state,
            &mut self.rng,
            &mut *self.notifier,
        );

        self.day_timer += dt;
        while self.day_timer >= DAY_SECONDS {
            self.day_timer -= DAY_SECONDS;
            self.state.advance_day();
            self.market.on_day_advanced(
                self.state.day,
                &self.production,
                &mut self.rng,
                &mut *self.notifier,
            );
        }

        self.save_timer += dt;
        if self.save_timer >= self.autosave_interval {
            self.save_timer = 0.0;
            return self.save(storage);
        }
        false
    }

    /// Write the current state as a save blob. Callable at any time; a
    /// failure is reported without disturbing the session.
    pub fn save(&mut self, storage: &mut dyn Storage) -> bool {
        let data = SaveData {
            game_state: Some(self.state.clone()),
            production: Some(self.production.clone()),
            research: Some(self.research.save()),
            market: Some(self.market.save()),
            last_update: Some(Utc::now()),
        };
        let ok = storage.save(&data);
        if !ok {
            self.notifier.notify("Failed to save the game", Severity::Error);
        }
        ok
    }

    /// Fast-forward `days` game days at a fixed `step`, for headless runs.
    pub fn run_days(&mut self, days: u32, step: f64, storage: &mut dyn Storage) {
        let mut remaining = days as f64 * DAY_SECONDS;
        while remaining > 0.0 {
            let dt = step.min(remaining);
            self.tick(dt, storage);
            remaining -= dt;
        }
    }

    pub fn kpi(&self) -> KpiSnapshot {
        KpiSnapshot {
            day: self.state.day,
            money: self.state.money,
            cars_produced: self.state.stats.cars_produced,
            money_earned: self.state.stats.money_earned,
            research_points: self.research.research_points,
            reputation_total: self.market.regions.values().map(|r| r.reputation).sum(),
            offered_contracts: self.market.active_contracts.len(),
            accepted_contracts: self.market.special_contracts.len(),
        }
    }
}
