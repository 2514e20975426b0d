#![deny(warnings)]

//! Core domain models shared across the Auto Factory simulation.
//!
//! This crate defines the economic ledger ([`GameState`]), the identifiers
//! used by every engine (production stages, car types), and the collaborator
//! seams the simulation core depends on: the fire-and-forget [`Notifier`]
//! and the [`ResearchLedger`] capability for research-point-gated unlocks.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One sequential step of the production pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Chassis,
    Engine,
    Body,
    Paint,
    Interior,
    Testing,
    Delivery,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Chassis,
        Stage::Engine,
        Stage::Body,
        Stage::Paint,
        Stage::Interior,
        Stage::Testing,
        Stage::Delivery,
    ];

    /// Stable lowercase name, used in notifications and save blobs.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Chassis => "chassis",
            Stage::Engine => "engine",
            Stage::Body => "body",
            Stage::Paint => "paint",
            Stage::Interior => "interior",
            Stage::Testing => "testing",
            Stage::Delivery => "delivery",
        }
    }
}

/// A producible car model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarTypeId {
    Compact,
    Sedan,
    Suv,
    Pickup,
    Sports,
    Electric,
}

impl CarTypeId {
    /// All car types in catalog order.
    pub const ALL: [CarTypeId; 6] = [
        CarTypeId::Compact,
        CarTypeId::Sedan,
        CarTypeId::Suv,
        CarTypeId::Pickup,
        CarTypeId::Sports,
        CarTypeId::Electric,
    ];

    /// Stable lowercase name, used in notifications and save blobs.
    pub fn name(self) -> &'static str {
        match self {
            CarTypeId::Compact => "compact",
            CarTypeId::Sedan => "sedan",
            CarTypeId::Suv => "suv",
            CarTypeId::Pickup => "pickup",
            CarTypeId::Sports => "sports",
            CarTypeId::Electric => "electric",
        }
    }
}

/// Aggregate lifetime statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    /// Cars assembled over the whole game.
    pub cars_produced: u64,
    /// Gross money earned (spending does not subtract from this).
    pub money_earned: f64,
    /// Step upgrades, automations, and assembly-line upgrades purchased.
    pub upgrades_purchased: u64,
}

/// The shared economic ledger mutated by all engines.
///
/// Money never goes negative: [`GameState::spend_money`] is an atomic
/// check-then-debit and is the only way funds leave the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    /// Current funds, always >= 0.
    pub money: f64,
    /// Current game day, starting at 1.
    pub day: u64,
    /// Total days played.
    pub total_days: u64,
    /// Lifetime statistics.
    pub stats: Stats,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// Starting ledger for a fresh game.
    pub fn new() -> Self {
        GameState {
            money: 10_000.0,
            day: 1,
            total_days: 1,
            stats: Stats::default(),
        }
    }

    /// Credit earnings; also feeds the lifetime earnings statistic.
    pub fn add_money(&mut self, amount: f64) {
        self.money += amount;
        self.stats.money_earned += amount;
    }

    /// Debit `amount` if covered by current funds. Returns whether the
    /// debit happened; on `false` the balance is untouched.
    pub fn spend_money(&mut self, amount: f64) -> bool {
        if self.money >= amount {
            self.money -= amount;
            true
        } else {
            false
        }
    }

    /// Advance the day counter.
    pub fn advance_day(&mut self) {
        self.day += 1;
        self.total_days += 1;
    }
}

/// Severity of a player-facing notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

/// Fire-and-forget notification sink.
///
/// The display layer is out of scope for the core; engines report the
/// outcome of player actions and periodic events through this seam.
pub trait Notifier {
    fn notify(&mut self, message: &str, severity: Severity);
}

/// Notifier that routes messages to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, message: &str, severity: Severity) {
        match severity {
            Severity::Success => info!(target: "notify", "{message}"),
            Severity::Error => warn!(target: "notify", "{message}"),
        }
    }
}

/// Notifier that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, _message: &str, _severity: Severity) {}
}

/// Notifier that records messages, for assertions in tests.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    pub messages: Vec<(String, Severity)>,
}

impl RecordingNotifier {
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.iter().any(|(m, _)| m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, message: &str, severity: Severity) {
        self.messages.push((message.to_string(), severity));
    }
}

/// Capability for spending research points from another engine.
///
/// Production (car-type unlocks) and Market (region unlocks) gate
/// purchases on research without owning the research state.
pub trait ResearchLedger {
    /// Currently accumulated research points.
    fn research_points(&self) -> f64;

    /// Deduct `amount` points if available. Returns whether the deduction
    /// happened.
    fn spend_research_points(&mut self, amount: f64) -> bool;
}
