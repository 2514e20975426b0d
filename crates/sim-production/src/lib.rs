#![deny(warnings)]

//! Production pipeline engine: seven sequential stages feed a shared
//! work-in-progress inventory, and assembly consumes one unit from every
//! stage to produce a finished car.
//!
//! Player actions (upgrades, automation, car-type changes) are cost-gated
//! against the shared [`GameState`] ledger and report their outcome through
//! the [`Notifier`] seam; expected failures return `false` without mutating
//! anything.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use sim_core::{CarTypeId, GameState, Notifier, ResearchLedger, Severity, Stage};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-level speed bonus from a step upgrade.
const UPGRADE_SPEED_BONUS: f64 = 0.2;
/// Per-level efficiency bonus from an assembly-line upgrade.
const ASSEMBLY_EFFICIENCY_BONUS: f64 = 0.15;
/// Automation price is `step cost * 5 * level`.
const AUTOMATION_COST_FACTOR: f64 = 5.0;
/// Unlocking a car type costs five times its catalog cost.
const UNLOCK_COST_FACTOR: f64 = 5.0;
/// Auto-assembly attempt rate per assembly-line level above 1, per second.
const AUTO_ASSEMBLY_RATE: f64 = 0.1;

/// State of one production stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionStep {
    /// Upgrade level, starting at 1.
    pub level: u32,
    /// Work rate; progress toward completion advances `dt` seconds per
    /// tick and the required time shrinks as speed grows.
    pub speed: f64,
    /// Base cost used for upgrade and automation pricing.
    pub cost: f64,
    /// Whether the stage advances on its own each tick.
    pub automated: bool,
    /// Seconds accumulated toward the current unit. Resets to 0 on
    /// completion, so it stays below the required time between completions.
    pub progress: f64,
    /// Seconds to complete one unit at speed 1 for a 1.0x car.
    pub base_time: f64,
    /// Geometric growth factor for upgrade pricing.
    pub upgrade_multiplier: f64,
}

impl ProductionStep {
    fn new(cost: f64, base_time: f64, upgrade_multiplier: f64) -> Self {
        ProductionStep {
            level: 1,
            speed: 1.0,
            cost,
            automated: false,
            progress: 0.0,
            base_time,
            upgrade_multiplier,
        }
    }

    /// Price of the next upgrade: `cost * multiplier^(level-1)`, floored.
    pub fn upgrade_cost(&self) -> f64 {
        (self.cost * self.upgrade_multiplier.powi(self.level as i32 - 1)).floor()
    }

    /// Price of automating this stage.
    pub fn automation_cost(&self) -> f64 {
        self.cost * AUTOMATION_COST_FACTOR * self.level as f64
    }
}

/// Catalog entry for a producible car model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarSpec {
    /// Whether the model can be selected for production.
    pub unlocked: bool,
    /// Catalog cost; unlocking charges five times this.
    pub cost: f64,
    /// Sale price before market multipliers.
    pub base_price: f64,
    /// Multiplier on every stage's completion time.
    pub production_time: f64,
    /// Material cost multiplier, reduced by manufacturing research.
    pub material_cost: f64,
    /// Research points required to unlock.
    pub research_required: f64,
}

/// The final assembly line; levels above 1 attempt assembly on their own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssemblyLine {
    pub level: u32,
    pub efficiency: f64,
    pub cost: f64,
    pub upgrade_multiplier: f64,
}

impl AssemblyLine {
    /// Price of the next upgrade; not floored, unlike step upgrade pricing.
    pub fn upgrade_cost(&self) -> f64 {
        self.cost * self.upgrade_multiplier.powi(self.level as i32 - 1)
    }
}

fn default_steps() -> BTreeMap<Stage, ProductionStep> {
    let mut steps = BTreeMap::new();
    steps.insert(Stage::Chassis, ProductionStep::new(500.0, 5.0, 1.5));
    steps.insert(Stage::Engine, ProductionStep::new(750.0, 8.0, 1.6));
    steps.insert(Stage::Body, ProductionStep::new(600.0, 6.0, 1.5));
    steps.insert(Stage::Paint, ProductionStep::new(400.0, 4.0, 1.4));
    steps.insert(Stage::Interior, ProductionStep::new(800.0, 7.0, 1.65));
    steps.insert(Stage::Testing, ProductionStep::new(300.0, 3.0, 1.3));
    steps.insert(Stage::Delivery, ProductionStep::new(450.0, 4.0, 1.45));
    steps
}

fn default_car_types() -> BTreeMap<CarTypeId, CarSpec> {
    let mut cars = BTreeMap::new();
    cars.insert(
        CarTypeId::Compact,
        CarSpec {
            unlocked: true,
            cost: 2_000.0,
            base_price: 8_000.0,
            production_time: 1.0,
            material_cost: 0.8,
            research_required: 0.0,
        },
    );
    cars.insert(
        CarTypeId::Sedan,
        CarSpec {
            unlocked: false,
            cost: 3_500.0,
            base_price: 12_000.0,
            production_time: 1.2,
            material_cost: 1.0,
            research_required: 10.0,
        },
    );
    cars.insert(
        CarTypeId::Suv,
        CarSpec {
            unlocked: false,
            cost: 5_000.0,
            base_price: 18_000.0,
            production_time: 1.5,
            material_cost: 1.3,
            research_required: 25.0,
        },
    );
    cars.insert(
        CarTypeId::Pickup,
        CarSpec {
            unlocked: false,
            cost: 4_500.0,
            base_price: 16_000.0,
            production_time: 1.4,
            material_cost: 1.2,
            research_required: 20.0,
        },
    );
    cars.insert(
        CarTypeId::Sports,
        CarSpec {
            unlocked: false,
            cost: 8_000.0,
            base_price: 30_000.0,
            production_time: 1.8,
            material_cost: 1.6,
            research_required: 50.0,
        },
    );
    cars.insert(
        CarTypeId::Electric,
        CarSpec {
            unlocked: false,
            cost: 12_000.0,
            base_price: 40_000.0,
            production_time: 2.0,
            material_cost: 1.8,
            research_required: 100.0,
        },
    );
    cars
}

fn empty_inventory() -> BTreeMap<Stage, u64> {
    Stage::ALL.iter().map(|&s| (s, 0)).collect()
}

// Saved maps are merged onto the catalog defaults so every stage and car
// type stays indexable after loading a partial blob.

fn merge_steps<'de, D>(deserializer: D) -> Result<BTreeMap<Stage, ProductionStep>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut steps: BTreeMap<Stage, ProductionStep> = BTreeMap::deserialize(deserializer)?;
    for (stage, step) in default_steps() {
        steps.entry(stage).or_insert(step);
    }
    Ok(steps)
}

fn merge_car_types<'de, D>(deserializer: D) -> Result<BTreeMap<CarTypeId, CarSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut cars: BTreeMap<CarTypeId, CarSpec> = BTreeMap::deserialize(deserializer)?;
    for (car, spec) in default_car_types() {
        cars.entry(car).or_insert(spec);
    }
    Ok(cars)
}

fn fill_inventory<'de, D>(deserializer: D) -> Result<BTreeMap<Stage, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut inventory: BTreeMap<Stage, u64> = BTreeMap::deserialize(deserializer)?;
    for stage in Stage::ALL {
        inventory.entry(stage).or_insert(0);
    }
    Ok(inventory)
}

/// The production engine: pipeline stages, car catalog, WIP inventory,
/// and the assembly line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionEngine {
    #[serde(deserialize_with = "merge_steps")]
    pub steps: BTreeMap<Stage, ProductionStep>,
    #[serde(deserialize_with = "merge_car_types")]
    pub car_types: BTreeMap<CarTypeId, CarSpec>,
    pub current_car_type: CarTypeId,
    /// Completed units per stage, awaiting assembly.
    #[serde(deserialize_with = "fill_inventory")]
    pub completed: BTreeMap<Stage, u64>,
    pub assembly_line: AssemblyLine,
}

impl Default for ProductionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionEngine {
    /// Fresh factory: everything manual, only the compact unlocked.
    pub fn new() -> Self {
        ProductionEngine {
            steps: default_steps(),
            car_types: default_car_types(),
            current_car_type: CarTypeId::Compact,
            completed: empty_inventory(),
            assembly_line: AssemblyLine {
                level: 1,
                efficiency: 1.0,
                cost: 5_000.0,
                upgrade_multiplier: 2.0,
            },
        }
    }

    /// Seconds to complete one unit of `stage` for the active car type.
    pub fn required_time(&self, stage: Stage) -> f64 {
        let step = &self.steps[&stage];
        let car = &self.car_types[&self.current_car_type];
        step.base_time * car.production_time / step.speed
    }

    /// Advance all automated stages by `dt` seconds and let the assembly
    /// line attempt a probabilistic auto-assembly.
    ///
    /// The attempt probability is `(level-1) * 0.1 * dt`, clamped to 1;
    /// scaling by `dt` keeps the assembly rate time-based rather than
    /// frame-rate-based.
    pub fn update(
        &mut self,
        dt: f64,
        state: &mut GameState,
        rng: &mut impl Rng,
        notifier: &mut dyn Notifier,
    ) {
        for stage in Stage::ALL {
            if self.steps[&stage].automated {
                self.advance_stage(stage, dt, state, notifier);
            }
        }

        if self.assembly_line.level > 1 {
            let p = ((self.assembly_line.level - 1) as f64 * AUTO_ASSEMBLY_RATE * dt).min(1.0);
            if rng.gen::<f64>() < p {
                self.check_assembly(state, notifier);
            }
        }
    }

    fn advance_stage(
        &mut self,
        stage: Stage,
        dt: f64,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) {
        let required = self.required_time(stage);
        let step = self.steps.get_mut(&stage).expect("all stages present");
        step.progress += dt;
        if step.progress >= required {
            step.progress = 0.0;
            *self.completed.get_mut(&stage).expect("all stages present") += 1;
            self.check_assembly(state, notifier);
        }
    }

    /// Assemble as many cars as the scarcest stage allows. Each car
    /// consumes one unit from every stage and sells for the base price.
    pub fn check_assembly(&mut self, state: &mut GameState, notifier: &mut dyn Notifier) -> u64 {
        let assemblable = self.completed.values().copied().min().unwrap_or(0);
        if assemblable == 0 {
            return 0;
        }
        self.assemble_cars(assemblable, state, notifier);
        assemblable
    }

    fn assemble_cars(&mut self, count: u64, state: &mut GameState, notifier: &mut dyn Notifier) {
        let car = &self.car_types[&self.current_car_type];
        let earnings = car.base_price * count as f64;

        for units in self.completed.values_mut() {
            *units -= count;
        }

        state.add_money(earnings);
        state.stats.cars_produced += count;
        debug!(count, earnings, car = self.current_car_type.name(), "assembled cars");
        notifier.notify(
            &format!(
                "{count} {} assembled! +${earnings:.0}",
                self.current_car_type.name()
            ),
            Severity::Success,
        );
    }

    /// Instantly complete one unit of a manual stage. Automated stages
    /// ignore manual input.
    pub fn manually_progress_step(
        &mut self,
        stage: Stage,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) {
        if self.steps[&stage].automated {
            return;
        }
        let required = self.required_time(stage);
        self.steps.get_mut(&stage).expect("all stages present").progress = required;
        self.advance_stage(stage, 0.0, state, notifier);
    }

    /// Buy the next level of a stage: +0.2 speed, geometric cost growth.
    pub fn upgrade_step(
        &mut self,
        stage: Stage,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) -> bool {
        let cost = self.steps[&stage].upgrade_cost();
        if !state.spend_money(cost) {
            notifier.notify("Insufficient funds!", Severity::Error);
            return false;
        }
        let step = self.steps.get_mut(&stage).expect("all stages present");
        step.level += 1;
        step.speed += UPGRADE_SPEED_BONUS;
        state.stats.upgrades_purchased += 1;
        notifier.notify(
            &format!("{} upgraded to level {}!", stage.name(), step.level),
            Severity::Success,
        );
        true
    }

    /// Buy automation for a stage. Re-automating an already automated
    /// stage is rejected without charging.
    pub fn automate_step(
        &mut self,
        stage: Stage,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) -> bool {
        if self.steps[&stage].automated {
            notifier.notify(
                &format!("{} is already automated!", stage.name()),
                Severity::Error,
            );
            return false;
        }
        let cost = self.steps[&stage].automation_cost();
        if !state.spend_money(cost) {
            notifier.notify("Insufficient funds!", Severity::Error);
            return false;
        }
        self.steps.get_mut(&stage).expect("all stages present").automated = true;
        state.stats.upgrades_purchased += 1;
        notifier.notify(&format!("{} automated!", stage.name()), Severity::Success);
        true
    }

    /// Buy the next assembly-line level: +0.15 efficiency, and levels
    /// above 1 enable probabilistic auto-assembly.
    pub fn upgrade_assembly_line(
        &mut self,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) -> bool {
        let cost = self.assembly_line.upgrade_cost();
        if !state.spend_money(cost) {
            notifier.notify("Insufficient funds!", Severity::Error);
            return false;
        }
        self.assembly_line.level += 1;
        self.assembly_line.efficiency += ASSEMBLY_EFFICIENCY_BONUS;
        state.stats.upgrades_purchased += 1;
        notifier.notify(
            &format!("Assembly line upgraded to level {}!", self.assembly_line.level),
            Severity::Success,
        );
        true
    }

    /// Switch the active production target. Work-in-progress inventory is
    /// kept across switches by design.
    pub fn change_car_type(&mut self, car: CarTypeId, notifier: &mut dyn Notifier) -> bool {
        if self.car_types[&car].unlocked {
            self.current_car_type = car;
            notifier.notify(
                &format!("Production switched to: {}", car.name()),
                Severity::Success,
            );
            true
        } else {
            notifier.notify("That car type is not available!", Severity::Error);
            false
        }
    }

    /// Unlock a car model: gated on research points first, then on five
    /// times the catalog cost. Both are deducted on success.
    pub fn unlock_car_type(
        &mut self,
        car: CarTypeId,
        state: &mut GameState,
        research: &mut dyn ResearchLedger,
        notifier: &mut dyn Notifier,
    ) -> bool {
        let spec = &self.car_types[&car];
        if spec.unlocked {
            return false;
        }
        let required = spec.research_required;
        if research.research_points() < required {
            notifier.notify(
                &format!(
                    "Insufficient research! ({:.0}/{:.0})",
                    research.research_points(),
                    required
                ),
                Severity::Error,
            );
            return false;
        }
        if !state.spend_money(spec.cost * UNLOCK_COST_FACTOR) {
            notifier.notify("Insufficient funds!", Severity::Error);
            return false;
        }
        research.spend_research_points(required);
        self.car_types.get_mut(&car).expect("all car types present").unlocked = true;
        notifier.notify(&format!("Car type unlocked: {}!", car.name()), Severity::Success);
        true
    }

    /// Project offline production: every automated stage yields
    /// `floor(seconds / required_time)` units, the remainder is discarded,
    /// then one assembly pass runs over the credited inventory.
    pub fn process_offline_time(
        &mut self,
        seconds: f64,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) {
        for stage in Stage::ALL {
            if !self.steps[&stage].automated {
                continue;
            }
            let per_unit = self.required_time(stage);
            let units = (seconds / per_unit).floor() as u64;
            if units > 0 {
                *self.completed.get_mut(&stage).expect("all stages present") += units;
            }
        }
        self.check_assembly(state, notifier);
    }

    // --- Accessors used by the market engine ---

    /// Car types currently available for production and contracts.
    pub fn unlocked_car_types(&self) -> Vec<CarTypeId> {
        CarTypeId::ALL
            .iter()
            .copied()
            .filter(|c| self.car_types[c].unlocked)
            .collect()
    }

    /// Finished-car stock as seen by the market (the delivery stage's WIP).
    pub fn delivery_stock(&self) -> u64 {
        self.completed[&Stage::Delivery]
    }

    /// Remove sold or contracted cars from the delivery stock. Returns
    /// `false` without mutating when the stock does not cover `count`.
    pub fn consume_delivery(&mut self, count: u64) -> bool {
        let stock = self.completed.get_mut(&Stage::Delivery).expect("all stages present");
        if *stock < count {
            return false;
        }
        *stock -= count;
        true
    }

    // --- Mutation API for research effects ---

    /// Additive speed bonus on one stage.
    pub fn boost_stage_speed(&mut self, stage: Stage, amount: f64) {
        self.steps.get_mut(&stage).expect("all stages present").speed += amount;
    }

    /// Multiply every car type's material cost, e.g. 0.9 for -10%.
    pub fn scale_material_costs(&mut self, factor: f64) {
        for spec in self.car_types.values_mut() {
            spec.material_cost *= factor;
        }
    }

    /// Multiply every car type's base price, e.g. 1.05 for +5%.
    pub fn scale_base_prices(&mut self, factor: f64) {
        for spec in self.car_types.values_mut() {
            spec.base_price *= factor;
        }
    }

    /// Additive efficiency bonus on the assembly line.
    pub fn boost_assembly_efficiency(&mut self, amount: f64) {
        self.assembly_line.efficiency += amount;
    }

    /// Lower a car type's research-point gate, with a floor.
    pub fn reduce_research_requirement(&mut self, car: CarTypeId, amount: f64, min: f64) {
        let spec = self.car_types.get_mut(&car).expect("all car types present");
        spec.research_required = (spec.research_required - amount).max(min);
    }

    /// Flip every stage to automated.
    pub fn automate_all_stages(&mut self) {
        for step in self.steps.values_mut() {
            step.automated = true;
        }
    }
}
