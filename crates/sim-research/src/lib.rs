#![deny(warnings)]

//! Research engine: hired researchers accrue research points over time,
//! which buy levels in a prerequisite-gated technology DAG.
//!
//! Technology effects are data: each node maps to a [`TechEffect`] that is
//! applied through the production engine's mutation API, so cross-engine
//! writes stay auditable instead of reaching into foreign fields.

use serde::{Deserialize, Serialize};
use sim_core::{CarTypeId, GameState, Notifier, ResearchLedger, Severity, Stage};
use sim_production::ProductionEngine;
use std::collections::BTreeMap;
use tracing::debug;

/// Research points generated per researcher per second.
const POINTS_PER_RESEARCHER: f64 = 0.1;

/// Identifier of a technology node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechId {
    AdvancedChassis,
    EfficientEngines,
    LeanManufacturing,
    RoboticAssembly,
    HybridEngines,
    ElectricPowertrains,
    AiQualityControl,
    GreenManufacturing,
    AdvancedMaterials,
    SmartFactory,
}

impl TechId {
    /// All technologies in catalog order.
    pub const ALL: [TechId; 10] = [
        TechId::AdvancedChassis,
        TechId::EfficientEngines,
        TechId::LeanManufacturing,
        TechId::RoboticAssembly,
        TechId::HybridEngines,
        TechId::ElectricPowertrains,
        TechId::AiQualityControl,
        TechId::GreenManufacturing,
        TechId::AdvancedMaterials,
        TechId::SmartFactory,
    ];

    /// Human-readable name for notifications.
    pub fn title(self) -> &'static str {
        match self {
            TechId::AdvancedChassis => "Advanced Chassis",
            TechId::EfficientEngines => "Efficient Engines",
            TechId::LeanManufacturing => "Lean Manufacturing",
            TechId::RoboticAssembly => "Robotic Assembly",
            TechId::HybridEngines => "Hybrid Engines",
            TechId::ElectricPowertrains => "Electric Powertrains",
            TechId::AiQualityControl => "AI Quality Control",
            TechId::GreenManufacturing => "Green Manufacturing",
            TechId::AdvancedMaterials => "Advanced Materials",
            TechId::SmartFactory => "Smart Factory",
        }
    }
}

/// Research category, used by the presentation layer for grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechCategory {
    Production,
    Product,
    Automation,
    Management,
}

/// One node of the technology DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    /// Base cost; level L costs `cost * (L + 1)` points.
    pub cost: f64,
    /// Current level, 0 until first researched.
    pub level: u32,
    pub max_level: u32,
    /// Whether the node can be researched. Monotonic: flips to `true`
    /// once every prerequisite has level >= 1 and never reverts.
    pub unlocked: bool,
    pub category: TechCategory,
    /// Prerequisite nodes; empty means unlocked from the start.
    pub requires: Vec<TechId>,
}

impl Technology {
    fn new(
        cost: f64,
        max_level: u32,
        category: TechCategory,
        requires: Vec<TechId>,
    ) -> Self {
        Technology {
            cost,
            level: 0,
            max_level,
            unlocked: requires.is_empty(),
            category,
            requires,
        }
    }

    /// Points needed for the next level.
    pub fn next_level_cost(&self) -> f64 {
        self.cost * (self.level + 1) as f64
    }
}

/// Side effect of gaining one technology level, applied through the
/// production engine's mutation API.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TechEffect {
    /// Additive speed bonus on one production stage, per level.
    StageSpeed { stage: Stage, amount: f64 },
    /// Multiply all material costs, per level.
    MaterialCostScale { factor: f64 },
    /// Additive assembly-line efficiency, per level.
    AssemblyEfficiency { amount: f64 },
    /// Lower a car type's research gate, first level only.
    ResearchDiscount { car: CarTypeId, amount: f64, floor: f64 },
    /// Multiply all base prices, per level.
    BasePriceScale { factor: f64 },
    /// Automate the whole factory, first level only.
    AutomateAll,
    /// Documented gap: no numeric effect implemented.
    None,
}

impl TechId {
    /// The effect granted by each level of this technology.
    pub fn effect(self) -> TechEffect {
        match self {
            TechId::AdvancedChassis => TechEffect::StageSpeed {
                stage: Stage::Chassis,
                amount: 0.15,
            },
            TechId::EfficientEngines => TechEffect::StageSpeed {
                stage: Stage::Engine,
                amount: 0.15,
            },
            TechId::LeanManufacturing => TechEffect::MaterialCostScale { factor: 0.9 },
            TechId::RoboticAssembly => TechEffect::AssemblyEfficiency { amount: 0.2 },
            TechId::HybridEngines => TechEffect::ResearchDiscount {
                car: CarTypeId::Electric,
                amount: 20.0,
                floor: 50.0,
            },
            TechId::ElectricPowertrains => TechEffect::ResearchDiscount {
                car: CarTypeId::Electric,
                amount: 30.0,
                floor: 0.0,
            },
            // Product gap: premium-quality odds are not modeled yet.
            TechId::AiQualityControl => TechEffect::None,
            TechId::GreenManufacturing => TechEffect::MaterialCostScale { factor: 0.95 },
            TechId::AdvancedMaterials => TechEffect::BasePriceScale { factor: 1.05 },
            TechId::SmartFactory => TechEffect::AutomateAll,
        }
    }

    /// Whether the effect applies only when the first level is gained.
    fn first_level_only(self) -> bool {
        matches!(
            self,
            TechId::HybridEngines | TechId::ElectricPowertrains | TechId::SmartFactory
        )
    }
}

fn default_technologies() -> BTreeMap<TechId, Technology> {
    use TechCategory::*;
    let mut techs = BTreeMap::new();
    techs.insert(TechId::AdvancedChassis, Technology::new(10.0, 5, Production, vec![]));
    techs.insert(TechId::EfficientEngines, Technology::new(15.0, 5, Production, vec![]));
    techs.insert(TechId::LeanManufacturing, Technology::new(25.0, 3, Management, vec![]));
    techs.insert(TechId::RoboticAssembly, Technology::new(50.0, 5, Automation, vec![]));
    techs.insert(
        TechId::HybridEngines,
        Technology::new(40.0, 3, Product, vec![TechId::EfficientEngines]),
    );
    techs.insert(
        TechId::ElectricPowertrains,
        Technology::new(100.0, 3, Product, vec![TechId::HybridEngines]),
    );
    techs.insert(
        TechId::AiQualityControl,
        Technology::new(75.0, 4, Automation, vec![TechId::RoboticAssembly]),
    );
    techs.insert(
        TechId::GreenManufacturing,
        Technology::new(60.0, 3, Management, vec![TechId::LeanManufacturing]),
    );
    techs.insert(
        TechId::AdvancedMaterials,
        Technology::new(80.0, 4, Product, vec![TechId::AdvancedChassis]),
    );
    techs.insert(
        TechId::SmartFactory,
        Technology::new(200.0, 1, Automation, vec![TechId::AiQualityControl, TechId::RoboticAssembly]),
    );
    techs
}

/// Persisted research state. Technology progress is merged back onto the
/// static catalog so balance changes to costs or prerequisites apply to
/// old saves.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSnapshot {
    pub research_points: f64,
    pub research_per_second: f64,
    pub researchers: u32,
    pub technologies: BTreeMap<TechId, TechProgress>,
}

/// The mutable slice of a technology node.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TechProgress {
    pub level: u32,
    pub unlocked: bool,
}

/// The research engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ResearchEngine {
    pub research_points: f64,
    pub research_per_second: f64,
    pub researchers: u32,
    pub researcher_base_cost: f64,
    pub researcher_cost_multiplier: f64,
    pub technologies: BTreeMap<TechId, Technology>,
}

impl Default for ResearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchEngine {
    /// Fresh lab: no points, no researchers, base technologies unlocked.
    pub fn new() -> Self {
        ResearchEngine {
            research_points: 0.0,
            research_per_second: 0.0,
            researchers: 0,
            researcher_base_cost: 2_000.0,
            researcher_cost_multiplier: 1.45,
            technologies: default_technologies(),
        }
    }

    /// Accrue research points. Uncapped; points only leave via spending.
    pub fn update(&mut self, dt: f64) {
        self.research_points += self.research_per_second * dt;
    }

    /// Price of the next researcher: `base * multiplier^headcount`, floored.
    pub fn researcher_cost(&self) -> f64 {
        (self.researcher_base_cost
            * self.researcher_cost_multiplier.powi(self.researchers as i32))
        .floor()
    }

    /// Hire a researcher; the point rate is recomputed from headcount so
    /// the result is independent of hire order.
    pub fn hire_researcher(
        &mut self,
        state: &mut GameState,
        notifier: &mut dyn Notifier,
    ) -> bool {
        let cost = self.researcher_cost();
        if !state.spend_money(cost) {
            notifier.notify("Insufficient funds!", Severity::Error);
            return false;
        }
        self.researchers += 1;
        self.research_per_second = self.researchers as f64 * POINTS_PER_RESEARCHER;
        notifier.notify(
            &format!(
                "Researcher hired! Research points: +{:.1}/s",
                self.research_per_second
            ),
            Severity::Success,
        );
        true
    }

    /// Buy the next level of a technology and apply its effect.
    ///
    /// Locked or maxed nodes are rejected silently; missing points are
    /// rejected with a notification. On success the whole tree is re-swept
    /// for prerequisite unlocks, which is idempotent and monotonic.
    pub fn research_technology(
        &mut self,
        id: TechId,
        production: &mut ProductionEngine,
        notifier: &mut dyn Notifier,
    ) -> bool {
        let tech = &self.technologies[&id];
        if !tech.unlocked || tech.level >= tech.max_level {
            return false;
        }
        let cost = tech.next_level_cost();
        if self.research_points < cost {
            notifier.notify(
                &format!(
                    "Insufficient research points! ({:.0}/{:.0})",
                    self.research_points, cost
                ),
                Severity::Error,
            );
            return false;
        }
        self.research_points -= cost;
        let tech = self.technologies.get_mut(&id).expect("all technologies present");
        tech.level += 1;
        let new_level = tech.level;
        debug!(tech = id.title(), level = new_level, "technology researched");

        self.apply_effect(id, new_level, production, notifier);
        self.refresh_unlocks(notifier);

        notifier.notify(
            &format!("Technology \"{}\" researched to level {new_level}!", id.title()),
            Severity::Success,
        );
        true
    }

    fn apply_effect(
        &mut self,
        id: TechId,
        new_level: u32,
        production: &mut ProductionEngine,
        notifier: &mut dyn Notifier,
    ) {
        if id.first_level_only() && new_level != 1 {
            return;
        }
        match id.effect() {
            TechEffect::StageSpeed { stage, amount } => {
                production.boost_stage_speed(stage, amount);
            }
            TechEffect::MaterialCostScale { factor } => {
                production.scale_material_costs(factor);
            }
            TechEffect::AssemblyEfficiency { amount } => {
                production.boost_assembly_efficiency(amount);
            }
            TechEffect::ResearchDiscount { car, amount, floor } => {
                production.reduce_research_requirement(car, amount, floor);
            }
            TechEffect::BasePriceScale { factor } => {
                production.scale_base_prices(factor);
            }
            TechEffect::AutomateAll => {
                production.automate_all_stages();
                notifier.notify(
                    "Smart factory online! Every stage is now automated!",
                    Severity::Success,
                );
            }
            TechEffect::None => {}
        }
    }

    /// Single unlock-propagation pass: any locked node whose prerequisites
    /// all reached level 1 flips to unlocked. Never locks anything.
    pub fn refresh_unlocks(&mut self, notifier: &mut dyn Notifier) {
        let newly_unlocked: Vec<TechId> = self
            .technologies
            .iter()
            .filter(|(_, tech)| !tech.unlocked && !tech.requires.is_empty())
            .filter(|(_, tech)| {
                tech.requires
                    .iter()
                    .all(|req| self.technologies[req].level >= 1)
            })
            .map(|(&id, _)| id)
            .collect();

        for id in newly_unlocked {
            self.technologies.get_mut(&id).expect("all technologies present").unlocked = true;
            notifier.notify(
                &format!("New technology unlocked: {}!", id.title()),
                Severity::Success,
            );
        }
    }

    /// Project offline research: closed-form accrual over the elapsed time.
    pub fn process_offline_time(&mut self, seconds: f64, notifier: &mut dyn Notifier) {
        let points = self.research_per_second * seconds;
        self.research_points += points;
        if points > 0.0 {
            notifier.notify(
                &format!("Generated {points:.0} research points while you were away!"),
                Severity::Success,
            );
        }
    }

    /// Snapshot for persistence.
    pub fn save(&self) -> ResearchSnapshot {
        ResearchSnapshot {
            research_points: self.research_points,
            research_per_second: self.research_per_second,
            researchers: self.researchers,
            technologies: self
                .technologies
                .iter()
                .map(|(&id, tech)| {
                    (
                        id,
                        TechProgress {
                            level: tech.level,
                            unlocked: tech.unlocked,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Restore from a snapshot, merging progress onto the static catalog.
    /// A missing snapshot yields a fresh lab.
    pub fn from_snapshot(snapshot: Option<ResearchSnapshot>) -> Self {
        let mut lab = ResearchEngine::new();
        let Some(snapshot) = snapshot else {
            return lab;
        };
        lab.research_points = snapshot.research_points;
        lab.research_per_second = snapshot.research_per_second;
        lab.researchers = snapshot.researchers;
        for (id, progress) in snapshot.technologies {
            if let Some(tech) = lab.technologies.get_mut(&id) {
                tech.level = progress.level.min(tech.max_level);
                // Monotonic: a save can only add unlocks.
                tech.unlocked = tech.unlocked || progress.unlocked;
            }
        }
        lab
    }
}

impl ResearchLedger for ResearchEngine {
    fn research_points(&self) -> f64 {
        self.research_points
    }

    fn spend_research_points(&mut self, amount: f64) -> bool {
        if self.research_points >= amount {
            self.research_points -= amount;
            true
        } else {
            false
        }
    }
}
