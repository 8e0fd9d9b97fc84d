//! Policy strategy engine
//!
//! Strategies are small state machines applied once per monitoring
//! cycle, strictly one after another in priority order. Each strategy
//! declares the capability names it needs; registration fails when a
//! requirement is missing, so a misconfigured pipeline dies at startup
//! instead of mid-cycle.
//!
//! Priority is the pair `(tier, insertion sequence)`: lower tiers run
//! first, and within a tier earlier registration wins. The sequence
//! counter is owned by the engine, so ordering is deterministic.

mod ban;
mod registry;
mod warn;

pub use ban::{ApplicationState, KeepFreePercentageBanLongUsers};
pub use registry::{service_names, Service, ServiceRegistry, StrategyError};
pub use warn::WarnUsersBeforeMaxUsageTime;

use tracing::{error, info};

/// Priority tiers, highest first. Gaps leave room for future tiers the
/// way the numeric values are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PriorityTier {
    Highest,
    High,
    #[default]
    Normal,
    Low,
    Lowest,
}

impl PriorityTier {
    /// Numeric rank used for ordering; smaller runs earlier.
    pub fn rank(self) -> u8 {
        match self {
            PriorityTier::Highest => 0,
            PriorityTier::High => 2,
            PriorityTier::Normal => 4,
            PriorityTier::Low => 8,
            PriorityTier::Lowest => 16,
        }
    }
}

/// A management strategy applied once per cycle.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Capability names this strategy resolves at apply time.
    fn required_services(&self) -> &'static [&'static str];

    /// Run one cycle of the strategy against the registered services.
    fn apply(&mut self, services: &ServiceRegistry) -> Result<(), StrategyError>;

    /// Teardown hook, invoked once when the engine shuts down.
    fn cleanup(&mut self, _services: &ServiceRegistry) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Clear the per-cycle problem list before an apply.
    fn reset_problems(&mut self) {}

    /// Problems recorded during the last apply.
    fn problems(&self) -> &[String] {
        &[]
    }
}

struct RankedStrategy {
    priority: (u8, u64),
    strategy: Box<dyn Strategy>,
}

/// Priority-ordered strategy pipeline.
pub struct StrategyEnforcer {
    strategies: Vec<RankedStrategy>,
    registry: ServiceRegistry,
    next_seq: u64,
}

impl StrategyEnforcer {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            strategies: Vec::new(),
            registry,
            next_seq: 0,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Add a strategy at the given tier (normal when `None`).
    ///
    /// Every required service must already be registered.
    pub fn add_strategy(
        &mut self,
        strategy: Box<dyn Strategy>,
        tier: Option<PriorityTier>,
    ) -> Result<(), StrategyError> {
        for service in strategy.required_services() {
            if !self.registry.contains(service) {
                return Err(StrategyError::InvalidService {
                    strategy: strategy.name().to_string(),
                    service: (*service).to_string(),
                });
            }
        }

        let name = strategy.name();
        let priority = (tier.unwrap_or_default().rank(), self.next_seq);
        self.next_seq += 1;
        self.strategies.push(RankedStrategy { priority, strategy });
        self.strategies.sort_by_key(|entry| entry.priority);
        info!(
            strategy = name,
            tier = priority.0,
            "strategy added to enforcement pipeline"
        );
        Ok(())
    }

    /// Names of the registered strategies in execution order.
    pub fn strategy_order(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .map(|entry| entry.strategy.name())
            .collect()
    }

    /// Apply every strategy once, in priority order.
    ///
    /// A failing strategy is logged and does not stop the pipeline;
    /// policy errors stay contained to the cycle.
    pub fn apply_strategies(&mut self) {
        for entry in &mut self.strategies {
            entry.strategy.reset_problems();
            if let Err(e) = entry.strategy.apply(&self.registry) {
                error!(strategy = entry.strategy.name(), error = %e, "strategy apply failed");
            }
        }
    }

    /// Run every strategy's teardown, in the same order as apply.
    pub fn cleanup_strategies(&mut self) {
        for entry in &mut self.strategies {
            if let Err(e) = entry.strategy.cleanup(&self.registry) {
                error!(strategy = entry.strategy.name(), error = %e, "strategy cleanup failed");
            }
        }
    }
}
