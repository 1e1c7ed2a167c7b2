//! Fuel budget and yield policy.
//!
//! [`FuelManager`] is a policy object: it holds no engine state and only
//! computes what the next injection into a partition should be.

use fuelslice_common::{FuelConfig, PartitionEntry};

/// How often an in-flight call is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuelPolicy {
    /// Run until the call completes or the budget is exhausted.
    None,
    /// Suspend the call every `n` fuel units consumed.
    FixedQuantum(u64),
}

impl FuelPolicy {
    /// Policy for an optional quantum. `None` and `Some(0)` never yield.
    pub fn from_quantum(quantum: Option<u64>) -> Self {
        match quantum {
            Some(n) if n > 0 => FuelPolicy::FixedQuantum(n),
            _ => FuelPolicy::None,
        }
    }

    /// Yield-after interval to configure on the engine.
    pub fn yield_after(self) -> Option<u64> {
        match self {
            FuelPolicy::None | FuelPolicy::FixedQuantum(0) => None,
            FuelPolicy::FixedQuantum(n) => Some(n),
        }
    }
}

/// One fuel injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injection {
    /// Value the fuel counter is set to.
    pub amount: u64,
    /// Yield-after interval to configure.
    pub yield_after: Option<u64>,
    /// Fuel actually added relative to what was left.
    pub top_up: u64,
}

/// Budget and yield policy of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuelManager {
    budget: u64,
    policy: FuelPolicy,
    refill_on_complete: bool,
}

impl FuelManager {
    /// Create a manager that injects `budget` under `policy`.
    pub fn new(budget: u64, policy: FuelPolicy) -> Self {
        Self {
            budget,
            policy,
            refill_on_complete: false,
        }
    }

    /// Manager for one configured partition, with its overrides applied on
    /// top of the defaults.
    pub fn for_entry(entry: &PartitionEntry, defaults: &FuelConfig) -> Self {
        Self::new(
            entry.budget(defaults),
            FuelPolicy::from_quantum(entry.quantum(defaults)),
        )
        .with_refill(defaults.refill_on_complete)
    }

    /// Re-inject the budget whenever a call completes.
    #[must_use]
    pub fn with_refill(mut self, refill_on_complete: bool) -> Self {
        self.refill_on_complete = refill_on_complete;
        self
    }

    /// Compute the next injection given the fuel left in the partition.
    ///
    /// The counter is set to the full budget; `top_up` reports how much that
    /// adds to `remaining`.
    pub fn next_injection(&self, remaining: u64) -> Injection {
        Injection {
            amount: self.budget,
            yield_after: self.policy.yield_after(),
            top_up: self.budget.saturating_sub(remaining),
        }
    }

    /// Configured budget.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Configured yield policy.
    pub fn policy(&self) -> FuelPolicy {
        self.policy
    }

    /// Whether completed calls trigger a refill.
    pub fn refills_on_complete(&self) -> bool {
        self.refill_on_complete
    }
}
