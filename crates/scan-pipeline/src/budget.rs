//! Per-scan cost ledger.
//!
//! The scan budget is one shared resource: every cost-incurring call (screen
//! or confirm, from any concurrently-running unit) checks then records
//! against the same ledger. Modeled as an explicit handle passed to every
//! task, not ambient global state.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which pricing tier a call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTier {
    /// Cheap first-pass screen covering all pathologies.
    Screen,
    /// Expensive consolidated confirmation call.
    Confirm,
}

/// Token usage reported by the inference service for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub cached_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.cached_tokens += other.cached_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Conservative usage estimate for affordability checks before a call.
///
/// Vision prompts dominate: roughly 1100 tokens per attached image plus
/// fixed prompt overhead.
pub fn estimate_usage(tier: CallTier, image_count: usize) -> Usage {
    let prompt_tokens = 900 + 1100 * image_count as u64;
    let completion_tokens = match tier {
        CallTier::Screen => 700,
        CallTier::Confirm => 1500,
    };
    Usage {
        prompt_tokens,
        cached_tokens: 0,
        completion_tokens,
    }
}

/// The cost-accounting collaborator injected into every unit task.
/// Implementations must be safe for concurrent callers.
pub trait BudgetLedger: Send + Sync {
    /// Whether the budget can cover a call with the estimated usage.
    fn can_afford(&self, tier: CallTier, estimated: Usage) -> bool;

    /// Record actual usage for a completed call; returns the cost incurred
    /// in USD.
    fn record(&self, tier: CallTier, actual: Usage) -> f64;

    /// Budget remaining in USD.
    fn remaining(&self) -> f64;
}

/// Per-million-token pricing for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierPricing {
    pub prompt_per_mtok: f64,
    pub cached_per_mtok: f64,
    pub completion_per_mtok: f64,
}

impl TierPricing {
    pub fn cost(&self, usage: Usage) -> f64 {
        let uncached = usage.prompt_tokens.saturating_sub(usage.cached_tokens);
        (uncached as f64 * self.prompt_per_mtok
            + usage.cached_tokens as f64 * self.cached_per_mtok
            + usage.completion_tokens as f64 * self.completion_per_mtok)
            / 1_000_000.0
    }
}

/// In-memory ledger with a hard per-scan dollar budget and a mutex-guarded
/// spend counter; check-then-record is safe under concurrent unit tasks.
#[derive(Debug)]
pub struct MeteredLedger {
    budget_usd: f64,
    spent_usd: Mutex<f64>,
    screen: TierPricing,
    confirm: TierPricing,
}

impl MeteredLedger {
    /// Default pricing mirrors a cheap screen tier and a ~15x more expensive
    /// confirmation tier.
    pub fn new(budget_usd: f64) -> Self {
        Self {
            budget_usd,
            spent_usd: Mutex::new(0.0),
            screen: TierPricing {
                prompt_per_mtok: 0.15,
                cached_per_mtok: 0.075,
                completion_per_mtok: 0.60,
            },
            confirm: TierPricing {
                prompt_per_mtok: 2.50,
                cached_per_mtok: 1.25,
                completion_per_mtok: 10.00,
            },
        }
    }

    pub fn with_pricing(budget_usd: f64, screen: TierPricing, confirm: TierPricing) -> Self {
        Self {
            budget_usd,
            spent_usd: Mutex::new(0.0),
            screen,
            confirm,
        }
    }

    fn pricing(&self, tier: CallTier) -> &TierPricing {
        match tier {
            CallTier::Screen => &self.screen,
            CallTier::Confirm => &self.confirm,
        }
    }
}

impl BudgetLedger for MeteredLedger {
    fn can_afford(&self, tier: CallTier, estimated: Usage) -> bool {
        let projected = self.pricing(tier).cost(estimated);
        let spent = *self.spent_usd.lock().expect("ledger lock poisoned");
        spent + projected <= self.budget_usd
    }

    fn record(&self, tier: CallTier, actual: Usage) -> f64 {
        let cost = self.pricing(tier).cost(actual);
        let mut spent = self.spent_usd.lock().expect("ledger lock poisoned");
        *spent += cost;
        debug!(?tier, cost_usd = cost, spent_usd = *spent, "call recorded");
        cost
    }

    fn remaining(&self) -> f64 {
        let spent = *self.spent_usd.lock().expect("ledger lock poisoned");
        (self.budget_usd - spent).max(0.0)
    }
}
