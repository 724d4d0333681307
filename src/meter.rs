//! Token meter (C2) — §4.8
//!
//! Grounded on the teacher's cost-calculator shape (`core/cost/calculator.rs`):
//! a generic costing function driven by a pricing table, plus the teacher's
//! preference for lock-free atomics on the hot accounting path
//! (`core/cache_manager/types.rs`'s `AtomicCacheStats`). Here the hot path is
//! `record()`, called once per LLM call; a `DashMap` keyed by `(provider,
//! model)` gives per-key concurrent updates without a single global lock.

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::types::{PricingTable, UsageStats};

/// Per-(provider, model) usage accumulation plus a pricing-driven cost
/// estimate (§4.8).
#[derive(Debug)]
pub struct TokenMeter {
    usage: DashMap<(String, String), UsageStats>,
    folding: Mutex<FoldingStats>,
}

/// Memory-folding stats channel, kept separate from per-model usage (§4.4, §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldingStats {
    pub original_context_tokens: u64,
    pub compressed_context_tokens: u64,
    pub distillation_tokens: u64,
}

impl FoldingStats {
    /// `saved = max(0, original − compressed)`.
    pub fn saved(&self) -> u64 {
        self.original_context_tokens
            .saturating_sub(self.compressed_context_tokens)
    }

    /// `net_saved = saved − distillation`.
    pub fn net_saved(&self) -> i64 {
        self.saved() as i64 - self.distillation_tokens as i64
    }
}

impl Default for TokenMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenMeter {
    pub fn new() -> Self {
        Self {
            usage: DashMap::new(),
            folding: Mutex::new(FoldingStats::default()),
        }
    }

    /// Accumulate `usage` under `(provider, model)`. Two concurrent calls for
    /// the same key never lose an update (spec §5).
    pub fn record(&self, provider: &str, model: &str, usage: UsageStats) {
        if let Some(note) = usage.anomaly() {
            tracing::warn!(provider, model, note, "usage anomaly recorded, continuing");
        }
        self.usage
            .entry((provider.to_string(), model.to_string()))
            .and_modify(|existing| existing.add(&usage))
            .or_insert(usage);
    }

    pub fn record_folding(&self, original: u64, compressed: u64, distillation: u64) {
        let mut folding = self.folding.lock();
        folding.original_context_tokens += original;
        folding.compressed_context_tokens += compressed;
        folding.distillation_tokens += distillation;
    }

    pub fn folding_stats(&self) -> FoldingStats {
        *self.folding.lock()
    }

    /// Total usage across every (provider, model) recorded so far.
    pub fn total(&self) -> UsageStats {
        let mut total = UsageStats::default();
        for entry in self.usage.iter() {
            total.add(entry.value());
        }
        total
    }

    pub fn usage_for(&self, provider: &str, model: &str) -> UsageStats {
        self.usage
            .get(&(provider.to_string(), model.to_string()))
            .map(|e| *e.value())
            .unwrap_or_default()
    }

    /// Walk every recorded (provider, model) entry and apply the documented
    /// four-category cost formula (§4.8). Missing pricing entries contribute
    /// zero rather than a fabricated rate.
    pub fn estimate_cost(&self, pricing: &PricingTable) -> f64 {
        let mut cost = 0.0;
        for entry in self.usage.iter() {
            let (provider, model) = entry.key();
            let Some(price) = pricing.get(provider, model) else {
                continue;
            };
            let usage = entry.value();
            cost += usage.uncached_input() as f64 * price.prompt;
            cost += usage.cached as f64 * price.cached_prompt;
            cost += usage.regular_output() as f64 * price.completion;
            cost += usage.reasoning as f64 * price.reasoning;
        }
        cost
    }
}
