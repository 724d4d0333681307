//! Token usage accounting and pricing (§3, feeds C2 Token meter)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Usage for a single call, broken down by category (§3).
///
/// Invariants `cached ≤ input` and `reasoning ≤ output` are *warn, don't fail*
/// (spec §9 Open Questions, resolved in SPEC_FULL.md §9.1): a violation is never
/// rejected, it is recorded on `anomaly` and surfaced in result metadata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStats {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
    pub reasoning: u64,
}

impl UsageStats {
    pub fn new(input: u64, output: u64, cached: u64, reasoning: u64) -> Self {
        Self {
            input,
            output,
            cached,
            reasoning,
        }
    }

    /// `input − cached`, the billable non-cached input token count.
    pub fn uncached_input(&self) -> u64 {
        self.input.saturating_sub(self.cached)
    }

    /// `output − reasoning`, the billable non-reasoning output token count.
    pub fn regular_output(&self) -> u64 {
        self.output.saturating_sub(self.reasoning)
    }

    /// Anomaly message if `cached > input` or `reasoning > output`; `None` when
    /// the recorded usage is internally consistent.
    pub fn anomaly(&self) -> Option<String> {
        let mut notes = Vec::new();
        if self.cached > self.input {
            notes.push(format!(
                "cached ({}) exceeds input ({})",
                self.cached, self.input
            ));
        }
        if self.reasoning > self.output {
            notes.push(format!(
                "reasoning ({}) exceeds output ({})",
                self.reasoning, self.output
            ));
        }
        if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        }
    }

    /// Accumulate another usage record into this one. `record(a); record(b)` and
    /// `record(a+b)` must yield identical totals (spec §8 round-trip property).
    pub fn add(&mut self, other: &UsageStats) {
        self.input += other.input;
        self.output += other.output;
        self.cached += other.cached;
        self.reasoning += other.reasoning;
    }
}

impl std::ops::Add for UsageStats {
    type Output = UsageStats;
    fn add(self, rhs: UsageStats) -> UsageStats {
        let mut out = self;
        out.add(&rhs);
        out
    }
}

/// USD-per-token pricing for one (provider, underlying_model) pair (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PricingEntry {
    pub prompt: f64,
    pub completion: f64,
    pub cached_prompt: f64,
    pub reasoning: f64,
}

/// `{provider_name: {underlying_model: PricingEntry}}` (§6 pricing file shape).
///
/// This is a plain in-memory table; reading the file itself is an external
/// concern per the Non-goals around configuration loading (SPEC_FULL.md §1).
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    entries: HashMap<(String, String), PricingEntry>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nested_map(
        table: HashMap<String, HashMap<String, PricingEntry>>,
    ) -> Self {
        let mut entries = HashMap::new();
        for (provider, models) in table {
            for (model, entry) in models {
                entries.insert((provider.clone(), model), entry);
            }
        }
        Self { entries }
    }

    pub fn insert(&mut self, provider: impl Into<String>, model: impl Into<String>, entry: PricingEntry) {
        self.entries.insert((provider.into(), model.into()), entry);
    }

    /// Missing entries return `None`; the caller (the token meter) must treat a
    /// miss as contributing zero cost rather than fabricating a rate (spec §4.8).
    pub fn get(&self, provider: &str, model: &str) -> Option<&PricingEntry> {
        self.entries.get(&(provider.to_string(), model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billable_splits_subtract_cached_and_reasoning() {
        let usage = UsageStats::new(1000, 500, 200, 100);
        assert_eq!(usage.uncached_input(), 800);
        assert_eq!(usage.regular_output(), 400);
    }

    #[test]
    fn anomaly_detects_cached_exceeding_input() {
        let usage = UsageStats::new(100, 50, 150, 10);
        assert!(usage.anomaly().unwrap().contains("cached"));
    }

    #[test]
    fn anomaly_is_none_when_consistent() {
        let usage = UsageStats::new(100, 50, 20, 10);
        assert!(usage.anomaly().is_none());
    }

    #[test]
    fn record_then_add_matches_combined_record() {
        let mut a = UsageStats::new(10, 5, 2, 1);
        let b = UsageStats::new(20, 10, 4, 2);
        let combined = UsageStats::new(30, 15, 6, 3);
        a.add(&b);
        assert_eq!(a, combined);
    }

    #[test]
    fn missing_pricing_entry_is_none_not_fabricated() {
        let table = PricingTable::new();
        assert!(table.get("openai", "gpt-unknown").is_none());
    }
}
