//! Per-agent result type for UltraThink fan-out (§3, feeds C8)

use serde::{Deserialize, Serialize};

use super::usage::UsageStats;

/// Owned by the spawning UltraThink run; no cross-run sharing (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: u32,
    pub final_solution: String,
    pub reasoning: String,
    pub iterations: u32,
    pub verifications: u32,
    pub token_usage: UsageStats,
    pub metadata: AgentMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub verifications_met: bool,
    pub errors: Vec<String>,
    pub anomaly: Option<String>,
}
