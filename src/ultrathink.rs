//! UltraThink engine (C8) — §4.7
//!
//! Grounded on the teacher's bounded-fan-out idiom (`tokio::sync::Semaphore`
//! gating concurrent work, matching the spirit of the teacher's connection
//! pooling) applied to spawning DeepThink workers instead of HTTP connections.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::deepthink::{self, DeepThinkContext, DeepThinkOutcome, DeepThinkOverrides};
use crate::dispatch::{dispatch, DispatchContext};
use crate::errors::{EngineError, Result};
use crate::types::{AgentMetadata, AgentResult, ModelConfig, Stage, UsageStats};

/// One entry of the strict JSON array the AGENT_CONFIG stage must produce
/// (§4.7: `[{system_prompt, temperature, model_override?, seed?}, ...]`).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UltraThinkOutcome {
    pub plan: String,
    pub agent_results: Vec<AgentResult>,
    pub synthesis: String,
    pub summary: String,
    pub token_usage: UsageStats,
}

/// Run PLAN → AGENT_CONFIG → FAN_OUT → SYNTHESISE → SUMMARISE (§4.7).
///
/// `ctx` is reused across every stage and every spawned DeepThink worker —
/// provider, cache, meter, and rate limiter are process-wide singletons, not
/// per-agent state (§3 Lifecycle, §5).
pub async fn run(problem: &str, ctx: &DispatchContext<'_>, model: &ModelConfig) -> Result<UltraThinkOutcome> {
    let num_agents = model
        .num_agents
        .ok_or_else(|| EngineError::InvalidRequest("num_agents is required for an ultrathink model".into()))?;

    let mut total_usage = UsageStats::default();

    let plan_history = vec![crate::types::Message::user(format!(
        "Produce a high-level plan for solving the following problem, to guide \
         {num_agents} independent solvers:\n\n{problem}"
    ))];
    let plan_result = dispatch(ctx, Stage::Planning, None, None, &plan_history).await?;
    total_usage.add(&plan_result.usage);
    let plan = plan_result.text;

    let agent_config_history = vec![crate::types::Message::user(format!(
        "Given the plan below, produce a JSON array of exactly {num_agents} agent \
         configurations, each `{{\"system_prompt\": string, \"temperature\": number, \
         \"model_override\": string|null, \"seed\": number|null}}`. Respond with JSON only, \
         no prose.\n\nPlan:\n{plan}"
    ))];
    let agent_config_result = dispatch(ctx, Stage::AgentConfig, None, Some(plan.as_str()), &agent_config_history).await?;
    total_usage.add(&agent_config_result.usage);

    // Strict parse (§4.7): any JSON error or wrong-shape output fails the run
    // with no DeepThink workers spawned.
    let configs: Vec<AgentConfig> = serde_json::from_str(agent_config_result.text.trim()).map_err(|e| {
        EngineError::InvalidRequest(format!("agent_config stage did not return a valid JSON array: {e}"))
    })?;
    if configs.len() != num_agents as usize {
        return Err(EngineError::InvalidRequest(format!(
            "agent_config returned {} entries, expected {num_agents}",
            configs.len()
        )));
    }

    let semaphore = Arc::new(Semaphore::new(model.parallel_run_agents as usize));

    // Each future acquires its own permit before calling into DeepThink, so at
    // most `parallel_run_agents` workers are mid-call at once; `join_all`
    // polls all of them concurrently rather than awaiting one at a time,
    // which is what actually exercises the bound instead of trivially
    // satisfying it.
    let agent_futures = configs.into_iter().enumerate().map(|(agent_id, config)| {
        let semaphore = semaphore.clone();
        let problem = problem.to_string();
        let plan = plan.clone();
        let deepthink_ctx = DeepThinkContext {
            dispatch: DispatchContext {
                provider: ctx.provider,
                provider_name: ctx.provider_name,
                model,
                cache: ctx.cache,
                meter: ctx.meter,
                rate_limiter: ctx.rate_limiter,
                admission: ctx.admission,
                deadline: ctx.deadline,
                fold_config: ctx.fold_config,
                content_cache_ttl: ctx.content_cache_ttl,
                max_retries: ctx.max_retries,
            },
            model,
        };
        let overrides = DeepThinkOverrides {
            system_prompt: Some(config.system_prompt),
            knowledge: Some(plan),
            seed: config.seed,
            parallel_verification: false,
        };

        async move {
            let permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let outcome = run_one_agent(agent_id as u32, &problem, &deepthink_ctx, &overrides).await;
            drop(permit);
            outcome
        }
    });

    let handles = futures::future::join_all(agent_futures).await;

    let mut agent_results = Vec::with_capacity(handles.len());
    for result in handles {
        match result {
            Ok(r) => {
                total_usage.add(&r.token_usage);
                agent_results.push(r);
            }
            Err((agent_id, e)) => {
                warn!(agent_id, error = %e, "deepthink agent failed independently, continuing siblings");
                agent_results.push(AgentResult {
                    agent_id,
                    final_solution: String::new(),
                    reasoning: String::new(),
                    iterations: 0,
                    verifications: 0,
                    token_usage: UsageStats::default(),
                    metadata: AgentMetadata {
                        verifications_met: false,
                        errors: vec![e.to_string()],
                        anomaly: None,
                    },
                });
            }
        }
    }
    agent_results.sort_by_key(|r| r.agent_id);

    let solutions_block = agent_results
        .iter()
        .map(|r| format!("Agent {}: {}", r.agent_id, r.final_solution))
        .collect::<Vec<_>>()
        .join("\n\n");

    let synthesis_history = vec![crate::types::Message::user(format!(
        "Plan:\n{plan}\n\nProblem:\n{problem}\n\nIndependent agent solutions:\n\n\
         {solutions_block}\n\nSynthesise a single unified answer."
    ))];
    let synthesis_result = dispatch(ctx, Stage::Synthesis, None, Some(plan.as_str()), &synthesis_history).await?;
    total_usage.add(&synthesis_result.usage);

    let summary_history = vec![crate::types::Message::user(format!(
        "Synthesis:\n{}\n\nWrite the final user-facing answer.",
        synthesis_result.text
    ))];
    let summary_result = dispatch(ctx, Stage::Summary, None, None, &summary_history).await?;
    total_usage.add(&summary_result.usage);

    info!(agents = agent_results.len(), "ultrathink run complete");

    Ok(UltraThinkOutcome {
        plan,
        agent_results,
        synthesis: synthesis_result.text,
        summary: summary_result.text,
        token_usage: total_usage,
    })
}

async fn run_one_agent(
    agent_id: u32,
    problem: &str,
    ctx: &DeepThinkContext<'_>,
    overrides: &DeepThinkOverrides,
) -> std::result::Result<AgentResult, (u32, EngineError)> {
    let outcome: DeepThinkOutcome = deepthink::run(problem, ctx, overrides)
        .await
        .map_err(|e| (agent_id, e))?;
    Ok(AgentResult {
        agent_id,
        final_solution: outcome.solution,
        reasoning: outcome.reasoning,
        iterations: outcome.iterations,
        verifications: outcome.verifications,
        token_usage: outcome.token_usage,
        metadata: AgentMetadata {
            verifications_met: outcome.verifications_met,
            errors: outcome.errors,
            anomaly: outcome.anomaly,
        },
    })
}
