//! DeepThink engine (C7) — §4.6
//!
//! Grounded on the teacher's explicit state-machine style for multi-step
//! gateway flows (retry/backoff loops in `core/rate_limiter/limiter.rs`
//! generalised to a full solve/verify/correct loop): a small `enum State`
//! walked in a `loop`, rather than recursion or a callback chain.

use std::time::Duration;
use tracing::{info, warn};

use crate::dispatch::{dispatch, DispatchContext};
use crate::errors::{EngineError, Result};
use crate::memory::FoldConfig;
use crate::rate_limiter::AdmissionStrategy;
use crate::types::{Message, ModelConfig, Stage, UsageStats};
use crate::verification;

/// Per-run knobs an UltraThink agent (or a direct caller) may override on top
/// of the resolved [`ModelConfig`] (§4.7: `{system_prompt, temperature,
/// model_override?, seed?}`).
#[derive(Debug, Clone, Default)]
pub struct DeepThinkOverrides {
    pub system_prompt: Option<String>,
    pub knowledge: Option<String>,
    pub seed: Option<u64>,
    pub parallel_verification: bool,
}

/// Everything one DeepThink run needs beyond the problem text and overrides.
pub struct DeepThinkContext<'a> {
    pub dispatch: DispatchContext<'a>,
    pub model: &'a ModelConfig,
}

#[derive(Debug, Clone)]
pub struct DeepThinkOutcome {
    pub solution: String,
    pub reasoning: String,
    pub iterations: u32,
    pub verifications: u32,
    pub verifications_met: bool,
    pub token_usage: UsageStats,
    pub errors: Vec<String>,
    pub anomaly: Option<String>,
}

enum State {
    GenerateInitial,
    Verify,
    Correct,
    Summarise { failed: bool },
    Done,
}

/// Run the full GENERATE_INITIAL → VERIFY → (pass|fail) → ... → SUMMARISE
/// state machine of §4.6.
pub async fn run(
    problem: &str,
    ctx: &DeepThinkContext<'_>,
    overrides: &DeepThinkOverrides,
) -> Result<DeepThinkOutcome> {
    if ctx.model.required_verifications > ctx.model.max_iterations {
        return Err(EngineError::InvalidRequest(
            "required_verifications must not exceed max_iterations".into(),
        ));
    }

    let system = overrides.system_prompt.as_deref();
    let knowledge = overrides.knowledge.as_deref();

    let mut history = vec![Message::user(problem.to_string())];
    let mut state = State::GenerateInitial;
    let mut iterations = 0u32;
    let mut error_count = 0u32;
    let mut passes_accum = 0u32;
    let mut total_usage = UsageStats::default();
    let mut errors = Vec::new();
    let mut anomaly = None;
    let mut last_solution = String::new();
    let mut failed_out = false;

    loop {
        state = match state {
            State::GenerateInitial => {
                let result = call_stage(ctx, Stage::Initial, system, knowledge, &history).await;
                match result {
                    Ok(r) => {
                        accumulate(&mut total_usage, &mut anomaly, r.usage);
                        last_solution = r.text.clone();
                        history.push(Message::assistant(r.text));
                        State::Verify
                    }
                    Err(e) => {
                        classify_and_count(&e, &mut error_count, &mut errors);
                        if error_count >= ctx.model.max_errors {
                            failed_out = true;
                            State::Summarise { failed: true }
                        } else {
                            State::GenerateInitial
                        }
                    }
                }
            }
            State::Verify => {
                let verdict_result = verify(ctx, problem, &last_solution, overrides).await;
                match verdict_result {
                    Ok((passed, usage)) => {
                        accumulate(&mut total_usage, &mut anomaly, usage);
                        if passed {
                            passes_accum += 1;
                            if passes_accum >= ctx.model.required_verifications {
                                State::Summarise { failed: false }
                            } else {
                                iterations += 1;
                                if iterations >= ctx.model.max_iterations {
                                    State::Summarise { failed: false }
                                } else {
                                    State::Verify
                                }
                            }
                        } else {
                            iterations += 1;
                            passes_accum = 0;
                            if iterations >= ctx.model.max_iterations {
                                failed_out = true;
                                State::Summarise { failed: true }
                            } else {
                                State::Correct
                            }
                        }
                    }
                    Err(e) => {
                        classify_and_count(&e, &mut error_count, &mut errors);
                        if error_count >= ctx.model.max_errors {
                            failed_out = true;
                            State::Summarise { failed: true }
                        } else {
                            State::Verify
                        }
                    }
                }
            }
            State::Correct => {
                let correction_prompt = format!(
                    "The previous solution had an error. Problem:\n{problem}\n\nPrevious \
                     solution:\n{last_solution}\n\nProvide a corrected solution."
                );
                history.push(Message::user(correction_prompt));
                let result = call_stage(ctx, Stage::Correction, system, knowledge, &history).await;
                match result {
                    Ok(r) => {
                        accumulate(&mut total_usage, &mut anomaly, r.usage);
                        last_solution = r.text.clone();
                        history.push(Message::assistant(r.text));
                        State::Verify
                    }
                    Err(e) => {
                        classify_and_count(&e, &mut error_count, &mut errors);
                        if error_count >= ctx.model.max_errors {
                            failed_out = true;
                            State::Summarise { failed: true }
                        } else {
                            State::Correct
                        }
                    }
                }
            }
            State::Summarise { failed } => {
                failed_out = failed_out || failed;
                let summary_prompt = format!(
                    "Problem:\n{problem}\n\nFinal candidate solution:\n{last_solution}\n\n\
                     Write the user-facing final answer."
                );
                history.push(Message::user(summary_prompt));
                let result = call_stage(ctx, Stage::Summary, system, knowledge, &history).await;
                match result {
                    Ok(r) => {
                        accumulate(&mut total_usage, &mut anomaly, r.usage);
                        last_solution = r.text;
                    }
                    Err(e) => {
                        warn!(error = %e, "summary stage failed, returning best candidate");
                        errors.push(e.to_string());
                    }
                }
                State::Done
            }
            State::Done => break,
        };
    }

    info!(iterations, passes_accum, "deepthink run complete");

    Ok(DeepThinkOutcome {
        solution: last_solution.clone(),
        reasoning: last_solution,
        iterations,
        verifications: passes_accum,
        verifications_met: !failed_out && passes_accum >= ctx.model.required_verifications,
        token_usage: total_usage,
        errors,
        anomaly,
    })
}

async fn call_stage(
    ctx: &DeepThinkContext<'_>,
    stage: Stage,
    system: Option<&str>,
    knowledge: Option<&str>,
    history: &[Message],
) -> Result<crate::dispatch::StageResult> {
    dispatch(&ctx.dispatch, stage, system, knowledge, history).await
}

/// Single judge, or a 3-way majority vote when `overrides.parallel_verification`.
async fn verify(
    ctx: &DeepThinkContext<'_>,
    problem: &str,
    solution: &str,
    overrides: &DeepThinkOverrides,
) -> Result<(bool, UsageStats)> {
    let model = ctx.model.model_for_stage(Stage::Verification);
    if overrides.parallel_verification {
        let seeds: Vec<u64> = (0..3).map(|i| overrides.seed.unwrap_or(0).wrapping_add(i)).collect();
        let (majority, _, usage) =
            verification::majority_vote(ctx.dispatch.provider, model, problem, solution, &seeds).await?;
        Ok((majority, usage))
    } else {
        let (verdict, usage) =
            verification::judge(ctx.dispatch.provider, model, problem, solution, overrides.seed).await?;
        Ok((verdict.is_correct, usage))
    }
}

/// Classify a stage-call failure per §7: retryable kinds (already retried up
/// to `max_retries` inside [`dispatch`]) don't count against `max_errors`;
/// everything else does.
fn classify_and_count(error: &EngineError, error_count: &mut u32, errors: &mut Vec<String>) {
    if error.is_retryable() {
        warn!(error = %error, "retryable error exhausted its retries, re-entering stage");
    } else {
        *error_count += 1;
        errors.push(error.to_string());
    }
}

fn accumulate(total: &mut UsageStats, anomaly: &mut Option<String>, usage: UsageStats) {
    if let Some(note) = usage.anomaly() {
        *anomaly = Some(note);
    }
    total.add(&usage);
}
