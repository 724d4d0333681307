//! Verification (C6) — §4.5
//!
//! Grounded on the teacher's permissive-parse idiom for LLM-authored JSON
//! (accept the documented shape, fall back to a looser heuristic rather than
//! hard-failing) and, per SPEC_FULL.md §4.5, the `meval` crate standing in for
//! a CAS library absent from both the teacher's dependency table and the
//! recoverable reference material.

use serde::Deserialize;
use tracing::debug;

use crate::errors::Result;
use crate::providers::{CallParams, Provider};
use crate::types::Message;

/// Outcome of the LLM judge, the only check the engine trusts for control
/// flow (§4.5: "The engine trusts only the judge's boolean outcome").
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    pub is_correct: bool,
    pub reasoning: String,
    pub errors: Vec<String>,
}

#[derive(Deserialize)]
struct JudgeJson {
    is_correct: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    errors: Vec<String>,
}

/// Ask `provider`/`model` whether `solution` correctly answers `problem`.
///
/// Parse is permissive (§4.5): a canonical `{is_correct, reasoning, errors[]}`
/// JSON object is preferred; if that fails to parse, a verdict whose first
/// non-whitespace token is `yes` (case-insensitive) is treated as a pass.
pub async fn judge(
    provider: &dyn Provider,
    model: &str,
    problem: &str,
    solution: &str,
    seed: Option<u64>,
) -> Result<(JudgeVerdict, crate::types::UsageStats)> {
    let prompt = format!(
        "You are verifying a candidate solution to a problem.\n\n\
         Problem:\n{problem}\n\n\
         Candidate solution:\n{solution}\n\n\
         Respond with a JSON object {{\"is_correct\": bool, \"reasoning\": string, \"errors\": [string]}}."
    );
    let params = CallParams {
        seed,
        ..Default::default()
    };
    let result = provider
        .chat(model, &[Message::user(prompt)], &params)
        .await?;

    let verdict = parse_verdict(&result.text);
    Ok((verdict, result.usage))
}

fn parse_verdict(text: &str) -> JudgeVerdict {
    if let Some(json_text) = extract_json_object(text) {
        if let Ok(parsed) = serde_json::from_str::<JudgeJson>(&json_text) {
            return JudgeVerdict {
                is_correct: parsed.is_correct,
                reasoning: parsed.reasoning,
                errors: parsed.errors,
            };
        }
    }

    let first_token = text.split_whitespace().next().unwrap_or("").to_lowercase();
    let is_correct = first_token.trim_matches(|c: char| !c.is_alphanumeric()) == "yes";
    debug!(is_correct, "judge response parsed via permissive fallback");
    JudgeVerdict {
        is_correct,
        reasoning: text.to_string(),
        errors: Vec::new(),
    }
}

/// Best-effort extraction of the first balanced `{...}` object in `text`, so a
/// judge that wraps its JSON in prose still parses.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Majority vote over up to 3 independent judge calls with distinct seeds
/// (§4.6: "run up to 3 independent judges in parallel... pass iff a
/// majority pass"). All usage is metered by the caller via the returned totals.
pub async fn majority_vote(
    provider: &dyn Provider,
    model: &str,
    problem: &str,
    solution: &str,
    seeds: &[u64],
) -> Result<(bool, Vec<JudgeVerdict>, crate::types::UsageStats)> {
    let mut verdicts = Vec::with_capacity(seeds.len());
    let mut total_usage = crate::types::UsageStats::default();
    let mut passes = 0usize;

    for seed in seeds {
        let (verdict, usage) = judge(provider, model, problem, solution, Some(*seed)).await?;
        total_usage.add(&usage);
        if verdict.is_correct {
            passes += 1;
        }
        verdicts.push(verdict);
    }

    let majority = passes * 2 > seeds.len();
    Ok((majority, verdicts, total_usage))
}

/// Advisory-only symbolic sanity check (§4.5, §9 Open Question 2): attempts to
/// evaluate numeric/algebraic substrings of `solution` via `meval`. A parse
/// failure — the common case on prose — yields `None` rather than failing the
/// run.
pub fn symbolic_sanity_check(solution: &str) -> Option<String> {
    for line in solution.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((lhs, rhs)) = line.split_once('=') {
            let (Ok(a), Ok(b)) = (meval::eval_str(lhs.trim()), meval::eval_str(rhs.trim())) else {
                continue;
            };
            if (a - b).abs() > 1e-6 {
                return Some(format!("advisory: '{line}' does not balance ({a} != {b})"));
            }
        }
    }
    None
}
