//! Per-cell admission logic (§4.2).
//!
//! Grounded on the teacher's `core/rate_limiter/strategies.rs`: each cell type
//! owns a `would_admit`/`commit` pair so the registry can check every attached
//! cell before committing any of them (spec: "Both cells may be attached to
//! one bucket; both must admit before the call proceeds").

use crate::types::BucketCell;
use std::time::{Duration, Instant};

/// Outcome of a non-committing admission check.
pub struct Check {
    pub admitted: bool,
    /// How long the caller should wait before retrying, if not admitted.
    pub retry_after: Duration,
}

impl BucketCell {
    /// Refill/expire bookkeeping plus an admission check, without consuming
    /// capacity. Call [`commit`](Self::commit) only if every attached cell's
    /// `would_admit` returned `true`.
    pub fn would_admit(&mut self, now: Instant) -> Check {
        match self {
            BucketCell::TokenBucket {
                qps,
                burst,
                tokens,
                last_refill,
            } => {
                let elapsed = now.duration_since(*last_refill).as_secs_f64();
                *tokens = (*tokens + elapsed * *qps).min(*burst);
                *last_refill = now;
                if *tokens >= 1.0 {
                    Check {
                        admitted: true,
                        retry_after: Duration::ZERO,
                    }
                } else {
                    let deficit = 1.0 - *tokens;
                    let secs = if *qps > 0.0 { deficit / *qps } else { 1.0 };
                    Check {
                        admitted: false,
                        retry_after: Duration::from_secs_f64(secs.max(0.001)),
                    }
                }
            }
            BucketCell::Window {
                limit,
                window_secs,
                timestamps,
            } => {
                let window = Duration::from_secs(*window_secs);
                let cutoff = now.checked_sub(window).unwrap_or(now);
                timestamps.retain(|t| *t > cutoff);
                if (timestamps.len() as u32) < *limit {
                    Check {
                        admitted: true,
                        retry_after: Duration::ZERO,
                    }
                } else {
                    let oldest = timestamps.first().copied().unwrap_or(now);
                    let retry_after = window.saturating_sub(now.duration_since(oldest));
                    Check {
                        admitted: false,
                        retry_after: retry_after.max(Duration::from_millis(1)),
                    }
                }
            }
        }
    }

    /// Consume one unit of capacity. Must only be called after `would_admit`
    /// returned `admitted: true` in the same admission round.
    pub fn commit(&mut self, now: Instant) {
        match self {
            BucketCell::TokenBucket { tokens, .. } => {
                *tokens -= 1.0;
            }
            BucketCell::Window { timestamps, .. } => {
                timestamps.push(now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_admits_up_to_burst_then_blocks() {
        let mut cell = BucketCell::new_token_bucket(1.0, 1.0);
        let now = Instant::now();
        let first = cell.would_admit(now);
        assert!(first.admitted);
        cell.commit(now);
        let second = cell.would_admit(now);
        assert!(!second.admitted);
    }

    #[test]
    fn window_admits_until_limit_then_blocks() {
        let mut cell = BucketCell::new_window(2, 60);
        let now = Instant::now();
        for _ in 0..2 {
            let check = cell.would_admit(now);
            assert!(check.admitted);
            cell.commit(now);
        }
        let third = cell.would_admit(now);
        assert!(!third.admitted);
    }
}
