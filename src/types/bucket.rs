//! Rate-limiter bucket shapes (§3, feeds C4)
//!
//! A closed set of variants rather than duck-typed cells (Design Notes §9:
//! "Dynamic provider dispatch... -> a closed set of variants... dispatch by
//! variant rather than by duck typing" applies equally well here).

use std::time::Instant;

/// Strategy when a bucket has no capacity left (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStrategy {
    Wait,
    Error,
}

/// One rate-limiter cell. A [`crate::rate_limiter::Bucket`] may hold one or two
/// of these; both must admit before a call proceeds.
#[derive(Debug, Clone)]
pub enum BucketCell {
    TokenBucket {
        qps: f64,
        burst: f64,
        tokens: f64,
        last_refill: Instant,
    },
    Window {
        limit: u32,
        window_secs: u64,
        timestamps: Vec<Instant>,
    },
}

impl BucketCell {
    pub fn new_token_bucket(qps: f64, burst: f64) -> Self {
        BucketCell::TokenBucket {
            qps,
            burst,
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    pub fn new_window(limit: u32, window_secs: u64) -> Self {
        BucketCell::Window {
            limit,
            window_secs,
            timestamps: Vec::new(),
        }
    }
}
