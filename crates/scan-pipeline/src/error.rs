//! Error taxonomy with retry classification.
//!
//! Every error in the orchestration layer is represented here. The executor
//! queries `is_retriable()` / `retry_category()` instead of string matching
//! at call sites.
//!
//! ## Retry categories
//!
//! | Category          | Retriable | Notes                                  |
//! |-------------------|-----------|----------------------------------------|
//! | Transient         | yes       | network / backend hiccup               |
//! | RateLimit         | yes       | extra fixed backoff added              |
//! | Timeout           | yes       | extra fixed backoff added              |
//! | ParseFailure      | yes       | malformed verdict payload              |
//! | BudgetExhausted   | no        | degraded in place at the call site     |
//! | InsufficientUnits | no        | scan-level terminal                    |
//! | Configuration     | no        | terminal                               |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification used by the executor to decide whether to retry a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Transient network or inference backend error.
    Transient,
    /// Provider rate limit.
    RateLimit,
    /// Unit exceeded its wall-clock window.
    Timeout,
    /// Inference response could not be parsed into verdicts.
    ParseFailure,
    /// Per-scan budget would be exceeded.
    BudgetExhausted,
    /// Too few units succeeded to produce a trustworthy verdict.
    InsufficientUnits,
    /// Invalid or missing configuration.
    Configuration,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimit | Self::Timeout | Self::ParseFailure
        )
    }

    /// Extra fixed delay on top of exponential backoff, for categories where
    /// hammering the provider again immediately makes things worse.
    pub fn extra_backoff(self) -> Option<Duration> {
        match self {
            Self::RateLimit | Self::Timeout => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Timeout => write!(f, "timeout"),
            Self::ParseFailure => write!(f, "parse_failure"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::InsufficientUnits => write!(f, "insufficient_units"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Unified error type for the analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Retriable ─────────────────────────────────────────────────────────
    /// Inference request failed (network, backend crash, 5xx).
    #[error("inference failure: {0}")]
    Inference(String),

    /// Provider rate limit (429).
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// A unit's analysis exceeded its wall-clock window and was abandoned.
    #[error("unit {unit_id} timed out after {elapsed_secs}s")]
    UnitTimeout { unit_id: usize, elapsed_secs: u64 },

    /// The inference response could not be parsed into pathology verdicts.
    #[error("verdict parse failure: {0}")]
    Parse(String),

    // ── Non-retriable ─────────────────────────────────────────────────────
    /// The scan budget cannot cover another call of this tier.
    #[error("scan budget exhausted: {remaining_usd:.4} USD remaining")]
    BudgetExhausted { remaining_usd: f64 },

    /// Fewer units succeeded than the minimum success rate allows. Surfaced
    /// distinctly so callers can explain partial content refusals separately
    /// from outright API failure.
    #[error(
        "analysis incomplete: only {succeeded} of {total} batches succeeded \
         (minimum {min_success_pct}%)"
    )]
    InsufficientUnits {
        succeeded: usize,
        total: usize,
        min_success_pct: u8,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AnalysisError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Inference(_) => RetryCategory::Transient,
            Self::RateLimit(_) => RetryCategory::RateLimit,
            Self::UnitTimeout { .. } => RetryCategory::Timeout,
            Self::Parse(_) => RetryCategory::ParseFailure,
            Self::BudgetExhausted { .. } => RetryCategory::BudgetExhausted,
            Self::InsufficientUnits { .. } => RetryCategory::InsufficientUnits,
            Self::Configuration(_) => RetryCategory::Configuration,
            Self::Internal(_) => RetryCategory::Transient,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    /// Classify a raw HTTP/provider error message into the right variant.
    /// Rate limits and proxy hiccups carry well-known status markers.
    pub fn from_http_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if message.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
        {
            Self::RateLimit(message)
        } else {
            Self::Inference(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_failure_is_retriable() {
        let err = AnalysisError::Inference("connection reset".into());
        assert!(err.is_retriable());
        assert_eq!(err.retry_category(), RetryCategory::Transient);
        assert!(err.retry_category().extra_backoff().is_none());
    }

    #[test]
    fn rate_limit_and_timeout_get_extra_backoff() {
        let rl = AnalysisError::RateLimit("429".into());
        let to = AnalysisError::UnitTimeout {
            unit_id: 3,
            elapsed_secs: 180,
        };
        assert!(rl.is_retriable());
        assert!(to.is_retriable());
        assert_eq!(
            rl.retry_category().extra_backoff(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            to.retry_category().extra_backoff(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn budget_exhaustion_is_terminal() {
        let err = AnalysisError::BudgetExhausted { remaining_usd: 0.01 };
        assert!(!err.is_retriable());
    }

    #[test]
    fn insufficient_units_is_terminal_and_distinct() {
        let err = AnalysisError::InsufficientUnits {
            succeeded: 6,
            total: 10,
            min_success_pct: 70,
        };
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("6 of 10"));
    }

    #[test]
    fn http_message_classification() {
        assert!(matches!(
            AnalysisError::from_http_message("HTTP 429 Too Many Requests"),
            AnalysisError::RateLimit(_)
        ));
        assert!(matches!(
            AnalysisError::from_http_message("HTTP 503 Service Unavailable"),
            AnalysisError::Inference(_)
        ));
    }
}
