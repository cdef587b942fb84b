//! Pipeline configuration with environment overrides.

use std::time::Duration;

use consensus::voting::OverridePolicy;

/// Inference endpoint configuration (OpenAI-compatible vision API).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
    /// Cheap screening model.
    pub screen_model: String,
    /// Expensive confirmation model.
    pub confirm_model: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("SCAN_ENDPOINT_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("SCAN_API_KEY").unwrap_or_default(),
            screen_model: std::env::var("SCAN_SCREEN_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".into()),
            confirm_model: std::env::var("SCAN_CONFIRM_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
        }
    }
}

/// Tuning knobs for one scan analysis.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub endpoint: EndpointConfig,
    /// Hard per-scan spend ceiling in USD.
    pub budget_usd: f64,
    /// Wall-clock window for one unit's full two-phase analysis.
    pub unit_timeout: Duration,
    /// Retries per unit after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Minimum fraction of units that must succeed (0.0..=1.0).
    pub min_success_rate: f64,
    /// Screening evidence shorter than this forces confirmation.
    pub min_evidence_len: usize,
    /// Confidence cap applied to verdicts settled by the degrade path.
    pub degrade_confidence_cap: u8,
    /// Single-batch override policy fed to the voting engine.
    pub override_policy: OverridePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            budget_usd: env_f64("SCAN_BUDGET_USD", 2.50),
            unit_timeout: Duration::from_secs(env_u64("SCAN_UNIT_TIMEOUT_SECS", 180)),
            max_retries: env_u64("SCAN_MAX_RETRIES", 2) as u32,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            min_success_rate: 0.70,
            min_evidence_len: 10,
            degrade_confidence_cap: 80,
            override_policy: OverridePolicy::Disabled,
        }
    }
}

impl PipelineConfig {
    /// Adaptive concurrency ceiling: more units in flight on large scans to
    /// bound wall-clock time, fewer on small ones. A tuning knob, not a
    /// correctness requirement.
    pub fn concurrency_for(&self, total_slices: usize) -> usize {
        if total_slices > 400 {
            15
        } else if total_slices > 250 {
            12
        } else {
            8
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(var: &str, default: f64) -> f64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
