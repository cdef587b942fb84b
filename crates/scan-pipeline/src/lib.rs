//! Async orchestration layer for multi-slice CT batch analysis.
//!
//! Runs many batches (units) through a two-phase screen/confirm protocol
//! against a hosted vision-language inference service, under bounded
//! concurrency with retry, per-unit timeouts, and a hard per-scan dollar
//! budget; then hands the surviving unit results to the deterministic
//! `consensus` crate for voting and consistency validation.

pub mod budget;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod protocol;

pub use budget::{BudgetLedger, CallTier, MeteredLedger, Usage};
pub use client::{ConfirmOutcome, ConfirmReason, ConfirmRequest, InferenceClient, ScreenOutcome};
pub use config::PipelineConfig;
pub use error::{AnalysisError, RetryCategory};
pub use pipeline::{analyze_scan, ScanAnalysis};
