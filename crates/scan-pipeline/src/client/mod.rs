//! Inference client interface.
//!
//! The hosted vision-language service is an external collaborator: given a
//! batch of images it returns one structured per-pathology verdict set (the
//! cheap screen tier) or evaluates a caller-supplied pathology subset in
//! isolation (the expensive confirm tier). Any failure or missing pathology
//! in a response means "verdict unknown" to the caller, never a pipeline
//! crash.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use consensus::pathology::Pathology;
use consensus::verdict::PathologyVerdict;

use crate::budget::Usage;
use crate::error::AnalysisError;

pub mod http;

pub use http::HttpInferenceClient;

/// Why a pathology was flagged for confirmation by the screen pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmReason {
    /// Any positive screen must be confirmed before it may stand.
    PositiveScreen,
    /// The negative screen was too uncertain to trust.
    LowConfidence,
    /// The screen response omitted this pathology entirely.
    MissingVerdict,
    /// The screen evidence text was empty or too short to trust.
    ThinEvidence,
}

/// One pathology to re-evaluate in the consolidated confirmation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub pathology: Pathology,
    /// Confidence reported by the screen pass (synthetic when missing).
    pub screen_confidence: u8,
    pub reason: ConfirmReason,
}

/// Result of one screen-tier call.
#[derive(Debug, Clone)]
pub struct ScreenOutcome {
    pub verdicts: HashMap<Pathology, PathologyVerdict>,
    pub usage: Usage,
}

/// Result of one confirm-tier call.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub verdicts: HashMap<Pathology, PathologyVerdict>,
    pub usage: Usage,
    /// Whether the service completed the confirmation in full.
    pub succeeded: bool,
}

/// The hosted inference service. Implementations must be safely callable
/// concurrently from multiple unit tasks.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Cheap first pass: one call covering all eight pathologies.
    async fn screen(&self, images: &[Vec<u8>]) -> Result<ScreenOutcome, AnalysisError>;

    /// Expensive consolidated second pass, confined to the supplied subset,
    /// each pathology evaluated in isolation.
    async fn confirm(
        &self,
        requests: &[ConfirmRequest],
        images: &[Vec<u8>],
    ) -> Result<ConfirmOutcome, AnalysisError>;
}
