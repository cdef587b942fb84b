//! Verdict data model shared by the protocol, executor, and voting engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pathology::Pathology;

/// One pathology call for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathologyVerdict {
    pub pathology: Pathology,
    /// Whether the pathology is present in this batch's slices.
    pub present: bool,
    /// Confidence 0..=100.
    pub confidence: u8,
    /// Optional finding subtype (e.g. "segmental", "UIP pattern").
    pub subtype: Option<String>,
    /// Narrative evidence supporting the call.
    pub evidence: String,
    /// Narrative evidence against the call, if any.
    pub contradicting: String,
}

impl PathologyVerdict {
    /// Conservative placeholder when the inference service returned nothing
    /// usable for this pathology. Never treated as a confident negative.
    pub fn unknown(pathology: Pathology) -> Self {
        Self {
            pathology,
            present: false,
            confidence: 0,
            subtype: None,
            evidence: String::new(),
            contradicting: String::new(),
        }
    }

    /// Cap confidence at `max`, in place.
    pub fn cap_confidence(&mut self, max: u8) {
        if self.confidence > max {
            self.confidence = max;
        }
    }
}

/// How a per-pathology verdict was settled within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Confident negative screen accepted without confirmation spend.
    ScreenedFinal,
    /// Settled by the consolidated confirmation call.
    Confirmed,
    /// Fell back to the screen verdict (budget cap or escalation failure).
    Degraded,
}

/// The outcome of running one batch through the two-phase protocol.
/// Immutable once produced; keyed by `unit_id` regardless of completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: usize,
    /// Original anatomical slice indices this batch covered.
    pub slice_indices: Vec<usize>,
    pub verdicts: HashMap<Pathology, PathologyVerdict>,
    pub provenance: HashMap<Pathology, Provenance>,
    /// Mean confidence across all eight verdicts.
    pub overall_confidence: f64,
}

impl UnitResult {
    pub fn new(
        unit_id: usize,
        slice_indices: Vec<usize>,
        verdicts: HashMap<Pathology, PathologyVerdict>,
        provenance: HashMap<Pathology, Provenance>,
    ) -> Self {
        let overall_confidence = if verdicts.is_empty() {
            0.0
        } else {
            verdicts.values().map(|v| v.confidence as f64).sum::<f64>() / verdicts.len() as f64
        };
        Self {
            unit_id,
            slice_indices,
            verdicts,
            provenance,
            overall_confidence,
        }
    }

    pub fn verdict(&self, pathology: Pathology) -> Option<&PathologyVerdict> {
        self.verdicts.get(&pathology)
    }
}

/// The voted answer for one pathology across the whole scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub pathology: Pathology,
    pub detected: bool,
    /// Confidence-weighted average over positive voters (0 when not detected
    /// by any unit).
    pub confidence: f64,
    /// Evidence text selected from the best contributing batch, polarity-
    /// corrected by the consistency validator.
    pub evidence: String,
}

/// Full audit record of one pathology's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathologyTally {
    pub pathology: Pathology,
    pub positive_votes: usize,
    pub negative_votes: usize,
    pub required_votes: usize,
    /// Average confidence among positive voters.
    pub average_confidence: f64,
    pub confidence_floor: f64,
    pub vote_passed: bool,
    pub confidence_passed: bool,
    pub grace_applied: bool,
    /// Set when a post-vote precedence rule flipped this pathology off.
    pub suppressed_by: Option<String>,
}

/// Audit metadata attached to every scan result: the full tally and the
/// thresholds that were in force, so downstream report rendering can show
/// exactly why each pathology passed or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingMetadata {
    pub total_units: usize,
    pub analyzed_slices: usize,
    pub tallies: Vec<PathologyTally>,
}

impl VotingMetadata {
    pub fn tally(&self, pathology: Pathology) -> Option<&PathologyTally> {
        self.tallies.iter().find(|t| t.pathology == pathology)
    }
}
