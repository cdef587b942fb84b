//! Weighted, threshold-based consensus voting across batch results.
//!
//! Per-batch pathology calls are noisy: the inference service can hallucinate
//! a focal finding on one batch or miss a diffuse one on another. The engine
//! reconciles all successful batch results into one internally-consistent
//! verdict per pathology:
//!
//! 1. tally positive votes (present AND confidence ≥ 70);
//! 2. require a per-pathology minimum vote count, relaxed for small studies;
//! 3. require the positive voters' average confidence to clear the
//!    pathology-class floor;
//! 4. apply the grace margin for near-threshold routine pathologies;
//! 5. apply mutual-exclusion rules in a fixed order (pneumonia over ILD,
//!    bulla-pattern suppression of pneumothorax);
//! 6. select evidence from the single best contributing batch, never
//!    synthesized across contradictory batches.
//!
//! Completion order of batches is irrelevant: everything is keyed by unit
//! id and slice index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pathology::Pathology;
use crate::polarity;
use crate::thresholds::{
    self, GRACE_MARGIN_VOTES, POSITIVE_VOTE_MIN_CONFIDENCE,
};
use crate::verdict::{FinalVerdict, PathologyTally, UnitResult, VotingMetadata};

/// Policy for single-batch vote overrides.
///
/// The single-batch "emergency override" (one very-high-confidence batch
/// unilaterally flipping the scan verdict) is deliberately disabled: all
/// pathologies, including emergencies, must clear the majority-vote
/// consensus. Kept as a named strategy so re-enabling is a config flip,
/// not a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverridePolicy {
    /// No single batch may flip the voted outcome. Current behavior.
    Disabled,
    /// Reserved: a single batch at or above the given confidence may force
    /// detection of an emergency pathology.
    SingleUnitEmergency { min_confidence: u8 },
}

impl Default for OverridePolicy {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Fraction of pneumothorax-positive votes that must read as bulla-only
/// (with zero definitive votes) before pneumothorax is suppressed in favor
/// of emphysematous bulla.
const BULLA_SUPPRESSION_FRACTION: f64 = 0.60;

/// The complete voted outcome for one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    /// One verdict per pathology, in clinical priority order.
    pub verdicts: Vec<FinalVerdict>,
    pub primary_diagnosis: String,
    pub metadata: VotingMetadata,
}

impl ConsensusOutcome {
    pub fn verdict(&self, pathology: Pathology) -> &FinalVerdict {
        self.verdicts
            .iter()
            .find(|v| v.pathology == pathology)
            .expect("outcome covers all pathologies")
    }

    fn verdict_mut(&mut self, pathology: Pathology) -> &mut FinalVerdict {
        self.verdicts
            .iter_mut()
            .find(|v| v.pathology == pathology)
            .expect("outcome covers all pathologies")
    }

    fn tally_mut(&mut self, pathology: Pathology) -> &mut PathologyTally {
        self.metadata
            .tallies
            .iter_mut()
            .find(|t| t.pathology == pathology)
            .expect("metadata covers all pathologies")
    }
}

/// The consensus voting engine.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    override_policy: OverridePolicy,
}

impl ConsensusEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override_policy(policy: OverridePolicy) -> Self {
        Self {
            override_policy: policy,
        }
    }

    /// Aggregate all successful batch results into one final verdict set.
    ///
    /// `analyzed_slices` is the total slice count of the scan, used for
    /// small-study threshold relaxation.
    pub fn vote(&self, results: &[UnitResult], analyzed_slices: usize) -> ConsensusOutcome {
        let total_units = results.len();
        info!(
            total_units,
            analyzed_slices,
            override_policy = ?self.override_policy,
            "starting consensus vote"
        );

        let mut verdicts = Vec::with_capacity(Pathology::ALL.len());
        let mut tallies = Vec::with_capacity(Pathology::ALL.len());

        for pathology in Pathology::ALL {
            let (verdict, tally) = self.vote_pathology(pathology, results, analyzed_slices);
            verdicts.push(verdict);
            tallies.push(tally);
        }

        let mut outcome = ConsensusOutcome {
            verdicts,
            primary_diagnosis: String::new(),
            metadata: VotingMetadata {
                total_units,
                analyzed_slices,
                tallies,
            },
        };

        self.apply_override(&mut outcome, results);
        apply_precedence_rules(&mut outcome, results);
        outcome.primary_diagnosis = primary_diagnosis(&outcome.verdicts);

        info!(primary = %outcome.primary_diagnosis, "consensus vote complete");
        outcome
    }

    fn vote_pathology(
        &self,
        pathology: Pathology,
        results: &[UnitResult],
        analyzed_slices: usize,
    ) -> (FinalVerdict, PathologyTally) {
        let profile = thresholds::profile(pathology);
        let total_units = results.len();

        // A present verdict below the vote floor is too weak to vote positive.
        let positive_voters: Vec<&UnitResult> = results
            .iter()
            .filter(|r| {
                r.verdict(pathology)
                    .map(|v| v.present && v.confidence >= POSITIVE_VOTE_MIN_CONFIDENCE)
                    .unwrap_or(false)
            })
            .collect();
        let positive_votes = positive_voters.len();
        let negative_votes = total_units - positive_votes;

        let required_votes = thresholds::required_votes(pathology, total_units, analyzed_slices);

        let mut vote_passed = positive_votes >= required_votes;
        let mut grace_applied = false;
        if !vote_passed && profile.grace_eligible && positive_votes > 0 {
            // Near-miss tolerance for borderline distributed findings; the
            // "at least half" floor keeps one stray positive from passing.
            let within_margin = positive_votes + GRACE_MARGIN_VOTES >= required_votes;
            let at_least_half = positive_votes * 2 >= required_votes;
            if within_margin && at_least_half {
                vote_passed = true;
                grace_applied = true;
                debug!(
                    pathology = %pathology,
                    positive_votes,
                    required_votes,
                    "grace margin applied"
                );
            }
        }

        let average_confidence = if positive_votes == 0 {
            0.0
        } else {
            positive_voters
                .iter()
                .filter_map(|r| r.verdict(pathology))
                .map(|v| v.confidence as f64)
                .sum::<f64>()
                / positive_votes as f64
        };
        let confidence_passed = average_confidence >= profile.confidence_floor;

        let detected = positive_votes > 0 && vote_passed && confidence_passed;

        let confidence = if detected {
            weighted_confidence(&positive_voters, pathology)
        } else {
            0.0
        };

        let evidence = if detected {
            select_positive_evidence(&positive_voters, pathology)
        } else {
            select_negative_evidence(results, pathology)
        };

        debug!(
            pathology = %pathology,
            positive_votes,
            negative_votes,
            required_votes,
            average_confidence,
            detected,
            "pathology vote tallied"
        );

        (
            FinalVerdict {
                pathology,
                detected,
                confidence,
                evidence,
            },
            PathologyTally {
                pathology,
                positive_votes,
                negative_votes,
                required_votes,
                average_confidence,
                confidence_floor: profile.confidence_floor,
                vote_passed,
                confidence_passed,
                grace_applied,
                suppressed_by: None,
            },
        )
    }

    /// The single-batch override hook. Under [`OverridePolicy::Disabled`]
    /// this is a no-op by design: the closed decision is that no single
    /// batch, however confident, may flip the consensus.
    fn apply_override(&self, outcome: &mut ConsensusOutcome, results: &[UnitResult]) {
        match self.override_policy {
            OverridePolicy::Disabled => {}
            OverridePolicy::SingleUnitEmergency { min_confidence } => {
                for pathology in Pathology::ALL {
                    if !thresholds::profile(pathology).emergency
                        || outcome.verdict(pathology).detected
                    {
                        continue;
                    }
                    let best = results
                        .iter()
                        .filter_map(|r| r.verdict(pathology))
                        .filter(|v| v.present && v.confidence >= min_confidence)
                        .max_by_key(|v| v.confidence);
                    if let Some(v) = best {
                        warn!(
                            pathology = %pathology,
                            confidence = v.confidence,
                            "single-unit emergency override forcing detection"
                        );
                        let verdict = outcome.verdict_mut(pathology);
                        verdict.detected = true;
                        verdict.confidence = v.confidence as f64;
                        verdict.evidence = v.evidence.clone();
                    }
                }
            }
        }
    }
}

/// Confidence-weighted average over the positive voters: each batch's
/// confidence weighs its own contribution.
fn weighted_confidence(voters: &[&UnitResult], pathology: Pathology) -> f64 {
    let mut weight_sum = 0.0;
    let mut weighted = 0.0;
    for voter in voters {
        if let Some(v) = voter.verdict(pathology) {
            let c = v.confidence as f64;
            weighted += c * c;
            weight_sum += c;
        }
    }
    if weight_sum == 0.0 {
        0.0
    } else {
        weighted / weight_sum
    }
}

/// Pick the evidence text of the single best positive voter: highest
/// confidence, preferring text that does not read as a negative statement,
/// unit id as the deterministic tie-break.
fn select_positive_evidence(voters: &[&UnitResult], pathology: Pathology) -> String {
    let mut candidates: Vec<(&UnitResult, &crate::verdict::PathologyVerdict)> = voters
        .iter()
        .filter_map(|r| r.verdict(pathology).map(|v| (*r, v)))
        .collect();
    candidates.sort_by(|(ra, va), (rb, vb)| {
        let neg_a = polarity::is_negative_statement(&va.evidence) || va.evidence.trim().is_empty();
        let neg_b = polarity::is_negative_statement(&vb.evidence) || vb.evidence.trim().is_empty();
        neg_a
            .cmp(&neg_b)
            .then_with(|| vb.confidence.cmp(&va.confidence))
            .then_with(|| ra.unit_id.cmp(&rb.unit_id))
    });
    candidates
        .first()
        .map(|(_, v)| v.evidence.clone())
        .unwrap_or_default()
}

/// For a pathology that was not detected, prefer the most confident batch
/// whose text already reads as a negative statement; the consistency
/// validator substitutes a template when no batch provides one.
fn select_negative_evidence(results: &[UnitResult], pathology: Pathology) -> String {
    results
        .iter()
        .filter_map(|r| r.verdict(pathology).map(|v| (r.unit_id, v)))
        .filter(|(_, v)| !v.present && polarity::is_negative_statement(&v.evidence))
        .max_by(|(ida, va), (idb, vb)| {
            va.confidence
                .cmp(&vb.confidence)
                .then_with(|| idb.cmp(ida))
        })
        .map(|(_, v)| v.evidence.clone())
        .unwrap_or_default()
}

/// Mutual-exclusion and precedence rules, applied after the base vote in a
/// fixed order.
fn apply_precedence_rules(outcome: &mut ConsensusOutcome, results: &[UnitResult]) {
    // (a) Pneumonia takes precedence over ILD: the more acute, actionable
    // diagnosis wins when both clear their own thresholds.
    if outcome.verdict(Pathology::Pneumonia).detected
        && outcome.verdict(Pathology::InterstitialLungDisease).detected
    {
        info!("suppressing ILD: pneumonia detected and takes precedence");
        suppress(
            outcome,
            Pathology::InterstitialLungDisease,
            "pneumonia precedence",
        );
    }

    // (b) Pneumothorax vs COPD: when both are detected, bulla-only wording
    // across the pneumothorax votes points to emphysematous bulla instead.
    if outcome.verdict(Pathology::Pneumothorax).detected
        && outcome.verdict(Pathology::Copd).detected
    {
        if let Some(reason) = bulla_suppression_reason(results) {
            info!(%reason, "suppressing pneumothorax");
            suppress(outcome, Pathology::Pneumothorax, &reason);
        }
    }
}

fn suppress(outcome: &mut ConsensusOutcome, pathology: Pathology, reason: &str) {
    let verdict = outcome.verdict_mut(pathology);
    verdict.detected = false;
    verdict.confidence = 0.0;
    verdict.evidence.clear();
    outcome.tally_mut(pathology).suppressed_by = Some(reason.to_string());
}

/// Examine pneumothorax-positive votes for definitive pleural-air language
/// versus bulla-only language.
///
/// Suppress when ≥ 60% of positive votes are bulla-only AND no vote shows
/// definitive language. Any definitive vote keeps pneumothorax regardless
/// of how many bulla votes exist.
fn bulla_suppression_reason(results: &[UnitResult]) -> Option<String> {
    let mut positive = 0usize;
    let mut bulla_only = 0usize;
    let mut definitive = 0usize;

    for result in results {
        let Some(v) = result.verdict(Pathology::Pneumothorax) else {
            continue;
        };
        if !(v.present && v.confidence >= POSITIVE_VOTE_MIN_CONFIDENCE) {
            continue;
        }
        positive += 1;
        let text = format!("{} {}", v.evidence, v.subtype.as_deref().unwrap_or(""));
        if has_definitive_pneumothorax_language(&text) {
            definitive += 1;
        } else if has_bulla_language(&text) {
            bulla_only += 1;
        }
    }

    if positive == 0 || definitive > 0 {
        return None;
    }
    if bulla_only as f64 >= BULLA_SUPPRESSION_FRACTION * positive as f64 {
        Some(format!(
            "bulla pattern: {bulla_only}/{positive} positive votes bulla-only, none definitive"
        ))
    } else {
        None
    }
}

/// Explicit pleural-air, collapse, or separation-measurement phrasing.
fn has_definitive_pneumothorax_language(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    const DEFINITIVE: &[&str] = &[
        "pleural air",
        "air in the pleural space",
        "visceral pleural line",
        "pleural line",
        "lung collapse",
        "collapsed lung",
        "collapse",
        "pleural separation",
    ];
    if DEFINITIVE.iter().any(|p| lower.contains(p)) {
        return true;
    }
    // A measured separation ("2 cm separation", "15 mm pleural gap") is
    // definitive even without the stock phrases.
    let measurement =
        regex::Regex::new(r"\d+(\.\d+)?\s*(mm|cm)").expect("static measurement pattern");
    measurement.is_match(&lower) && (lower.contains("separation") || lower.contains("pleural"))
}

/// Bulla/bleb/loculated-air phrasing suggesting emphysematous bulla.
fn has_bulla_language(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    const BULLA: &[&str] = &["bulla", "bullae", "bullous", "bleb", "blebs", "loculated air"];
    BULLA.iter().any(|p| lower.contains(p))
}

/// Name the top detected pathology by clinical priority, listing additional
/// detections when there are several.
fn primary_diagnosis(verdicts: &[FinalVerdict]) -> String {
    let mut detected: Vec<&FinalVerdict> = verdicts.iter().filter(|v| v.detected).collect();
    detected.sort_by_key(|v| v.pathology.priority());

    match detected.as_slice() {
        [] => "No acute cardiopulmonary abnormality detected".to_string(),
        [only] => only.pathology.display_name().to_string(),
        [first, rest @ ..] => {
            let additional: Vec<&str> = rest.iter().map(|v| v.pathology.display_name()).collect();
            format!(
                "{} (additional findings: {})",
                first.pathology.display_name(),
                additional.join(", ")
            )
        }
    }
}
