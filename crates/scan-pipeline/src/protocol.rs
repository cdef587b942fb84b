//! Two-phase screen/confirm decision protocol for one unit.
//!
//! State machine per pathology within one unit:
//! `Screened → { Final, PendingConfirm }`.
//!
//! A confident negative screen is accepted as final without further spend.
//! Anything else (a positive screen, a negative too uncertain to trust,
//! thin evidence, or a missing verdict) goes into a single consolidated
//! confirmation call, so one unit costs at most two inference calls no
//! matter how many pathologies need confirming.
//!
//! Budget exhaustion and confirmation failure both degrade in place: the
//! screen verdict is reused with its confidence capped and an annotation
//! appended. The degrade path never errors; it always yields a usable
//! `UnitResult`.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use consensus::pathology::Pathology;
use consensus::planner::Unit;
use consensus::thresholds;
use consensus::verdict::{PathologyVerdict, Provenance, UnitResult};

use crate::budget::{estimate_usage, BudgetLedger, CallTier};
use crate::client::{ConfirmReason, ConfirmRequest, InferenceClient};
use crate::config::PipelineConfig;
use crate::error::AnalysisError;

/// Synthetic confidence assigned when the screen omitted a pathology.
/// Low enough that the verdict can never pass as a trusted negative.
pub const SYNTHETIC_MISSING_CONFIDENCE: u8 = 30;

const BUDGET_NOTE: &str = "not confirmed — budget constraint";
const ESCALATION_NOTE: &str = "not confirmed — escalation failed";
const INCOMPLETE_NOTE: &str = "not confirmed — missing from confirmation response";

/// Run one unit through the two-phase protocol.
///
/// Errors out only on screen failure (retried by the executor) or when the
/// budget cannot cover even the cheap screen call; every confirmation
/// problem degrades into a usable result instead.
pub async fn run_unit(
    unit: &Unit,
    images: &[Vec<u8>],
    client: &dyn InferenceClient,
    ledger: &dyn BudgetLedger,
    config: &PipelineConfig,
) -> Result<UnitResult, AnalysisError> {
    let screen_estimate = estimate_usage(CallTier::Screen, images.len());
    if !ledger.can_afford(CallTier::Screen, screen_estimate) {
        return Err(AnalysisError::BudgetExhausted {
            remaining_usd: ledger.remaining(),
        });
    }

    let screen = client.screen(images).await?;
    ledger.record(CallTier::Screen, screen.usage);

    let mut verdicts: HashMap<Pathology, PathologyVerdict> = HashMap::new();
    let mut provenance: HashMap<Pathology, Provenance> = HashMap::new();
    let mut pending: Vec<ConfirmRequest> = Vec::new();

    for pathology in Pathology::ALL {
        match screen.verdicts.get(&pathology) {
            Some(verdict) => {
                let reason = confirm_reason(verdict, config);
                match reason {
                    Some(reason) => pending.push(ConfirmRequest {
                        pathology,
                        screen_confidence: verdict.confidence,
                        reason,
                    }),
                    None => {
                        verdicts.insert(pathology, verdict.clone());
                        provenance.insert(pathology, Provenance::ScreenedFinal);
                    }
                }
            }
            // An absent screen result is never a silent negative.
            None => pending.push(ConfirmRequest {
                pathology,
                screen_confidence: SYNTHETIC_MISSING_CONFIDENCE,
                reason: ConfirmReason::MissingVerdict,
            }),
        }
    }

    if !pending.is_empty() {
        resolve_pending(
            unit,
            &pending,
            images,
            &screen.verdicts,
            &mut verdicts,
            &mut provenance,
            client,
            ledger,
            config,
        )
        .await;
    }

    debug_assert!(Pathology::ALL.iter().all(|p| verdicts.contains_key(p)));
    debug!(
        unit_id = unit.id,
        confirmed = pending.len(),
        "unit analysis complete"
    );

    Ok(UnitResult::new(
        unit.id,
        unit.slice_indices.clone(),
        verdicts,
        provenance,
    ))
}

/// Whether a screen verdict needs confirmation, and why.
///
/// Any positive screen, or any result too uncertain to trust as a negative,
/// must be confirmed; only a confident, well-evidenced negative is final.
fn confirm_reason(verdict: &PathologyVerdict, config: &PipelineConfig) -> Option<ConfirmReason> {
    if verdict.present {
        Some(ConfirmReason::PositiveScreen)
    } else if verdict.confidence < thresholds::profile(verdict.pathology).screen_threshold {
        Some(ConfirmReason::LowConfidence)
    } else if verdict.evidence.trim().len() < config.min_evidence_len {
        Some(ConfirmReason::ThinEvidence)
    } else {
        None
    }
}

/// Settle all pending pathologies with one confirmation call, degrading in
/// place when the budget is short or the call fails.
#[allow(clippy::too_many_arguments)]
async fn resolve_pending(
    unit: &Unit,
    pending: &[ConfirmRequest],
    images: &[Vec<u8>],
    screen_verdicts: &HashMap<Pathology, PathologyVerdict>,
    verdicts: &mut HashMap<Pathology, PathologyVerdict>,
    provenance: &mut HashMap<Pathology, Provenance>,
    client: &dyn InferenceClient,
    ledger: &dyn BudgetLedger,
    config: &PipelineConfig,
) {
    let estimate = estimate_usage(CallTier::Confirm, images.len());
    if !ledger.can_afford(CallTier::Confirm, estimate) {
        info!(
            unit_id = unit.id,
            pending = pending.len(),
            remaining_usd = ledger.remaining(),
            "budget cannot cover confirmation; degrading to screen verdicts"
        );
        degrade_all(pending, screen_verdicts, verdicts, provenance, config, BUDGET_NOTE);
        return;
    }

    match client.confirm(pending, images).await {
        Ok(outcome) => {
            ledger.record(CallTier::Confirm, outcome.usage);
            if !outcome.succeeded && outcome.verdicts.is_empty() {
                warn!(unit_id = unit.id, "confirmation returned nothing usable");
                degrade_all(
                    pending,
                    screen_verdicts,
                    verdicts,
                    provenance,
                    config,
                    ESCALATION_NOTE,
                );
                return;
            }
            for request in pending {
                match outcome.verdicts.get(&request.pathology) {
                    Some(confirmed) => {
                        verdicts.insert(request.pathology, confirmed.clone());
                        provenance.insert(request.pathology, Provenance::Confirmed);
                    }
                    None => {
                        // Partial response: missing pathologies degrade
                        // individually, confirmed ones stand.
                        degrade_one(
                            request.pathology,
                            screen_verdicts.get(&request.pathology),
                            verdicts,
                            provenance,
                            config,
                            INCOMPLETE_NOTE,
                        );
                    }
                }
            }
        }
        Err(e) => {
            warn!(
                unit_id = unit.id,
                error = %e,
                "confirmation call failed; degrading to screen verdicts"
            );
            degrade_all(
                pending,
                screen_verdicts,
                verdicts,
                provenance,
                config,
                ESCALATION_NOTE,
            );
        }
    }
}

fn degrade_all(
    pending: &[ConfirmRequest],
    screen_verdicts: &HashMap<Pathology, PathologyVerdict>,
    verdicts: &mut HashMap<Pathology, PathologyVerdict>,
    provenance: &mut HashMap<Pathology, Provenance>,
    config: &PipelineConfig,
    note: &str,
) {
    for request in pending {
        degrade_one(
            request.pathology,
            screen_verdicts.get(&request.pathology),
            verdicts,
            provenance,
            config,
            note,
        );
    }
}

/// Reuse the screen verdict with capped confidence and an annotation; when
/// the screen had nothing for this pathology, record a conservative unknown.
fn degrade_one(
    pathology: Pathology,
    screen_verdict: Option<&PathologyVerdict>,
    verdicts: &mut HashMap<Pathology, PathologyVerdict>,
    provenance: &mut HashMap<Pathology, Provenance>,
    config: &PipelineConfig,
    note: &str,
) {
    let verdict = match screen_verdict {
        Some(v) => {
            let mut degraded = v.clone();
            degraded.cap_confidence(config.degrade_confidence_cap);
            degraded.evidence = if degraded.evidence.trim().is_empty() {
                format!("[{note}]")
            } else {
                format!("{} [{note}]", degraded.evidence)
            };
            degraded
        }
        None => {
            let mut unknown = PathologyVerdict::unknown(pathology);
            unknown.confidence = SYNTHETIC_MISSING_CONFIDENCE;
            unknown.evidence = format!("[{note}]");
            unknown
        }
    };
    verdicts.insert(pathology, verdict);
    provenance.insert(pathology, Provenance::Degraded);
}
