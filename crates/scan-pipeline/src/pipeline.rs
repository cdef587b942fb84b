//! Top-level scan analysis: plan → execute → vote → validate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use consensus::consistency::{self, Correction};
use consensus::planner::{self, Slice};
use consensus::verdict::{FinalVerdict, VotingMetadata};
use consensus::voting::ConsensusEngine;

use crate::budget::BudgetLedger;
use crate::client::InferenceClient;
use crate::config::PipelineConfig;
use crate::error::AnalysisError;
use crate::executor;

/// The complete result of one scan analysis, ready for report rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ScanAnalysis {
    pub scan_id: Uuid,
    pub completed_at: DateTime<Utc>,
    /// One verdict per pathology, clinical priority order.
    pub verdicts: Vec<FinalVerdict>,
    pub primary_diagnosis: String,
    /// Full tally and thresholds for audit.
    pub voting_metadata: VotingMetadata,
    pub total_units: usize,
    pub succeeded_units: usize,
    pub analyzed_slices: usize,
    pub spent_usd: f64,
    /// Polarity corrections applied by the consistency validator.
    pub corrections: Vec<Correction>,
}

/// Analyze one scan end to end.
///
/// Slices must arrive in anatomical order with `index` equal to their
/// position in the sequence; that ordering is preserved through batching,
/// voting, and the final metadata.
pub async fn analyze_scan(
    slices: Vec<Slice>,
    client: Arc<dyn InferenceClient>,
    ledger: Arc<dyn BudgetLedger>,
    config: PipelineConfig,
) -> Result<ScanAnalysis, AnalysisError> {
    if slices.is_empty() {
        return Err(AnalysisError::Configuration("scan has no slices".into()));
    }
    if slices.iter().enumerate().any(|(i, s)| s.index != i) {
        return Err(AnalysisError::Configuration(
            "slice indices must match their sequence position".into(),
        ));
    }

    let scan_id = Uuid::new_v4();
    let analyzed_slices = slices.len();
    let budget_at_start = ledger.remaining();

    let units = planner::plan_units(&slices);
    info!(
        %scan_id,
        slices = analyzed_slices,
        units = units.len(),
        budget_usd = budget_at_start,
        "scan analysis starting"
    );

    let config = Arc::new(config);
    let execution =
        executor::execute_units(&units, &slices, client, ledger.clone(), config.clone()).await?;

    let engine = ConsensusEngine::with_override_policy(config.override_policy);
    let mut outcome = engine.vote(&execution.results, analyzed_slices);
    let corrections = consistency::validate_verdicts(&mut outcome.verdicts);

    let spent_usd = (budget_at_start - ledger.remaining()).max(0.0);
    info!(
        %scan_id,
        primary = %outcome.primary_diagnosis,
        spent_usd,
        corrections = corrections.len(),
        "scan analysis complete"
    );

    Ok(ScanAnalysis {
        scan_id,
        completed_at: Utc::now(),
        verdicts: outcome.verdicts,
        primary_diagnosis: outcome.primary_diagnosis,
        voting_metadata: outcome.metadata,
        total_units: execution.total_units,
        succeeded_units: execution.succeeded_units,
        analyzed_slices,
        spent_usd,
        corrections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;

    use consensus::pathology::Pathology;
    use consensus::verdict::PathologyVerdict;

    use crate::budget::{CallTier, MeteredLedger, Usage};
    use crate::client::{ConfirmOutcome, ConfirmRequest, ScreenOutcome};

    /// Affords every screen but never a confirmation, so every positive
    /// screen takes the degrade path deterministically.
    struct ScreenOnlyLedger;

    impl crate::budget::BudgetLedger for ScreenOnlyLedger {
        fn can_afford(&self, tier: CallTier, _estimated: Usage) -> bool {
            tier == CallTier::Screen
        }

        fn record(&self, _tier: CallTier, _actual: Usage) -> f64 {
            0.0
        }

        fn remaining(&self) -> f64 {
            1.0
        }
    }

    /// Reports pneumonia on every batch, everything else confidently clear.
    struct PneumoniaEverywhere;

    fn verdict(pathology: Pathology, present: bool, confidence: u8, evidence: &str) -> PathologyVerdict {
        PathologyVerdict {
            pathology,
            present,
            confidence,
            subtype: None,
            evidence: evidence.into(),
            contradicting: String::new(),
        }
    }

    fn screen_verdicts() -> HashMap<Pathology, PathologyVerdict> {
        let mut verdicts: HashMap<Pathology, PathologyVerdict> = Pathology::ALL
            .iter()
            .map(|&p| {
                (
                    p,
                    verdict(p, false, 95, &format!("No evidence of {} detected.", p.key())),
                )
            })
            .collect();
        verdicts.insert(
            Pathology::Pneumonia,
            verdict(Pathology::Pneumonia, true, 90, "Consolidation observed."),
        );
        verdicts
    }

    #[async_trait]
    impl InferenceClient for PneumoniaEverywhere {
        async fn screen(&self, _images: &[Vec<u8>]) -> Result<ScreenOutcome, AnalysisError> {
            Ok(ScreenOutcome {
                verdicts: screen_verdicts(),
                usage: Usage {
                    prompt_tokens: 10_000,
                    cached_tokens: 0,
                    completion_tokens: 800,
                },
            })
        }

        async fn confirm(
            &self,
            requests: &[ConfirmRequest],
            _images: &[Vec<u8>],
        ) -> Result<ConfirmOutcome, AnalysisError> {
            let verdicts = requests
                .iter()
                .map(|r| {
                    (
                        r.pathology,
                        verdict(
                            r.pathology,
                            r.pathology == Pathology::Pneumonia,
                            88,
                            if r.pathology == Pathology::Pneumonia {
                                "Confirmed lobar consolidation with air bronchograms."
                            } else {
                                "No evidence of this finding detected."
                            },
                        ),
                    )
                })
                .collect();
            Ok(ConfirmOutcome {
                verdicts,
                usage: Usage {
                    prompt_tokens: 12_000,
                    cached_tokens: 0,
                    completion_tokens: 1_200,
                },
                succeeded: true,
            })
        }
    }

    fn test_slices(count: usize) -> Vec<Slice> {
        (0..count)
            .map(|i| Slice {
                index: i,
                payload: (0..256).map(|j| ((i * 17 + j * 5) % 256) as u8).collect(),
                filename: format!("slice_{i:04}.png"),
            })
            .collect()
    }

    #[tokio::test]
    async fn end_to_end_detects_distributed_pneumonia() {
        let analysis = analyze_scan(
            test_slices(120),
            Arc::new(PneumoniaEverywhere),
            Arc::new(MeteredLedger::new(10.0)),
            PipelineConfig::default(),
        )
        .await
        .unwrap();

        let pneumonia = analysis
            .verdicts
            .iter()
            .find(|v| v.pathology == Pathology::Pneumonia)
            .unwrap();
        assert!(pneumonia.detected);
        assert_eq!(analysis.primary_diagnosis, "Pneumonia");
        assert_eq!(analysis.analyzed_slices, 120);
        assert_eq!(analysis.succeeded_units, analysis.total_units);
        assert!(analysis.spent_usd > 0.0);
        // All eight pathologies reported, with full audit tallies.
        assert_eq!(analysis.verdicts.len(), 8);
        assert_eq!(analysis.voting_metadata.tallies.len(), 8);
    }

    #[tokio::test]
    async fn exhausted_budget_degrades_but_still_completes() {
        // Budget covers the cheap screens but never a confirmation.
        let analysis = analyze_scan(
            test_slices(60),
            Arc::new(PneumoniaEverywhere),
            Arc::new(ScreenOnlyLedger),
            PipelineConfig::default(),
        )
        .await
        .unwrap();

        let pneumonia = analysis
            .verdicts
            .iter()
            .find(|v| v.pathology == Pathology::Pneumonia)
            .unwrap();
        // Screen said present at 90; degrade caps at 80, still a valid vote.
        assert!(pneumonia.detected);
        assert!(pneumonia.confidence <= 80.0);
        assert_eq!(analysis.succeeded_units, analysis.total_units);
    }

    #[tokio::test]
    async fn empty_scan_is_rejected() {
        let err = analyze_scan(
            Vec::new(),
            Arc::new(PneumoniaEverywhere),
            Arc::new(MeteredLedger::new(1.0)),
            PipelineConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[tokio::test]
    async fn misindexed_slices_are_rejected() {
        let mut slices = test_slices(5);
        slices[2].index = 7;
        let err = analyze_scan(
            slices,
            Arc::new(PneumoniaEverywhere),
            Arc::new(MeteredLedger::new(1.0)),
            PipelineConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[tokio::test]
    async fn report_serializes_to_json() {
        let analysis = analyze_scan(
            test_slices(30),
            Arc::new(PneumoniaEverywhere),
            Arc::new(MeteredLedger::new(10.0)),
            PipelineConfig::default(),
        )
        .await
        .unwrap();
        let json = serde_json::to_string_pretty(&analysis).unwrap();
        assert!(json.contains("primary_diagnosis"));
        assert!(json.contains("voting_metadata"));
    }
}
