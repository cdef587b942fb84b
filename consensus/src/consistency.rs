//! Final consistency pass: evidence text must agree with the voted boolean.
//!
//! Evidence selection and boolean voting can draw on different batches, so a
//! detected pathology can end up carrying text that reads as a negative (or
//! vice versa). This pass auto-corrects any mismatch by substituting a
//! polarity-correct template sentence and logs the correction for audit.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pathology::Pathology;
use crate::polarity;
use crate::verdict::FinalVerdict;

/// One auto-correction applied by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub pathology: Pathology,
    pub detected: bool,
    pub original: String,
    pub replacement: String,
}

/// Template sentence for a detected pathology with unusable evidence.
pub fn positive_template(pathology: Pathology) -> String {
    format!(
        "Imaging features consistent with {} identified on consolidated review of the analyzed batches.",
        pathology.display_name().to_lowercase()
    )
}

/// Template sentence for an excluded pathology.
pub fn negative_template(pathology: Pathology) -> String {
    format!(
        "No evidence of {} on the analyzed series.",
        pathology.display_name().to_lowercase()
    )
}

/// Validate and auto-correct evidence polarity for every verdict.
///
/// - `detected == true` requires non-negative, non-empty evidence;
/// - `detected == false` requires evidence phrased as a negative.
///
/// Returns the corrections applied, in verdict order.
pub fn validate_verdicts(verdicts: &mut [FinalVerdict]) -> Vec<Correction> {
    let mut corrections = Vec::new();

    for verdict in verdicts.iter_mut() {
        let negative = polarity::is_negative_statement(&verdict.evidence);
        let empty = verdict.evidence.trim().is_empty();

        let replacement = if verdict.detected && (negative || empty) {
            Some(positive_template(verdict.pathology))
        } else if !verdict.detected && !negative {
            Some(negative_template(verdict.pathology))
        } else {
            None
        };

        if let Some(replacement) = replacement {
            warn!(
                pathology = %verdict.pathology,
                detected = verdict.detected,
                original = %verdict.evidence,
                "evidence polarity disagreed with verdict; substituting template"
            );
            corrections.push(Correction {
                pathology: verdict.pathology,
                detected: verdict.detected,
                original: std::mem::replace(&mut verdict.evidence, replacement.clone()),
                replacement,
            });
        }
    }

    corrections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(pathology: Pathology, detected: bool, evidence: &str) -> FinalVerdict {
        FinalVerdict {
            pathology,
            detected,
            confidence: if detected { 85.0 } else { 0.0 },
            evidence: evidence.to_string(),
        }
    }

    #[test]
    fn detected_with_negative_evidence_is_rewritten() {
        let mut verdicts = vec![verdict(
            Pathology::Pneumothorax,
            true,
            "No findings of pneumothorax on the reviewed slices.",
        )];
        let corrections = validate_verdicts(&mut verdicts);
        assert_eq!(corrections.len(), 1);
        assert!(!polarity::is_negative_statement(&verdicts[0].evidence));
        assert!(verdicts[0].evidence.contains("pneumothorax"));
    }

    #[test]
    fn detected_with_empty_evidence_is_rewritten() {
        let mut verdicts = vec![verdict(Pathology::LungMass, true, "")];
        let corrections = validate_verdicts(&mut verdicts);
        assert_eq!(corrections.len(), 1);
        assert!(!verdicts[0].evidence.is_empty());
    }

    #[test]
    fn excluded_with_positive_evidence_is_rewritten() {
        let mut verdicts = vec![verdict(
            Pathology::Pneumonia,
            false,
            "Dense right lower lobe consolidation observed.",
        )];
        let corrections = validate_verdicts(&mut verdicts);
        assert_eq!(corrections.len(), 1);
        assert!(polarity::is_negative_statement(&verdicts[0].evidence));
    }

    #[test]
    fn consistent_verdicts_are_untouched() {
        let mut verdicts = vec![
            verdict(
                Pathology::Pneumonia,
                true,
                "Lobar consolidation with air bronchograms.",
            ),
            verdict(Pathology::Copd, false, "No evidence of emphysema detected."),
        ];
        let corrections = validate_verdicts(&mut verdicts);
        assert!(corrections.is_empty());
        assert_eq!(
            verdicts[0].evidence,
            "Lobar consolidation with air bronchograms."
        );
    }

    #[test]
    fn corrections_record_the_original_text() {
        let original = "No findings suggestive of tuberculosis.";
        let mut verdicts = vec![verdict(Pathology::Tuberculosis, true, original)];
        let corrections = validate_verdicts(&mut verdicts);
        assert_eq!(corrections[0].original, original);
        assert_eq!(corrections[0].replacement, verdicts[0].evidence);
    }

    #[test]
    fn templates_have_correct_polarity_for_all_pathologies() {
        for p in Pathology::ALL {
            assert!(
                !polarity::is_negative_statement(&positive_template(p)),
                "positive template for {p} reads negative"
            );
            assert!(
                polarity::is_negative_statement(&negative_template(p)),
                "negative template for {p} reads positive"
            );
        }
    }
}
