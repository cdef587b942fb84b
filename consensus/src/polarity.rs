//! Token-window negation detection for evidence text.
//!
//! One isolated, pure classifier shared by the voting engine (evidence
//! selection) and the consistency validator (final polarity check), instead
//! of inline regex scattered through the voting loop.
//!
//! A sentence reads as *negative* when a negation cue ("no", "without",
//! "negative", ...) is followed within a short token window by a finding
//! term ("evidence", "consolidation", "effusion", ...), or when a standalone
//! absence cue ("absent", "unremarkable") appears. Degrade annotations like
//! "[not confirmed — budget constraint]" deliberately do not flip polarity:
//! "confirmed" is not a finding term.

/// Tokens that open a negation scope.
const NEGATION_CUES: &[&str] = &["no", "not", "without", "negative", "free", "denies", "excludes"];

/// Standalone cues that make a statement negative on their own.
const ABSENCE_CUES: &[&str] = &["absent", "unremarkable"];

/// Terms a negation cue must reach within [`WINDOW`] tokens to count.
const FINDING_TERMS: &[&str] = &[
    "evidence",
    "finding",
    "findings",
    "sign",
    "signs",
    "feature",
    "features",
    "abnormality",
    "abnormalities",
    "detected",
    "identified",
    "seen",
    "visualized",
    "observed",
    "demonstrated",
    "pneumothorax",
    "embolism",
    "embolus",
    "effusion",
    "effusions",
    "consolidation",
    "consolidations",
    "mass",
    "masses",
    "nodule",
    "nodules",
    "opacity",
    "opacities",
    "fibrosis",
    "emphysema",
    "cavitation",
    "pneumonia",
    "tuberculosis",
    "disease",
    "thickening",
    "infiltrate",
    "infiltrates",
];

/// How many tokens after a negation cue a finding term may appear.
const WINDOW: usize = 4;

/// Classify whether `text` is phrased as a negative statement
/// ("No evidence of pneumothorax", "pleural spaces unremarkable", ...).
///
/// Empty text is *not* negative; it is simply unclassifiable.
pub fn is_negative_statement(text: &str) -> bool {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        if ABSENCE_CUES.contains(&token.as_str()) {
            return true;
        }
        if NEGATION_CUES.contains(&token.as_str()) {
            let end = (i + 1 + WINDOW).min(tokens.len());
            if tokens[i + 1..end]
                .iter()
                .any(|t| FINDING_TERMS.contains(&t.as_str()))
            {
                return true;
            }
        }
    }
    false
}
