//! Slice interestingness scoring from raw byte statistics.
//!
//! Higher local intensity variance correlates with anatomy boundaries and
//! focal abnormalities, so high-variance slices are batched more tightly.
//! The score is used for *ranking only*; it makes no pathology claim.

/// Population variance of the payload's byte intensities.
///
/// Deterministic, side-effect free, and always finite; unreadable (empty)
/// input scores 0.0 rather than erroring.
pub fn score(payload: &[u8]) -> f64 {
    if payload.is_empty() {
        return 0.0;
    }
    let n = payload.len() as f64;
    let mean = payload.iter().map(|&b| b as f64).sum::<f64>() / n;
    let variance = payload
        .iter()
        .map(|&b| {
            let d = b as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    if variance.is_finite() {
        variance
    } else {
        0.0
    }
}
