//! Per-pathology decision thresholds.
//!
//! One flat table consulted uniformly by the two-phase protocol and the
//! voting engine. Keeping the numbers here (instead of branching per
//! pathology inside the loops) makes the tuning auditable and the voting
//! loop generic.
//!
//! The numbers encode clinical sensitivity tuning, not first-principles
//! derivations: focal findings that may appear on few slices (pneumothorax)
//! carry a low vote requirement, diffuse chronic findings (COPD) a high one;
//! emergency pathologies get a stricter confidence floor and no grace margin.

use crate::pathology::Pathology;

/// Decision parameters for one pathology.
#[derive(Debug, Clone, Copy)]
pub struct PathologyProfile {
    pub pathology: Pathology,
    /// Screening confidence below this forces a confirmation call (0..=100).
    pub screen_threshold: u8,
    /// Fraction of total units that must vote positive (0.0..=1.0).
    pub required_vote_pct: f64,
    /// Minimum average confidence among positive voters (0..=100).
    pub confidence_floor: f64,
    /// Whether the near-threshold grace margin may apply.
    pub grace_eligible: bool,
    /// Emergency pathologies: stricter floor, never any grace margin.
    pub emergency: bool,
}

/// A batch verdict only counts as a positive vote at or above this
/// confidence; weaker positives are treated as too noisy to vote.
pub const POSITIVE_VOTE_MIN_CONFIDENCE: u8 = 70;

/// Vote-count tolerance for grace-margin acceptance (routine pathologies).
pub const GRACE_MARGIN_VOTES: usize = 5;

/// Studies below this many analyzed slices get relaxed vote requirements.
pub const SMALL_STUDY_SLICES: usize = 80;

static PROFILES: [PathologyProfile; 8] = [
    PathologyProfile {
        pathology: Pathology::PulmonaryEmbolism,
        screen_threshold: 85,
        required_vote_pct: 0.15,
        confidence_floor: 80.0,
        grace_eligible: false,
        emergency: true,
    },
    PathologyProfile {
        pathology: Pathology::Pneumothorax,
        screen_threshold: 85,
        required_vote_pct: 0.10,
        confidence_floor: 80.0,
        grace_eligible: false,
        emergency: true,
    },
    PathologyProfile {
        pathology: Pathology::LungMass,
        screen_threshold: 85,
        required_vote_pct: 0.15,
        confidence_floor: 75.0,
        grace_eligible: true,
        emergency: false,
    },
    PathologyProfile {
        pathology: Pathology::Tuberculosis,
        screen_threshold: 85,
        required_vote_pct: 0.20,
        confidence_floor: 75.0,
        grace_eligible: true,
        emergency: false,
    },
    PathologyProfile {
        pathology: Pathology::Pneumonia,
        screen_threshold: 88,
        required_vote_pct: 0.25,
        confidence_floor: 75.0,
        grace_eligible: true,
        emergency: false,
    },
    PathologyProfile {
        pathology: Pathology::InterstitialLungDisease,
        screen_threshold: 90,
        required_vote_pct: 0.30,
        confidence_floor: 75.0,
        grace_eligible: true,
        emergency: false,
    },
    PathologyProfile {
        pathology: Pathology::Copd,
        screen_threshold: 90,
        required_vote_pct: 0.40,
        confidence_floor: 75.0,
        grace_eligible: true,
        emergency: false,
    },
    PathologyProfile {
        pathology: Pathology::PleuralEffusion,
        screen_threshold: 88,
        required_vote_pct: 0.20,
        confidence_floor: 80.0,
        grace_eligible: false,
        emergency: true,
    },
];

/// Look up the decision profile for a pathology.
pub fn profile(pathology: Pathology) -> &'static PathologyProfile {
    PROFILES
        .iter()
        .find(|p| p.pathology == pathology)
        .expect("profile table covers all pathologies")
}

/// Required positive-vote count for a pathology given study size.
///
/// Small studies (< [`SMALL_STUDY_SLICES`] analyzed slices) halve the
/// requirement; a genuinely single-unit study has a floor of exactly 1.
pub fn required_votes(pathology: Pathology, total_units: usize, analyzed_slices: usize) -> usize {
    let pct = profile(pathology).required_vote_pct;
    let mut required = (pct * total_units as f64).ceil() as usize;
    required = required.max(1);
    if analyzed_slices < SMALL_STUDY_SLICES {
        required = required.div_ceil(2);
    }
    if total_units <= 1 {
        required = 1;
    }
    required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pathology_has_a_profile() {
        for p in Pathology::ALL {
            assert_eq!(profile(p).pathology, p);
        }
    }

    #[test]
    fn emergency_pathologies_have_no_grace_and_strict_floor() {
        for p in Pathology::ALL {
            let prof = profile(p);
            if prof.emergency {
                assert!(!prof.grace_eligible, "{p} must not be grace-eligible");
                assert_eq!(prof.confidence_floor, 80.0);
            } else {
                assert_eq!(prof.confidence_floor, 75.0);
            }
        }
    }

    #[test]
    fn focal_findings_need_fewer_votes_than_diffuse() {
        assert!(
            profile(Pathology::Pneumothorax).required_vote_pct
                < profile(Pathology::Copd).required_vote_pct
        );
    }

    #[test]
    fn required_votes_scales_with_units() {
        // 30% of 10 units = 3
        assert_eq!(required_votes(Pathology::InterstitialLungDisease, 10, 200), 3);
        // 40% of 10 units = 4
        assert_eq!(required_votes(Pathology::Copd, 10, 200), 4);
    }

    #[test]
    fn small_study_relaxes_requirement() {
        let full = required_votes(Pathology::Copd, 10, 200);
        let relaxed = required_votes(Pathology::Copd, 10, 40);
        assert!(relaxed < full);
        assert!(relaxed >= 1);
    }

    #[test]
    fn single_unit_study_floors_at_one() {
        for p in Pathology::ALL {
            assert_eq!(required_votes(p, 1, 12), 1);
        }
    }
}
