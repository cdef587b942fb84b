//! The canonical eight-pathology set and its clinical priority ordering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of pathologies every batch verdict must cover.
///
/// Every `UnitResult` reports all eight; an inference response that omits one
/// is treated as "unknown" upstream, never as a silent negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pathology {
    PulmonaryEmbolism,
    Pneumothorax,
    LungMass,
    Tuberculosis,
    Pneumonia,
    InterstitialLungDisease,
    Copd,
    PleuralEffusion,
}

impl Pathology {
    /// All pathologies in clinical priority order (most acute first).
    pub const ALL: [Pathology; 8] = [
        Pathology::PulmonaryEmbolism,
        Pathology::Pneumothorax,
        Pathology::LungMass,
        Pathology::Tuberculosis,
        Pathology::Pneumonia,
        Pathology::InterstitialLungDisease,
        Pathology::Copd,
        Pathology::PleuralEffusion,
    ];

    /// Stable wire/report key for this pathology.
    pub fn key(self) -> &'static str {
        match self {
            Self::PulmonaryEmbolism => "pulmonary_embolism",
            Self::Pneumothorax => "pneumothorax",
            Self::LungMass => "lung_mass",
            Self::Tuberculosis => "tuberculosis",
            Self::Pneumonia => "pneumonia",
            Self::InterstitialLungDisease => "interstitial_lung_disease",
            Self::Copd => "copd",
            Self::PleuralEffusion => "pleural_effusion",
        }
    }

    /// Human-readable name used in reports and evidence templates.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::PulmonaryEmbolism => "Pulmonary embolism",
            Self::Pneumothorax => "Pneumothorax",
            Self::LungMass => "Lung mass",
            Self::Tuberculosis => "Tuberculosis",
            Self::Pneumonia => "Pneumonia",
            Self::InterstitialLungDisease => "Interstitial lung disease",
            Self::Copd => "COPD/Emphysema",
            Self::PleuralEffusion => "Pleural effusion",
        }
    }

    /// Clinical priority rank, 0 = most acute. Drives primary-diagnosis
    /// ordering: embolism > pneumothorax > mass > TB > pneumonia > ILD >
    /// COPD > pleural effusion.
    pub fn priority(self) -> u8 {
        match self {
            Self::PulmonaryEmbolism => 0,
            Self::Pneumothorax => 1,
            Self::LungMass => 2,
            Self::Tuberculosis => 3,
            Self::Pneumonia => 4,
            Self::InterstitialLungDisease => 5,
            Self::Copd => 6,
            Self::PleuralEffusion => 7,
        }
    }

    /// Tolerant parse of model-emitted keys ("COPD", "pleural effusion",
    /// "pulmonary-embolism", ...). Returns `None` for unrecognized names.
    pub fn from_key(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let norm = norm.trim_matches('_');
        match norm {
            "pulmonary_embolism" | "embolism" | "pe" => Some(Self::PulmonaryEmbolism),
            "pneumothorax" | "ptx" => Some(Self::Pneumothorax),
            "lung_mass" | "mass" | "lung_cancer" | "nodule_mass" => Some(Self::LungMass),
            "tuberculosis" | "tb" => Some(Self::Tuberculosis),
            "pneumonia" => Some(Self::Pneumonia),
            "interstitial_lung_disease" | "ild" => Some(Self::InterstitialLungDisease),
            "copd" | "emphysema" | "copd_emphysema" => Some(Self::Copd),
            "pleural_effusion" | "effusion" => Some(Self::PleuralEffusion),
            _ => None,
        }
    }
}

impl fmt::Display for Pathology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_has_eight_unique_entries() {
        let mut keys: Vec<&str> = Pathology::ALL.iter().map(|p| p.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn all_is_priority_ordered() {
        for pair in Pathology::ALL.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn from_key_accepts_aliases() {
        assert_eq!(Pathology::from_key("COPD"), Some(Pathology::Copd));
        assert_eq!(Pathology::from_key("emphysema"), Some(Pathology::Copd));
        assert_eq!(
            Pathology::from_key("Pleural Effusion"),
            Some(Pathology::PleuralEffusion)
        );
        assert_eq!(
            Pathology::from_key("pulmonary-embolism"),
            Some(Pathology::PulmonaryEmbolism)
        );
        assert_eq!(Pathology::from_key("ILD"), Some(Pathology::InterstitialLungDisease));
        assert_eq!(Pathology::from_key("gibberish"), None);
    }

    #[test]
    fn key_round_trips() {
        for p in Pathology::ALL {
            assert_eq!(Pathology::from_key(p.key()), Some(p));
        }
    }
}
