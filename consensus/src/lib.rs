//! Deterministic core for multi-slice CT pathology consensus.
//!
//! This library holds everything in the analysis pipeline that can be
//! computed without touching the network:
//! - `variance` / `planner`: slice interestingness scoring and variance-aware
//!   batch planning
//! - `thresholds`: the per-pathology decision table (screen thresholds, vote
//!   requirements, confidence floors, emergency flags)
//! - `voting`: the weighted, threshold-based consensus engine that reconciles
//!   per-batch verdicts into one final answer per pathology
//! - `polarity`: token-window negation detection for evidence text
//! - `consistency`: the final pass that forces evidence text to agree with
//!   the voted booleans
//!
//! All of it is pure and unit-testable; the async orchestration lives in the
//! `scan-pipeline` crate.

pub mod consistency;
pub mod pathology;
pub mod planner;
pub mod polarity;
pub mod thresholds;
pub mod variance;
pub mod verdict;
pub mod voting;

pub use consistency::{validate_verdicts, Correction};
pub use pathology::Pathology;
pub use planner::{plan_units, Slice, Unit, VarianceClass};
pub use thresholds::{profile, PathologyProfile};
pub use verdict::{FinalVerdict, PathologyVerdict, Provenance, UnitResult, VotingMetadata};
pub use voting::{ConsensusEngine, ConsensusOutcome, OverridePolicy};
