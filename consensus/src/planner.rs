//! Variance-aware batch planning.
//!
//! Slices are ranked by variance (descending, original index as the stable
//! tie-break) and the top 60% tagged `Dense`: likely-abnormal anatomy that
//! should stay in small, precisely-localizable batches. The planner then
//! walks the slices once in *original* order, closing a batch whenever the
//! dense/sparse tag flips or the current batch hits its target size.
//!
//! The output units' concatenated slice indices always reproduce the input
//! order exactly: nothing dropped, nothing duplicated. Pure and
//! deterministic: no network, no clock.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::variance;

/// One CT slice in anatomical order. Immutable once created from input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    /// Position in the original series; anatomically meaningful.
    pub index: usize,
    /// Opaque image bytes (already normalized upstream).
    pub payload: Vec<u8>,
    pub filename: String,
}

/// Variance class of a batch: dense batches cover likely-abnormal anatomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceClass {
    Dense,
    Sparse,
}

/// One batch of slices submitted together to the inference client.
/// Never mutated after planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: usize,
    /// Ordered original slice indices.
    pub slice_indices: Vec<usize>,
    pub variance_class: VarianceClass,
}

/// Target batch size for dense (likely abnormal) runs; small batches keep
/// abnormal regions precisely localizable.
pub const DENSE_TARGET: usize = 10;

/// Target batch size for sparse runs; one call covers more anatomy.
pub const SPARSE_TARGET: usize = 20;

/// Fraction of slices tagged dense, by variance rank.
pub const DENSE_FRACTION: f64 = 0.60;

/// Partition an ordered slice sequence into batches.
pub fn plan_units(slices: &[Slice]) -> Vec<Unit> {
    if slices.is_empty() {
        return Vec::new();
    }

    let dense = dense_indices(slices);

    let mut units = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_class = class_of(slices[0].index, &dense);

    for slice in slices {
        let class = class_of(slice.index, &dense);
        if class != current_class && !current.is_empty() {
            close_unit(&mut units, &mut current, current_class);
        }
        current_class = class;
        current.push(slice.index);
        if current.len() >= target_for(class) {
            close_unit(&mut units, &mut current, class);
        }
    }
    if !current.is_empty() {
        close_unit(&mut units, &mut current, current_class);
    }
    units
}

/// Slice indices in the top [`DENSE_FRACTION`] by variance.
///
/// Equal variance always orders by original index; the ranking must be
/// reproducible run to run.
fn dense_indices(slices: &[Slice]) -> HashSet<usize> {
    let mut ranked: Vec<(usize, f64)> = slices
        .iter()
        .map(|s| (s.index, variance::score(&s.payload)))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let dense_count = (slices.len() as f64 * DENSE_FRACTION).ceil() as usize;
    ranked.into_iter().take(dense_count).map(|(i, _)| i).collect()
}

fn class_of(index: usize, dense: &HashSet<usize>) -> VarianceClass {
    if dense.contains(&index) {
        VarianceClass::Dense
    } else {
        VarianceClass::Sparse
    }
}

fn target_for(class: VarianceClass) -> usize {
    match class {
        VarianceClass::Dense => DENSE_TARGET,
        VarianceClass::Sparse => SPARSE_TARGET,
    }
}

fn close_unit(units: &mut Vec<Unit>, current: &mut Vec<usize>, class: VarianceClass) {
    units.push(Unit {
        id: units.len(),
        slice_indices: std::mem::take(current),
        variance_class: class,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(index: usize, payload: Vec<u8>) -> Slice {
        Slice {
            index,
            payload,
            filename: format!("slice_{index:04}.png"),
        }
    }

    /// Slices alternating between flat (low variance) and noisy payloads.
    fn mixed_series(count: usize) -> Vec<Slice> {
        (0..count)
            .map(|i| {
                let payload = if i % 3 == 0 {
                    (0..512).map(|j| ((j * 7 + i) % 256) as u8).collect()
                } else {
                    vec![64u8; 512]
                };
                slice(i, payload)
            })
            .collect()
    }

    fn assert_reconstructs(slices: &[Slice], units: &[Unit]) {
        let flattened: Vec<usize> = units
            .iter()
            .flat_map(|u| u.slice_indices.iter().copied())
            .collect();
        let original: Vec<usize> = slices.iter().map(|s| s.index).collect();
        assert_eq!(flattened, original);
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(plan_units(&[]).is_empty());
    }

    #[test]
    fn concatenation_reproduces_original_order() {
        for count in [1, 7, 10, 31, 95, 300, 421] {
            let slices = mixed_series(count);
            let units = plan_units(&slices);
            assert_reconstructs(&slices, &units);
        }
    }

    #[test]
    fn batch_sizes_respect_targets() {
        let slices = mixed_series(400);
        for unit in plan_units(&slices) {
            let target = match unit.variance_class {
                VarianceClass::Dense => DENSE_TARGET,
                VarianceClass::Sparse => SPARSE_TARGET,
            };
            assert!(!unit.slice_indices.is_empty());
            assert!(unit.slice_indices.len() <= target);
        }
    }

    #[test]
    fn unit_ids_are_sequential() {
        let slices = mixed_series(120);
        for (i, unit) in plan_units(&slices).iter().enumerate() {
            assert_eq!(unit.id, i);
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let slices = mixed_series(150);
        let a = plan_units(&slices);
        let b = plan_units(&slices);
        assert_eq!(a.len(), b.len());
        for (ua, ub) in a.iter().zip(&b) {
            assert_eq!(ua.slice_indices, ub.slice_indices);
            assert_eq!(ua.variance_class, ub.variance_class);
        }
    }

    #[test]
    fn equal_variance_ties_break_by_index() {
        // All payloads identical: ranking must fall back to index order, so
        // the dense set is exactly the first 60% of indices.
        let slices: Vec<Slice> = (0..10).map(|i| slice(i, vec![50u8; 256])).collect();
        let units = plan_units(&slices);
        assert_reconstructs(&slices, &units);
        // ceil(10 * 0.6) = 6 dense slices, then 4 sparse
        assert_eq!(units[0].variance_class, VarianceClass::Dense);
        let dense_total: usize = units
            .iter()
            .filter(|u| u.variance_class == VarianceClass::Dense)
            .map(|u| u.slice_indices.len())
            .sum();
        assert_eq!(dense_total, 6);
    }

    #[test]
    fn single_slice_yields_single_unit() {
        let slices = vec![slice(0, vec![1, 2, 3, 4])];
        let units = plan_units(&slices);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].slice_indices, vec![0]);
    }

    #[test]
    fn class_flip_closes_batch() {
        let slices = mixed_series(60);
        let units = plan_units(&slices);
        // Adjacent units never share a class unless the earlier one was
        // closed by hitting its size target.
        for pair in units.windows(2) {
            if pair[0].variance_class == pair[1].variance_class {
                let target = match pair[0].variance_class {
                    VarianceClass::Dense => DENSE_TARGET,
                    VarianceClass::Sparse => SPARSE_TARGET,
                };
                assert_eq!(pair[0].slice_indices.len(), target);
            }
        }
    }
}
