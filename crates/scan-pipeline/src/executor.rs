//! Bounded-concurrency execution of unit analyses.
//!
//! One task per unit under a semaphore whose size adapts to the scan's slice
//! count. Each unit attempt is wrapped in a wall-clock timeout and retried
//! with exponential backoff plus random jitter; rate-limit and timeout
//! failures get an extra fixed delay before the next attempt. A unit that
//! exhausts its retries is recorded as failed; it never aborts sibling
//! units. After all units finish, the scan proceeds only if enough of them
//! succeeded.
//!
//! Tasks share nothing mutable except the index-addressed result slots
//! (owned by the collector) and the concurrency-safe budget ledger.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use consensus::planner::{Slice, Unit};
use consensus::verdict::UnitResult;

use crate::budget::BudgetLedger;
use crate::client::InferenceClient;
use crate::config::PipelineConfig;
use crate::error::AnalysisError;
use crate::protocol;

/// All surviving unit results, ordered by unit id.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub results: Vec<UnitResult>,
    pub total_units: usize,
    pub succeeded_units: usize,
}

/// Run every unit's two-phase protocol under bounded concurrency.
///
/// Fails only when fewer than `min_success_rate` of units succeed; partial
/// failure below that bar is tolerated and the successes are returned.
pub async fn execute_units(
    units: &[Unit],
    slices: &[Slice],
    client: Arc<dyn InferenceClient>,
    ledger: Arc<dyn BudgetLedger>,
    config: Arc<PipelineConfig>,
) -> Result<ExecutionOutcome, AnalysisError> {
    if units.is_empty() {
        return Err(AnalysisError::Configuration(
            "no units to execute: empty batch plan".into(),
        ));
    }

    let permits = config.concurrency_for(slices.len());
    info!(
        units = units.len(),
        slices = slices.len(),
        permits,
        "executing batch plan"
    );

    let semaphore = Arc::new(Semaphore::new(permits));
    let mut join_set: JoinSet<(usize, Option<UnitResult>)> = JoinSet::new();

    for unit in units {
        let unit = unit.clone();
        let images: Vec<Vec<u8>> = unit
            .slice_indices
            .iter()
            .map(|&i| slices[i].payload.clone())
            .collect();
        let semaphore = semaphore.clone();
        let client = client.clone();
        let ledger = ledger.clone();
        let config = config.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let unit_id = unit.id;
            let result = run_with_retry(&unit, &images, &*client, &*ledger, &config).await;
            (unit_id, result)
        });
    }

    // Completion order is unconstrained; key everything by unit id.
    let mut slots: Vec<Option<UnitResult>> = vec![None; units.len()];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((unit_id, result)) => slots[unit_id] = result,
            Err(e) => {
                // Panic in a unit task: its slot stays failed, siblings
                // continue.
                warn!(error = %e, "unit task panicked");
            }
        }
    }

    let total_units = units.len();
    let succeeded_units = slots.iter().filter(|s| s.is_some()).count();
    let success_rate = succeeded_units as f64 / total_units as f64;
    info!(
        succeeded = succeeded_units,
        total = total_units,
        success_rate = format!("{:.0}%", success_rate * 100.0),
        "batch execution finished"
    );

    if success_rate < config.min_success_rate {
        return Err(AnalysisError::InsufficientUnits {
            succeeded: succeeded_units,
            total: total_units,
            min_success_pct: (config.min_success_rate * 100.0).round() as u8,
        });
    }

    Ok(ExecutionOutcome {
        results: slots.into_iter().flatten().collect(),
        total_units,
        succeeded_units,
    })
}

/// One unit's attempt loop: timeout per attempt, retry on retriable errors
/// with backoff, `None` once retries are exhausted.
async fn run_with_retry(
    unit: &Unit,
    images: &[Vec<u8>],
    client: &dyn InferenceClient,
    ledger: &dyn BudgetLedger,
    config: &PipelineConfig,
) -> Option<UnitResult> {
    for attempt in 0..=config.max_retries {
        let outcome = tokio::time::timeout(
            config.unit_timeout,
            protocol::run_unit(unit, images, client, ledger, config),
        )
        .await;

        let error = match outcome {
            Ok(Ok(result)) => {
                debug!(unit_id = unit.id, attempt, "unit succeeded");
                return Some(result);
            }
            Ok(Err(e)) => e,
            // The late response, if any, is abandoned with the attempt.
            Err(_) => AnalysisError::UnitTimeout {
                unit_id: unit.id,
                elapsed_secs: config.unit_timeout.as_secs(),
            },
        };

        if !error.is_retriable() || attempt == config.max_retries {
            warn!(
                unit_id = unit.id,
                attempt,
                error = %error,
                "unit failed permanently"
            );
            return None;
        }

        let delay = backoff_delay(attempt, &error, config);
        warn!(
            unit_id = unit.id,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            category = %error.retry_category(),
            error = %error,
            "unit attempt failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }
    None
}

/// Exponential backoff doubling per attempt, capped, with random jitter;
/// timeout/rate-limit categories add a fixed extra delay.
fn backoff_delay(attempt: u32, error: &AnalysisError, config: &PipelineConfig) -> Duration {
    let exponential = config
        .backoff_base
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(config.backoff_cap);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    let extra = error.retry_category().extra_backoff().unwrap_or_default();
    exponential + jitter + extra
}
