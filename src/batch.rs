//! Parallel rescaling of many subjects.
//!
//! Jobs run on the rayon pool. Jobs sharing a template are serialized
//! through the resample and organize steps; everything before that runs
//! concurrently.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::RescaleOptions;
use crate::error::{Error, Result};
use crate::measurements::MeasurementInput;
use crate::pipeline::{JobReport, RescaleJob, Rescaler, TemplateLocks};

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchEntry {
    /// Subject identifier; must be unique within the manifest.
    pub subject_id: String,
    /// Width, depth and height, given inline in the row.
    #[serde(flatten)]
    pub measurements: MeasurementInput,
}

/// Read a JSON manifest: an array of `{subject_id, width, depth, height}`.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<BatchEntry>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Input(format!("invalid manifest {}: {e}", path.display())))
}

/// What to do with remaining jobs after one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Jobs not yet started are skipped.
    #[default]
    Abort,
    /// Every job runs.
    Continue,
}

/// Outcome of one manifest entry.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job finished and its artifact is in place.
    Done(JobReport),
    /// The job stopped on this error.
    Failed(Error),
    /// Not run because an earlier job failed under [`FailurePolicy::Abort`].
    Skipped,
}

/// Per-entry outcomes, in manifest order.
#[derive(Debug)]
pub struct BatchResult {
    /// Subject identifier and outcome for each manifest row.
    pub outcomes: Vec<(String, JobOutcome)>,
}

impl BatchResult {
    /// Number of completed jobs.
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Done(_)))
    }

    /// Number of jobs that stopped on an error.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }

    /// Number of jobs never started.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped))
    }

    /// True when every entry completed.
    pub fn is_success(&self) -> bool {
        self.succeeded() == self.outcomes.len()
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Rescale every entry with `rescaler`.
///
/// Repeated subject identifiers would write to the same output path, so
/// every occurrence after the first fails with [`Error::Input`].
pub fn run_batch(
    rescaler: &Rescaler,
    entries: &[BatchEntry],
    options: &RescaleOptions,
    policy: FailurePolicy,
) -> BatchResult {
    let rescaler = rescaler
        .clone()
        .with_template_locks(Arc::new(TemplateLocks::default()));

    let mut seen = HashSet::new();
    let duplicate: Vec<bool> = entries
        .iter()
        .map(|entry| !seen.insert(entry.subject_id.as_str()))
        .collect();

    let aborted = AtomicBool::new(false);
    tracing::info!(jobs = entries.len(), ?policy, "starting batch");

    let outcomes = entries
        .par_iter()
        .zip(duplicate.par_iter())
        .map(|(entry, &duplicate)| {
            if policy == FailurePolicy::Abort && aborted.load(Ordering::Acquire) {
                return (entry.subject_id.clone(), JobOutcome::Skipped);
            }

            let outcome = if duplicate {
                Err(Error::Input(format!(
                    "duplicate subject identifier '{}'",
                    entry.subject_id
                )))
            } else {
                let job = RescaleJob::new(&entry.subject_id, entry.measurements, options);
                rescaler.run(&job)
            };

            let outcome = match outcome {
                Ok(report) => JobOutcome::Done(report),
                Err(e) => {
                    aborted.store(true, Ordering::Release);
                    JobOutcome::Failed(e)
                }
            };
            (entry.subject_id.clone(), outcome)
        })
        .collect::<Vec<_>>();

    let result = BatchResult { outcomes };
    tracing::info!(
        succeeded = result.succeeded(),
        failed = result.failed(),
        skipped = result.skipped(),
        "batch finished"
    );
    result
}
