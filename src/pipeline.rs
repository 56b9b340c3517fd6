//! Per-subject rescaling pipeline.
//!
//! A [`RescaleJob`] moves through
//! `Pending → Validated → Scaled → Transformed → Resampled → Organized → Done`,
//! or into `Failed` from any step. Inputs are validated before any file is
//! touched, so a rejected job leaves nothing behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::affine::Affine;
use crate::config::{EngineKind, RescaleOptions};
use crate::engine::{CommandEngine, HeaderRewriteEngine};
use crate::error::{Error, Result};
use crate::measurements::{self, HeadMeasurements, MeasurementInput};
use crate::organize::{self, OutputArtifact};
use crate::resample::{InterpolationMode, ResampleOrchestrator, VolumeResampler};
use crate::scaling::{self, ReferenceGeometry, ScalingFactors};
use crate::volume::{NiftiTemplateLoader, TemplateLoader};

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Not started.
    Pending,
    /// Measurements accepted.
    Validated,
    /// Scale factors computed.
    Scaled,
    /// Affine composed.
    Transformed,
    /// Engine wrote its output.
    Resampled,
    /// Output moved under the subject directory.
    Organized,
    /// Finished.
    Done,
    /// Stopped on an error.
    Failed,
}

/// One subject's unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleJob {
    /// Subject identifier; names the output directory and file prefix.
    pub subject_id: String,
    /// Raw measurements.
    pub measurements: MeasurementInput,
    /// Template to rescale.
    pub template_path: PathBuf,
    /// Root for per-subject outputs.
    pub output_dir: PathBuf,
    /// Interpolation for reslicing.
    pub interpolation: InterpolationMode,
}

impl RescaleJob {
    /// Job for `subject_id` using the template, output root and
    /// interpolation from `options`.
    pub fn new(
        subject_id: impl Into<String>,
        measurements: MeasurementInput,
        options: &RescaleOptions,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            measurements,
            template_path: options.template_path.clone(),
            output_dir: options.output_dir.clone(),
            interpolation: options.interpolation,
        }
    }

    /// Check the subject identifier and measurements without touching disk.
    pub fn validate(&self) -> Result<HeadMeasurements> {
        validate_subject_id(&self.subject_id)?;
        measurements::validate(&self.measurements)
    }
}

/// Reject identifiers that cannot name a single directory.
fn validate_subject_id(subject_id: &str) -> Result<()> {
    if subject_id.trim().is_empty() {
        return Err(Error::Input("subject identifier is empty".into()));
    }
    let mut components = Path::new(subject_id).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if !single_normal || subject_id.contains(['/', '\\']) {
        return Err(Error::Input(format!(
            "subject identifier '{}' must be a single path component",
            subject_id
        )));
    }
    Ok(())
}

/// Result of a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Subject identifier.
    pub subject_id: String,
    /// Scale factors applied.
    pub factors: ScalingFactors,
    /// Composed voxel-to-world affine, row-major.
    pub affine: [[f64; 4]; 4],
    /// Where the resampled volume ended up.
    pub artifact: OutputArtifact,
}

/// Serializes the resample and organize steps per template.
///
/// Engines write into a shared working directory before the result is
/// moved away, so two jobs on the same template must not overlap there.
#[derive(Debug, Default)]
pub struct TemplateLocks {
    locks: std::sync::Mutex<std::collections::HashMap<PathBuf, Arc<std::sync::Mutex<()>>>>,
}

impl TemplateLocks {
    /// Lock shared by every job using `template`.
    pub fn lock_for(&self, template: &Path) -> Arc<std::sync::Mutex<()>> {
        let key = std::fs::canonicalize(template).unwrap_or_else(|_| template.to_path_buf());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

/// Runs jobs against an injected template loader and resampling engine.
#[derive(Clone)]
pub struct Rescaler {
    loader: Arc<dyn TemplateLoader>,
    orchestrator: ResampleOrchestrator,
    reference: ReferenceGeometry,
    locks: Option<Arc<TemplateLocks>>,
}

impl std::fmt::Debug for Rescaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rescaler")
            .field("orchestrator", &self.orchestrator)
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

impl Rescaler {
    /// Rescaler using NIfTI templates and the given orchestrator.
    pub fn new(orchestrator: ResampleOrchestrator) -> Self {
        Self {
            loader: Arc::new(NiftiTemplateLoader),
            orchestrator,
            reference: ReferenceGeometry::MNI,
            locks: None,
        }
    }

    /// Build the engine and orchestrator described by `options`.
    ///
    /// Fails with [`Error::Configuration`] when the external engine cannot
    /// be found.
    pub fn from_options(options: &RescaleOptions) -> Result<Self> {
        let engine: Arc<dyn VolumeResampler> = match options.engine {
            EngineKind::Header => {
                let mut engine = HeaderRewriteEngine::new();
                if let Some(dir) = &options.working_dir {
                    engine = engine.with_working_dir(dir);
                }
                Arc::new(engine)
            }
            EngineKind::Command => {
                let mut engine = CommandEngine::locate(&options.resampler_location)?
                    .with_args(options.resampler_args.iter().cloned());
                if let Some(dir) = &options.working_dir {
                    engine = engine.with_working_dir(dir);
                }
                Arc::new(engine)
            }
        };

        let mut orchestrator = ResampleOrchestrator::new(engine);
        if let Some(timeout) = options.resample_timeout() {
            orchestrator = orchestrator.with_timeout(timeout);
        }
        Ok(Self::new(orchestrator).with_reference(options.reference))
    }

    /// Use a different template loader.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn TemplateLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Use different template dimensions.
    #[must_use]
    pub fn with_reference(mut self, reference: ReferenceGeometry) -> Self {
        self.reference = reference;
        self
    }

    /// Serialize resampling per template through `locks`.
    #[must_use]
    pub fn with_template_locks(mut self, locks: Arc<TemplateLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Template dimensions in use.
    pub fn reference(&self) -> &ReferenceGeometry {
        &self.reference
    }

    /// Run `job` from start to finish.
    pub fn run(&self, job: &RescaleJob) -> Result<JobReport> {
        let mut tracker = JobTracker::new(&job.subject_id);
        let result = self.run_tracked(job, &mut tracker);
        if let Err(e) = &result {
            tracker.fail(e);
        }
        result
    }

    fn run_tracked(&self, job: &RescaleJob, tracker: &mut JobTracker<'_>) -> Result<JobReport> {
        let measurements = job.validate()?;
        tracker.advance(JobState::Validated);

        let factors = scaling::compute(&measurements, &self.reference)?;
        tracker.advance(JobState::Scaled);
        tracing::info!(
            subject = %job.subject_id,
            fx = factors.fx,
            fy = factors.fy,
            fz = factors.fz,
            "computed scale factors"
        );

        let volume = self.loader.open(&job.template_path)?;
        let affine: Affine = volume.affine().apply_scaling(&factors)?;
        tracker.advance(JobState::Transformed);
        tracing::debug!(subject = %job.subject_id, "composed affine:\n{affine}");

        let artifact = {
            let lock = self
                .locks
                .as_ref()
                .map(|locks| locks.lock_for(&job.template_path));
            let _guard = lock
                .as_ref()
                .map(|l| l.lock().unwrap_or_else(std::sync::PoisonError::into_inner));

            let prefix = format!("{}_", job.subject_id);
            let produced =
                self.orchestrator
                    .resample(&volume, &affine, job.interpolation, &prefix)?;
            tracker.advance(JobState::Resampled);

            organize::organize(&job.subject_id, &job.output_dir, &produced)?
        };
        tracker.advance(JobState::Organized);

        tracker.advance(JobState::Done);
        tracing::info!(
            subject = %job.subject_id,
            factors = %factors,
            output = %artifact.path.display(),
            "template rescaled"
        );

        Ok(JobReport {
            subject_id: job.subject_id.clone(),
            factors,
            affine: affine.into_rows(),
            artifact,
        })
    }
}

struct JobTracker<'a> {
    subject_id: &'a str,
    state: JobState,
}

impl<'a> JobTracker<'a> {
    fn new(subject_id: &'a str) -> Self {
        Self {
            subject_id,
            state: JobState::Pending,
        }
    }

    fn advance(&mut self, next: JobState) {
        tracing::debug!(subject = %self.subject_id, from = ?self.state, to = ?next, "job state");
        self.state = next;
    }

    fn fail(&mut self, error: &Error) {
        if error.is_recoverable() {
            tracing::warn!(subject = %self.subject_id, at = ?self.state, %error, "job failed (recoverable)");
        } else {
            tracing::error!(subject = %self.subject_id, at = ?self.state, %error, "job failed");
        }
        self.state = JobState::Failed;
    }
}

/// Rescale the configured template for one subject.
///
/// Measurements are validated before the engine is located or any file is
/// read. On success the resampled template is at
/// `output_dir/subject_id/subject_id_<template file name>`.
pub fn rescale_template(
    subject_id: &str,
    measurements: MeasurementInput,
    options: &RescaleOptions,
) -> Result<ScalingFactors> {
    let job = RescaleJob::new(subject_id, measurements, options);
    job.validate()?;
    let report = Rescaler::from_options(options)?.run(&job)?;
    Ok(report.factors)
}
