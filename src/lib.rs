//! # headfit
//!
//! Rescale a reference brain template (MNI152 by default) to fit an
//! individual head, given three tape measurements in centimetres.
//!
//! The pipeline for one subject:
//!
//! 1. [`measurements::validate`] checks width, depth and height.
//! 2. [`scaling::compute`] turns them into per-axis scale factors against
//!    the template's [`ReferenceGeometry`].
//! 3. [`Affine::apply_scaling`] composes the factors with the template
//!    affine.
//! 4. A [`VolumeResampler`] reslices the template under the new affine.
//! 5. [`organize::organize`] moves the result to
//!    `output_dir/<subject>/<subject>_<template file name>`.
//!
//! ```no_run
//! use headfit::{rescale_template, MeasurementInput, RescaleOptions};
//!
//! let options = RescaleOptions::load()?;
//! let factors = rescale_template("sub001", MeasurementInput::new(14.5, 19.2, 13.8), &options)?;
//! println!("{factors}");
//! # Ok::<(), headfit::Error>(())
//! ```

#![warn(missing_debug_implementations)]

pub mod affine;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod measurements;
pub mod nifti;
pub mod organize;
pub mod pipeline;
pub mod resample;
pub mod scaling;
pub mod volume;

#[cfg(feature = "python")]
mod python;

pub use affine::Affine;
pub use batch::{run_batch, BatchEntry, BatchResult, FailurePolicy, JobOutcome};
pub use config::{EngineKind, RescaleOptions};
pub use engine::{CommandEngine, HeaderRewriteEngine};
pub use error::{Error, Result};
pub use measurements::{HeadMeasurements, MeasurementInput};
pub use organize::OutputArtifact;
pub use pipeline::{rescale_template, JobReport, JobState, RescaleJob, Rescaler};
pub use resample::{InterpolationMode, ResampleOrchestrator, ResliceRequest, VolumeResampler};
pub use scaling::{ReferenceGeometry, ScalingFactors};
pub use volume::{NiftiTemplateLoader, TemplateLoader, VolumeHandle};
