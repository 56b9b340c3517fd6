//! Layered configuration for template rescaling.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`HEADFIT_*`, `__` separates nested keys, e.g.
//!    `HEADFIT_REFERENCE__REF_WIDTH`)
//! 2. `./headfit.toml`
//! 3. `~/.config/headfit/config.toml`
//! 4. Built-in defaults
//!
//! Command-line flags are applied on top by the binary.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resample::InterpolationMode;
use crate::scaling::ReferenceGeometry;

/// Template shipped alongside the tool.
pub const DEFAULT_TEMPLATE: &str = "MNI152_T1_1mm.nii.gz";

/// Default root for per-subject outputs.
pub const DEFAULT_OUTPUT_DIR: &str = "./Output/";

/// Default reslice time limit in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[cfg(windows)]
const DEFAULT_RESAMPLER: &str = r"C:\spm\spm-reslice.exe";
#[cfg(not(windows))]
const DEFAULT_RESAMPLER: &str = "/usr/local/bin/spm-reslice";

fn default_template_path() -> PathBuf {
    PathBuf::from(DEFAULT_TEMPLATE)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_resampler_location() -> PathBuf {
    PathBuf::from(DEFAULT_RESAMPLER)
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Which resampling engine to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External program at `resampler_location`.
    #[default]
    Command,
    /// In-process header rewrite (grid unchanged).
    Header,
}

impl std::str::FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "command" => Ok(Self::Command),
            "header" => Ok(Self::Header),
            _ => Err(Error::Configuration(format!(
                "unknown engine: '{}' (expected command or header)",
                s
            ))),
        }
    }
}

/// Options controlling a rescale run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RescaleOptions {
    /// Reference template to rescale.
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,

    /// Root directory for per-subject outputs.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Location of the external reslicing program.
    #[serde(default = "default_resampler_location")]
    pub resampler_location: PathBuf,

    /// Extra leading arguments for the reslicing program.
    #[serde(default)]
    pub resampler_args: Vec<String>,

    /// Engine used to produce the resampled volume.
    #[serde(default)]
    pub engine: EngineKind,

    /// Interpolation for reslicing.
    #[serde(default)]
    pub interpolation: InterpolationMode,

    /// Time limit for one reslice call, in seconds. `0` disables the limit.
    #[serde(default = "default_timeout_secs")]
    pub resample_timeout_secs: u64,

    /// Directory the engine writes into before results are moved; defaults
    /// to the template's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Intrinsic head dimensions of the template.
    #[serde(default)]
    pub reference: ReferenceGeometry,
}

impl Default for RescaleOptions {
    fn default() -> Self {
        Self {
            template_path: default_template_path(),
            output_dir: default_output_dir(),
            resampler_location: default_resampler_location(),
            resampler_args: Vec::new(),
            engine: EngineKind::default(),
            interpolation: InterpolationMode::default(),
            resample_timeout_secs: default_timeout_secs(),
            working_dir: None,
            reference: ReferenceGeometry::default(),
        }
    }
}

impl RescaleOptions {
    /// Load options from config files and the environment.
    pub fn load() -> Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Build the provider chain.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = PathBuf::from("headfit.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("HEADFIT_").split("__"))
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("headfit").join("config.toml"))
    }

    /// Reslice time limit, if any.
    pub fn resample_timeout(&self) -> Option<Duration> {
        (self.resample_timeout_secs > 0).then(|| Duration::from_secs(self.resample_timeout_secs))
    }
}

/// Per-call settings layered over loaded options; `None` keeps the loaded value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionOverrides {
    pub template_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub interpolation: Option<InterpolationMode>,
    pub engine: Option<EngineKind>,
    pub resampler_location: Option<PathBuf>,
    pub resample_timeout_secs: Option<u64>,
}

impl RescaleOptions {
    /// Apply every override that is set.
    pub fn apply_overrides(&mut self, overrides: OptionOverrides) {
        if let Some(path) = overrides.template_path {
            self.template_path = path;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if let Some(interpolation) = overrides.interpolation {
            self.interpolation = interpolation;
        }
        if let Some(engine) = overrides.engine {
            self.engine = engine;
        }
        if let Some(location) = overrides.resampler_location {
            self.resampler_location = location;
        }
        if let Some(secs) = overrides.resample_timeout_secs {
            self.resample_timeout_secs = secs;
        }
    }
}
