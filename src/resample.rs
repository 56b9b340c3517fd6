//! Hand-off of a composed affine to a resampling engine.
//!
//! The interpolation itself happens behind [`VolumeResampler`]. Engines write
//! their result into their own working directory as
//! `<prefix><template file name>`; [`ResampleOrchestrator::resample`] returns
//! that path so the caller can collect the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::volume::VolumeHandle;

/// Interpolation used when reslicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    /// Nearest neighbour.
    Nearest,
    /// Trilinear.
    #[default]
    Linear,
    /// 2nd-degree B-spline.
    Spline,
}

impl InterpolationMode {
    /// Numeric code understood by the engine.
    pub const fn code(self) -> u8 {
        match self {
            Self::Nearest => 0,
            Self::Linear => 1,
            Self::Spline => 2,
        }
    }

    /// Lower-case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
            Self::Spline => "spline",
        }
    }
}

impl std::fmt::Display for InterpolationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InterpolationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" | "trilinear" => Ok(Self::Linear),
            "spline" => Ok(Self::Spline),
            _ => Err(Error::Configuration(format!(
                "unknown interpolation mode: '{}' (expected nearest, linear or spline)",
                s
            ))),
        }
    }
}

/// Which images the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResliceWhich {
    /// Reslice the whole volume.
    #[default]
    FullVolume,
}

impl ResliceWhich {
    /// Numeric code understood by the engine.
    pub const fn code(self) -> u8 {
        match self {
            Self::FullVolume => 1,
        }
    }
}

/// A single reslice request.
#[derive(Debug, Clone)]
pub struct ResliceRequest {
    /// Template being resliced.
    pub volume: VolumeHandle,
    /// Composed voxel-to-world affine.
    pub affine: Affine,
    /// Interpolation to use.
    pub interpolation: InterpolationMode,
    /// Images to write.
    pub which: ResliceWhich,
    /// Whether to also write a mean image. Always `false` for rescaling.
    pub mean: bool,
    /// Prefix prepended to the template file name, e.g. `sub001_`.
    pub prefix: String,
    /// Directory the engine writes into.
    pub working_dir: PathBuf,
    /// Time the engine may take.
    pub timeout: Option<Duration>,
}

impl ResliceRequest {
    /// Name of the file the engine is expected to produce.
    pub fn output_name(&self) -> Result<String> {
        Ok(format!("{}{}", self.prefix, self.volume.base_name()?))
    }

    /// Full path of the file the engine is expected to produce.
    pub fn output_path(&self) -> Result<PathBuf> {
        Ok(self.working_dir.join(self.output_name()?))
    }
}

/// An engine that reslices a volume under a new affine.
pub trait VolumeResampler: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Directory the engine writes results into for `volume`.
    fn working_dir(&self, volume: &VolumeHandle) -> PathBuf;

    /// Perform the reslice, writing [`ResliceRequest::output_path`].
    ///
    /// Must not return while work it started is still writing. Engines that
    /// can stop their work stop it once `request.timeout` has elapsed and
    /// return [`Error::EngineTimeout`].
    fn reslice(&self, request: &ResliceRequest) -> Result<()>;
}

/// Issues reslice requests to an injected engine under a timeout.
///
/// The engine runs on the calling thread, so any lock the caller holds
/// stays held until the engine has stopped. A reslice that overruns its
/// timeout is reported as [`Error::EngineTimeout`] and whatever it wrote is
/// discarded.
#[derive(Clone)]
pub struct ResampleOrchestrator {
    engine: Arc<dyn VolumeResampler>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ResampleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResampleOrchestrator")
            .field("engine", &self.engine.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ResampleOrchestrator {
    /// Orchestrator for `engine` with no time limit.
    pub fn new(engine: Arc<dyn VolumeResampler>) -> Self {
        Self {
            engine,
            timeout: None,
        }
    }

    /// Fail requests that take longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The injected engine.
    pub fn engine(&self) -> &Arc<dyn VolumeResampler> {
        &self.engine
    }

    /// Reslice `volume` under `affine` and return where the result should be.
    ///
    /// The returned path is not checked for existence; collecting the file
    /// is the caller's job.
    pub fn resample(
        &self,
        volume: &VolumeHandle,
        affine: &Affine,
        interpolation: InterpolationMode,
        output_prefix: &str,
    ) -> Result<PathBuf> {
        let request = ResliceRequest {
            volume: volume.clone(),
            affine: *affine,
            interpolation,
            which: ResliceWhich::FullVolume,
            mean: false,
            prefix: output_prefix.to_string(),
            working_dir: self.engine.working_dir(volume),
            timeout: self.timeout,
        };
        let expected = request.output_path()?;

        tracing::debug!(
            engine = self.engine.name(),
            interpolation = interpolation.code(),
            prefix = output_prefix,
            template = %volume.path().display(),
            "issuing reslice request"
        );

        let started = Instant::now();
        let result = self.engine.reslice(&request);
        let elapsed = started.elapsed();
        let overran = self.timeout.filter(|limit| elapsed > *limit);

        match (result, overran) {
            (Err(Error::EngineTimeout(limit)), _) | (Ok(()), Some(limit)) => {
                tracing::warn!(
                    engine = self.engine.name(),
                    timeout = ?limit,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "reslice did not finish in time"
                );
                discard_output(&expected)?;
                return Err(Error::EngineTimeout(limit));
            }
            (Err(e), _) => return Err(e),
            (Ok(()), None) => {}
        }

        tracing::debug!(
            engine = self.engine.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            output = %expected.display(),
            "reslice finished"
        );
        Ok(expected)
    }
}

/// Remove output written by a reslice that is no longer wanted.
fn discard_output(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "discarded late reslice output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Directory a template lives in, used as the default engine working directory.
pub fn template_dir(volume: &VolumeHandle) -> PathBuf {
    volume
        .path()
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::NiftiHeader;
    use std::sync::Mutex;

    struct Recording {
        dir: PathBuf,
        delay: Duration,
        seen: Mutex<Vec<(u8, u8, bool, String)>>,
        fail: bool,
    }

    impl Recording {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                dir: PathBuf::from("/work"),
                delay,
                seen: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl VolumeResampler for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn working_dir(&self, _volume: &VolumeHandle) -> PathBuf {
            self.dir.clone()
        }

        fn reslice(&self, request: &ResliceRequest) -> Result<()> {
            std::thread::sleep(self.delay);
            self.seen.lock().unwrap().push((
                request.interpolation.code(),
                request.which.code(),
                request.mean,
                request.prefix.clone(),
            ));
            if self.fail {
                return Err(Error::ExternalEngine("exit status 3".into()));
            }
            Ok(())
        }
    }

    fn volume() -> VolumeHandle {
        VolumeHandle::new("/templates/MNI152_T1_1mm.nii.gz", NiftiHeader::default())
    }

    #[test]
    fn test_interpolation_codes() {
        assert_eq!(InterpolationMode::Nearest.code(), 0);
        assert_eq!(InterpolationMode::Linear.code(), 1);
        assert_eq!(InterpolationMode::Spline.code(), 2);
        assert_eq!(InterpolationMode::default(), InterpolationMode::Linear);
    }

    #[test]
    fn test_interpolation_parse() {
        assert_eq!(
            "Spline".parse::<InterpolationMode>().unwrap(),
            InterpolationMode::Spline
        );
        assert!(matches!(
            "cubic".parse::<InterpolationMode>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_request_contents_and_expected_path() {
        let engine = Arc::new(Recording::new(Duration::ZERO, false));
        let orchestrator = ResampleOrchestrator::new(engine.clone());

        let out = orchestrator
            .resample(
                &volume(),
                &Affine::IDENTITY,
                InterpolationMode::Spline,
                "sub001_",
            )
            .unwrap();

        assert_eq!(out, PathBuf::from("/work/sub001_MNI152_T1_1mm.nii.gz"));
        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(2, 1, false, "sub001_".to_string())]);
    }

    #[test]
    fn test_engine_failure_propagates() {
        let orchestrator =
            ResampleOrchestrator::new(Arc::new(Recording::new(Duration::ZERO, true)))
                .with_timeout(Duration::from_secs(5));
        let err = orchestrator
            .resample(&volume(), &Affine::IDENTITY, InterpolationMode::Linear, "s_")
            .unwrap_err();
        assert!(matches!(err, Error::ExternalEngine(_)));
    }

    /// Writes its output only after `delay`.
    struct Slow {
        dir: PathBuf,
        delay: Duration,
    }

    impl VolumeResampler for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn working_dir(&self, _volume: &VolumeHandle) -> PathBuf {
            self.dir.clone()
        }

        fn reslice(&self, request: &ResliceRequest) -> Result<()> {
            std::thread::sleep(self.delay);
            std::fs::write(request.output_path()?, b"late")?;
            Ok(())
        }
    }

    #[test]
    fn test_timeout_discards_late_output() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Slow {
            dir: dir.path().to_path_buf(),
            delay: Duration::from_millis(200),
        };
        let orchestrator =
            ResampleOrchestrator::new(Arc::new(engine)).with_timeout(Duration::from_millis(20));

        let err = orchestrator
            .resample(&volume(), &Affine::IDENTITY, InterpolationMode::Linear, "s_")
            .unwrap_err();

        assert!(matches!(err, Error::EngineTimeout(_)));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_timeout_reported_by_engine() {
        let err = ResampleOrchestrator::new(Arc::new(TimesOut))
            .resample(&volume(), &Affine::IDENTITY, InterpolationMode::Linear, "s_")
            .unwrap_err();
        assert!(matches!(err, Error::EngineTimeout(d) if d == Duration::from_secs(1)));
    }

    struct TimesOut;

    impl VolumeResampler for TimesOut {
        fn name(&self) -> &str {
            "times-out"
        }

        fn working_dir(&self, volume: &VolumeHandle) -> PathBuf {
            template_dir(volume)
        }

        fn reslice(&self, _request: &ResliceRequest) -> Result<()> {
            Err(Error::EngineTimeout(Duration::from_secs(1)))
        }
    }

    #[test]
    fn test_timeout_passed_to_engine() {
        struct Check;

        impl VolumeResampler for Check {
            fn name(&self) -> &str {
                "check"
            }

            fn working_dir(&self, volume: &VolumeHandle) -> PathBuf {
                template_dir(volume)
            }

            fn reslice(&self, request: &ResliceRequest) -> Result<()> {
                assert_eq!(request.timeout, Some(Duration::from_secs(30)));
                Ok(())
            }
        }

        ResampleOrchestrator::new(Arc::new(Check))
            .with_timeout(Duration::from_secs(30))
            .resample(&volume(), &Affine::IDENTITY, InterpolationMode::Linear, "s_")
            .unwrap();
    }

    #[test]
    fn test_template_dir() {
        assert_eq!(template_dir(&volume()), PathBuf::from("/templates"));
        let bare = VolumeHandle::new("MNI.nii", NiftiHeader::default());
        assert_eq!(template_dir(&bare), PathBuf::from("."));
    }
}
