use std::path::PathBuf;

use crate::error::Result;
use crate::nifti;
use crate::resample::{template_dir, ResliceRequest, VolumeResampler};
use crate::volume::VolumeHandle;

/// Writes the template unchanged apart from its sform.
///
/// No interpolation takes place: the voxel grid is identical to the
/// template's and only the voxel-to-world mapping changes, so any tool that
/// honours the sform sees the rescaled head. The requested interpolation is
/// recorded in the logs only.
#[derive(Debug, Clone, Default)]
pub struct HeaderRewriteEngine {
    working_dir: Option<PathBuf>,
}

impl HeaderRewriteEngine {
    /// Engine writing next to the template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine writing into `dir` instead of the template's directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl VolumeResampler for HeaderRewriteEngine {
    fn name(&self) -> &str {
        "header-rewrite"
    }

    fn working_dir(&self, volume: &VolumeHandle) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| template_dir(volume))
    }

    fn reslice(&self, request: &ResliceRequest) -> Result<()> {
        let output = request.output_path()?;
        std::fs::create_dir_all(&request.working_dir)?;

        tracing::debug!(
            interpolation = %request.interpolation,
            output = %output.display(),
            "rewriting template affine (grid unchanged)"
        );
        nifti::rewrite_affine(request.volume.path(), &output, &request.affine)?;
        Ok(())
    }
}
