//! Read-only handles on template volumes.

use std::path::{Path, PathBuf};

use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::nifti::{self, NiftiHeader};

/// A template volume opened for rescaling.
///
/// Holds the header and voxel-to-world affine; voxel data stays on disk
/// until an engine reads it.
#[derive(Debug, Clone)]
pub struct VolumeHandle {
    path: PathBuf,
    header: NiftiHeader,
    affine: Affine,
}

impl VolumeHandle {
    /// Wrap an already parsed header.
    pub fn new(path: impl Into<PathBuf>, header: NiftiHeader) -> Self {
        let affine = header.affine();
        Self {
            path: path.into(),
            header,
            affine,
        }
    }

    /// Open a `.nii` / `.nii.gz` file with [`NiftiTemplateLoader`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        NiftiTemplateLoader.open(path.as_ref())
    }

    /// Path of the volume on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed header.
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Voxel-to-world affine.
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// File name of the volume, e.g. `MNI152_T1_1mm.nii.gz`.
    pub fn base_name(&self) -> Result<&str> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "template path has no usable file name: {}",
                    self.path.display()
                ))
            })
    }
}

/// Opens template volumes by path.
pub trait TemplateLoader: Send + Sync {
    /// Open the volume at `path`.
    fn open(&self, path: &Path) -> Result<VolumeHandle>;
}

/// Loads `.nii` / `.nii.gz` templates from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiTemplateLoader;

impl TemplateLoader for NiftiTemplateLoader {
    fn open(&self, path: &Path) -> Result<VolumeHandle> {
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "template not found: {}",
                path.display()
            )));
        }
        let header = nifti::load_header(path)?;
        header.affine().validate()?;
        Ok(VolumeHandle::new(path, header))
    }
}
