//! Placement of resampled volumes under per-subject directories.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

/// A resampled volume adopted into the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputArtifact {
    /// Final location of the volume.
    pub path: PathBuf,
    /// Subject the volume belongs to.
    pub subject_id: String,
}

/// Directory holding one subject's outputs.
pub fn subject_dir(output_dir: &Path, subject_id: &str) -> PathBuf {
    output_dir.join(subject_id)
}

/// Move `expected` into `output_dir/subject_id/`, creating the directory.
///
/// Fails with [`Error::MissingOutput`] when `expected` does not exist, even if
/// an earlier run left a file at the destination. A file already at the
/// destination is replaced.
pub fn organize(subject_id: &str, output_dir: &Path, expected: &Path) -> Result<OutputArtifact> {
    let file_name = expected
        .file_name()
        .ok_or_else(|| Error::MissingOutput(expected.to_path_buf()))?;
    let dir = subject_dir(output_dir, subject_id);
    let target = dir.join(file_name);

    if !expected.is_file() {
        return Err(Error::MissingOutput(expected.to_path_buf()));
    }

    std::fs::create_dir_all(&dir)?;
    move_atomically(expected, &target)?;

    tracing::debug!(from = %expected.display(), to = %target.display(), "moved output");
    Ok(OutputArtifact {
        path: target,
        subject_id: subject_id.to_string(),
    })
}

/// Rename `from` to `to`; across filesystems, fall back to [`copy_then_rename`].
fn move_atomically(from: &Path, to: &Path) -> Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => copy_then_rename(from, to),
        Err(e) => Err(e.into()),
    }
}

/// Copy `from` into a temporary file beside `to`, rename that into place and
/// remove `from`. The temporary file never outlives a failure.
fn copy_then_rename(from: &Path, to: &Path) -> Result<()> {
    let mut staging = to.as_os_str().to_os_string();
    staging.push(".incoming");
    let staging = PathBuf::from(staging);

    let staged = std::fs::copy(from, &staging).and_then(|_| std::fs::rename(&staging, to));
    if let Err(e) = staged {
        let _ = std::fs::remove_file(&staging);
        return Err(e.into());
    }
    std::fs::remove_file(from)?;
    Ok(())
}
