//! NIfTI file access for template volumes.
//!
//! - Memory-mapped header reads for uncompressed `.nii`
//! - Streaming gzip for `.nii.gz` (flate2)
//! - Writes land in a sibling temporary file that is renamed into place, so a
//!   reader never observes a half-written volume

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memmap2::Mmap;

use super::header::NiftiHeader;
use crate::affine::Affine;
use crate::error::{Error, Result};

const GZIP_BUFFER_SIZE: usize = 256 * 1024; // 256KB buffer for streaming decompression

/// Whether `path` names a gzip-compressed volume.
pub fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Load only the header from a NIfTI file.
#[allow(unsafe_code)]
pub fn load_header<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
    let path = path.as_ref();
    let file = File::open(path)?;

    if is_gzipped(path) {
        let mut decoder = MultiGzDecoder::new(BufReader::new(file));
        let mut header_buf = Vec::with_capacity(NiftiHeader::SIZE_V2);
        decoder
            .by_ref()
            .take(NiftiHeader::SIZE_V2 as u64)
            .read_to_end(&mut header_buf)
            .map_err(|e| Error::Decompression(format!("{}: {e}", path.display())))?;
        NiftiHeader::from_bytes(&header_buf)
    } else {
        // SAFETY: read-only mapping of a file we just opened; external
        // modification can only yield an inconsistent header, not UB.
        let mmap = unsafe { Mmap::map(&file)? };
        NiftiHeader::from_bytes(&mmap)
    }
}

/// Read a whole volume (header, extensions and voxels) into memory,
/// decompressing `.nii.gz` files.
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let file = File::open(path)?;

    if is_gzipped(path) {
        let mut decoder =
            MultiGzDecoder::new(BufReader::with_capacity(GZIP_BUFFER_SIZE, file));
        let mut bytes = Vec::new();
        decoder
            .read_to_end(&mut bytes)
            .map_err(|e| Error::Decompression(format!("{}: {e}", path.display())))?;
        Ok(bytes)
    } else {
        let mut bytes = Vec::new();
        BufReader::new(file).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Write raw volume bytes to `path`, compressing when it ends in `.gz`.
pub fn write_volume<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let partial = partial_path(path)?;

    let written = write_partial(&partial, bytes, is_gzipped(path));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    std::fs::rename(&partial, path)?;
    Ok(())
}

fn write_partial(partial: &Path, bytes: &[u8], gzip: bool) -> Result<()> {
    let writer = BufWriter::with_capacity(1024 * 1024, File::create(partial)?);
    if gzip {
        let mut encoder = GzEncoder::new(writer, Compression::fast());
        encoder.write_all(bytes)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = writer;
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    Ok(())
}

fn partial_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Configuration(format!("invalid output path: {}", path.display())))?;
    let mut partial = name.to_os_string();
    partial.push(".partial");
    Ok(path.with_file_name(partial))
}

/// Save a volume from a header and raw voxel bytes.
///
/// The gap between the header and `vox_offset` is zero-filled (no extensions).
pub fn save<P: AsRef<Path>>(header: &NiftiHeader, voxels: &[u8], path: P) -> Result<()> {
    header.validate()?;
    if voxels.len() != header.data_size() {
        return Err(Error::InvalidDimensions(format!(
            "voxel buffer holds {} bytes, header describes {}",
            voxels.len(),
            header.data_size()
        )));
    }

    let mut bytes = header.to_bytes();
    bytes.resize(header.vox_offset as usize, 0);
    bytes.extend_from_slice(voxels);
    write_volume(path, &bytes)
}

/// Copy the volume at `src` to `dst` with its sform replaced by `affine`.
///
/// Voxel data and every header field other than the transform are copied
/// byte for byte. Returns the header as written.
pub fn rewrite_affine<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    dst: Q,
    affine: &Affine,
) -> Result<NiftiHeader> {
    let mut bytes = read_volume(src.as_ref())?;
    let mut header = NiftiHeader::from_bytes(&bytes)?;

    let expected = header.vox_offset as usize + header.data_size();
    if bytes.len() < expected {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "{} truncated: {} bytes, header describes {}",
                src.as_ref().display(),
                bytes.len(),
                expected
            ),
        )));
    }

    header.set_affine(affine);
    header.patch_bytes(&mut bytes)?;
    write_volume(dst, &bytes)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_header() -> NiftiHeader {
        NiftiHeader {
            dim: [4, 5, 3, 1, 1, 1, 1],
            srow: [
                [-2.0, 0.0, 0.0, 90.0],
                [0.0, 2.0, 0.0, -126.0],
                [0.0, 0.0, 2.0, -72.0],
            ],
            sform_code: 4,
            ..NiftiHeader::default()
        }
    }

    fn voxels(header: &NiftiHeader) -> Vec<u8> {
        (0..header.data_size()).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_save_and_load_header() {
        let dir = tempdir().unwrap();
        for name in ["t.nii", "t.nii.gz"] {
            let path = dir.path().join(name);
            let header = small_header();
            save(&header, &voxels(&header), &path).unwrap();

            let loaded = load_header(&path).unwrap();
            assert_eq!(loaded.shape(), vec![4, 5, 3]);
            assert_eq!(loaded.affine(), header.affine());
            assert!(!dir.path().join(format!("{name}.partial")).exists());
        }
    }

    #[test]
    fn test_rewrite_affine_preserves_voxels() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("template.nii.gz");
        let dst = dir.path().join("sub001_template.nii.gz");
        let header = small_header();
        let data = voxels(&header);
        save(&header, &data, &src).unwrap();

        let affine = Affine::from_rows([
            [-1.0, 0.0, 0.0, 45.0],
            [0.0, 1.0, 0.0, -63.0],
            [0.0, 0.0, 1.0, -36.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        rewrite_affine(&src, &dst, &affine).unwrap();

        let written = read_volume(&dst).unwrap();
        let parsed = NiftiHeader::from_bytes(&written).unwrap();
        assert_eq!(parsed.affine(), affine);
        assert_eq!(&written[352..], data.as_slice());
    }

    #[test]
    fn test_rewrite_rejects_truncated_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("t.nii");
        let header = small_header();
        save(&header, &voxels(&header), &src).unwrap();

        let bytes = std::fs::read(&src).unwrap();
        std::fs::write(&src, &bytes[..bytes.len() - 10]).unwrap();

        let err = rewrite_affine(&src, dir.path().join("out.nii"), &Affine::IDENTITY).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_save_rejects_wrong_voxel_count() {
        let dir = tempdir().unwrap();
        let result = save(&small_header(), &[0u8; 3], dir.path().join("t.nii"));
        assert!(matches!(result, Err(Error::InvalidDimensions(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_header("/nonexistent/template.nii"),
            Err(Error::Io(_))
        ));
    }
}
