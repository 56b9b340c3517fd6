//! `NIfTI` file format support.
//!
//! Templates are shipped as `.nii` or `.nii.gz` volumes. This module reads
//! their headers to find the voxel-to-world affine and writes copies with a
//! replacement affine.

pub(crate) mod header;
pub mod io;

pub use header::{DataType, NiftiHeader, NiftiVersion};
pub use io::{is_gzipped, load_header, read_volume, rewrite_affine, save, write_volume};
