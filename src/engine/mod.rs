//! Concrete [`VolumeResampler`](crate::resample::VolumeResampler) engines.
//!
//! - [`HeaderRewriteEngine`] keeps the template grid and voxels and writes
//!   the composed affine into the copy's header. It runs in-process.
//! - [`CommandEngine`] drives an external reslicing program.

mod command;
mod header;

pub use command::CommandEngine;
pub use header::HeaderRewriteEngine;
