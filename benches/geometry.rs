//! Criterion benchmarks for the pure geometry steps.
//!
//! Run with: cargo bench --bench geometry

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use headfit::affine::Affine;
use headfit::measurements::{self, MeasurementInput};
use headfit::nifti::{self, NiftiHeader};
use headfit::scaling::{self, ReferenceGeometry};
use tempfile::tempdir;

const MNI_1MM: [[f64; 4]; 4] = [
    [-1.0, 0.0, 0.0, 90.0],
    [0.0, 1.0, 0.0, -126.0],
    [0.0, 0.0, 1.0, -72.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn bench_scaling(c: &mut Criterion) {
    let input = MeasurementInput::new(14.5, 19.2, 13.8);
    c.bench_function("validate_and_compute", |b| {
        b.iter(|| {
            let m = measurements::validate(black_box(&input)).unwrap();
            scaling::compute(&m, &ReferenceGeometry::MNI).unwrap()
        })
    });
}

fn bench_affine(c: &mut Criterion) {
    let template = Affine::from_rows(MNI_1MM);
    let m = measurements::validate(&MeasurementInput::new(14.5, 19.2, 13.8)).unwrap();
    let factors = scaling::compute(&m, &ReferenceGeometry::MNI).unwrap();
    c.bench_function("apply_scaling", |b| {
        b.iter(|| black_box(&template).apply_scaling(black_box(&factors)).unwrap())
    });
}

/// Header rewrite of a 1mm MNI-sized volume, compressed and not.
fn bench_rewrite_affine(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite_affine");
    group.sample_size(10);

    let dir = tempdir().unwrap();
    let mut header = NiftiHeader::default();
    header.dim = [182, 218, 182, 1, 1, 1, 1];
    let voxels = vec![0u8; header.data_size()];
    let target = Affine::from_rows(MNI_1MM);

    for name in ["MNI152_T1_1mm.nii", "MNI152_T1_1mm.nii.gz"] {
        let src = dir.path().join(name);
        nifti::save(&header, &voxels, &src).unwrap();
        let dst = dir.path().join(format!("out_{name}"));
        group.bench_function(name, |b| {
            b.iter(|| nifti::rewrite_affine(&src, &dst, black_box(&target)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scaling, bench_affine, bench_rewrite_affine);
criterion_main!(benches);
