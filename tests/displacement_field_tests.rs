use std::io::Write;

use approx::assert_relative_eq;
use flate2::write::GzEncoder;
use flate2::Compression;
use niftyreg_bridge::io::{read_displacement_field, write_displacement_field};
use niftyreg_bridge::transform::{
    load_displacement_field, reconstruct_displacement_field, VECTOR_HEADER_SIZE,
};
use niftyreg_bridge::{ErrorKind, ImageGeometry};
use tempfile::TempDir;

fn vector_file_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = vec![7u8; VECTOR_HEADER_SIZE];
    for v in values {
        bytes.extend_from_slice(&v.to_ne_bytes());
    }
    bytes
}

fn reference() -> ImageGeometry {
    ImageGeometry::new([4, 3, 2])
        .with_origin([-12.0, 8.0, 3.5])
        .with_spacing([0.5, 0.75, 2.0])
}

#[test]
fn test_zero_field_copies_reference_geometry() {
    let geometry = reference();
    let stream = vec![0.0f32; geometry.voxel_count() * 3];
    let field = reconstruct_displacement_field(stream, &geometry).unwrap();

    assert_eq!(field.vectors.shape(), &[2, 3, 4, 3]);
    assert_eq!(field.geometry, geometry);
    assert!(field.vectors.iter().all(|&v| v == 0.0));
}

#[test]
fn test_ras_to_lps_sign_flip() {
    let geometry = reference();
    let mut stream = vec![0.0f32; geometry.voxel_count() * 3];
    // voxel (0, 0, 0) carries (1, 0, 0); voxel (1, 0, 0) carries (0, 0, 1)
    stream[0] = 1.0;
    stream[5] = 1.0;
    let field = reconstruct_displacement_field(stream, &geometry).unwrap();

    assert_eq!(field.vector_at(0, 0, 0), [-1.0, 0.0, 0.0]);
    assert_eq!(field.vector_at(1, 0, 0), [0.0, 0.0, 1.0]);
}

#[test]
fn test_stream_order_is_depth_major() {
    let geometry = ImageGeometry::new([2, 2, 2]);
    let stream: Vec<f32> = (0..24).map(|i| i as f32).collect();
    let field = reconstruct_displacement_field(stream, &geometry).unwrap();

    // last voxel (x=1, y=1, z=1) holds the last three values
    assert_eq!(field.vector_at(1, 1, 1), [-21.0, -22.0, 23.0]);
    // x varies fastest
    assert_eq!(field.vector_at(1, 0, 0), [-3.0, -4.0, 5.0]);
    // z varies slowest
    assert_eq!(field.vector_at(0, 0, 1), [-12.0, -13.0, 14.0]);
}

#[test]
fn test_2d_field_is_lifted_to_three_components() {
    let geometry = ImageGeometry::new([3, 2, 1]);
    let stream: Vec<f32> = (0..12).map(|i| i as f32 + 1.0).collect();
    let field = reconstruct_displacement_field(stream, &geometry).unwrap();

    assert_eq!(field.vectors.shape(), &[1, 2, 3, 3]);
    assert_eq!(field.vector_at(0, 0, 0), [-1.0, -2.0, 0.0]);
    assert_eq!(field.vector_at(2, 1, 0), [-11.0, -12.0, 0.0]);
    for x in 0..3 {
        for y in 0..2 {
            assert_eq!(field.vector_at(x, y, 0)[2], 0.0);
        }
    }
}

#[test]
fn test_wrong_length_is_format_error() {
    let geometry = reference();
    let short = vec![0.0f32; geometry.voxel_count() * 3 - 1];
    let err = reconstruct_displacement_field(short, &geometry).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);

    let long = vec![0.0f32; geometry.voxel_count() * 3 + 3];
    assert!(reconstruct_displacement_field(long, &geometry).is_err());
}

#[test]
fn test_load_skips_header_and_reads_gzip() {
    let dir = TempDir::new().unwrap();
    let geometry = ImageGeometry::new([2, 1, 1]);
    let bytes = vector_file_bytes(&[0.5, -0.25, 2.0, 4.0]);

    let plain = dir.path().join("cpp.nii");
    std::fs::write(&plain, &bytes).unwrap();
    let field = load_displacement_field(&plain, &geometry).unwrap();
    assert_eq!(field.vector_at(0, 0, 0), [-0.5, 0.25, 0.0]);
    assert_eq!(field.vector_at(1, 0, 0), [-2.0, -4.0, 0.0]);

    let gz = dir.path().join("cpp.nii.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes).unwrap();
    std::fs::write(&gz, encoder.finish().unwrap()).unwrap();
    let from_gz = load_displacement_field(&gz, &geometry).unwrap();
    assert_eq!(from_gz.vectors, field.vectors);
}

#[test]
fn test_truncated_file_is_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.nii");
    std::fs::write(&path, vec![0u8; VECTOR_HEADER_SIZE - 1]).unwrap();
    let err = load_displacement_field(&path, &ImageGeometry::new([1, 1, 1])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_field_survives_nifti_round_trip() {
    let dir = TempDir::new().unwrap();
    let geometry = reference();
    let stream: Vec<f32> = (0..geometry.voxel_count() * 3).map(|i| i as f32 * 0.5).collect();
    let field = reconstruct_displacement_field(stream, &geometry).unwrap();

    let path = dir.path().join("field.nii");
    write_displacement_field(&field, &path).unwrap();
    let back = read_displacement_field(&path).unwrap();

    assert_eq!(back.geometry.size, geometry.size);
    assert_relative_eq!(back.geometry.origin, geometry.origin, epsilon = 1e-5);
    assert_relative_eq!(back.geometry.spacing, geometry.spacing, epsilon = 1e-5);
    assert_eq!(back.vectors, field.vectors);
}
