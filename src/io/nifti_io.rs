//! NIfTI-1 reading and writing.
//!
//! NIfTI stores geometry in RAS; [`ImageGeometry`] is LPS. The conversion
//! negates the first two rows of the direction matrix and the first two
//! components of the origin.

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Matrix4, Quaternion, Rotation3, UnitQuaternion, Vector3};
use ndarray::{Array3, Axis, IxDyn};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{RegistrationError, Result};
use crate::image::{ImageGeometry, Volume};
use crate::transform::DisplacementField;

/// Size of a NIfTI-1 / Analyze 7.5 header.
pub const NIFTI1_HEADER_SIZE: usize = 348;

const NIFTI_INTENT_DISPVECT: i16 = 1006;
const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;
const DT_FLOAT32: i16 = 16;

/// Header fields the pre-run checks look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub datatype: i16,
    pub qform_code: i16,
    pub sform_code: i16,
}

fn ras_flip() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0))
}

pub fn read_header_info(path: &Path) -> Result<HeaderInfo> {
    let header = NiftiHeader::from_file(path).map_err(|e| RegistrationError::nifti(path, e))?;
    Ok(HeaderInfo {
        datatype: header.datatype,
        qform_code: header.qform_code,
        sform_code: header.sform_code,
    })
}

/// Voxel-to-RAS affine, preferring the sform, then the qform, then pixdim.
fn header_affine(header: &NiftiHeader) -> Matrix4<f64> {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let mut affine = Matrix4::identity();
        for (r, row) in rows.iter().enumerate() {
            for c in 0..4 {
                affine[(r, c)] = row[c] as f64;
            }
        }
        return affine;
    }

    let spacing = Vector3::new(
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );

    if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };

        let mut rotation = *UnitQuaternion::from_quaternion(Quaternion::new(a, b, c, d))
            .to_rotation_matrix()
            .matrix();
        rotation.column_mut(2).scale_mut(qfac);
        let linear = rotation * Matrix3::from_diagonal(&spacing);

        let mut affine = linear.to_homogeneous();
        affine[(0, 3)] = header.quatern_x as f64;
        affine[(1, 3)] = header.quatern_y as f64;
        affine[(2, 3)] = header.quatern_z as f64;
        return affine;
    }

    Matrix3::from_diagonal(&spacing).to_homogeneous()
}

/// LPS geometry described by a header.
pub fn geometry_from_header(header: &NiftiHeader) -> ImageGeometry {
    let ndim = (header.dim[0] as usize).clamp(1, 7);
    let mut size = [1usize; 3];
    for (axis, extent) in size.iter_mut().enumerate().take(ndim.min(3)) {
        *extent = (header.dim[axis + 1] as usize).max(1);
    }

    let affine = header_affine(header);
    let linear = affine.fixed_view::<3, 3>(0, 0).into_owned();
    let mut spacing = Vector3::zeros();
    let mut direction = Matrix3::identity();
    for axis in 0..3 {
        let column = linear.column(axis);
        let norm = column.norm();
        if norm > 1e-9 {
            spacing[axis] = norm;
            direction.set_column(axis, &(column / norm));
        } else {
            spacing[axis] = 1.0;
        }
    }
    let origin = Vector3::new(affine[(0, 3)], affine[(1, 3)], affine[(2, 3)]);

    ImageGeometry {
        size,
        origin: ras_flip() * origin,
        spacing,
        direction: ras_flip() * direction,
    }
}

/// Fill the dim/pixdim/qform/sform fields of `header` from LPS geometry.
fn apply_geometry(header: &mut NiftiHeader, geometry: &ImageGeometry) {
    let direction = ras_flip() * geometry.direction;
    let origin = ras_flip() * geometry.origin;

    let linear = direction * Matrix3::from_diagonal(&geometry.spacing);
    let rows = [&mut header.srow_x, &mut header.srow_y, &mut header.srow_z];
    for (r, row) in rows.into_iter().enumerate() {
        *row = [
            linear[(r, 0)] as f32,
            linear[(r, 1)] as f32,
            linear[(r, 2)] as f32,
            origin[r] as f32,
        ];
    }
    header.sform_code = NIFTI_XFORM_SCANNER_ANAT;

    let mut rotation = direction;
    let qfac = if rotation.determinant() < 0.0 {
        rotation.column_mut(2).neg_mut();
        -1.0
    } else {
        1.0
    };
    let mut quaternion =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation))
            .into_inner();
    if quaternion.w < 0.0 {
        quaternion = -quaternion;
    }
    header.quatern_b = quaternion.i as f32;
    header.quatern_c = quaternion.j as f32;
    header.quatern_d = quaternion.k as f32;
    header.quatern_x = origin[0] as f32;
    header.quatern_y = origin[1] as f32;
    header.quatern_z = origin[2] as f32;
    header.qform_code = NIFTI_XFORM_SCANNER_ANAT;

    header.pixdim[0] = qfac as f32;
    for axis in 0..3 {
        header.pixdim[axis + 1] = geometry.spacing[axis] as f32;
    }
}

/// Load a scalar volume as float32 values indexed `[x, y, z]`.
pub fn read_volume(path: &Path) -> Result<Volume> {
    let object = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| RegistrationError::nifti(path, e))?;
    let header = object.header().clone();
    let geometry = geometry_from_header(&header);

    let data = object
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| RegistrationError::nifti(path, e))?;
    let ndim = data.ndim();
    if ndim == 0 || ndim > 3 {
        return Err(RegistrationError::format(format!(
            "{} is a {}-dimensional image; only scalar 2D/3D volumes are supported",
            path.display(),
            ndim
        )));
    }

    let [nx, ny, nz] = geometry.size;
    let values = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| {
        let index = [x, y, z];
        data[IxDyn(&index[..ndim])]
    });

    Ok(Volume {
        geometry,
        values,
        datatype: header.datatype,
    })
}

/// Write a scalar volume as float32 NIfTI.
pub fn write_volume(volume: &Volume, path: &Path) -> Result<()> {
    let mut header = NiftiHeader::default();
    apply_geometry(&mut header, &volume.geometry);
    header.datatype = DT_FLOAT32;

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&volume.values)
        .map_err(|e| RegistrationError::nifti(path, e))
}

/// Write a displacement field as a 5D vector NIfTI (`x, y, z, t=1, 3`).
pub fn write_displacement_field(field: &DisplacementField, path: &Path) -> Result<()> {
    let mut header = NiftiHeader::default();
    apply_geometry(&mut header, &field.geometry);
    header.intent_code = NIFTI_INTENT_DISPVECT;
    header.datatype = DT_FLOAT32;

    // [z, y, x, c] -> [x, y, z, 1, c]
    let data = field
        .vectors
        .view()
        .permuted_axes([2, 1, 0, 3])
        .insert_axis(Axis(3));

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&data)
        .map_err(|e| RegistrationError::nifti(path, e))
}

/// Read a field written by [`write_displacement_field`].
pub fn read_displacement_field(path: &Path) -> Result<DisplacementField> {
    let object = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| RegistrationError::nifti(path, e))?;
    let header = object.header().clone();
    let geometry = geometry_from_header(&header);
    let data = object
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| RegistrationError::nifti(path, e))?;
    if data.ndim() != 5 || data.shape()[4] != 3 {
        return Err(RegistrationError::format(format!(
            "{} is not a 3-component vector image (shape {:?})",
            path.display(),
            data.shape()
        )));
    }

    let [nx, ny, nz] = geometry.size;
    let vectors = ndarray::Array4::from_shape_fn((nz, ny, nx, 3), |(z, y, x, c)| {
        data[IxDyn(&[x, y, z, 0, c])]
    });
    Ok(DisplacementField { vectors, geometry })
}

/// Overwrite the header of `target` with the first [`NIFTI1_HEADER_SIZE`]
/// bytes of `source`.
///
/// A single-file NIfTI source is relabelled as a header/image pair.
pub fn copy_header_bytes(source: &Path, target: &Path) -> Result<()> {
    let bytes = fs::read(source).map_err(|e| RegistrationError::io(source, e))?;
    if bytes.len() < NIFTI1_HEADER_SIZE {
        return Err(RegistrationError::format(format!(
            "{} is too small to hold a header ({} bytes)",
            source.display(),
            bytes.len()
        )));
    }
    let mut header = bytes[..NIFTI1_HEADER_SIZE].to_vec();
    if &header[344..348] == b"n+1\0" {
        header[344..348].copy_from_slice(b"ni1\0");
    }
    fs::write(target, header).map_err(|e| RegistrationError::io(target, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_geometry_round_trip_through_header() {
        let geometry = ImageGeometry::new([4, 5, 6])
            .with_origin([-10.0, 20.0, 5.0])
            .with_spacing([0.5, 1.0, 2.5]);

        let mut header = NiftiHeader::default();
        header.dim = [3, 4, 5, 6, 1, 1, 1, 1];
        apply_geometry(&mut header, &geometry);

        // RAS on disk
        assert_eq!(header.srow_x[3], 10.0);
        assert_eq!(header.srow_y[3], -20.0);
        assert_eq!(header.srow_x[0], -0.5);

        let back = geometry_from_header(&header);
        assert_eq!(back.size, [4, 5, 6]);
        assert!((back.origin - geometry.origin).norm() < 1e-5);
        assert!((back.spacing - geometry.spacing).norm() < 1e-5);
        assert!((back.direction - geometry.direction).norm() < 1e-5);
    }

    #[test]
    fn test_qform_matches_sform() {
        let geometry = ImageGeometry::new([8, 8, 8]).with_origin([1.0, 2.0, 3.0]);
        let mut header = NiftiHeader::default();
        header.dim = [3, 8, 8, 8, 1, 1, 1, 1];
        apply_geometry(&mut header, &geometry);
        header.sform_code = 0;

        let back = geometry_from_header(&header);
        assert!((back.origin - geometry.origin).norm() < 1e-5);
        assert!((back.direction - geometry.direction).norm() < 1e-5);
    }

    #[test]
    fn test_volume_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("volume.nii");

        let mut volume = Volume::zeros(ImageGeometry::new([3, 4, 5]).with_spacing([1.0, 2.0, 3.0]));
        volume.values[[2, 3, 4]] = 9.0;
        volume.values[[1, 0, 0]] = -1.0;
        write_volume(&volume, &path).unwrap();

        let loaded = read_volume(&path).unwrap();
        assert_eq!(loaded.geometry.size, [3, 4, 5]);
        assert_eq!(loaded.values[[2, 3, 4]], 9.0);
        assert_eq!(loaded.values[[1, 0, 0]], -1.0);
        assert!((loaded.geometry.spacing - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-6);

        let info = read_header_info(&path).unwrap();
        assert_eq!(info.datatype, DT_FLOAT32);
        assert_eq!(info.qform_code, 1);
        assert_eq!(info.sform_code, 1);
    }

    #[test]
    fn test_copy_header_bytes_relabels_single_file() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reference.nii");
        let result = dir.path().join("result.hdr");

        let volume = Volume::zeros(ImageGeometry::new([2, 2, 2]));
        write_volume(&volume, &reference).unwrap();
        fs::write(&result, b"broken").unwrap();

        copy_header_bytes(&reference, &result).unwrap();
        let header = fs::read(&result).unwrap();
        assert_eq!(header.len(), NIFTI1_HEADER_SIZE);
        assert_eq!(&header[344..348], b"ni1\0");
    }
    #[test]
    fn test_displacement_field_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("field.nii");
        let field = DisplacementField {
            vectors: ndarray::Array4::zeros((2, 3, 4, 3)),
            geometry: ImageGeometry::new([4, 3, 2]),
        };
        write_displacement_field(&field, &path).unwrap();

        let header = NiftiHeader::from_file(&path).unwrap();
        assert_eq!(header.intent_code, NIFTI_INTENT_DISPVECT);
        let dims: Vec<usize> = header.dim[..6].iter().map(|&d| d as usize).collect();
        assert_eq!(dims, [5, 4, 3, 2, 1, 3]);
    }
}
