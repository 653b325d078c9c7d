//! Scalar volumes and their physical-space geometry.
//!
//! Geometry is stored in the host convention (LPS, as ITK and Slicer use).
//! 2D images are grids whose third extent is 1.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array3;

/// NIfTI datatype code for 64-bit floats, which the tools do not handle.
pub const DATATYPE_FLOAT64: i16 = 64;

/// Physical placement of a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    /// Voxel counts per axis, fastest-varying first (x, y, z).
    pub size: [usize; 3],
    /// Physical position of voxel (0, 0, 0).
    pub origin: Vector3<f64>,
    /// Physical units per voxel along each axis.
    pub spacing: Vector3<f64>,
    /// Axis directions as columns.
    pub direction: Matrix3<f64>,
}

impl ImageGeometry {
    /// Unit spacing, zero origin, identity direction.
    pub fn new(size: [usize; 3]) -> Self {
        Self {
            size,
            origin: Vector3::zeros(),
            spacing: Vector3::new(1.0, 1.0, 1.0),
            direction: Matrix3::identity(),
        }
    }

    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = Vector3::from(origin);
        self
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = Vector3::from(spacing);
        self
    }

    pub fn with_direction(mut self, direction: Matrix3<f64>) -> Self {
        self.direction = direction;
        self
    }

    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    pub fn is_2d(&self) -> bool {
        self.size[2] == 1
    }

    /// Shape as shown to users; the trailing singleton of a 2D image is kept.
    pub fn shape(&self) -> Vec<usize> {
        self.size.to_vec()
    }
}

/// A scalar volume: geometry plus voxel values indexed `[x, y, z]`.
#[derive(Debug, Clone)]
pub struct Volume {
    pub geometry: ImageGeometry,
    pub values: Array3<f32>,
    /// NIfTI datatype code of the data on disk.
    pub datatype: i16,
}

impl Volume {
    pub fn new(geometry: ImageGeometry, values: Array3<f32>) -> Self {
        Self {
            geometry,
            values,
            datatype: 16,
        }
    }

    /// Zero-filled volume of the given geometry.
    pub fn zeros(geometry: ImageGeometry) -> Self {
        let [nx, ny, nz] = geometry.size;
        Self::new(geometry, Array3::zeros((nx, ny, nz)))
    }

    pub fn is_double(&self) -> bool {
        self.datatype == DATATYPE_FLOAT64
    }

    /// Minimum and maximum voxel value, or `None` for an empty volume.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.values.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}
