//! Transformations produced by a registration run.

pub mod codec;
pub mod displacement;

pub use codec::*;
pub use displacement::*;

use nalgebra::DMatrix;

use crate::error::{RegistrationError, Result};

/// Homogeneous affine matrix, 3×3 for 2D or 4×4 for 3D.
///
/// The matrix follows the `Transform * Reference = Floating` convention,
/// i.e. it maps reference-space coordinates onto floating-space coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineMatrix {
    matrix: DMatrix<f64>,
}

impl AffineMatrix {
    pub fn identity(dimension: usize) -> Self {
        Self {
            matrix: DMatrix::identity(dimension + 1, dimension + 1),
        }
    }

    /// Builds a matrix from row-major values; `values.len()` must be 9 or 16.
    pub fn from_row_slice(values: &[f64]) -> Result<Self> {
        let side = match values.len() {
            9 => 3,
            16 => 4,
            n => {
                return Err(RegistrationError::format(format!(
                    "expected 9 or 16 matrix values, got {}",
                    n
                )))
            }
        };
        Ok(Self {
            matrix: DMatrix::from_row_slice(side, side, values),
        })
    }

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self {
            matrix: DMatrix::from_row_slice(4, 4, &flat),
        }
    }

    /// Number of rows (and columns).
    pub fn side(&self) -> usize {
        self.matrix.nrows()
    }

    /// Spatial dimension, 2 or 3.
    pub fn dimension(&self) -> usize {
        self.side() - 1
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.matrix[(row, col)]
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        self.matrix
            .row_iter()
            .map(|row| row.iter().copied().collect())
    }

    /// Inverse, or `None` for a singular matrix.
    pub fn inverse(&self) -> Option<Self> {
        self.matrix
            .clone()
            .try_inverse()
            .map(|matrix| Self { matrix })
    }

    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.side() == other.side()
            && self
                .matrix
                .iter()
                .zip(other.matrix.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Output transformation of a registration run.
#[derive(Debug, Clone)]
pub enum Transformation {
    Affine(AffineMatrix),
    DisplacementField(DisplacementField),
}

impl Transformation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Affine(_) => "affine",
            Self::DisplacementField(_) => "displacement_field",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_dimensions() {
        let m = AffineMatrix::identity(3);
        assert_eq!(m.side(), 4);
        assert_eq!(m.dimension(), 3);
        assert_eq!(m.get(2, 2), 1.0);
        assert_eq!(m.get(0, 3), 0.0);
    }

    #[test]
    fn test_from_row_slice_rejects_other_sizes() {
        assert!(AffineMatrix::from_row_slice(&[1.0; 9]).is_ok());
        assert!(AffineMatrix::from_row_slice(&[1.0; 4]).is_err());
    }

    #[test]
    fn test_inverse_of_translation() {
        let m = AffineMatrix::from_rows([
            [1.0, 0.0, 0.0, 5.0],
            [0.0, 1.0, 0.0, -2.0],
            [0.0, 0.0, 1.0, 1.5],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let inv = m.inverse().unwrap();
        assert_eq!(inv.get(0, 3), -5.0);
        assert_eq!(inv.get(1, 3), 2.0);
        assert_eq!(inv.get(2, 3), -1.5);

        let singular = AffineMatrix::from_row_slice(&[0.0; 16]).unwrap();
        assert!(singular.inverse().is_none());
    }
}
