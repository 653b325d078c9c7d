//! Text format of NiftyReg affine matrices.
//!
//! Each cell is written as a 13-character, 8-decimal field with no delimiter
//! between cells; rows are separated by a newline and the file has no
//! trailing newline. `reg_aladin` reads `-inaff` in this layout and writes
//! `-aff` in it.

use std::fs;
use std::path::Path;

use super::AffineMatrix;
use crate::error::{RegistrationError, Result};

/// Serialize `matrix` in the tool's fixed-width layout.
pub fn encode(matrix: &AffineMatrix) -> String {
    matrix
        .rows()
        .map(|row| row.iter().map(|v| format!("{:13.8}", v)).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse whitespace-separated values into a square matrix, row-major.
pub fn decode(text: &str) -> Result<AffineMatrix> {
    let values = text
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| RegistrationError::format(format!("invalid matrix value '{}'", token)))
        })
        .collect::<Result<Vec<f64>>>()?;

    let side = (values.len() as f64).sqrt().round() as usize;
    if side * side != values.len() {
        return Err(RegistrationError::format(format!(
            "{} matrix values do not form a square matrix",
            values.len()
        )));
    }

    AffineMatrix::from_row_slice(&values)
}

pub fn write_matrix_file(matrix: &AffineMatrix, path: &Path) -> Result<()> {
    fs::write(path, encode(matrix)).map_err(|e| RegistrationError::io(path, e))
}

pub fn read_matrix_file(path: &Path) -> Result<AffineMatrix> {
    let text = fs::read_to_string(path).map_err(|e| RegistrationError::io(path, e))?;
    decode(&text)
}
