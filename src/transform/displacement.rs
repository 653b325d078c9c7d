//! Dense displacement fields rebuilt from `reg_f3d` vector output.
//!
//! The tool writes a 256-byte header followed by a flat float32 stream in
//! depth-major order, with the vector components interleaved per voxel.
//! Vectors are in RAS; the host works in LPS, so the first two components
//! change sign.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{concatenate, s, Array4, Axis};
use tracing::debug;

use crate::error::{RegistrationError, Result};
use crate::image::ImageGeometry;

/// Bytes skipped at the start of a vector file.
pub const VECTOR_HEADER_SIZE: usize = 256;

/// Per-voxel physical offsets on the reference grid.
#[derive(Debug, Clone)]
pub struct DisplacementField {
    /// Vectors indexed `[z, y, x, component]`, always 3 components.
    pub vectors: Array4<f32>,
    /// Geometry copied verbatim from the reference image.
    pub geometry: ImageGeometry,
}

impl DisplacementField {
    pub fn vector_at(&self, x: usize, y: usize, z: usize) -> [f32; 3] {
        [
            self.vectors[[z, y, x, 0]],
            self.vectors[[z, y, x, 1]],
            self.vectors[[z, y, x, 2]],
        ]
    }
}

/// Read the float stream following the header. `.gz` files are decompressed.
pub fn read_vector_stream(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path).map_err(|e| RegistrationError::io(path, e))?;
    let mut bytes = Vec::new();
    let gzipped = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if gzipped {
        GzDecoder::new(file)
            .read_to_end(&mut bytes)
            .map_err(|e| RegistrationError::io(path, e))?;
    } else {
        let mut file = file;
        file.read_to_end(&mut bytes)
            .map_err(|e| RegistrationError::io(path, e))?;
    }
    decode_vector_stream(&bytes)
}

/// Skip the header and reinterpret the remainder as native-endian float32.
pub fn decode_vector_stream(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() < VECTOR_HEADER_SIZE {
        return Err(RegistrationError::format(format!(
            "vector file has {} bytes, shorter than its {}-byte header",
            bytes.len(),
            VECTOR_HEADER_SIZE
        )));
    }
    let payload = &bytes[VECTOR_HEADER_SIZE..];
    if payload.len() % 4 != 0 {
        return Err(RegistrationError::format(format!(
            "vector payload of {} bytes is not a whole number of float32 values",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Rebuild a 3-component LPS displacement field on `reference`'s grid.
pub fn reconstruct_displacement_field(
    stream: Vec<f32>,
    reference: &ImageGeometry,
) -> Result<DisplacementField> {
    let [nx, ny, nz] = reference.size;
    let grid = (nz, ny, nx);
    let is_2d = nz == 1;
    let components = if is_2d { 2 } else { 3 };

    let expected = nz * ny * nx * components;
    if stream.len() != expected {
        return Err(RegistrationError::format(format!(
            "vector stream holds {} values, grid {}x{}x{} with {} components needs {}",
            stream.len(),
            nz,
            ny,
            nx,
            components,
            expected
        )));
    }

    let reshaped = Array4::from_shape_vec((grid.0, grid.1, grid.2, components), stream)
        .map_err(|e| RegistrationError::format(e.to_string()))?;

    let mut vectors = if is_2d {
        let through_plane = Array4::<f32>::zeros((grid.0, grid.1, grid.2, 1));
        concatenate(Axis(3), &[reshaped.view(), through_plane.view()])
            .map_err(|e| RegistrationError::format(e.to_string()))?
    } else {
        reshaped
    };

    // RAS to LPS
    vectors.slice_mut(s![.., .., .., ..2]).mapv_inplace(|v| -v);

    debug!(
        size = ?reference.size,
        is_2d = is_2d,
        "Displacement field reconstructed"
    );

    Ok(DisplacementField {
        vectors,
        geometry: reference.clone(),
    })
}

/// Read a vector file and rebuild its displacement field.
pub fn load_displacement_field(path: &Path, reference: &ImageGeometry) -> Result<DisplacementField> {
    let stream = read_vector_stream(path)?;
    reconstruct_displacement_field(stream, reference)
}
