pub mod nifti_io;

pub use nifti_io::*;

use std::path::Path;

/// Extensions the registration tools read and write natively.
pub const NIFTI_EXTENSIONS: [&str; 5] = [".hdr", ".img", ".img.gz", ".nii", ".nii.gz"];

pub fn has_nifti_extension(path: &Path) -> bool {
    let name = path.to_string_lossy();
    NIFTI_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Analyze 7.5 header/image pair, identified by its `.hdr` header file.
pub fn is_analyze_header(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".hdr")
}
