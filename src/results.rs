//! Turning tool outputs into host state.
//!
//! [`collect_result`] reads and converts every output file without touching
//! the host. [`apply_result`] then installs the converted results.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::command::{RegistrationCommand, RegistrationRequest, RunDirectory};
use crate::error::{RegistrationError, Result};
use crate::host::{Composite, Host, TransformHandle, VolumeHandle};
use crate::image::ImageGeometry;
use crate::io::{read_displacement_field, read_header_info, write_displacement_field};
use crate::transform::{load_displacement_field, read_matrix_file, AffineMatrix, Transformation};

/// Resampled floating image written by the tool.
#[derive(Debug, Clone)]
pub struct ResultVolume {
    pub name: String,
    pub path: PathBuf,
}

/// Transformation destined for a host transform.
#[derive(Debug, Clone)]
pub struct ResultTransform {
    pub target: TransformHandle,
    pub transformation: Transformation,
    /// File the host loads the transform from.
    pub path: PathBuf,
}

/// Everything a successful run produced, fully decoded.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub volume: Option<ResultVolume>,
    pub transform: Option<ResultTransform>,
}

/// Host handles after the result has been installed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedResult {
    pub volume: Option<VolumeHandle>,
    pub transform: Option<TransformHandle>,
}

/// Read the outputs of a successful run.
///
/// Non-linear vector output is rebuilt on the reference grid and written as
/// a displacement-field image inside the run directory. Every output is
/// checked here: an unreadable volume, a singular matrix or a field that
/// does not read back is an error before the host sees anything.
pub fn collect_result(
    request: &RegistrationRequest,
    command: &RegistrationCommand,
    reference: &ImageGeometry,
    run_dir: &mut RunDirectory,
) -> Result<RegistrationResult> {
    let volume = match &request.result_volume {
        Some(name) => {
            let path = command.paths.result_volume.clone();
            read_header_info(&path)?;
            Some(ResultVolume {
                name: name.clone(),
                path,
            })
        }
        None => None,
    };

    let transform = match &request.result_transform {
        None => None,
        Some(target) if request.algorithm.is_linear() => {
            let path = command.paths.result_transform.clone();
            let matrix = read_matrix_file(&path)?;
            if matrix.inverse().is_none() {
                return Err(RegistrationError::format(format!(
                    "transform '{}' is singular",
                    target.name
                )));
            }
            debug!(transform = %target.name, "Result matrix read");
            Some(ResultTransform {
                target: target.clone(),
                transformation: Transformation::Affine(matrix),
                path,
            })
        }
        Some(target) => {
            let field = load_displacement_field(&command.paths.result_transform, reference)?;
            let path = run_dir.allocate(Some(&format!("{}_displacement", target.name)), ".nii");
            write_displacement_field(&field, &path)?;
            read_displacement_field(&path)?;
            debug!(transform = %target.name, path = %path.display(), "Displacement field written");
            Some(ResultTransform {
                target: target.clone(),
                transformation: Transformation::DisplacementField(field),
                path,
            })
        }
    };

    Ok(RegistrationResult { volume, transform })
}

/// Transform change made by [`apply_result`], undone if a later step fails.
enum Installed {
    Matrix {
        target: TransformHandle,
        previous: Option<AffineMatrix>,
    },
    Field {
        handle: TransformHandle,
        replaces: TransformHandle,
    },
}

impl Installed {
    fn handle(&self) -> &TransformHandle {
        match self {
            Installed::Matrix { target, .. } => target,
            Installed::Field { handle, .. } => handle,
        }
    }

    fn undo<H: Host + ?Sized>(&self, host: &mut H) {
        match self {
            Installed::Matrix {
                target,
                previous: Some(previous),
            } => {
                if host.set_matrix_from_parent(target, previous).is_err() {
                    warn!(transform = %target.name, "Could not restore the previous matrix");
                }
            }
            Installed::Matrix { previous: None, .. } => {}
            Installed::Field { handle, .. } => host.remove_transform(handle),
        }
    }
}

/// Install a collected result in the host.
///
/// The reference stops observing any transform. A result volume replaces
/// the volume with the same name. A matrix is set on the target transform;
/// a displacement field replaces the target transform under the same name.
/// Without a result volume the floating volume observes the new transform.
/// Finally the reference is shown behind the result (or floating) volume.
///
/// The calls that can fail run first. If one fails, the changes before it
/// are undone and nothing else is touched.
pub fn apply_result<H: Host + ?Sized>(
    host: &mut H,
    request: &RegistrationRequest,
    result: &RegistrationResult,
    opacity: f64,
) -> Result<AppliedResult> {
    let installed = match &result.transform {
        None => None,
        Some(output) => Some(match &output.transformation {
            Transformation::Affine(matrix) => {
                let previous = host.matrix_from_parent(&output.target).ok();
                host.set_matrix_from_parent(&output.target, matrix)?;
                Installed::Matrix {
                    target: output.target.clone(),
                    previous,
                }
            }
            Transformation::DisplacementField(_) => Installed::Field {
                handle: host.load_displacement_field(&output.path, &output.target.name)?,
                replaces: output.target.clone(),
            },
        }),
    };

    let volume = match &result.volume {
        Some(output) => match host.load(&output.path, &output.name) {
            Ok(handle) => Some(handle),
            Err(err) => {
                if let Some(installed) = &installed {
                    installed.undo(host);
                }
                return Err(err);
            }
        },
        None => None,
    };

    if let Some(Installed::Field { replaces, .. }) = &installed {
        host.remove_transform(replaces);
    }
    let transform = installed.as_ref().map(|i| i.handle().clone());

    host.observe(&request.reference, None);
    if volume.is_none() {
        if let Some(handle) = &transform {
            host.observe(&request.floating, Some(handle));
        }
    }

    let foreground = volume.clone().unwrap_or_else(|| request.floating.clone());
    host.set_composite(Composite {
        background: request.reference.clone(),
        foreground,
        opacity,
    });

    info!(
        volume = volume.as_ref().map(|v| v.name.as_str()),
        transform = transform.as_ref().map(|t| t.name.as_str()),
        "Registration results loaded"
    );
    Ok(AppliedResult { volume, transform })
}
