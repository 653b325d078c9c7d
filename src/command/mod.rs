//! Registration requests and the command lines built from them.

pub mod builder;
pub mod temp;

pub use builder::*;
pub use temp::*;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};
use crate::host::{ThresholdRange, TransformHandle, VolumeHandle};
use crate::pyramid::LevelRange;
use crate::transform::AffineMatrix;
use crate::validation::ValidationReport;

/// Registration algorithm offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Rigid,
    Affine,
    NonLinear,
}

/// External executable family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Block-matching rigid/affine registration (`reg_aladin`).
    Aladin,
    /// Free-form deformation registration (`reg_f3d`).
    F3d,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Rigid, Algorithm::Affine, Algorithm::NonLinear];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Rigid => "Rigid",
            Algorithm::Affine => "Affine",
            Algorithm::NonLinear => "Non-linear",
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            Algorithm::Rigid | Algorithm::Affine => Tool::Aladin,
            Algorithm::NonLinear => Tool::F3d,
        }
    }

    pub fn is_linear(&self) -> bool {
        self.tool() == Tool::Aladin
    }

    /// Extension of the transform file the tool writes.
    pub fn transform_extension(&self) -> &'static str {
        match self.tool() {
            Tool::Aladin => ".txt",
            Tool::F3d => ".nii",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Aladin => f.write_str("reg_aladin"),
            Tool::F3d => f.write_str("reg_f3d"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "rigid" => Ok(Algorithm::Rigid),
            "affine" => Ok(Algorithm::Affine),
            "nonlinear" | "f3d" => Ok(Algorithm::NonLinear),
            _ => Err(format!(
                "unknown algorithm '{}' (expected rigid, affine or non-linear)",
                s
            )),
        }
    }
}

/// One registration to run. Immutable once built.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub reference: VolumeHandle,
    pub floating: VolumeHandle,
    /// Initial transform, "from parent" convention.
    pub initial_transform: Option<AffineMatrix>,
    pub algorithm: Algorithm,
    pub levels: LevelRange,
    pub reference_thresholds: ThresholdRange,
    pub floating_thresholds: ThresholdRange,
    /// Name for the resampled output volume, if one is wanted.
    pub result_volume: Option<String>,
    /// Transform that receives the result, if one is wanted.
    pub result_transform: Option<TransformHandle>,
}

impl RegistrationRequest {
    pub fn builder(reference: VolumeHandle, floating: VolumeHandle) -> RegistrationRequestBuilder {
        RegistrationRequestBuilder {
            reference,
            floating,
            initial_transform: None,
            algorithm: Algorithm::Rigid,
            levels: LevelRange::new(2, 3),
            reference_thresholds: ThresholdRange::new(0.0, 0.0),
            floating_thresholds: ThresholdRange::new(0.0, 0.0),
            result_volume: None,
            result_transform: None,
        }
    }

    pub fn same_volume(&self) -> bool {
        self.reference.id == self.floating.id
    }
}

pub struct RegistrationRequestBuilder {
    reference: VolumeHandle,
    floating: VolumeHandle,
    initial_transform: Option<AffineMatrix>,
    algorithm: Algorithm,
    levels: LevelRange,
    reference_thresholds: ThresholdRange,
    floating_thresholds: ThresholdRange,
    result_volume: Option<String>,
    result_transform: Option<TransformHandle>,
}

impl RegistrationRequestBuilder {
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn levels(mut self, levels: LevelRange) -> Self {
        self.levels = levels;
        self
    }

    pub fn initial_transform(mut self, matrix: AffineMatrix) -> Self {
        self.initial_transform = Some(matrix);
        self
    }

    pub fn reference_thresholds(mut self, range: ThresholdRange) -> Self {
        self.reference_thresholds = range;
        self
    }

    pub fn floating_thresholds(mut self, range: ThresholdRange) -> Self {
        self.floating_thresholds = range;
        self
    }

    pub fn result_volume(mut self, name: impl Into<String>) -> Self {
        self.result_volume = Some(name.into());
        self
    }

    pub fn result_transform(mut self, transform: TransformHandle) -> Self {
        self.result_transform = Some(transform);
        self
    }

    /// Fails unless at least one output (volume or transform) is requested.
    pub fn build(self) -> Result<RegistrationRequest> {
        if self.result_volume.is_none() && self.result_transform.is_none() {
            let mut report = ValidationReport::default();
            report.error("Select a result volume or a result transform");
            return Err(RegistrationError::Validation(report));
        }
        Ok(RegistrationRequest {
            reference: self.reference,
            floating: self.floating,
            initial_transform: self.initial_transform,
            algorithm: self.algorithm,
            levels: self.levels,
            reference_thresholds: self.reference_thresholds,
            floating_thresholds: self.floating_thresholds,
            result_volume: self.result_volume,
            result_transform: self.result_transform,
        })
    }
}
