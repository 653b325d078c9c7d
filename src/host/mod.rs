//! Interfaces to the host application that owns volumes, transforms and
//! display state.
//!
//! The registration pipeline never reaches into a global scene; everything
//! it needs from the host goes through these traits.

pub mod workspace;

pub use workspace::*;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::image::ImageGeometry;
use crate::io::HeaderInfo;
use crate::transform::AffineMatrix;

/// Reference to a scalar volume held by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeHandle {
    pub id: Uuid,
    pub name: String,
}

/// Reference to a transform held by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformHandle {
    pub id: Uuid,
    pub name: String,
}

impl VolumeHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

impl TransformHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Lower/upper intensity thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub lower: f64,
    pub upper: f64,
}

impl ThresholdRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }
}

impl fmt::Display for ThresholdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Background/foreground overlay used to compare registered images.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub background: VolumeHandle,
    pub foreground: VolumeHandle,
    pub opacity: f64,
}

/// Volume storage: where volumes live on disk and how they are loaded.
pub trait VolumeStore {
    /// On-disk path backing `volume`, if any.
    fn file_path(&self, volume: &VolumeHandle) -> Option<PathBuf>;

    /// Persist `volume` to `destination`; it becomes the volume's path.
    fn save(&mut self, volume: &VolumeHandle, destination: &Path) -> Result<()>;

    /// Load a volume from disk, replacing any volume with the same name.
    /// Nothing is replaced when loading fails.
    fn load(&mut self, path: &Path, name: &str) -> Result<VolumeHandle>;

    /// Drop every file path inside `dir`, which is about to be deleted.
    /// The volumes stay, now without a file.
    fn forget_directory(&mut self, dir: &Path);

    fn geometry(&self, volume: &VolumeHandle) -> Result<ImageGeometry>;

    /// Intensity range of the voxel values.
    fn value_range(&self, volume: &VolumeHandle) -> Option<(f64, f64)>;

    /// Header codes of the file backing `volume`.
    fn header_info(&self, volume: &VolumeHandle) -> Result<HeaderInfo>;
}

/// Transform nodes.
pub trait TransformStore {
    /// Matrix mapping parent coordinates into the transform's space.
    fn matrix_from_parent(&self, transform: &TransformHandle) -> Result<AffineMatrix>;

    fn set_matrix_from_parent(
        &mut self,
        transform: &TransformHandle,
        matrix: &AffineMatrix,
    ) -> Result<()>;

    /// Load a persisted vector image as a displacement-field transform.
    fn load_displacement_field(&mut self, path: &Path, name: &str) -> Result<TransformHandle>;

    fn remove_transform(&mut self, transform: &TransformHandle);

    /// Make `volume` observe `transform`, or no transform.
    fn observe(&mut self, volume: &VolumeHandle, transform: Option<&TransformHandle>);
}

/// Display properties.
pub trait DisplayStore {
    fn threshold_range(&self, volume: &VolumeHandle) -> Option<ThresholdRange>;

    fn set_threshold_range(&mut self, volume: &VolumeHandle, range: ThresholdRange);

    fn set_composite(&mut self, composite: Composite);
}

/// Everything the pipeline needs from the host.
pub trait Host: VolumeStore + TransformStore + DisplayStore {}

impl<T: VolumeStore + TransformStore + DisplayStore> Host for T {}

/// Thresholds shown for `volume`: the display thresholds, else its
/// intensity range, else `[0, 0]`.
pub fn default_thresholds<H: VolumeStore + DisplayStore + ?Sized>(
    host: &H,
    volume: &VolumeHandle,
) -> ThresholdRange {
    host.threshold_range(volume)
        .or_else(|| {
            host.value_range(volume)
                .map(|(lo, hi)| ThresholdRange::new(lo, hi))
        })
        .unwrap_or(ThresholdRange::new(0.0, 0.0))
}
