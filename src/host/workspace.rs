//! In-memory host backed by NIfTI files, used by the command-line tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use super::{
    Composite, DisplayStore, ThresholdRange, TransformHandle, TransformStore, VolumeHandle,
    VolumeStore,
};
use crate::error::{RegistrationError, Result};
use crate::image::{ImageGeometry, Volume};
use crate::io::{read_displacement_field, read_header_info, read_volume, write_volume, HeaderInfo};
use crate::transform::{AffineMatrix, DisplacementField};

struct VolumeEntry {
    handle: VolumeHandle,
    path: Option<PathBuf>,
    volume: Volume,
    observed: Option<Uuid>,
}

/// Stored transform contents.
#[derive(Debug, Clone)]
pub enum StoredTransform {
    /// Linear transform kept as its "to parent" matrix.
    Linear { to_parent: AffineMatrix },
    Displacement { path: PathBuf, field: DisplacementField },
}

struct TransformEntry {
    handle: TransformHandle,
    contents: StoredTransform,
}

#[derive(Default)]
pub struct Workspace {
    volumes: HashMap<Uuid, VolumeEntry>,
    transforms: HashMap<Uuid, TransformEntry>,
    thresholds: HashMap<Uuid, ThresholdRange>,
    composite: Option<Composite>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory volume that has no file yet.
    pub fn add_volume(&mut self, name: &str, volume: Volume) -> VolumeHandle {
        let handle = VolumeHandle::new(name);
        self.volumes.insert(
            handle.id,
            VolumeEntry {
                handle: handle.clone(),
                path: None,
                volume,
                observed: None,
            },
        );
        handle
    }

    /// Load a volume from disk, named after its file stem.
    pub fn open_volume(&mut self, path: &Path) -> Result<VolumeHandle> {
        let name = volume_name(path);
        self.load(path, &name)
    }

    /// Register a linear transform from its "from parent" matrix.
    pub fn add_linear_transform(
        &mut self,
        name: &str,
        from_parent: &AffineMatrix,
    ) -> Result<TransformHandle> {
        let handle = TransformHandle::new(name);
        let to_parent = invert(from_parent, name)?;
        self.transforms.insert(
            handle.id,
            TransformEntry {
                handle: handle.clone(),
                contents: StoredTransform::Linear { to_parent },
            },
        );
        Ok(handle)
    }

    /// Identity transform to receive a registration result.
    pub fn new_transform(&mut self, name: &str) -> TransformHandle {
        let identity = AffineMatrix::identity(3);
        let handle = TransformHandle::new(name);
        self.transforms.insert(
            handle.id,
            TransformEntry {
                handle: handle.clone(),
                contents: StoredTransform::Linear {
                    to_parent: identity,
                },
            },
        );
        handle
    }

    pub fn volume(&self, handle: &VolumeHandle) -> Option<&Volume> {
        self.volumes.get(&handle.id).map(|entry| &entry.volume)
    }

    pub fn volume_by_name(&self, name: &str) -> Option<VolumeHandle> {
        self.volumes
            .values()
            .find(|entry| entry.handle.name == name)
            .map(|entry| entry.handle.clone())
    }

    pub fn transform(&self, handle: &TransformHandle) -> Option<&StoredTransform> {
        self.transforms.get(&handle.id).map(|entry| &entry.contents)
    }

    pub fn transform_by_name(&self, name: &str) -> Option<TransformHandle> {
        self.transforms
            .values()
            .find(|entry| entry.handle.name == name)
            .map(|entry| entry.handle.clone())
    }

    /// Transform currently observed by `volume`.
    pub fn observed_transform(&self, volume: &VolumeHandle) -> Option<TransformHandle> {
        let id = self.volumes.get(&volume.id)?.observed?;
        self.transforms.get(&id).map(|entry| entry.handle.clone())
    }

    pub fn composite(&self) -> Option<&Composite> {
        self.composite.as_ref()
    }

    fn entry(&self, volume: &VolumeHandle) -> Result<&VolumeEntry> {
        self.volumes
            .get(&volume.id)
            .ok_or_else(|| RegistrationError::MissingGeometry(format!("unknown volume '{}'", volume.name)))
    }
}

fn volume_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "volume".to_string());
    for ext in crate::io::NIFTI_EXTENSIONS.iter().rev() {
        if let Some(stem) = file_name.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    file_name
}

fn invert(matrix: &AffineMatrix, name: &str) -> Result<AffineMatrix> {
    matrix
        .inverse()
        .ok_or_else(|| RegistrationError::format(format!("transform '{}' is singular", name)))
}

impl VolumeStore for Workspace {
    fn file_path(&self, volume: &VolumeHandle) -> Option<PathBuf> {
        self.volumes.get(&volume.id)?.path.clone()
    }

    fn save(&mut self, volume: &VolumeHandle, destination: &Path) -> Result<()> {
        let entry = self
            .volumes
            .get_mut(&volume.id)
            .ok_or_else(|| RegistrationError::MissingGeometry(format!("unknown volume '{}'", volume.name)))?;
        write_volume(&entry.volume, destination)?;
        entry.path = Some(destination.to_path_buf());
        debug!(volume = %volume.name, path = %destination.display(), "Volume saved");
        Ok(())
    }

    fn load(&mut self, path: &Path, name: &str) -> Result<VolumeHandle> {
        let volume = read_volume(path)?;
        self.volumes.retain(|_, entry| entry.handle.name != name);

        let handle = VolumeHandle::new(name);
        self.volumes.insert(
            handle.id,
            VolumeEntry {
                handle: handle.clone(),
                path: Some(path.to_path_buf()),
                volume,
                observed: None,
            },
        );
        debug!(volume = %name, path = %path.display(), "Volume loaded");
        Ok(handle)
    }

    fn forget_directory(&mut self, dir: &Path) {
        for entry in self.volumes.values_mut() {
            if entry.path.as_deref().is_some_and(|path| path.starts_with(dir)) {
                debug!(volume = %entry.handle.name, "File path dropped with its run directory");
                entry.path = None;
            }
        }
    }

    fn geometry(&self, volume: &VolumeHandle) -> Result<ImageGeometry> {
        Ok(self.entry(volume)?.volume.geometry.clone())
    }

    fn value_range(&self, volume: &VolumeHandle) -> Option<(f64, f64)> {
        self.volumes
            .get(&volume.id)?
            .volume
            .value_range()
            .map(|(lo, hi)| (lo as f64, hi as f64))
    }

    fn header_info(&self, volume: &VolumeHandle) -> Result<HeaderInfo> {
        let entry = self.entry(volume)?;
        match &entry.path {
            Some(path) => read_header_info(path),
            None => Err(RegistrationError::MissingGeometry(format!(
                "volume '{}' has no file on disk",
                volume.name
            ))),
        }
    }
}

impl TransformStore for Workspace {
    fn matrix_from_parent(&self, transform: &TransformHandle) -> Result<AffineMatrix> {
        let entry = self.transforms.get(&transform.id).ok_or_else(|| {
            RegistrationError::format(format!("unknown transform '{}'", transform.name))
        })?;
        match &entry.contents {
            StoredTransform::Linear { to_parent } => invert(to_parent, &transform.name),
            StoredTransform::Displacement { .. } => Err(RegistrationError::format(format!(
                "transform '{}' is a displacement field, not a matrix",
                transform.name
            ))),
        }
    }

    fn set_matrix_from_parent(
        &mut self,
        transform: &TransformHandle,
        matrix: &AffineMatrix,
    ) -> Result<()> {
        let to_parent = invert(matrix, &transform.name)?;
        let entry = self.transforms.get_mut(&transform.id).ok_or_else(|| {
            RegistrationError::format(format!("unknown transform '{}'", transform.name))
        })?;
        entry.contents = StoredTransform::Linear { to_parent };
        Ok(())
    }

    fn load_displacement_field(&mut self, path: &Path, name: &str) -> Result<TransformHandle> {
        let field = read_displacement_field(path)?;
        let handle = TransformHandle::new(name);
        self.transforms.insert(
            handle.id,
            TransformEntry {
                handle: handle.clone(),
                contents: StoredTransform::Displacement {
                    path: path.to_path_buf(),
                    field,
                },
            },
        );
        Ok(handle)
    }

    fn remove_transform(&mut self, transform: &TransformHandle) {
        self.transforms.remove(&transform.id);
        for entry in self.volumes.values_mut() {
            if entry.observed == Some(transform.id) {
                entry.observed = None;
            }
        }
    }

    fn observe(&mut self, volume: &VolumeHandle, transform: Option<&TransformHandle>) {
        if let Some(entry) = self.volumes.get_mut(&volume.id) {
            entry.observed = transform.map(|t| t.id);
        }
    }
}

impl DisplayStore for Workspace {
    fn threshold_range(&self, volume: &VolumeHandle) -> Option<ThresholdRange> {
        self.thresholds.get(&volume.id).copied()
    }

    fn set_threshold_range(&mut self, volume: &VolumeHandle, range: ThresholdRange) {
        self.thresholds.insert(volume.id, range);
    }

    fn set_composite(&mut self, composite: Composite) {
        self.composite = Some(composite);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::default_thresholds;

    #[test]
    fn test_volume_name_strips_nifti_extensions() {
        assert_eq!(volume_name(Path::new("/d/t1 brain.nii.gz")), "t1 brain");
        assert_eq!(volume_name(Path::new("/d/ct.img.gz")), "ct");
        assert_eq!(volume_name(Path::new("/d/ct.nrrd")), "ct.nrrd");
    }

    #[test]
    fn test_linear_transform_round_trip() {
        let mut workspace = Workspace::new();
        let matrix = AffineMatrix::from_rows([
            [2.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let handle = workspace.add_linear_transform("init", &matrix).unwrap();
        let back = workspace.matrix_from_parent(&handle).unwrap();
        assert!(back.approx_eq(&matrix, 1e-12));

        match workspace.transform(&handle).unwrap() {
            StoredTransform::Linear { to_parent } => assert_eq!(to_parent.get(0, 0), 0.5),
            other => panic!("unexpected transform {:?}", other),
        }
    }

    #[test]
    fn test_thresholds_fall_back_to_value_range() {
        let mut workspace = Workspace::new();
        let mut volume = Volume::zeros(ImageGeometry::new([2, 2, 2]));
        volume.values[[0, 0, 0]] = 100.0;
        let handle = workspace.add_volume("ct", volume);

        assert_eq!(default_thresholds(&workspace, &handle), ThresholdRange::new(0.0, 100.0));

        workspace.set_threshold_range(&handle, ThresholdRange::new(10.0, 50.0));
        assert_eq!(default_thresholds(&workspace, &handle), ThresholdRange::new(10.0, 50.0));
    }

    #[test]
    fn test_forget_directory_only_clears_paths_inside() {
        let dir = tempfile::TempDir::new().unwrap();
        let inside = dir.path().join("run").join("ct.nii");
        let outside = dir.path().join("mr.nii");
        std::fs::create_dir_all(inside.parent().unwrap()).unwrap();

        let mut workspace = Workspace::new();
        let ct = workspace.add_volume("ct", Volume::zeros(ImageGeometry::new([2, 2, 2])));
        let mr = workspace.add_volume("mr", Volume::zeros(ImageGeometry::new([2, 2, 2])));
        workspace.save(&ct, &inside).unwrap();
        workspace.save(&mr, &outside).unwrap();

        workspace.forget_directory(&dir.path().join("run"));
        assert_eq!(workspace.file_path(&ct), None);
        assert_eq!(workspace.file_path(&mr), Some(outside));
        assert!(workspace.volume(&ct).is_some());
    }

    #[test]
    fn test_in_memory_volume_has_no_header() {
        let mut workspace = Workspace::new();
        let handle = workspace.add_volume("mem", Volume::zeros(ImageGeometry::new([2, 2, 2])));
        assert!(workspace.file_path(&handle).is_none());
        assert!(workspace.header_info(&handle).is_err());
    }
}
