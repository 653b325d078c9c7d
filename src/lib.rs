pub mod command;
pub mod config;
pub mod error;
pub mod host;
pub mod image;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod pyramid;
pub mod results;
pub mod supervisor;
pub mod transform;
pub mod validation;

pub use command::{Algorithm, CommandBuilder, RegistrationCommand, RegistrationRequest, RunDirectory, Tool};
pub use config::Config;
pub use error::{ErrorKind, RegistrationError, Result};
pub use host::{Host, ThresholdRange, TransformHandle, VolumeHandle, Workspace};
pub use image::{ImageGeometry, Volume};
pub use pipeline::{RegistrationOutcome, RegistrationPipeline};
pub use pyramid::{compute_levels, LevelRange, LevelSelector, PyramidLevelMap};
pub use results::{apply_result, collect_result, RegistrationResult};
pub use supervisor::{classify, ExitCodePolicy, ProcessRunner, RunOutcome, RunSupervisor, SystemProcessRunner};
pub use transform::{AffineMatrix, DisplacementField, Transformation};
pub use validation::{validate_inputs, ValidationReport};
