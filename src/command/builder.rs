use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Algorithm, RegistrationRequest, RunDirectory, Tool};
use crate::config::ExecutableConfig;
use crate::error::{RegistrationError, Result};
use crate::host::VolumeStore;
use crate::io::has_nifti_extension;
use crate::pyramid::LevelRange;
use crate::transform::write_matrix_file;

/// Files a registration run reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPaths {
    pub reference: PathBuf,
    pub floating: PathBuf,
    pub result_volume: PathBuf,
    pub result_transform: PathBuf,
    pub initial_transform: Option<PathBuf>,
    /// Where the command line is saved for debugging.
    pub command_file: Option<PathBuf>,
    /// Where the tool's stdout/stderr are saved.
    pub log_file: Option<PathBuf>,
}

/// Artifacts whose presence decides whether a run succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpectedOutputs {
    pub volume: Option<PathBuf>,
    pub transform: Option<PathBuf>,
}

impl ExpectedOutputs {
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.volume.iter().chain(self.transform.iter())
    }
}

/// Fully resolved invocation of one registration tool.
#[derive(Debug, Clone)]
pub struct RegistrationCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub algorithm: Algorithm,
    /// Pyramid levels behind `-ln` and `-lp`.
    pub levels: LevelRange,
    pub paths: CommandPaths,
    pub outputs: ExpectedOutputs,
}

impl RegistrationCommand {
    pub fn contains(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    /// Value following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Single-line form, arguments separated by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Shell-pasteable form with each flag on its own continuation line.
    pub fn pretty(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        for arg in &self.args {
            if is_flag(arg) {
                parts.push("\\\n".to_string());
            }
            parts.push(arg.clone());
        }
        parts.join(" ")
    }
}

/// `-name` arguments; negative numbers are values.
fn is_flag(arg: &str) -> bool {
    arg.strip_prefix('-')
        .and_then(|rest| rest.chars().next())
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false)
}

/// Builds tool invocations from registration requests.
pub struct CommandBuilder<'a> {
    executables: &'a ExecutableConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(executables: &'a ExecutableConfig) -> Self {
        Self { executables }
    }

    pub fn program(&self, tool: Tool) -> PathBuf {
        match tool {
            Tool::Aladin => self.executables.aladin_path(),
            Tool::F3d => self.executables.f3d_path(),
        }
    }

    /// Argument list for `request` with all paths already resolved.
    pub fn build(&self, request: &RegistrationRequest, paths: CommandPaths) -> RegistrationCommand {
        let algorithm = request.algorithm;
        let tool = algorithm.tool();
        let arg = |p: &Path| p.to_string_lossy().into_owned();

        let mut args = vec![
            "-ref".to_string(),
            arg(&paths.reference),
            "-flo".to_string(),
            arg(&paths.floating),
            "-res".to_string(),
            arg(&paths.result_volume),
        ];

        let (ref_thr, flo_thr) = (request.reference_thresholds, request.floating_thresholds);
        match tool {
            Tool::Aladin => {
                match algorithm {
                    Algorithm::Rigid => args.push("-rigOnly".to_string()),
                    _ => args.push("-affDirect".to_string()),
                }
                args.extend([
                    "-aff".to_string(),
                    arg(&paths.result_transform),
                    "-refLowThr".to_string(),
                    ref_thr.lower.to_string(),
                    "-refUpThr".to_string(),
                    ref_thr.upper.to_string(),
                    "-floLowThr".to_string(),
                    flo_thr.lower.to_string(),
                    "-floUpThr".to_string(),
                    flo_thr.upper.to_string(),
                ]);
            }
            Tool::F3d => {
                args.extend([
                    "-cpp".to_string(),
                    arg(&paths.result_transform),
                    "-rLwTh".to_string(),
                    ref_thr.lower.to_string(),
                    "-rUpTh".to_string(),
                    ref_thr.upper.to_string(),
                    "-fLwTh".to_string(),
                    flo_thr.lower.to_string(),
                    "-fUpTh".to_string(),
                    flo_thr.upper.to_string(),
                ]);
            }
        }

        args.extend([
            "-ln".to_string(),
            request.levels.levels_to_build().to_string(),
            "-lp".to_string(),
            request.levels.levels_to_perform().to_string(),
        ]);

        if let Some(initial) = &paths.initial_transform {
            let flag = match tool {
                Tool::Aladin => "-inaff",
                Tool::F3d => "-aff",
            };
            args.extend([flag.to_string(), arg(initial)]);
        }

        let outputs = ExpectedOutputs {
            volume: request
                .result_volume
                .as_ref()
                .map(|_| paths.result_volume.clone()),
            transform: request
                .result_transform
                .as_ref()
                .map(|_| paths.result_transform.clone()),
        };

        RegistrationCommand {
            program: self.program(tool),
            args,
            algorithm,
            levels: request.levels,
            paths,
            outputs,
        }
    }

    /// Resolve every path for `request` inside `run_dir` and build the command.
    ///
    /// Inputs without a NIfTI-family file are saved into the run directory,
    /// and the initial transform (if any) is written in the tool's matrix
    /// format.
    pub fn prepare<S: VolumeStore + ?Sized>(
        &self,
        request: &RegistrationRequest,
        store: &mut S,
        run_dir: &mut RunDirectory,
        save_command_file: bool,
    ) -> Result<RegistrationCommand> {
        let ref_name = request.reference.name.as_str();
        let flo_name = request.floating.name.as_str();
        let algorithm = request.algorithm;

        let reference = resolve_input(store, &request.reference, run_dir)?;
        let floating = resolve_input(store, &request.floating, run_dir)?;

        let result_volume = run_dir.allocate(Some(&format!("{}_on_{}", flo_name, ref_name)), ".nii");
        let result_transform = run_dir.allocate(
            Some(&format!("t_ref-{}_flo-{}", ref_name, flo_name)),
            algorithm.transform_extension(),
        );

        let (command_file, log_file) = if save_command_file {
            let suffix = format!("ref-{}_flo-{}_{}", ref_name, flo_name, algorithm);
            (
                Some(run_dir.allocate(Some(&format!("cmd_{}", suffix)), ".txt")),
                Some(run_dir.allocate(Some(&format!("log_{}", suffix)), ".txt")),
            )
        } else {
            (None, None)
        };

        let initial_transform = match &request.initial_transform {
            Some(matrix) => {
                let path = run_dir.allocate(None, ".txt");
                write_matrix_file(matrix, &path)?;
                debug!(path = %path.display(), "Initial transform written");
                Some(path)
            }
            None => None,
        };

        let paths = CommandPaths {
            reference,
            floating,
            result_volume,
            result_transform,
            initial_transform,
            command_file,
            log_file,
        };
        let command = self.build(request, paths);

        if let Some(path) = &command.paths.command_file {
            fs::write(path, command.command_line()).map_err(|e| RegistrationError::io(path, e))?;
        }

        info!(
            algorithm = %algorithm,
            program = %command.program.display(),
            "Registration command prepared"
        );
        Ok(command)
    }
}

/// On-disk NIfTI path of `volume`, saving it into the run directory if needed.
pub fn resolve_input<S: VolumeStore + ?Sized>(
    store: &mut S,
    volume: &crate::host::VolumeHandle,
    run_dir: &mut RunDirectory,
) -> Result<PathBuf> {
    match store.file_path(volume) {
        Some(path) if has_nifti_extension(&path) && path.is_file() => Ok(path),
        _ => {
            let path = run_dir.allocate(Some(&volume.name), ".nii");
            store.save(volume, &path)?;
            debug!(volume = %volume.name, path = %path.display(), "Input saved as NIfTI");
            Ok(path)
        }
    }
}
