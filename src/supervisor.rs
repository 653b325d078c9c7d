//! Runs a registration tool and decides whether the run succeeded.
//!
//! The tools are known to report exit code 0 on failure, so success is
//! decided from the exit code together with the presence of the requested
//! output files (see [`classify`]).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::command::{ExpectedOutputs, RegistrationCommand};
use crate::error::{RegistrationError, Result};
use crate::io::{copy_header_bytes, is_analyze_header};
use crate::logging::{get_correlation_id, RunSpan};

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Launches an executable and waits for it.
pub trait ProcessRunner {
    fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ProcessOutput>;
}

impl<F> ProcessRunner for F
where
    F: Fn(&Path, &[String]) -> std::io::Result<ProcessOutput>,
{
    fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ProcessOutput> {
        self(program, args)
    }
}

/// Runs the real executable with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ProcessOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// How much the exit code counts when classifying a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCodePolicy {
    /// Succeeded only if the exit code is 0 and every requested output exists.
    #[default]
    Strict,
    /// The outputs decide; a nonzero exit code is only logged.
    ArtifactsAuthoritative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Classify a finished run.
pub fn classify(exit_code: Option<i32>, artifacts_present: bool, policy: ExitCodePolicy) -> RunOutcome {
    let succeeded = match policy {
        ExitCodePolicy::Strict => exit_code == Some(0) && artifacts_present,
        ExitCodePolicy::ArtifactsAuthoritative => artifacts_present,
    };
    if succeeded {
        RunOutcome::Succeeded
    } else {
        RunOutcome::Failed
    }
}

/// Requested outputs that are not on disk.
pub fn missing_artifacts(outputs: &ExpectedOutputs) -> Vec<PathBuf> {
    outputs.iter().filter(|path| !path.is_file()).cloned().collect()
}

/// A run that completed but is classified as failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub missing: Vec<PathBuf>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.missing.is_empty() {
            write!(f, "Output volume not written on the disk\n\n")?;
        }
        if self.stderr.is_empty() && self.missing.is_empty() {
            return match self.exit_code {
                Some(code) => write!(f, "process exited with code {}", code),
                None => write!(f, "process was terminated by a signal"),
            };
        }
        write!(f, "{}", self.stderr)
    }
}

/// What a successful run reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Supervisor state: `Idle -> Running -> {Succeeded, Failed}`.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded(RunReport),
    Failed(RunFailure),
    /// The executable could not be started.
    LaunchFailed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Idle | RunState::Running)
    }
}

/// Runs one command at a time, blocking until the process exits.
pub struct RunSupervisor<R: ProcessRunner> {
    runner: R,
    policy: ExitCodePolicy,
    state: RunState,
}

impl<R: ProcessRunner> RunSupervisor<R> {
    pub fn new(runner: R, policy: ExitCodePolicy) -> Self {
        Self {
            runner,
            policy,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn policy(&self) -> ExitCodePolicy {
        self.policy
    }

    /// Run `command` and classify the result.
    ///
    /// On success an Analyze `.hdr` result is repaired from the reference
    /// header before returning.
    pub fn run(&mut self, command: &RegistrationCommand) -> Result<RunReport> {
        let span = RunSpan::new(
            command.algorithm.name(),
            &command.paths.reference.to_string_lossy(),
            &command.paths.floating.to_string_lossy(),
            get_correlation_id(),
        );
        let _enter = span.enter();
        span.record_levels(
            command.levels.levels_to_build(),
            command.levels.levels_to_perform(),
        );

        self.state = RunState::Running;
        info!("Running registration:\n{}", command.pretty());

        let output = match self.runner.run(&command.program, &command.args) {
            Ok(output) => output,
            Err(source) => {
                error!(
                    program = %command.program.display(),
                    "Could not launch the registration tool. Is it correctly installed?"
                );
                self.state = RunState::LaunchFailed(source.to_string());
                span.record_outcome(None, false);
                return Err(RegistrationError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };

        info!("{} returned {:?}", command.algorithm.tool(), output.exit_code);
        if let Some(log_file) = &command.paths.log_file {
            if let Err(err) = write_log_file(log_file, &output) {
                return Err(self.fail_after_exit(&span, output.exit_code, err));
            }
        }

        let missing = missing_artifacts(&command.outputs);
        let outcome = classify(output.exit_code, missing.is_empty(), self.policy);

        if outcome == RunOutcome::Failed {
            span.record_outcome(output.exit_code, false);
            let failure = RunFailure {
                exit_code: output.exit_code,
                stderr: output.stderr,
                missing,
            };
            error!(missing = failure.missing.len(), "Registration error: {}", failure);
            self.state = RunState::Failed(failure.clone());
            return Err(RegistrationError::RunFailure(failure));
        }

        if output.exit_code != Some(0) {
            warn!(
                exit_code = ?output.exit_code,
                "Tool reported a failure but every requested output exists"
            );
        }

        if let Err(err) = repair_analyze_result(&command.paths.reference, &command.paths.result_volume) {
            return Err(self.fail_after_exit(&span, output.exit_code, err));
        }

        let duration = span.record_outcome(output.exit_code, true);
        info!("Registration completed in {:.2} seconds", duration.as_secs_f64());

        let report = RunReport {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        };
        self.state = RunState::Succeeded(report.clone());
        Ok(report)
    }

    /// Mark the run failed when handling its output went wrong.
    fn fail_after_exit(
        &mut self,
        span: &RunSpan,
        exit_code: Option<i32>,
        err: RegistrationError,
    ) -> RegistrationError {
        span.record_outcome(exit_code, false);
        error!("Could not process the tool output: {}", err);
        self.state = RunState::Failed(RunFailure {
            exit_code,
            stderr: err.to_string(),
            missing: Vec::new(),
        });
        err
    }
}

/// Replace the header of an Analyze result with the reference header.
///
/// Returns whether a repair happened.
pub fn repair_analyze_result(reference: &Path, result: &Path) -> Result<bool> {
    if !is_analyze_header(result) || !result.is_file() {
        return Ok(false);
    }
    info!(result = %result.display(), "Correcting result .hdr image");
    copy_header_bytes(reference, result)?;
    Ok(true)
}

fn write_log_file(path: &Path, output: &ProcessOutput) -> Result<()> {
    let exit = match output.exit_code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    };
    let content = format!(
        "exit code: {}\n\n[stdout]\n{}\n\n[stderr]\n{}\n",
        exit, output.stdout, output.stderr
    );
    fs::write(path, content).map_err(|e| RegistrationError::io(path, e))
}
