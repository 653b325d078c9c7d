//! End-to-end registration: prepare, validate, run, load.

pub mod types;

pub use types::*;

use chrono::Local;
use tracing::{debug, info};

use crate::command::{CommandBuilder, RegistrationCommand, RegistrationRequest, RunDirectory};
use crate::config::Config;
use crate::error::Result;
use crate::host::Host;
use crate::logging::{get_correlation_id, new_correlation_id, StageSpan};
use crate::results::{apply_result, collect_result, AppliedResult};
use crate::supervisor::{ProcessRunner, RunReport, RunSupervisor};
use crate::validation::validate_inputs;

/// Run `f` inside a stage span and record how long it took.
fn stage<T>(context: &mut PipelineContext, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let span = StageSpan::new(name, get_correlation_id());
    let _enter = span.enter();
    let result = f();
    let duration = span.record_completion(result.is_ok());
    context.stage_timings.push(StageTime {
        stage_name: name.to_string(),
        duration_ms: duration.as_secs_f64() * 1000.0,
    });
    result
}

/// Drives a registration request through the external tools.
pub struct RegistrationPipeline<'a, R: ProcessRunner> {
    config: &'a Config,
    supervisor: RunSupervisor<R>,
}

impl<'a, R: ProcessRunner> RegistrationPipeline<'a, R> {
    pub fn new(config: &'a Config, runner: R) -> Self {
        Self {
            config,
            supervisor: RunSupervisor::new(runner, config.run.exit_code_policy),
        }
    }

    pub fn supervisor(&self) -> &RunSupervisor<R> {
        &self.supervisor
    }

    /// Create the run directory and build the command, saving inputs as
    /// needed. Nothing is executed.
    pub fn prepare<H: Host + ?Sized>(
        &self,
        host: &mut H,
        request: &RegistrationRequest,
    ) -> Result<(RunDirectory, RegistrationCommand)> {
        let mut run_dir = RunDirectory::create(self.config.run.temp_root.as_deref(), Local::now())?;
        debug!(dir = %run_dir.path().display(), "Run directory created");
        let prepared = CommandBuilder::new(&self.config.executables).prepare(
            request,
            host,
            &mut run_dir,
            self.config.run.save_command_files,
        );
        match prepared {
            Ok(command) => Ok((run_dir, command)),
            Err(err) => {
                host.forget_directory(run_dir.path());
                Err(err)
            }
        }
    }

    /// Run the registration and install its results in `host`.
    ///
    /// Validation errors stop the run before the tool starts. Results are
    /// fully decoded before the host is modified. When the run directory is
    /// not kept, the host forgets the files it held, whether or not the run
    /// succeeded.
    pub fn run<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        request: &RegistrationRequest,
    ) -> Result<RegistrationOutcome> {
        let correlation_id = new_correlation_id();
        let mut context = PipelineContext::default();
        info!(
            %correlation_id,
            algorithm = %request.algorithm,
            reference = %request.reference.name,
            floating = %request.floating.name,
            "Starting registration"
        );

        let (mut run_dir, command) = stage(&mut context, "prepare", || self.prepare(host, request))?;

        let executed = self.execute(host, request, &command, &mut run_dir, &mut context);
        let run_directory = if self.config.run.keep_run_directory {
            Some(run_dir.keep())
        } else {
            host.forget_directory(run_dir.path());
            None
        };
        let (run_report, applied) = executed?;

        info!(
            %correlation_id,
            total_ms = context.total_duration_ms(),
            "Registration pipeline finished"
        );
        Ok(RegistrationOutcome {
            correlation_id,
            command,
            report: run_report,
            applied,
            context,
            run_directory,
        })
    }

    /// Validate, run the tool and load its results.
    fn execute<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        request: &RegistrationRequest,
        command: &RegistrationCommand,
        run_dir: &mut RunDirectory,
        context: &mut PipelineContext,
    ) -> Result<(RunReport, AppliedResult)> {
        let report = stage(context, "validate", || {
            let reference = host.header_info(&request.reference)?;
            let floating = host.header_info(&request.floating)?;
            validate_inputs(request.same_volume(), &reference, &floating).into_result()
        })?;
        for warning in report.warnings {
            context.warn("validate", warning);
        }

        let supervisor = &mut self.supervisor;
        let run_report = stage(context, "run", || supervisor.run(command))?;

        let opacity = self.config.display.overlay_opacity;
        let applied = stage(context, "load", || {
            let geometry = host.geometry(&request.reference)?;
            let result = collect_result(request, command, &geometry, run_dir)?;
            apply_result(host, request, &result, opacity)
        })?;

        Ok((run_report, applied))
    }
}
