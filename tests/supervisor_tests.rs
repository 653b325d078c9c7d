use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use niftyreg_bridge::command::{CommandPaths, ExpectedOutputs};
use niftyreg_bridge::supervisor::{missing_artifacts, ProcessOutput, RunState};
use niftyreg_bridge::*;
use tempfile::TempDir;

fn command(dir: &Path) -> RegistrationCommand {
    let result_volume = dir.join("flo_on_ref.nii");
    let result_transform = dir.join("t_ref-ref_flo-flo.txt");
    RegistrationCommand {
        program: PathBuf::from("/opt/niftyreg/reg_aladin"),
        args: vec!["-ref".to_string(), "ref.nii".to_string()],
        algorithm: Algorithm::Affine,
        levels: LevelRange::new(1, 4),
        paths: CommandPaths {
            reference: dir.join("ref.nii"),
            floating: dir.join("flo.nii"),
            result_volume: result_volume.clone(),
            result_transform: result_transform.clone(),
            initial_transform: None,
            command_file: None,
            log_file: None,
        },
        outputs: ExpectedOutputs {
            volume: Some(result_volume),
            transform: Some(result_transform),
        },
    }
}

/// Runner that writes `outputs` and exits with `exit_code`.
fn tool(exit_code: i32, outputs: Vec<PathBuf>) -> impl Fn(&Path, &[String]) -> io::Result<ProcessOutput> {
    move |_, _| {
        for path in &outputs {
            fs::write(path, b"output")?;
        }
        Ok(ProcessOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: "reg_aladin: error".to_string(),
        })
    }
}

#[test]
fn test_exit_zero_with_missing_output_fails() {
    let dir = TempDir::new().unwrap();
    let cmd = command(dir.path());
    let mut supervisor = RunSupervisor::new(tool(0, vec![]), ExitCodePolicy::Strict);

    let err = supervisor.run(&cmd).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RunFailure);
    let message = err.to_string();
    assert!(message.contains("Output volume not written on the disk"));
    assert!(message.ends_with("reg_aladin: error"));

    match supervisor.state() {
        RunState::Failed(failure) => assert_eq!(failure.missing.len(), 2),
        other => panic!("unexpected state {:?}", other),
    }
}

#[test]
fn test_nonzero_exit_with_outputs_fails_under_strict_policy() {
    let dir = TempDir::new().unwrap();
    let cmd = command(dir.path());
    let outputs: Vec<PathBuf> = cmd.outputs.iter().cloned().collect();
    let mut supervisor = RunSupervisor::new(tool(1, outputs), ExitCodePolicy::Strict);

    let err = supervisor.run(&cmd).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RunFailure);
    // every output exists, so no missing-output note
    assert!(!err.to_string().contains("not written"));
}

#[test]
fn test_nonzero_exit_with_outputs_succeeds_when_artifacts_decide() {
    let dir = TempDir::new().unwrap();
    let cmd = command(dir.path());
    let outputs: Vec<PathBuf> = cmd.outputs.iter().cloned().collect();
    let mut supervisor = RunSupervisor::new(tool(1, outputs), ExitCodePolicy::ArtifactsAuthoritative);

    let report = supervisor.run(&cmd).unwrap();
    assert_eq!(report.exit_code, Some(1));
    assert!(matches!(supervisor.state(), RunState::Succeeded(_)));
}

#[test]
fn test_only_requested_outputs_are_checked() {
    let dir = TempDir::new().unwrap();
    let mut cmd = command(dir.path());
    cmd.outputs.volume = None;
    let transform_only = vec![cmd.paths.result_transform.clone()];
    assert_eq!(missing_artifacts(&cmd.outputs), transform_only);

    let mut supervisor = RunSupervisor::new(tool(0, transform_only), ExitCodePolicy::Strict);
    assert!(supervisor.run(&cmd).is_ok());
    assert!(missing_artifacts(&cmd.outputs).is_empty());
}

#[test]
fn test_missing_executable_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = command(dir.path());
    cmd.program = dir.path().join("no_such_tool");
    let mut supervisor = RunSupervisor::new(SystemProcessRunner, ExitCodePolicy::Strict);

    let err = supervisor.run(&cmd).unwrap_err();
    assert!(matches!(err, RegistrationError::Spawn { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(matches!(supervisor.state(), RunState::LaunchFailed(_)));
}

#[test]
fn test_supervisor_can_run_again_after_failure() {
    let dir = TempDir::new().unwrap();
    let cmd = command(dir.path());
    let outputs: Vec<PathBuf> = cmd.outputs.iter().cloned().collect();
    let mut supervisor = RunSupervisor::new(tool(0, outputs), ExitCodePolicy::Strict);

    let mut other = command(dir.path());
    other.outputs.volume = Some(dir.path().join("never_written.nii"));
    assert!(supervisor.run(&other).is_err());
    assert!(supervisor.run(&cmd).is_ok());
    assert!(matches!(supervisor.state(), RunState::Succeeded(_)));
}

#[test]
fn test_classification_table() {
    let cases = [
        (Some(0), true, ExitCodePolicy::Strict, RunOutcome::Succeeded),
        (Some(0), false, ExitCodePolicy::Strict, RunOutcome::Failed),
        (Some(2), true, ExitCodePolicy::Strict, RunOutcome::Failed),
        (Some(2), false, ExitCodePolicy::Strict, RunOutcome::Failed),
        (Some(2), true, ExitCodePolicy::ArtifactsAuthoritative, RunOutcome::Succeeded),
        (None, false, ExitCodePolicy::ArtifactsAuthoritative, RunOutcome::Failed),
    ];
    for (exit_code, present, policy, expected) in cases {
        assert_eq!(classify(exit_code, present, policy), expected, "{:?} {} {:?}", exit_code, present, policy);
    }
}
