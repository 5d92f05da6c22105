//! Invocation of the external trial runner.

use kt_types::{RunnerError, RunnerSettings, ScenarioPaths};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::identifier::Workspace;

/// Runs one simulation of the scenario with a given trial config.
#[derive(Debug, Clone)]
pub struct TrialRunner {
    settings: RunnerSettings,
    scenario: ScenarioPaths,
}

impl TrialRunner {
    pub fn new(settings: RunnerSettings, scenario: ScenarioPaths) -> Self {
        Self { settings, scenario }
    }

    /// Program and arguments for one trial.
    pub fn command_line(&self, workspace: &Workspace, config_path: &Path) -> (OsString, Vec<OsString>) {
        let mut args: Vec<OsString> = Vec::with_capacity(15);
        let program = match &self.settings.interpreter {
            Some(interpreter) => {
                args.push(self.settings.executable.clone().into_os_string());
                interpreter.clone().into_os_string()
            }
            None => self.settings.executable.clone().into_os_string(),
        };

        let flags: [(&str, OsString); 7] = [
            ("--trial", workspace.id.to_string().into()),
            ("--logdir", workspace.path.clone().into_os_string()),
            ("--bag", self.scenario.recording.clone().into_os_string()),
            ("--config", config_path.to_path_buf().into_os_string()),
            ("--launch", self.scenario.launch.clone().into_os_string()),
            ("--timeout", self.settings.timeout_seconds.to_string().into()),
            ("--catkin_ws", self.scenario.workspace_root.clone().into_os_string()),
        ];
        for (flag, value) in flags {
            args.push(flag.into());
            args.push(value);
        }
        (program, args)
    }

    /// Run the trial and wait for it, killing the process once the deadline
    /// (timeout plus grace) passes.
    pub async fn run(&self, workspace: &Workspace, config_path: &Path) -> Result<(), RunnerError> {
        let (program, args) = self.command_line(workspace, config_path);
        debug!("Invoking {:?} {:?}", program, args);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // The runner leads its own process group so everything it starts
        // can be killed together.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                message: format!("{}: {}", program.to_string_lossy(), e),
            })?;

        let status = match tokio::time::timeout(self.settings.deadline(), child.wait()).await {
            Ok(waited) => waited.map_err(|e| RunnerError::Spawn {
                message: format!("failed to wait for trial runner: {e}"),
            })?,
            Err(_) => {
                warn!(
                    "Trial {} exceeded {}s, killing the runner",
                    workspace.id,
                    self.settings.deadline().as_secs()
                );
                terminate(&mut child, workspace).await;
                return Err(RunnerError::Timeout {
                    timeout_seconds: self.settings.timeout_seconds,
                });
            }
        };

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(RunnerError::NonZeroExit { code }),
            None => Err(RunnerError::Terminated),
        }
    }
}

/// Kill the runner's whole process group, then reap the runner.
async fn terminate(child: &mut Child, workspace: &Workspace) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => {
                    if let Err(e) = child.wait().await {
                        warn!("Failed to reap trial runner for {}: {}", workspace.id, e);
                    }
                    return;
                }
                Err(e) => warn!("Failed to kill process group {} for {}: {}", pid, workspace.id, e),
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill trial runner for {}: {}", workspace.id, e);
    }
}
