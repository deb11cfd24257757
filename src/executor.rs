//! Command execution: run to completion (`exec`) or launch detached (`spawn`).

use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors that can occur when launching a command
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no command given")]
    EmptyCommand,

    #[error("failed to start '{command}': {source}")]
    Start {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// The rendered command line
    pub command: String,
    /// Process exit status; -1 when terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Result of a detached launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOutput {
    pub command: String,
    /// 0 once launched; on Windows, the exit status of the `start` wrapper
    pub exit_code: i32,
}

/// Runs client-requested commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    debug: bool,
}

impl Executor {
    /// With `debug` set, captured output and exit codes are logged.
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Run `command` to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is not an error: the exit code is part of the output.
    /// Only a failure to start the process is reported as `Err`.
    pub async fn exec(
        &self,
        command: &str,
        args: &[String],
        env: &[String],
    ) -> Result<ExecOutput, ExecError> {
        if command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let rendered = command_line(command, args);
        debug!(command = %rendered, "exec");

        let output = Command::new(command)
            .args(args)
            .envs(parse_env(env))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecError::Start {
                command: rendered.clone(),
                source,
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if self.debug {
            debug!(exit_code, %stdout, %stderr, "exec finished");
        }

        Ok(ExecOutput {
            command: rendered,
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Launch `command` without waiting for it to finish.
    ///
    /// On Windows the command line is handed to `cmd /c start` so the process
    /// gets its own console in the logged-in session; elsewhere it is started
    /// directly in a new process group with all stdio closed.
    pub async fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &[String],
    ) -> Result<SpawnOutput, ExecError> {
        if command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let rendered = command_line(command, args);
        debug!(command = %rendered, "spawn");

        let exit_code = launch_detached(command, args, env, &rendered).await?;

        if self.debug {
            debug!(exit_code, "spawned");
        }

        Ok(SpawnOutput {
            command: rendered,
            exit_code,
        })
    }
}

/// `start` treats a leading quoted argument as the window title, so pass an
/// empty one.
#[cfg(any(windows, test))]
fn start_command(rendered: &str) -> String {
    format!("start \"\" {}", rendered)
}

#[cfg(windows)]
async fn launch_detached(
    _command: &str,
    _args: &[String],
    env: &[String],
    rendered: &str,
) -> Result<i32, ExecError> {
    let status = Command::new("cmd")
        .arg("/c")
        .raw_arg(start_command(rendered))
        .envs(parse_env(env))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| ExecError::Start {
            command: rendered.to_string(),
            source,
        })?;
    Ok(status.code().unwrap_or(-1))
}

#[cfg(not(windows))]
async fn launch_detached(
    command: &str,
    args: &[String],
    env: &[String],
    rendered: &str,
) -> Result<i32, ExecError> {
    // The child is not awaited; tokio reaps it in the background once it exits.
    Command::new(command)
        .args(args)
        .envs(parse_env(env))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|source| ExecError::Start {
            command: rendered.to_string(),
            source,
        })?;
    Ok(0)
}

/// Render a command and its arguments as a single display string.
pub fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `KEY=VALUE` entries; malformed entries are dropped with a warning.
fn parse_env(env: &[String]) -> Vec<(String, String)> {
    env.iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!(entry = %entry, "ignoring malformed environment entry");
                None
            }
        })
        .collect()
}
