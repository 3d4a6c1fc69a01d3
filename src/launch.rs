use crate::error::{Error, Result};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};
use tracing::debug;

/// Search path handed to the launched command.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The environment a container process starts with. Nothing from the host
/// is passed through.
pub fn default_env() -> Vec<(String, String)> {
    vec![
        ("PATH".to_string(), DEFAULT_PATH.to_string()),
        ("HOME".to_string(), "/".to_string()),
    ]
}

/// A finished child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildProcess {
    pub pid: u32,
    pub exit_code: i32,
}

/// Runs one command with the launcher's own stdio and a synthetic environment.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: default_env(),
        }
    }

    /// Replaces the environment the command will see.
    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawns the command and blocks until it exits.
    ///
    /// A normal exit, zero or not, is a success carrying the exact code.
    /// Death by signal is reported as [`Error::ChildExit`].
    pub fn run(&self) -> Result<ChildProcess> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let pid = child.id();
        debug!(pid, command = %self.command, args = ?self.args, "spawned");

        let status = child.wait().map_err(|source| Error::Spawn {
            command: self.command.clone(),
            source,
        })?;

        match status.code() {
            Some(exit_code) => {
                debug!(pid, exit_code, "exited");
                Ok(ChildProcess { pid, exit_code })
            }
            None => Err(Error::ChildExit {
                command: self.command.clone(),
                status: match status.signal() {
                    Some(signal) => format!("killed by signal {signal}"),
                    None => status.to_string(),
                },
                code: None,
            }),
        }
    }
}
