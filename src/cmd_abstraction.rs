//! Command execution abstraction for testability.
//!
//! Post hooks and `ipset` are external programs. Running them through the
//! [`CommandExecutor`] trait lets unit tests script their behavior without
//! spawning anything.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

#[cfg(test)]
use mockall::automock;

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether the command exited with code 0
    pub success: bool,
    /// The exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Stdout followed by stderr, trimmed, as a hook's log would show it.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Runs external programs directly as argv, never through a shell.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Execute `cmd` with `args` and capture its output.
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;

    /// Execute `cmd` with `args`, feeding `stdin` to it.
    fn execute_with_stdin(&self, cmd: &str, args: &[String], stdin: &str) -> Result<CommandOutput>;
}

/// Executor backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to start {}", cmd))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    fn execute_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_data.as_bytes())
                .with_context(|| format!("Failed to write to {} stdin", cmd))?;
        }

        let output = child.wait_with_output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Convert `&[&str]` to the owned form the trait takes.
///
/// mockall has trouble with the nested lifetimes of `&[&str]`.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
