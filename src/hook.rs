//! Post-processing hooks.
//!
//! A hook is a single executable path run after a feed publishes. It is
//! executed as argv[0] without a shell, and paths carrying shell
//! metacharacters are refused outright.

use anyhow::Result;
use tracing::{info, warn};

use crate::cmd_abstraction::{CommandExecutor, CommandOutput};
use crate::error::RknError;
use crate::validation::is_safe_hook_path;

/// Run `hook` for `feed` and log its combined output.
///
/// A non-zero exit is reported as an error carrying the output.
pub fn run_hook(executor: &dyn CommandExecutor, feed: &str, hook: &str) -> Result<CommandOutput> {
    let hook = hook.trim();
    if !is_safe_hook_path(hook) {
        return Err(RknError::Config(format!(
            "[{}] refusing to run hook '{}': forbidden characters",
            feed, hook
        ))
        .into());
    }

    info!("[{}] Running post hook {}", feed, hook);
    let output = executor.execute(hook, &[])?;
    let combined = output.combined();

    if output.success {
        if !combined.is_empty() {
            info!("[{}] Hook output:\n{}", feed, combined);
        }
        Ok(output)
    } else {
        warn!(
            "[{}] Hook {} exited with {:?}:\n{}",
            feed, hook, output.code, combined
        );
        anyhow::bail!("[{}] hook {} failed with exit code {:?}", feed, hook, output.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::MockCommandExecutor;

    #[test]
    fn test_unsafe_hook_is_never_executed() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().times(0);

        for hook in ["/bin/reload; rm -rf /", "/bin/a|b", "/bin/`id`", "/bin/*", "/bin/x?", " "] {
            assert!(run_hook(&mock, "dump", hook).is_err(), "ran {:?}", hook);
        }
    }

    #[test]
    fn test_hook_success() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "/usr/local/bin/reload.sh" && args.is_empty())
            .times(1)
            .returning(|_, _| {
                Ok(CommandOutput {
                    stdout: "ok\n".into(),
                    success: true,
                    code: Some(0),
                    ..Default::default()
                })
            });

        let output = run_hook(&mock, "dump", " /usr/local/bin/reload.sh ").unwrap();
        assert_eq!(output.combined(), "ok");
    }

    #[test]
    fn test_hook_failure_is_error() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().times(1).returning(|_, _| {
            Ok(CommandOutput {
                stderr: "no such table".into(),
                success: false,
                code: Some(2),
                ..Default::default()
            })
        });

        let err = run_hook(&mock, "social", "/usr/local/bin/reload.sh").unwrap_err();
        assert!(err.to_string().contains("exit code Some(2)"));
    }
}
