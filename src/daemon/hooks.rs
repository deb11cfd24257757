//! Startup and shutdown hook commands.

use tracing::{info, warn};

use crate::config::HookCommand;
use crate::executor::Executor;

/// Run a hook to completion and log what it printed.
///
/// Hooks are best effort: a command that cannot be started or exits
/// non-zero is logged and otherwise ignored. Returns the exit code when the
/// command ran.
pub async fn run_hook(label: &str, hook: &HookCommand, executor: &Executor) -> Option<i32> {
    info!("Running {} command: {}", label, hook.program);

    match executor.exec(&hook.program, &hook.args, &[]).await {
        Ok(output) => {
            let stdout = output.stdout.trim();
            let stderr = output.stderr.trim();
            if !stdout.is_empty() {
                info!("{} command stdout: {}", label, stdout);
            }
            if !stderr.is_empty() {
                info!("{} command stderr: {}", label, stderr);
            }
            if output.exit_code != 0 {
                warn!(
                    "{} command '{}' exited with code {}",
                    label, output.command, output.exit_code
                );
            }
            Some(output.exit_code)
        }
        Err(e) => {
            warn!("{} command failed: {}", label, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_reports_exit_code() {
        let hook = HookCommand::new("sh", vec!["-c".to_string(), "echo hi; exit 2".to_string()]);
        let code = run_hook("startup", &hook, &Executor::default()).await;
        assert_eq!(code, Some(2));
    }

    #[tokio::test]
    async fn test_hook_start_failure_is_not_fatal() {
        let hook = HookCommand::new("/definitely/not/a/real/hook", Vec::new());
        let code = run_hook("shutdown", &hook, &Executor::default()).await;
        assert_eq!(code, None);
    }
}
