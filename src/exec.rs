//! Execution service seam
//!
//! The engine only needs `execute(language, source, stdin)`. `LocalExecutor`
//! runs programs on this machine with the toolchains named in the config; a
//! deployment would plug in a sandboxed runner behind the same trait.

use crate::config::{expand_args, ExecConfig};
use crate::process::{run_prepare_step, run_with_timeout, ScratchDir};
use crate::types::{ExecutionResult, Language};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;
use tracing::debug;

/// Exit code reported for runs killed at the deadline (matches `timeout(1)`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

pub trait Executor: Send + Sync {
    /// Run one program on one input. An `Err` means the program could not be
    /// run at all (missing toolchain, compile error), not that it exited
    /// non-zero.
    fn execute<'a>(
        &'a self,
        language: Language,
        source: &'a str,
        stdin: &'a str,
    ) -> BoxFuture<'a, Result<ExecutionResult>>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    config: ExecConfig,
}

impl LocalExecutor {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    async fn run(&self, language: Language, source: &str, stdin: &str) -> Result<ExecutionResult> {
        let template = self
            .config
            .commands
            .get(&language)
            .ok_or_else(|| anyhow!("No run command configured for {}", language))?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let scratch = ScratchDir::create("exec")?;
        let file = scratch.write_source(language, source)?;
        run_prepare_step(template, &file, scratch.path(), timeout)
            .await
            .with_context(|| format!("Failed to build {} program", language))?;

        let args = expand_args(&template.run, &file, scratch.path());
        let output = run_with_timeout(&args, scratch.path(), Some(stdin), timeout).await?;
        debug!(
            language = %language,
            exit_code = ?output.exit_code,
            elapsed_ms = output.elapsed_ms,
            timed_out = output.timed_out,
            "program finished"
        );

        let exit_code = if output.timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            // Killed by a signal: report it the way shells do.
            output.exit_code.unwrap_or(128)
        };
        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
            wall_time_ms: output.elapsed_ms,
        })
    }
}

impl Executor for LocalExecutor {
    fn execute<'a>(
        &'a self,
        language: Language,
        source: &'a str,
        stdin: &'a str,
    ) -> BoxFuture<'a, Result<ExecutionResult>> {
        self.run(language, source, stdin).boxed()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CommandTemplate;

    fn shell_executor(timeout_secs: u64) -> LocalExecutor {
        let mut config = ExecConfig {
            timeout_secs,
            ..ExecConfig::default()
        };
        // Treat "python" sources as shell scripts so the test needs no interpreter.
        config.commands.insert(
            Language::Python,
            CommandTemplate {
                prepare: None,
                run: vec!["sh".to_string(), "{file}".to_string()],
            },
        );
        LocalExecutor::new(config)
    }

    #[tokio::test]
    async fn test_execute_reports_stdout_and_exit_code() {
        let exec = shell_executor(5);
        let result = exec
            .execute(Language::Python, "read x; echo \"got $x\"; exit 2", "42\n")
            .await
            .unwrap();
        assert_eq!(result.stdout, "got 42\n");
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn test_execute_maps_timeout_to_exit_124() {
        let exec = shell_executor(1);
        let result = exec.execute(Language::Python, "sleep 5", "").await.unwrap();
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_failed_prepare_step_is_an_error() {
        let mut config = ExecConfig::default();
        config.commands.insert(
            Language::C,
            CommandTemplate {
                prepare: Some(vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()]),
                run: vec!["true".to_string()],
            },
        );
        let exec = LocalExecutor::new(config);
        let err = exec.execute(Language::C, "int main(){}", "").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to build c program"));
    }
}
