//! Scratch directories and child processes with a deadline
//!
//! Shared by the local executor and the command-based IR extractor. Nothing
//! here isolates the child; run untrusted code behind a real sandbox.

use crate::config::{expand_args, CommandTemplate};
use crate::types::Language;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

const SCRATCH_ROOT_DIR: &str = "arbiter";

/// Per-run temporary directory, removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `$TMPDIR/arbiter/<label>-<uuid>`.
    pub fn create(label: &str) -> Result<Self> {
        let path = std::env::temp_dir()
            .join(SCRATCH_ROOT_DIR)
            .join(format!("{}-{}", label, Uuid::new_v4()));
        std::fs::create_dir_all(&path).with_context(|| {
            format!("Failed to create scratch directory '{}'", path.display())
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `source` under the file name the language's toolchain expects.
    pub fn write_source(&self, language: Language, source: &str) -> Result<PathBuf> {
        let file_name = match language {
            // javac insists the public class name matches the file name
            Language::Java => "Main.java".to_string(),
            other => format!("solution.{}", other.extension()),
        };
        let file = self.path.join(file_name);
        std::fs::write(&file, source)
            .with_context(|| format!("Failed to write source file '{}'", file.display()))?;
        Ok(file)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or the deadline.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `args` in `cwd`, feeding `stdin`, and kill the child at the deadline.
pub async fn run_with_timeout(
    args: &[String],
    cwd: &Path,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("Command template is empty"))?;

    let mut command = Command::new(program);
    command
        .args(rest)
        .current_dir(cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let data = input.as_bytes().to_vec();
        // Write in the background so a child that never reads cannot block us.
        tokio::spawn(async move {
            let _ = pipe.write_all(&data).await;
        });
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output =
                output.with_context(|| format!("Failed to wait for '{}'", program))?;
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
                timed_out: false,
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
        // Dropping the wait future drops the child, which kills it.
        Err(_) => Ok(CommandOutput {
            stdout: String::new(),
            stderr: format!("timed out after {}ms", timeout.as_millis()),
            exit_code: None,
            timed_out: true,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Run the template's `prepare` step, if any. A failing step is an error.
pub async fn run_prepare_step(
    template: &CommandTemplate,
    file: &Path,
    dir: &Path,
    timeout: Duration,
) -> Result<()> {
    let Some(prepare) = &template.prepare else {
        return Ok(());
    };
    let args = expand_args(prepare, file, dir);
    let output = run_with_timeout(&args, dir, None, timeout).await?;
    if !output.success() {
        return Err(anyhow!(
            "'{}' failed (exit {:?}): {}",
            args.join(" "),
            output.exit_code,
            crate::util::truncate(output.stderr.trim(), 400)
        ));
    }
    Ok(())
}
