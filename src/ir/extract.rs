//! IR extraction service seam
//!
//! Extraction turns source text into an ordered list of instruction lines.
//! Failures are expected (unsupported language, compile error, missing
//! toolchain) and the engine degrades to an all-zero profile when they occur.

use crate::config::{expand_args, ExtractConfig};
use crate::process::{run_prepare_step, run_with_timeout, ScratchDir};
use crate::types::Language;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

pub trait IrExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        language: Language,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Extracts IR by running a compiler or disassembler and reading its stdout.
#[derive(Debug, Clone, Default)]
pub struct CommandIrExtractor {
    config: ExtractConfig,
}

impl CommandIrExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    pub fn supports(&self, language: Language) -> bool {
        self.config.commands.contains_key(&language)
    }

    async fn run(&self, language: Language, source: &str) -> Result<Vec<String>> {
        let template = self
            .config
            .commands
            .get(&language)
            .ok_or_else(|| anyhow!("IR extraction is not configured for {}", language))?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let scratch = ScratchDir::create("ir")?;
        let file = scratch.write_source(language, source)?;
        run_prepare_step(template, &file, scratch.path(), timeout).await?;

        let args = expand_args(&template.run, &file, scratch.path());
        let output = run_with_timeout(&args, scratch.path(), None, timeout).await?;
        if !output.success() {
            return Err(anyhow!(
                "IR extraction for {} failed (exit {:?}, timed out: {}): {}",
                language,
                output.exit_code,
                output.timed_out,
                crate::util::truncate(output.stderr.trim(), 400)
            ));
        }

        let lines: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        if lines.is_empty() {
            return Err(anyhow!("IR extraction for {} produced no output", language));
        }
        Ok(lines)
    }
}

impl IrExtractor for CommandIrExtractor {
    fn extract<'a>(
        &'a self,
        language: Language,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        self.run(language, source).boxed()
    }
}
