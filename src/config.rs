//! Configuration management for arbiter
//!
//! Settings live in ~/.config/arbiter/config.toml (or a path given on the
//! command line). Every section is optional; missing keys take the defaults
//! below. Judgment credentials are read from the environment only and are
//! never written to disk.

use crate::types::Language;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// OpenRouter chat completions endpoint used when no URL is configured.
pub const DEFAULT_JUDGE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_JUDGE_MODEL: &str = "openai/gpt-4o-mini";

/// Environment variables checked (in order) for the judgment API key.
const API_KEY_ENV_VARS: [&str; 2] = ["ARBITER_API_KEY", "OPENROUTER_API_KEY"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub judgment: JudgmentConfig,
    pub cache: CacheConfig,
    pub exec: ExecConfig,
    pub extract: ExtractConfig,
}

/// Decision thresholds. The values are empirically chosen, so they are
/// configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Not-legitimate judgments at or above this confidence fail the candidate.
    pub auto_fail_confidence: u8,
    /// Not-legitimate judgments at or above this confidence raise a review flag.
    pub flag_confidence: u8,
    /// Legitimate judgments at or above this confidence override a failed comparator.
    pub override_confidence: u8,
    /// Relative node-count difference band treated as stylistic.
    pub node_ratio_min: f64,
    pub node_ratio_max: f64,
    /// Additive bonus (percentage points) for semantically equivalent code.
    pub semantic_bonus_percent: f64,
    /// Lower score bounds of the efficiency bands.
    pub optimal_score: f64,
    pub good_score: f64,
    pub moderate_score: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_fail_confidence: 85,
            flag_confidence: 60,
            override_confidence: 80,
            node_ratio_min: 0.10,
            node_ratio_max: 0.30,
            semantic_bonus_percent: 15.0,
            optimal_score: 95.0,
            good_score: 80.0,
            moderate_score: 60.0,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("auto_fail_confidence", self.auto_fail_confidence),
            ("flag_confidence", self.flag_confidence),
            ("override_confidence", self.override_confidence),
        ] {
            if value > 100 {
                return Err(anyhow!("policy.{} must be within 0-100 (got {})", name, value));
            }
        }
        if self.flag_confidence > self.auto_fail_confidence {
            return Err(anyhow!(
                "policy.flag_confidence ({}) must not exceed policy.auto_fail_confidence ({})",
                self.flag_confidence,
                self.auto_fail_confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.node_ratio_min)
            || !(0.0..=1.0).contains(&self.node_ratio_max)
            || self.node_ratio_min > self.node_ratio_max
        {
            return Err(anyhow!(
                "policy node ratio band [{}, {}] must be an increasing range within [0, 1]",
                self.node_ratio_min,
                self.node_ratio_max
            ));
        }
        if !(0.0..=100.0).contains(&self.semantic_bonus_percent) {
            return Err(anyhow!(
                "policy.semantic_bonus_percent must be within 0-100 (got {})",
                self.semantic_bonus_percent
            ));
        }
        if !(self.moderate_score < self.good_score && self.good_score < self.optimal_score) {
            return Err(anyhow!(
                "policy efficiency bands must increase: moderate ({}) < good ({}) < optimal ({})",
                self.moderate_score,
                self.good_score,
                self.optimal_score
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgmentConfig {
    pub enabled: bool,
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Leading IR lines per side included in the request.
    pub ir_excerpt_lines: usize,
    /// Sources longer than this are cut in the middle before sending.
    pub max_source_chars: usize,
}

impl Default for JudgmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: DEFAULT_JUDGE_URL.to_string(),
            model: DEFAULT_JUDGE_MODEL.to_string(),
            timeout_secs: 30,
            max_tokens: 1_024,
            ir_excerpt_lines: 20,
            max_source_chars: 12_000,
        }
    }
}

impl JudgmentConfig {
    /// API key from the environment, if any.
    pub fn api_key(&self) -> Option<String> {
        api_key_from(|name| std::env::var(name).ok())
    }
}

fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached reference profile.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3_600 }
    }
}

/// Upper bound for `cache.ttl_secs` (100 years).
pub const MAX_CACHE_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(MAX_CACHE_TTL_SECS) as i64)
    }
}

/// Command line template. `{file}` expands to the source path and `{dir}` to
/// its scratch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Optional step run first (compilation). Its failure is reported as-is.
    #[serde(default)]
    pub prepare: Option<Vec<String>>,
    pub run: Vec<String>,
}

impl CommandTemplate {
    fn new(prepare: Option<&[&str]>, run: &[&str]) -> Self {
        Self {
            prepare: prepare.map(|args| args.iter().map(|a| a.to_string()).collect()),
            run: run.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Expand `{file}` and `{dir}` placeholders in a command template.
pub fn expand_args(args: &[String], file: &Path, dir: &Path) -> Vec<String> {
    let file = file.to_string_lossy();
    let dir = dir.to_string_lossy();
    args.iter()
        .map(|arg| arg.replace("{file}", &file).replace("{dir}", &dir))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub timeout_secs: u64,
    pub commands: BTreeMap<Language, CommandTemplate>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        let mut commands = BTreeMap::new();
        commands.insert(
            Language::C,
            CommandTemplate::new(
                Some(&["cc", "-O2", "-o", "{dir}/prog", "{file}", "-lm"]),
                &["{dir}/prog"],
            ),
        );
        commands.insert(
            Language::Cpp,
            CommandTemplate::new(
                Some(&["c++", "-O2", "-std=c++17", "-o", "{dir}/prog", "{file}"]),
                &["{dir}/prog"],
            ),
        );
        commands.insert(
            Language::Java,
            CommandTemplate::new(
                Some(&["javac", "-d", "{dir}", "{file}"]),
                &["java", "-cp", "{dir}", "Main"],
            ),
        );
        commands.insert(
            Language::Python,
            CommandTemplate::new(None, &["python3", "{file}"]),
        );
        commands.insert(
            Language::JavaScript,
            CommandTemplate::new(None, &["node", "{file}"]),
        );
        commands.insert(
            Language::TypeScript,
            CommandTemplate::new(None, &["npx", "--yes", "tsx", "{file}"]),
        );
        commands.insert(
            Language::Rust,
            CommandTemplate::new(
                Some(&["rustc", "-O", "-o", "{dir}/prog", "{file}"]),
                &["{dir}/prog"],
            ),
        );
        commands.insert(
            Language::Go,
            CommandTemplate::new(
                Some(&["go", "build", "-o", "{dir}/prog", "{file}"]),
                &["{dir}/prog"],
            ),
        );
        Self {
            timeout_secs: 10,
            commands,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub timeout_secs: u64,
    /// IR is read from the `run` command's stdout.
    pub commands: BTreeMap<Language, CommandTemplate>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        let mut commands = BTreeMap::new();
        commands.insert(
            Language::C,
            CommandTemplate::new(
                None,
                &["clang", "-S", "-emit-llvm", "-O0", "-o", "-", "{file}"],
            ),
        );
        commands.insert(
            Language::Cpp,
            CommandTemplate::new(
                None,
                &["clang++", "-S", "-emit-llvm", "-O0", "-o", "-", "{file}"],
            ),
        );
        commands.insert(
            Language::Rust,
            CommandTemplate::new(
                None,
                &[
                    "rustc",
                    "--crate-type=lib",
                    "--emit=llvm-ir",
                    "-C",
                    "opt-level=0",
                    "-o",
                    "/dev/stdout",
                    "{file}",
                ],
            ),
        );
        commands.insert(
            Language::Python,
            CommandTemplate::new(None, &["python3", "-m", "dis", "{file}"]),
        );
        commands.insert(
            Language::Java,
            CommandTemplate::new(
                Some(&["javac", "-d", "{dir}", "{file}"]),
                &["javap", "-c", "-p", "-cp", "{dir}", "Main"],
            ),
        );
        Self {
            timeout_secs: 30,
            commands,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("arbiter").join("config.toml"))
    }

    /// Load config from `path` (or the default location), falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::config_path) {
            Some(path) => path,
            None => return Self::with_env_overrides(Self::default()),
        };

        let config = match fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        "Config file could not be parsed ({:#}); using defaults",
                        err
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        Self::with_env_overrides(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        url::Url::parse(&self.judgment.api_url)
            .with_context(|| format!("judgment.api_url '{}' is not a valid URL", self.judgment.api_url))?;
        if self.judgment.timeout_secs == 0 {
            return Err(anyhow!("judgment.timeout_secs must be greater than zero"));
        }
        if self.cache.ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(anyhow!(
                "cache.ttl_secs must be at most {} (got {})",
                MAX_CACHE_TTL_SECS,
                self.cache.ttl_secs
            ));
        }
        if self.exec.timeout_secs == 0 || self.extract.timeout_secs == 0 {
            return Err(anyhow!("exec/extract timeouts must be greater than zero"));
        }
        for (lang, template) in self.exec.commands.iter().chain(self.extract.commands.iter()) {
            if template.run.is_empty() {
                return Err(anyhow!("command template for {} has an empty run step", lang));
            }
        }
        Ok(())
    }

    fn with_env_overrides(mut config: Self) -> Self {
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Apply `ARBITER_*` overrides using the given variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("ARBITER_JUDGE_MODEL").filter(|m| !m.trim().is_empty()) {
            self.judgment.model = model.trim().to_string();
        }
        if let Some(url) = lookup("ARBITER_JUDGE_URL") {
            match url::Url::parse(url.trim()) {
                Ok(_) => self.judgment.api_url = url.trim().to_string(),
                Err(err) => warn!("Ignoring ARBITER_JUDGE_URL ({})", err),
            }
        }
        if let Some(flag) = lookup("ARBITER_JUDGE_ENABLED") {
            self.judgment.enabled = !matches!(flag.trim(), "0" | "false" | "no" | "off");
        }
    }
}
