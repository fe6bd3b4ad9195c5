use anyhow::{Context, Result};
use arbiter::config::Config;
use arbiter::types::{Language, Verdict};
use arbiter::{Collaborators, Submission, Verifier, VerifyError};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "arbiter",
    about = "Grade a candidate program against a reference solution",
    version
)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a candidate against a reference and print the result as JSON
    Verify {
        /// Reference solution source file
        #[arg(short, long)]
        reference: PathBuf,

        /// Candidate source file
        #[arg(short, long)]
        candidate: PathBuf,

        /// Source language (inferred from the reference extension if omitted)
        #[arg(short, long)]
        language: Option<Language>,

        /// Test input file; repeat for several inputs
        #[arg(short, long = "input")]
        inputs: Vec<PathBuf>,

        /// Skip the external judgment service
        #[arg(long)]
        no_judge: bool,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn infer_language(path: &Path) -> Result<Language> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Cannot infer language from {}; pass --language",
                path.display()
            )
        })
}

async fn verify(
    mut config: Config,
    reference: &Path,
    candidate: &Path,
    language: Option<Language>,
    inputs: &[PathBuf],
    no_judge: bool,
    compact: bool,
) -> Result<Verdict> {
    if no_judge {
        config.judgment.enabled = false;
    }
    let language = match language {
        Some(language) => language,
        None => infer_language(reference)?,
    };
    let inputs = inputs
        .iter()
        .map(|path| read_file(path))
        .collect::<Result<Vec<_>>>()?;
    let stdin = inputs.first().cloned().unwrap_or_default();

    let reference = Submission::new(language, read_file(reference)?, stdin.clone());
    let candidate = Submission::new(language, read_file(candidate)?, stdin);

    let services = Collaborators::from_config(&config)?;
    let verifier = Verifier::new(config, services);
    let test_inputs = (!inputs.is_empty()).then_some(inputs.as_slice());

    match verifier.verify(&reference, &candidate, test_inputs).await {
        Ok(result) => {
            println!("{}", render_json(&result, compact)?);
            Ok(result.verdict)
        }
        Err(err) => {
            if let VerifyError::Internal { signals, .. } = &err {
                eprintln!("Partial signals:\n{}", serde_json::to_string_pretty(signals)?);
            }
            Err(err.into())
        }
    }
}

fn render_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String> {
    Ok(if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ARBITER_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let outcome = match cli.command {
        Command::Verify {
            reference,
            candidate,
            language,
            inputs,
            no_judge,
            compact,
        } => {
            verify(
                config, &reference, &candidate, language, &inputs, no_judge, compact,
            )
            .await
        }
        Command::Config => render_json(&config, false).map(|text| {
            println!("{}", text);
            Verdict::Correct
        }),
    };

    match outcome {
        Ok(Verdict::Correct) => ExitCode::SUCCESS,
        Ok(Verdict::Incorrect) => ExitCode::from(1),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}
