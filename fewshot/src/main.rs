use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dfdx::tensor::AutoDevice;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fewshot::runner;
use fewshot::ExperimentConfig;

/// Episodic few-shot training on a synthetic class pool
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Raise the log level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the reference model and report validation accuracy
    Train {
        /// YAML experiment config; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the seed from the config
        #[arg(long)]
        seed: Option<u64>,

        /// Hide the validation progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Print the default configuration as YAML
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        Commands::Train {
            config,
            seed,
            no_progress,
        } => {
            let mut config = match config {
                Some(path) => ExperimentConfig::from_yaml_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ExperimentConfig::default(),
            };
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if no_progress {
                config.fit.progress = false;
            }

            let dev = AutoDevice::seed_from_u64(config.seed);
            let report = runner::run(&config, &dev).context("training failed")?;

            if let Some((step, best)) = report.best_validation() {
                info!(step, "best validation: {best}");
            }
            if let Some((step, last)) = report.last_validation() {
                println!("step {step}: {last}");
            }
        }
        Commands::Config => {
            print!("{}", ExperimentConfig::default().to_yaml()?);
        }
    }
    Ok(())
}
