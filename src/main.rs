// entropic: toy-corpus co-occurrence experiments.
//
// Commands:
//   entropic corpus [--params FILE] [--seed N] [--out FILE]    Generate a toy document
//   entropic gold   [--params FILE] [--out FILE]               Gold x-word similarity matrix
//   entropic train  [--params FILE] [--max-steps N] [--out FILE] [--cuda]
//
// Params files are param2val JSON objects; missing keys take their defaults.
// Set RUST_LOG to change verbosity (default: info).

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use entropic::config::Params;
use entropic::corpus::ToyCorpus;
use entropic::job;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "entropic")]
#[command(about = "Toy corpora and RNN category-learning runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a toy document and write it as whitespace-separated text
    Corpus {
        /// param2val JSON file
        #[arg(long)]
        params: Option<PathBuf>,

        /// Override the corpus seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write the gold similarity matrix over x-words as JSON
    Gold {
        #[arg(long)]
        params: Option<PathBuf>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Train an RNN on the toy corpus and write the run summary as JSON
    Train {
        #[arg(long)]
        params: Option<PathBuf>,

        /// Stop after this many batches
        #[arg(long)]
        max_steps: Option<usize>,

        #[arg(long)]
        out: Option<PathBuf>,

        /// Use CUDA device 0 when available
        #[arg(long)]
        cuda: bool,
    },
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Corpus { params, seed, out } => {
            let mut params = load_params(params.as_deref())?;
            if let Some(seed) = seed {
                params.seed = seed;
            }
            params.validate()?;
            let corpus = ToyCorpus::new(params.corpus_config(), params.seed)?;
            write_output(out.as_deref(), corpus.doc().as_bytes())
        }
        Command::Gold { params, out } => {
            let params = load_params(params.as_deref())?;
            params.validate()?;
            let corpus = ToyCorpus::new(params.corpus_config(), params.seed)?;
            write_json(out.as_deref(), corpus.sim_mat_gold())
        }
        Command::Train { params, max_steps, out, cuda } => {
            let mut params = load_params(params.as_deref())?;
            if max_steps.is_some() {
                params.max_steps = max_steps;
            }
            let device = select_device(cuda);
            let summary = job::run(&params, &device)?;
            if let (Some(score), Some(pp)) = (summary.final_score(), summary.final_pp()) {
                info!("final: pp={pp:.1} {}={score:.4}", summary.metric);
            }
            write_json(out.as_deref(), &summary)
        }
    }
}

fn load_params(path: Option<&Path>) -> Result<Params> {
    match path {
        Some(path) => Params::from_json_file(path),
        None => Ok(Params::default()),
    }
}

/// CUDA device 0 if requested and available, else CPU.
fn select_device(cuda: bool) -> Device {
    if !cuda {
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        if candle_core::utils::cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(dev) => {
                    info!("using CUDA device 0");
                    return dev;
                }
                Err(e) => warn!("CUDA init failed, falling back to CPU: {e}"),
            }
        } else {
            warn!("CUDA not available, using CPU");
        }
    }

    #[cfg(not(feature = "cuda"))]
    warn!("built without the cuda feature, using CPU");

    Device::Cpu
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_output(path, json.as_bytes())
}
