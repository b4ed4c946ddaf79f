//! Command-line entry point: batch-separates one mixture file, or every
//! `.wav` file in a directory, using [`gcc_nmf::pipeline::batch::BatchPipeline`].
//!
//! There is no real-time device backend wired into this binary — the audio
//! device is an external collaborator a host embeds `RealtimePipeline`
//! against directly — so this CLI is deliberately batch-only.

use clap::Parser;
use gcc_nmf::config::EngineConfig;
use gcc_nmf::pipeline::batch::{BatchConfig, BatchPipeline};
use gcc_nmf::{GccNmfError, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "gcc-nmf", about = "Two-microphone GCC-PHAT/NMF source separation")]
struct Cli {
    /// A single stereo WAV mixture, or a directory of mixtures.
    #[arg(short, long)]
    input: PathBuf,

    /// INI config file; any key it omits falls back to the built-in default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kept for interface compatibility with the original tool; this binary
    /// never launches a GUI, so the flag has no effect either way.
    #[arg(long, default_value_t = true)]
    no_gui: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let _ = cli.no_gui;

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return fail(&err),
    };

    let pipeline = BatchPipeline::new(BatchConfig {
        num_tdoas: config.num_tdoas,
        microphone_separation_in_metres: config.microphone_separation_in_metres,
        window_size: config.window_size,
        hop_size: config.hop_size,
        dictionary_size: config.dictionary_size,
        ..BatchConfig::defaults()
    });

    let result = if cli.input.is_dir() {
        process_directory(&pipeline, &cli.input)
    } else {
        process_one(&pipeline, &cli.input)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&err),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::defaults()),
    }
}

fn process_directory(pipeline: &BatchPipeline, dir: &Path) -> Result<()> {
    let entries = gcc_nmf::error::io_context(std::fs::read_dir(dir), &dir.to_path_buf())?;
    for entry in entries {
        let entry = entry.map_err(GccNmfError::IoError)?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("wav") {
            process_one(pipeline, &path)?;
        }
    }
    Ok(())
}

fn process_one(pipeline: &BatchPipeline, path: &Path) -> Result<()> {
    let prefix = path.file_stem().and_then(|s| s.to_str()).unwrap_or("mixture");
    let output_dir = path.parent().unwrap_or_else(|| Path::new("."));

    log::info!("separating {}", path.display());
    for written in pipeline.process_file(path, output_dir, prefix)? {
        log::info!("wrote {}", written.display());
    }
    Ok(())
}

fn fail(err: &GccNmfError) -> ExitCode {
    log::error!("{err}");
    ExitCode::from(err.exit_code() as u8)
}
