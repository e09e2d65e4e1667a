// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! downlink-check - First pass over a raw downlink capture.
//!
//! Usage:
//!   downlink-check capture.bin
//!   downlink-check capture.bin --config downlink.toml --json

use anyhow::Context;
use clap::Parser;
use downlink::{Pipeline, PipelineConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "downlink-check")]
#[command(about = "Frame a downlink capture, emit complete files and report gaps")]
#[command(version)]
struct Args {
    /// Raw capture file
    capture: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory that relative paths in the configuration are resolved against
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    }
    .with_base_dir(&args.workdir);

    // Setup logging
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    info!("Downlink check v{}", env!("CARGO_PKG_VERSION"));
    info!("Capture: {}", args.capture.display());

    let mut pipeline = Pipeline::from_config(&config)?;
    let summary = pipeline.check_capture(&args.capture)?;

    info!(
        "{} files: {} complete, {} awaiting retransmission, {} emit failures",
        summary.files.len(),
        summary.completed(),
        summary.pending(),
        summary.emit_failures()
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
