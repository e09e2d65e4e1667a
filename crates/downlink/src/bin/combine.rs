// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! downlink-combine - Merge a retransmission into stored partial files.
//!
//! Usage:
//!   downlink-combine retrans.bin
//!   downlink-combine retrans.bin --config downlink.toml --json

use anyhow::Context;
use clap::Parser;
use downlink::{Pipeline, PipelineConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "downlink-combine")]
#[command(about = "Reconcile retransmitted packets with partial files")]
#[command(version)]
struct Args {
    /// Retransmission capture file
    retransmission: PathBuf,

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

    info!("Downlink combine v{}", env!("CARGO_PKG_VERSION"));
    info!("Retransmission: {}", args.retransmission.display());

    let mut pipeline = Pipeline::from_config(&config)?;
    let summary = pipeline.combine_retransmission(&args.retransmission)?;

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
