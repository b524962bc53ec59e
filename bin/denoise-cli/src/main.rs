// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # denoise-rt
//!
//! Command-line interface for the tiled U-Net denoising runtime.
//!
//! ## Usage
//! ```bash
//! # Denoise a PFM image
//! denoise-rt run --input noisy.pfm --output clean.pfm --hdr
//!
//! # With auxiliary buffers and user weights
//! denoise-rt run --input noisy.pfm --albedo alb.pfm --normal nrm.pfm \
//!     --weights model.safetensors --output clean.pfm
//!
//! # Report the tile plan and memory use without executing
//! denoise-rt inspect --width 3840 --height 2160 --engines 2
//! ```

mod commands;
mod config;
mod pfm;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "denoise-rt",
    about = "Tiled U-Net image denoiser",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (overrides defaults).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Denoise an image.
    Run {
        /// Noisy color image (PFM).
        #[arg(short, long)]
        input: std::path::PathBuf,

        /// Optional albedo buffer (PFM).
        #[arg(long)]
        albedo: Option<std::path::PathBuf>,

        /// Optional normal buffer (PFM).
        #[arg(long)]
        normal: Option<std::path::PathBuf>,

        /// Output image path (PFM).
        #[arg(short, long)]
        output: std::path::PathBuf,

        /// User weight blob (SafeTensors); overrides the built-in selection.
        #[arg(short, long)]
        weights: Option<std::path::PathBuf>,

        /// Input is high dynamic range.
        #[arg(long)]
        hdr: bool,

        /// Input is sRGB-encoded low dynamic range.
        #[arg(long)]
        srgb: bool,

        /// Input is a directional (spherical-harmonics) signal.
        #[arg(long)]
        directional: bool,

        /// Auxiliary buffers are prefiltered.
        #[arg(long)]
        clean_aux: bool,

        /// Fixed input scale; omit to auto-expose HDR input.
        #[arg(long)]
        input_scale: Option<f32>,

        /// Number of compute engines.
        #[arg(short, long)]
        engines: Option<usize>,

        /// Memory ceiling in MB.
        #[arg(long)]
        max_memory: Option<usize>,
    },

    /// Print the device characteristics, tile plan, and memory estimate for
    /// an image size without running inference.
    Inspect {
        /// Image width in pixels.
        #[arg(long)]
        width: usize,

        /// Image height in pixels.
        #[arg(long)]
        height: usize,

        /// Assume an HDR input.
        #[arg(long)]
        hdr: bool,

        /// Include an albedo buffer.
        #[arg(long)]
        albedo: bool,

        /// Include a normal buffer.
        #[arg(long)]
        normal: bool,

        /// Number of compute engines.
        #[arg(short, long)]
        engines: Option<usize>,

        /// Memory ceiling in MB.
        #[arg(long)]
        max_memory: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    let config = config::CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            albedo,
            normal,
            output,
            weights,
            hdr,
            srgb,
            directional,
            clean_aux,
            input_scale,
            engines,
            max_memory,
        } => commands::run::execute(commands::run::RunArgs {
            input,
            albedo,
            normal,
            output,
            weights,
            hdr,
            srgb,
            directional,
            clean_aux,
            input_scale,
            engines: engines.unwrap_or(config.engines),
            max_memory: max_memory.unwrap_or(config.max_memory_mb),
        }),
        Commands::Inspect {
            width,
            height,
            hdr,
            albedo,
            normal,
            engines,
            max_memory,
        } => commands::inspect::execute(
            width,
            height,
            hdr,
            albedo,
            normal,
            engines.unwrap_or(config.engines),
            max_memory.unwrap_or(config.max_memory_mb),
        ),
    }
}
