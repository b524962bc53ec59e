// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `denoise-rt run`: denoise a PFM image.

use crate::pfm;
use compute_engine::cpu::CpuDevice;
use compute_engine::{Image, ImageDesc, ImageFormat, SyncMode};
use net_graph::Weights;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use unet_filter::UNetFilter;

pub struct RunArgs {
    pub input: PathBuf,
    pub albedo: Option<PathBuf>,
    pub normal: Option<PathBuf>,
    pub output: PathBuf,
    pub weights: Option<PathBuf>,
    pub hdr: bool,
    pub srgb: bool,
    pub directional: bool,
    pub clean_aux: bool,
    pub input_scale: Option<f32>,
    pub engines: usize,
    pub max_memory: usize,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let device = CpuDevice::new(args.engines);

    // ── Load images ────────────────────────────────────────────
    let (w, h, color_data) = pfm::read(&args.input)?;
    println!("  Input:  {} ({w}x{h})", args.input.display());
    let color = Image::from_f32(ImageDesc::new(ImageFormat::Float3, w, h), &color_data)?;

    let load_aux = |path: &Option<PathBuf>, label: &str| -> anyhow::Result<Option<Image>> {
        match path {
            Some(path) => {
                let (aw, ah, data) = pfm::read(path)?;
                anyhow::ensure!(
                    (aw, ah) == (w, h),
                    "{label} buffer is {aw}x{ah}, expected {w}x{h}"
                );
                println!("  {label}: {}", path.display());
                Ok(Some(Image::from_f32(
                    ImageDesc::new(ImageFormat::Float3, w, h),
                    &data,
                )?))
            }
            None => Ok(None),
        }
    };
    let albedo = load_aux(&args.albedo, "Albedo")?;
    let normal = load_aux(&args.normal, "Normal")?;
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, w, h));

    // ── Configure the filter ───────────────────────────────────
    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(color));
    filter.set_image("albedo", albedo);
    filter.set_image("normal", normal);
    filter.set_image("output", Some(output.clone()));
    filter.set_bool("hdr", args.hdr);
    filter.set_bool("srgb", args.srgb);
    filter.set_bool("directional", args.directional);
    filter.set_bool("cleanAux", args.clean_aux);
    filter.set_int("maxMemoryMB", args.max_memory);
    if let Some(scale) = args.input_scale {
        filter.set_float("inputScale", scale);
    }
    if let Some(path) = &args.weights {
        let weights = Weights::from_safetensors_file(path)?;
        println!("  Weights: {} ({} tensors)", path.display(), weights.len());
        filter.set_weights(Some(weights));
    }
    filter.set_progress_callback(Box::new(|fraction| {
        print!("\r  Denoising... {:3.0}%", fraction * 100.0);
        let _ = std::io::stdout().flush();
        true
    }));

    // ── Commit and execute ─────────────────────────────────────
    let commit_start = Instant::now();
    filter.commit()?;
    println!("  {}", filter.summary());

    let execute_start = Instant::now();
    filter.execute(SyncMode::Sync)?;
    println!();
    println!(
        "  Done: commit {:.2}s, execute {:.2}s",
        execute_start.duration_since(commit_start).as_secs_f64(),
        execute_start.elapsed().as_secs_f64(),
    );

    // ── Write the result ───────────────────────────────────────
    pfm::write(&args.output, w, h, &output.to_f32_vec())?;
    println!("  Output: {}", args.output.display());
    Ok(())
}
