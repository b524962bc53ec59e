// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `denoise-rt inspect`: report the tile plan and memory estimate for an
//! image size without executing.

use compute_engine::cpu::CpuDevice;
use compute_engine::{Device, Image, ImageDesc, ImageFormat};
use unet_filter::{select_blob, unet_input_channels, UNetFilter};

pub fn execute(
    width: usize,
    height: usize,
    hdr: bool,
    albedo: bool,
    normal: bool,
    engines: usize,
    max_memory: usize,
) -> anyhow::Result<()> {
    let device = CpuDevice::new(engines);

    println!("  Device:");
    println!("   Engines:       {}", device.num_engines());
    println!("   Tensor layout: {}", device.tensor_layout());
    println!("   Weight layout: {}", device.weight_layout());
    println!("   Data type:     {}", device.tensor_dtype());
    println!();

    let blob = select_blob(true, albedo, normal, hdr, false, false)?;
    println!("  Network:");
    println!("   Blob:           {blob}");
    println!(
        "   Input channels: {}",
        unet_input_channels(true, albedo, normal)
    );
    println!();

    // Commit against blank images of the requested size; this runs the full
    // tile planning and model build without executing any tile.
    let desc = ImageDesc::new(ImageFormat::Float3, width, height);
    let make = || Image::new(desc);

    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(make()));
    if albedo {
        filter.set_image("albedo", Some(make()));
    }
    if normal {
        filter.set_image("normal", Some(make()));
    }
    filter.set_image("output", Some(make()));
    filter.set_bool("hdr", hdr);
    filter.set_int("maxMemoryMB", max_memory);
    filter.commit()?;

    let grid = filter.tile_grid().expect("committed filter has a grid");
    println!("  Plan:");
    println!("   Image size: {width}x{height}");
    println!("   Tile size:  {}x{}", grid.tile_w, grid.tile_h);
    println!("   Tile count: {}x{}", grid.count_w, grid.count_h);
    println!(
        "   Memory:     {:.1} MB (ceiling {max_memory} MB)",
        filter.total_memory_byte_size() as f64 / (1024.0 * 1024.0),
    );
    Ok(())
}
