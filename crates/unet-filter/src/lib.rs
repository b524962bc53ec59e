// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # unet-filter
//!
//! The tiled U-Net denoising filter.
//!
//! [`UNetFilter`] owns the whole pipeline: it validates the user's images
//! and mode flags, selects a weight blob, builds one execution graph per
//! compute engine, and splits the image into overlapping tiles that fit the
//! memory ceiling. `execute` then drives the per-tile inference — an
//! optional autoexposure pre-pass, round-robin tile submission across
//! engines, a cross-engine barrier, and (when filtering in place over a
//! tiled image) a final copy from the temporary output.
//!
//! # Usage
//! ```no_run
//! use compute_engine::{cpu::CpuDevice, Image, ImageDesc, ImageFormat, SyncMode};
//! use unet_filter::UNetFilter;
//!
//! # fn main() -> Result<(), unet_filter::FilterError> {
//! let device = CpuDevice::new(1);
//! let color = Image::new(ImageDesc::new(ImageFormat::Float3, 1920, 1080));
//! let output = Image::new(ImageDesc::new(ImageFormat::Float3, 1920, 1080));
//!
//! let mut filter = UNetFilter::new(device);
//! filter.set_image("color", Some(color));
//! filter.set_image("output", Some(output));
//! filter.set_bool("hdr", true);
//! filter.commit()?;
//! filter.execute(SyncMode::Sync)?;
//! # Ok(())
//! # }
//! ```

mod error;
mod filter;
mod tile;
mod weights;

pub use error::FilterError;
pub use filter::UNetFilter;
pub use tile::{plan_tiles, TileGrid, TileRect};
pub use weights::{builtin_weights, select_blob, unet_input_channels};
