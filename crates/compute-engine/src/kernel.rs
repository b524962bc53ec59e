// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel work descriptors: the submission boundary between the graph and a
//! compute backend.
//!
//! Every descriptor is an owned, `Send` snapshot — tensor views, image
//! handles, and parameters — so a backend can queue it and execute on a
//! worker thread after the submitting call has returned.

use crate::{Buffer, Image, TensorView, TransferFunc};
use std::sync::Arc;
use tensor_core::ceil_div;

/// Autoexposure key value: average luminance maps to this exposure.
pub(crate) const AUTOEXPOSURE_KEY: f32 = 0.18;
/// Autoexposure downsampling bin size in pixels.
pub(crate) const AUTOEXPOSURE_BIN: usize = 16;

/// Bytes of per-op scratch the autoexposure kernel needs for an image of
/// the given size (one `f32` luminance bin per 16×16 region). Part of the
/// kernel contract: every backend stages its luminance bins this way.
pub fn autoexposure_scratch_byte_size(w: usize, h: usize) -> usize {
    ceil_div(h, AUTOEXPOSURE_BIN) * ceil_div(w, AUTOEXPOSURE_BIN) * std::mem::size_of::<f32>()
}

/// Activation applied after a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// No activation (linear output layer).
    None,
    /// Rectified linear unit.
    ReLU,
}

/// Spatial post-operation optionally fused into a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostOp {
    /// 2×2 max pooling (halves H and W).
    Pool,
    /// 2× nearest-neighbor upsampling (doubles H and W).
    Upsample,
}

/// A rectangular window used by the image-processing kernels.
///
/// `h_src`/`w_src` locate the window in the source coordinate space,
/// `h_dst`/`w_dst` in the destination space; `h`/`w` give its size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tile {
    pub h_src: usize,
    pub w_src: usize,
    pub h_dst: usize,
    pub w_dst: usize,
    pub h: usize,
    pub w: usize,
}

/// Per-operator scratch binding: a byte range of a buffer reserved at the
/// bottom of the graph's scratch allocation.
#[derive(Debug, Clone)]
pub struct ScratchSlice {
    pub buffer: Buffer,
    pub byte_offset: usize,
    pub byte_size: usize,
}

/// 3×3 stride-1 convolution with zero padding, optional second concatenated
/// source (HWC concat flavor), optional fused post-op.
#[derive(Debug, Clone)]
pub struct ConvKernel {
    pub src: TensorView,
    /// Second concatenated source; its channels follow `src`'s channels.
    pub src2: Option<TensorView>,
    pub weight: TensorView,
    /// Weight slice for `src2` when the backend keeps two separate weight
    /// tensors (HWC concat). When absent but `src2` is present (CHW concat,
    /// one combined weight tensor), `src2`'s taps start at input channel
    /// `src2_weight_begin_i` of `weight`.
    pub weight2: Option<TensorView>,
    pub src2_weight_begin_i: usize,
    pub bias: TensorView,
    pub dst: TensorView,
    pub activation: Activation,
    pub post_op: Option<PostOp>,
}

/// 2×2 max pooling.
#[derive(Debug, Clone)]
pub struct PoolKernel {
    pub src: TensorView,
    pub dst: TensorView,
}

/// 2× nearest-neighbor upsampling.
#[derive(Debug, Clone)]
pub struct UpsampleKernel {
    pub src: TensorView,
    pub dst: TensorView,
}

/// Gathers input images into the network's input tensor for one tile.
#[derive(Debug, Clone)]
pub struct InputProcessKernel {
    pub color: Option<Image>,
    pub albedo: Option<Image>,
    pub normal: Option<Image>,
    pub dst: TensorView,
    pub transfer: Arc<TransferFunc>,
    pub hdr: bool,
    /// Primary input holds signed data in `[-1, 1]` (directional light or
    /// normals), mapped into `[0, 1]` before the transfer curve.
    pub snorm: bool,
    pub tile: Tile,
}

/// Scatters the network's output tensor into the output image for one tile.
#[derive(Debug, Clone)]
pub struct OutputProcessKernel {
    pub src: TensorView,
    pub dst: Image,
    pub transfer: Arc<TransferFunc>,
    pub hdr: bool,
    pub snorm: bool,
    pub tile: Tile,
}

/// Estimates an HDR exposure scale from the color image and publishes it as
/// the transfer function's input scale.
#[derive(Debug, Clone)]
pub struct AutoexposureKernel {
    pub src: Image,
    pub scratch: ScratchSlice,
    pub transfer: Arc<TransferFunc>,
}

/// Copies one image into another of identical dimensions.
#[derive(Debug, Clone)]
pub struct ImageCopyKernel {
    pub src: Image,
    pub dst: Image,
}

/// The unit of work an [`crate::Engine`] accepts.
#[derive(Debug, Clone)]
pub enum Kernel {
    Conv(ConvKernel),
    Pool(PoolKernel),
    Upsample(UpsampleKernel),
    InputProcess(InputProcessKernel),
    OutputProcess(OutputProcessKernel),
    Autoexposure(AutoexposureKernel),
    ImageCopy(ImageCopyKernel),
}

impl Kernel {
    /// Short kernel name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Conv(_) => "conv",
            Kernel::Pool(_) => "pool",
            Kernel::Upsample(_) => "upsample",
            Kernel::InputProcess(_) => "input_process",
            Kernel::OutputProcess(_) => "output_process",
            Kernel::Autoexposure(_) => "autoexposure",
            Kernel::ImageCopy(_) => "image_copy",
        }
    }
}
