// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator nodes.
//!
//! Each node derives its destination descriptor at construction time and is
//! bound to concrete tensor views during graph finalization. `submit`
//! produces the owned [`Kernel`] descriptor the engine executes.
//!
//! The concrete kinds live in one tagged enum ([`Node`]); the graph and the
//! filter reach the typed variants (input/output process) through pattern
//! matching rather than downcasts.

use crate::GraphError;
use compute_engine::{
    autoexposure_scratch_byte_size, Activation, AutoexposureKernel, ConvKernel, Device, Engine,
    Image, ImageCopyKernel, ImageDesc, InputProcessKernel, Kernel, OutputProcessKernel,
    PoolKernel, PostOp, ScratchSlice, TensorView, Tile, TransferFunc, UpsampleKernel,
};
use std::sync::Arc;
use tensor_core::{round_up, TensorDesc, TensorDims};

fn bound<'a>(view: &'a Option<TensorView>, op: &str, what: &str) -> Result<&'a TensorView, GraphError> {
    view.as_ref().ok_or_else(|| {
        GraphError::InvalidArgument(format!("op '{op}' has no {what} tensor bound"))
    })
}

// ── Input process ──────────────────────────────────────────────

/// Gathers the input images into the network input tensor, one tile at a
/// time.
pub struct InputProcessOp {
    name: String,
    alignment: usize,
    transfer: Arc<TransferFunc>,
    hdr: bool,
    snorm: bool,
    dst_desc: TensorDesc,
    dst: Option<TensorView>,
    color: Option<Image>,
    albedo: Option<Image>,
    normal: Option<Image>,
    tile: Tile,
}

impl InputProcessOp {
    pub(crate) fn new(
        name: String,
        src_dims: &TensorDims,
        alignment: usize,
        transfer: Arc<TransferFunc>,
        hdr: bool,
        snorm: bool,
        device: &dyn Device,
    ) -> Result<Self, GraphError> {
        if src_dims.rank() != 3 {
            return Err(GraphError::InvalidArgument(format!(
                "input dims must be rank 3 (C, H, W), got {src_dims}"
            )));
        }
        let [c, h, w] = [src_dims.dims()[0], src_dims.dims()[1], src_dims.dims()[2]];
        if h % alignment != 0 || w % alignment != 0 {
            return Err(GraphError::InvalidArgument(format!(
                "tile extent {h}x{w} is not aligned to {alignment}"
            )));
        }
        let padded_c = round_up(c.max(1), device.tensor_block_c());
        let dst_desc = TensorDesc::padded(
            TensorDims::new(vec![c, h, w]),
            TensorDims::new(vec![padded_c, h, w]),
            device.tensor_layout(),
            device.tensor_dtype(),
        )?;
        Ok(Self {
            name,
            alignment,
            transfer,
            hdr,
            snorm,
            dst_desc,
            dst: None,
            color: None,
            albedo: None,
            normal: None,
            tile: Tile::default(),
        })
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    /// Tile-corner alignment this op requires of the tile planner.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Binds the source images for the next run.
    pub fn set_images(
        &mut self,
        color: Option<Image>,
        albedo: Option<Image>,
        normal: Option<Image>,
    ) {
        self.color = color;
        self.albedo = albedo;
        self.normal = normal;
    }

    /// Sets the input tile: source rectangle at `(h_src, w_src)` of size
    /// `(h, w)`, placed at `(h_dst, w_dst)` inside the tile buffer.
    pub fn set_tile(&mut self, h_src: usize, w_src: usize, h_dst: usize, w_dst: usize, h: usize, w: usize) {
        self.tile = Tile {
            h_src,
            w_src,
            h_dst,
            w_dst,
            h,
            w,
        };
    }

    pub(crate) fn set_dst(&mut self, view: TensorView) {
        self.dst = Some(view);
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        bound(&self.dst, &self.name, "destination")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        engine.submit(Kernel::InputProcess(InputProcessKernel {
            color: self.color.clone(),
            albedo: self.albedo.clone(),
            normal: self.normal.clone(),
            dst: bound(&self.dst, &self.name, "destination")?.clone(),
            transfer: Arc::clone(&self.transfer),
            hdr: self.hdr,
            snorm: self.snorm,
            tile: self.tile,
        }))?;
        Ok(())
    }
}

// ── Convolution ────────────────────────────────────────────────

/// 3×3 convolution with optional fused pool/upsample post-op.
pub struct ConvOp {
    name: String,
    activation: Activation,
    post_op: Option<PostOp>,
    weight_desc: TensorDesc,
    bias_desc: TensorDesc,
    dst_desc: TensorDesc,
    src: Option<TensorView>,
    dst: Option<TensorView>,
    weight: Option<TensorView>,
    bias: Option<TensorView>,
}

/// Derives a convolution destination descriptor from the source, the
/// logical/padded output channels, and the post-op.
fn conv_dst_desc(
    name: &str,
    src_desc: &TensorDesc,
    out_c: usize,
    padded_out_c: usize,
    post_op: Option<PostOp>,
    device: &dyn Device,
) -> Result<TensorDesc, GraphError> {
    let (h, w) = (src_desc.h(), src_desc.w());
    let (dst_h, dst_w) = match post_op {
        None => (h, w),
        Some(PostOp::Pool) => {
            if h % 2 != 0 || w % 2 != 0 {
                return Err(GraphError::InvalidArgument(format!(
                    "op '{name}': pooling an odd extent {h}x{w}"
                )));
            }
            (h / 2, w / 2)
        }
        Some(PostOp::Upsample) => (h * 2, w * 2),
    };
    Ok(TensorDesc::padded(
        TensorDims::new(vec![out_c, dst_h, dst_w]),
        TensorDims::new(vec![padded_out_c, dst_h, dst_w]),
        device.tensor_layout(),
        device.tensor_dtype(),
    )?)
}

impl ConvOp {
    pub(crate) fn new(
        name: String,
        src_desc: &TensorDesc,
        weight_desc: TensorDesc,
        bias_desc: TensorDesc,
        activation: Activation,
        post_op: Option<PostOp>,
        device: &dyn Device,
    ) -> Result<Self, GraphError> {
        let dst_desc = conv_dst_desc(
            &name,
            src_desc,
            weight_desc.o(),
            weight_desc.padded_o(),
            post_op,
            device,
        )?;
        Ok(Self {
            name,
            activation,
            post_op,
            weight_desc,
            bias_desc,
            dst_desc,
            src: None,
            dst: None,
            weight: None,
            bias: None,
        })
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    pub(crate) fn weight_desc(&self) -> &TensorDesc {
        &self.weight_desc
    }

    pub(crate) fn bias_desc(&self) -> &TensorDesc {
        &self.bias_desc
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        bound(&self.src, &self.name, "source")?;
        bound(&self.dst, &self.name, "destination")?;
        bound(&self.weight, &self.name, "weight")?;
        bound(&self.bias, &self.name, "bias")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        engine.submit(Kernel::Conv(ConvKernel {
            src: bound(&self.src, &self.name, "source")?.clone(),
            src2: None,
            weight: bound(&self.weight, &self.name, "weight")?.clone(),
            weight2: None,
            src2_weight_begin_i: 0,
            bias: bound(&self.bias, &self.name, "bias")?.clone(),
            dst: bound(&self.dst, &self.name, "destination")?.clone(),
            activation: self.activation,
            post_op: self.post_op,
        }))?;
        Ok(())
    }
}

// ── Concatenation + convolution, channel-major flavor ──────────

/// Convolution over two channel-concatenated sources for channel-major
/// layouts: the planner places the sources back to back and one combined
/// weight tensor covers both channel ranges.
pub struct ConcatConvChwOp {
    name: String,
    activation: Activation,
    src1_desc: TensorDesc,
    dst_desc: TensorDesc,
    src1: Option<TensorView>,
    src2: Option<TensorView>,
    weight: Option<TensorView>,
    bias: Option<TensorView>,
    dst: Option<TensorView>,
}

impl ConcatConvChwOp {
    pub(crate) fn new(
        name: String,
        src1_desc: &TensorDesc,
        src2_desc: &TensorDesc,
        weight_desc: &TensorDesc,
        activation: Activation,
        device: &dyn Device,
    ) -> Result<Self, GraphError> {
        if src1_desc.h() != src2_desc.h() || src1_desc.w() != src2_desc.w() {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': concat sources have mismatched extents"
            )));
        }
        let dst_desc = conv_dst_desc(
            &name,
            src1_desc,
            weight_desc.o(),
            weight_desc.padded_o(),
            None,
            device,
        )?;
        Ok(Self {
            name,
            activation,
            src1_desc: src1_desc.clone(),
            dst_desc,
            src1: None,
            src2: None,
            weight: None,
            bias: None,
            dst: None,
        })
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        // The planner chained the two allocations; verify the adjacency
        // actually holds before trusting it.
        let src1 = bound(&self.src1, &self.name, "first source")?;
        let src2 = bound(&self.src2, &self.name, "second source")?;
        if !src1.buffer().ptr_eq(src2.buffer())
            || src2.byte_offset()
                != src1.byte_offset() + src1.desc().aligned_byte_size()
        {
            return Err(GraphError::InvalidArgument(format!(
                "op '{}': concat sources are not adjacent in scratch",
                self.name
            )));
        }
        bound(&self.weight, &self.name, "weight")?;
        bound(&self.bias, &self.name, "bias")?;
        bound(&self.dst, &self.name, "destination")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        engine.submit(Kernel::Conv(ConvKernel {
            src: bound(&self.src1, &self.name, "first source")?.clone(),
            src2: Some(bound(&self.src2, &self.name, "second source")?.clone()),
            weight: bound(&self.weight, &self.name, "weight")?.clone(),
            weight2: None,
            src2_weight_begin_i: self.src1_desc.padded_c(),
            bias: bound(&self.bias, &self.name, "bias")?.clone(),
            dst: bound(&self.dst, &self.name, "destination")?.clone(),
            activation: self.activation,
            post_op: None,
        }))?;
        Ok(())
    }
}

// ── Concatenation + convolution, channel-minor flavor ──────────

/// Convolution over two channel-concatenated sources for the `hwc` layout:
/// the sources stay independent and each gets its own repacked weight
/// sub-tensor.
pub struct ConcatConvHwcOp {
    name: String,
    activation: Activation,
    dst_desc: TensorDesc,
    src1: Option<TensorView>,
    src2: Option<TensorView>,
    weight1: Option<TensorView>,
    weight2: Option<TensorView>,
    bias: Option<TensorView>,
    dst: Option<TensorView>,
}

impl ConcatConvHwcOp {
    pub(crate) fn new(
        name: String,
        src1_desc: &TensorDesc,
        src2_desc: &TensorDesc,
        weight1_desc: &TensorDesc,
        activation: Activation,
        device: &dyn Device,
    ) -> Result<Self, GraphError> {
        if src1_desc.h() != src2_desc.h() || src1_desc.w() != src2_desc.w() {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': concat sources have mismatched extents"
            )));
        }
        let dst_desc = conv_dst_desc(
            &name,
            src1_desc,
            weight1_desc.o(),
            weight1_desc.padded_o(),
            None,
            device,
        )?;
        Ok(Self {
            name,
            activation,
            dst_desc,
            src1: None,
            src2: None,
            weight1: None,
            weight2: None,
            bias: None,
            dst: None,
        })
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        bound(&self.src1, &self.name, "first source")?;
        bound(&self.src2, &self.name, "second source")?;
        bound(&self.weight1, &self.name, "first weight")?;
        bound(&self.weight2, &self.name, "second weight")?;
        bound(&self.bias, &self.name, "bias")?;
        bound(&self.dst, &self.name, "destination")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        engine.submit(Kernel::Conv(ConvKernel {
            src: bound(&self.src1, &self.name, "first source")?.clone(),
            src2: Some(bound(&self.src2, &self.name, "second source")?.clone()),
            weight: bound(&self.weight1, &self.name, "first weight")?.clone(),
            weight2: Some(bound(&self.weight2, &self.name, "second weight")?.clone()),
            src2_weight_begin_i: 0,
            bias: bound(&self.bias, &self.name, "bias")?.clone(),
            dst: bound(&self.dst, &self.name, "destination")?.clone(),
            activation: self.activation,
            post_op: None,
        }))?;
        Ok(())
    }
}

// ── Pool / upsample ────────────────────────────────────────────

/// Standalone 2×2 max pooling.
pub struct PoolOp {
    name: String,
    dst_desc: TensorDesc,
    src: Option<TensorView>,
    dst: Option<TensorView>,
}

impl PoolOp {
    pub(crate) fn new(
        name: String,
        src_desc: &TensorDesc,
        device: &dyn Device,
    ) -> Result<Self, GraphError> {
        if src_desc.h() % 2 != 0 || src_desc.w() % 2 != 0 {
            return Err(GraphError::InvalidArgument(format!(
                "op '{name}': pooling an odd extent {}x{}",
                src_desc.h(),
                src_desc.w()
            )));
        }
        let dst_desc = TensorDesc::padded(
            TensorDims::new(vec![src_desc.c(), src_desc.h() / 2, src_desc.w() / 2]),
            TensorDims::new(vec![src_desc.padded_c(), src_desc.h() / 2, src_desc.w() / 2]),
            device.tensor_layout(),
            device.tensor_dtype(),
        )?;
        Ok(Self {
            name,
            dst_desc,
            src: None,
            dst: None,
        })
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        bound(&self.src, &self.name, "source")?;
        bound(&self.dst, &self.name, "destination")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        engine.submit(Kernel::Pool(PoolKernel {
            src: bound(&self.src, &self.name, "source")?.clone(),
            dst: bound(&self.dst, &self.name, "destination")?.clone(),
        }))?;
        Ok(())
    }
}

/// Standalone 2× nearest-neighbor upsampling.
pub struct UpsampleOp {
    name: String,
    dst_desc: TensorDesc,
    src: Option<TensorView>,
    dst: Option<TensorView>,
}

impl UpsampleOp {
    pub(crate) fn new(
        name: String,
        src_desc: &TensorDesc,
        device: &dyn Device,
    ) -> Result<Self, GraphError> {
        let dst_desc = TensorDesc::padded(
            TensorDims::new(vec![src_desc.c(), src_desc.h() * 2, src_desc.w() * 2]),
            TensorDims::new(vec![src_desc.padded_c(), src_desc.h() * 2, src_desc.w() * 2]),
            device.tensor_layout(),
            device.tensor_dtype(),
        )?;
        Ok(Self {
            name,
            dst_desc,
            src: None,
            dst: None,
        })
    }

    pub fn dst_desc(&self) -> &TensorDesc {
        &self.dst_desc
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        bound(&self.src, &self.name, "source")?;
        bound(&self.dst, &self.name, "destination")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        engine.submit(Kernel::Upsample(UpsampleKernel {
            src: bound(&self.src, &self.name, "source")?.clone(),
            dst: bound(&self.dst, &self.name, "destination")?.clone(),
        }))?;
        Ok(())
    }
}

// ── Output process ─────────────────────────────────────────────

/// Scatters the network output tensor into the output image, one tile at a
/// time. Terminal op: it has no destination allocation.
pub struct OutputProcessOp {
    name: String,
    transfer: Arc<TransferFunc>,
    hdr: bool,
    snorm: bool,
    src: Option<TensorView>,
    dst: Option<Image>,
    tile: Tile,
}

impl OutputProcessOp {
    pub(crate) fn new(
        name: String,
        transfer: Arc<TransferFunc>,
        hdr: bool,
        snorm: bool,
    ) -> Self {
        Self {
            name,
            transfer,
            hdr,
            snorm,
            src: None,
            dst: None,
            tile: Tile::default(),
        }
    }

    /// Binds the destination image for the next run.
    pub fn set_dst_image(&mut self, image: Image) {
        self.dst = Some(image);
    }

    /// Sets the output tile: tensor rectangle at `(h_src, w_src)` written to
    /// image position `(h_dst, w_dst)`, size `(h, w)`.
    pub fn set_tile(&mut self, h_src: usize, w_src: usize, h_dst: usize, w_dst: usize, h: usize, w: usize) {
        self.tile = Tile {
            h_src,
            w_src,
            h_dst,
            w_dst,
            h,
            w,
        };
    }

    pub(crate) fn set_src(&mut self, view: TensorView) {
        self.src = Some(view);
    }

    fn finalize(&mut self) -> Result<(), GraphError> {
        bound(&self.src, &self.name, "source")?;
        Ok(())
    }

    fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        let dst = self.dst.clone().ok_or_else(|| {
            GraphError::InvalidArgument(format!("op '{}' has no output image bound", self.name))
        })?;
        engine.submit(Kernel::OutputProcess(OutputProcessKernel {
            src: bound(&self.src, &self.name, "source")?.clone(),
            dst,
            transfer: Arc::clone(&self.transfer),
            hdr: self.hdr,
            snorm: self.snorm,
            tile: self.tile,
        }))?;
        Ok(())
    }
}

// ── Tagged node ────────────────────────────────────────────────

/// A graph operator: the tagged union the graph stores and dispatches on.
pub enum Node {
    InputProcess(InputProcessOp),
    Conv(ConvOp),
    ConcatConvChw(ConcatConvChwOp),
    ConcatConvHwc(ConcatConvHwcOp),
    Pool(PoolOp),
    Upsample(UpsampleOp),
    OutputProcess(OutputProcessOp),
}

impl Node {
    /// Operator name (as used for weight lookup and logs).
    pub fn name(&self) -> &str {
        match self {
            Node::InputProcess(op) => &op.name,
            Node::Conv(op) => &op.name,
            Node::ConcatConvChw(op) => &op.name,
            Node::ConcatConvHwc(op) => &op.name,
            Node::Pool(op) => &op.name,
            Node::Upsample(op) => &op.name,
            Node::OutputProcess(op) => &op.name,
        }
    }

    /// Destination descriptor, if the op produces a transient tensor.
    pub fn dst_desc(&self) -> Option<&TensorDesc> {
        match self {
            Node::InputProcess(op) => Some(op.dst_desc()),
            Node::Conv(op) => Some(op.dst_desc()),
            Node::ConcatConvChw(op) => Some(op.dst_desc()),
            Node::ConcatConvHwc(op) => Some(op.dst_desc()),
            Node::Pool(op) => Some(op.dst_desc()),
            Node::Upsample(op) => Some(op.dst_desc()),
            Node::OutputProcess(_) => None,
        }
    }

    /// Per-op transient workspace requirement, laid out at the base of the
    /// scratch buffer. None of the current graph ops needs any.
    pub fn scratch_byte_size(&self) -> usize {
        0
    }

    /// Whether the backend can execute this op as constructed.
    pub fn is_supported(&self) -> bool {
        true
    }

    pub(crate) fn bind_src(&mut self, view: TensorView) {
        match self {
            Node::Conv(op) => op.src = Some(view),
            Node::Pool(op) => op.src = Some(view),
            Node::Upsample(op) => op.src = Some(view),
            Node::OutputProcess(op) => op.set_src(view),
            Node::ConcatConvChw(op) => op.src1 = Some(view),
            Node::ConcatConvHwc(op) => op.src1 = Some(view),
            Node::InputProcess(_) => unreachable!("input process has no tensor source"),
        }
    }

    pub(crate) fn bind_src2(&mut self, view: TensorView) {
        match self {
            Node::ConcatConvChw(op) => op.src2 = Some(view),
            Node::ConcatConvHwc(op) => op.src2 = Some(view),
            _ => unreachable!("op has no second source"),
        }
    }

    pub(crate) fn bind_dst(&mut self, view: TensorView) {
        match self {
            Node::InputProcess(op) => op.set_dst(view),
            Node::Conv(op) => op.dst = Some(view),
            Node::ConcatConvChw(op) => op.dst = Some(view),
            Node::ConcatConvHwc(op) => op.dst = Some(view),
            Node::Pool(op) => op.dst = Some(view),
            Node::Upsample(op) => op.dst = Some(view),
            Node::OutputProcess(_) => unreachable!("output process has no tensor destination"),
        }
    }

    pub(crate) fn bind_weight(&mut self, secondary: bool, view: TensorView) {
        match (self, secondary) {
            (Node::Conv(op), false) => op.weight = Some(view),
            (Node::ConcatConvChw(op), false) => op.weight = Some(view),
            (Node::ConcatConvHwc(op), false) => op.weight1 = Some(view),
            (Node::ConcatConvHwc(op), true) => op.weight2 = Some(view),
            _ => unreachable!("op has no such weight slot"),
        }
    }

    pub(crate) fn bind_bias(&mut self, view: TensorView) {
        match self {
            Node::Conv(op) => op.bias = Some(view),
            Node::ConcatConvChw(op) => op.bias = Some(view),
            Node::ConcatConvHwc(op) => op.bias = Some(view),
            _ => unreachable!("op has no bias"),
        }
    }

    pub(crate) fn finalize(&mut self) -> Result<(), GraphError> {
        match self {
            Node::InputProcess(op) => op.finalize(),
            Node::Conv(op) => op.finalize(),
            Node::ConcatConvChw(op) => op.finalize(),
            Node::ConcatConvHwc(op) => op.finalize(),
            Node::Pool(op) => op.finalize(),
            Node::Upsample(op) => op.finalize(),
            Node::OutputProcess(op) => op.finalize(),
        }
    }

    pub(crate) fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        match self {
            Node::InputProcess(op) => op.submit(engine),
            Node::Conv(op) => op.submit(engine),
            Node::ConcatConvChw(op) => op.submit(engine),
            Node::ConcatConvHwc(op) => op.submit(engine),
            Node::Pool(op) => op.submit(engine),
            Node::Upsample(op) => op.submit(engine),
            Node::OutputProcess(op) => op.submit(engine),
        }
    }
}

// ── Standalone ops (outside any graph) ─────────────────────────

/// HDR exposure estimation. Lives outside the graph: the filter submits it
/// once per `execute`, before any tile, and its result feeds the shared
/// transfer function.
pub struct AutoexposureOp {
    image_desc: ImageDesc,
    transfer: Arc<TransferFunc>,
    src: Option<Image>,
    scratch: Option<ScratchSlice>,
}

impl AutoexposureOp {
    pub fn new(image_desc: ImageDesc, transfer: Arc<TransferFunc>) -> Self {
        Self {
            image_desc,
            transfer,
            src: None,
            scratch: None,
        }
    }

    /// Aligned per-op scratch requirement (the luminance-bin staging area).
    pub fn scratch_aligned_size(&self) -> usize {
        round_up(
            autoexposure_scratch_byte_size(self.image_desc.w, self.image_desc.h),
            tensor_core::BUFFER_ALIGNMENT,
        )
    }

    pub fn set_src(&mut self, image: Image) {
        self.src = Some(image);
    }

    /// Binds the op's scratch to the base of `buffer`.
    pub fn set_scratch(&mut self, buffer: compute_engine::Buffer) {
        self.scratch = Some(ScratchSlice {
            byte_size: self.scratch_aligned_size(),
            byte_offset: 0,
            buffer,
        });
    }

    pub fn finalize(&self) -> Result<(), GraphError> {
        if self.scratch.is_none() {
            return Err(GraphError::InvalidArgument(
                "autoexposure has no scratch bound".into(),
            ));
        }
        Ok(())
    }

    pub fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        let src = self.src.clone().ok_or_else(|| {
            GraphError::InvalidArgument("autoexposure has no source image".into())
        })?;
        let scratch = self.scratch.clone().ok_or_else(|| {
            GraphError::InvalidArgument("autoexposure has no scratch bound".into())
        })?;
        engine.submit(Kernel::Autoexposure(AutoexposureKernel {
            src,
            scratch,
            transfer: Arc::clone(&self.transfer),
        }))?;
        Ok(())
    }
}

/// Copies the in-place temporary output into the user's output image.
/// Lives outside the graph and runs after the cross-engine barrier.
pub struct ImageCopyOp {
    src: Option<Image>,
    dst: Option<Image>,
}

impl ImageCopyOp {
    pub fn new() -> Self {
        Self {
            src: None,
            dst: None,
        }
    }

    pub fn set_src(&mut self, image: Image) {
        self.src = Some(image);
    }

    pub fn set_dst(&mut self, image: Image) {
        self.dst = Some(image);
    }

    pub fn submit(&self, engine: &dyn Engine) -> Result<(), GraphError> {
        let (src, dst) = match (&self.src, &self.dst) {
            (Some(src), Some(dst)) => (src.clone(), dst.clone()),
            _ => {
                return Err(GraphError::InvalidArgument(
                    "image copy is missing a source or destination".into(),
                ))
            }
        };
        engine.submit(Kernel::ImageCopy(ImageCopyKernel { src, dst }))?;
        Ok(())
    }
}

impl Default for ImageCopyOp {
    fn default() -> Self {
        Self::new()
    }
}
