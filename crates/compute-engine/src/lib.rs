// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # compute-engine
//!
//! The compute-backend boundary of the denoising runtime, plus a portable
//! CPU reference backend.
//!
//! The graph and filter layers only ever talk to a backend through two
//! narrow traits:
//!
//! - [`Device`] — owns one or more engines and answers layout questions:
//!   preferred tensor/weight layouts, element type, channel block size, and
//!   whether convolutions can fuse a pool/upsample post-op.
//! - [`Engine`] — one submission stream: allocates buffers and accepts
//!   [`Kernel`] work descriptors. Submission is non-blocking; `wait` drains
//!   the stream and surfaces any parked kernel error.
//!
//! Everything an engine executes is described by a [`Kernel`] value — an
//! owned, `Send` snapshot of tensor views, images, and parameters. A backend
//! is free to queue, reorder-within-dependencies, or execute inline.
//!
//! [`cpu::CpuDevice`] is the reference implementation: one worker thread per
//! engine, FIFO queues, a cross-engine barrier, and straightforward portable
//! kernels. It favors clarity over speed the same way the rest of this
//! workspace's reference math does.

pub mod cpu;

mod buffer;
mod error;
mod image;
mod kernel;
mod progress;
mod transfer;

pub use buffer::{Buffer, TensorView};
pub use error::EngineError;
pub use image::{Image, ImageDesc, ImageFormat};
pub use kernel::{
    autoexposure_scratch_byte_size, Activation, AutoexposureKernel, ConvKernel, ImageCopyKernel,
    InputProcessKernel, Kernel, OutputProcessKernel, PoolKernel, PostOp, ScratchSlice, Tile,
    UpsampleKernel,
};
pub use progress::{Progress, ProgressCallback};
pub use transfer::{TransferFunc, TransferKind};

use std::sync::Arc;
use tensor_core::{DType, TensorLayout};

/// Whether `execute` blocks until the device has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Block until all submitted work has finished.
    Sync,
    /// Return as soon as submission is complete.
    Async,
}

/// A compute device: a set of engines plus the layout/type preferences the
/// graph builder needs to derive tensor descriptors.
pub trait Device: Send + Sync {
    /// Preferred feature-map layout (`chw`, `hwc`, or a blocked variant).
    fn tensor_layout(&self) -> TensorLayout;

    /// Preferred convolution-weight layout matching [`tensor_layout`](Self::tensor_layout).
    fn weight_layout(&self) -> TensorLayout;

    /// Element type of device tensors.
    fn tensor_dtype(&self) -> DType;

    /// Channel granularity tensor channel counts are padded to.
    fn tensor_block_c(&self) -> usize;

    /// Returns `true` if convolutions can fuse the given post-op. When this
    /// is `false` the graph builder splits the fused op into two.
    fn is_conv_post_op_supported(&self, post_op: PostOp) -> bool;

    /// Number of independent engines.
    fn num_engines(&self) -> usize;

    /// Returns engine `index`. Panics if out of range.
    fn engine(&self, index: usize) -> Arc<dyn Engine>;

    /// Submits a synchronization point across all engines: work submitted
    /// after the barrier (to any engine) runs only once all work submitted
    /// before it (to any engine) has finished.
    fn submit_barrier(&self);

    /// Drains every engine and surfaces the first parked error, if any.
    fn wait(&self) -> Result<(), EngineError>;
}

/// One in-order submission stream of a [`Device`].
pub trait Engine: Send + Sync {
    /// Allocates a zero-initialized buffer of `byte_size` bytes.
    fn new_buffer(&self, byte_size: usize) -> Result<Buffer, EngineError>;

    /// Enqueues a kernel. Non-blocking; kernel failures are parked and
    /// surfaced at the next synchronization point.
    fn submit(&self, kernel: Kernel) -> Result<(), EngineError>;

    /// Blocks until every kernel submitted so far has finished, surfacing
    /// the first parked error.
    fn wait(&self) -> Result<(), EngineError>;
}
