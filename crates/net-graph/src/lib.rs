// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # net-graph
//!
//! Execution-graph construction and scratch planning for the denoising
//! network.
//!
//! A [`Graph`] is built once per engine: operators are appended in execution
//! order, each recording an allocation for its destination tensor and
//! extending the lifetimes of its sources. Channel concatenation on
//! channel-major layouts is expressed as an adjacency chain, so the two
//! inputs end up back to back in scratch memory and the convolution reads
//! them as one tensor.
//!
//! The graph lifecycle is one-way:
//!
//! ```text
//! building ──finalize()──▶ finalized ──clear()──▶ building
//! ```
//!
//! While building, nothing touches device memory. `finalize` plans the
//! scratch layout, binds every transient tensor to its offset, repacks
//! canonical `f16` weights into device tensors, and drops the builder-only
//! state (allocation records, pending initializers, the weight map).
//! Afterwards only the operator sequence and the scratch binding remain, and
//! [`Graph::run`] submits the operators through the engine.

mod error;
mod graph;
mod ops;
mod repack;
mod weights;

pub use error::GraphError;
pub use graph::{Graph, OpId};
pub use ops::{
    AutoexposureOp, ConcatConvChwOp, ConcatConvHwcOp, ConvOp, ImageCopyOp, InputProcessOp, Node,
    OutputProcessOp, PoolOp, UpsampleOp,
};
pub use repack::{is_weight_repack_supported, repack_bias, repack_weight};
pub use weights::Weights;
