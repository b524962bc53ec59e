// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph construction and execution.

use tensor_core::{DType, TensorLayout};

/// Errors raised by the graph builder, finalizer, and runner.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A caller passed something structurally wrong (bad weight rank,
    /// channel mismatch, unknown source op).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A weight-blob entry required by a convolution is missing.
    #[error("missing weight tensor '{0}'")]
    MissingWeight(String),

    /// The requested repack combination is outside the supported matrix.
    #[error("unsupported repack: {src_dtype}/{src_layout} -> {dst_dtype}/{dst_layout}")]
    UnsupportedRepack {
        src_dtype: DType,
        src_layout: TensorLayout,
        dst_dtype: DType,
        dst_layout: TensorLayout,
    },

    /// An operator was added after finalization.
    #[error("graph cannot be changed after finalization")]
    Frozen,

    /// `run` was called before `finalize`.
    #[error("graph is not finalized")]
    NotFinalized,

    /// `finalize` was called without a scratch binding, or the buffer is
    /// too small.
    #[error("scratch buffer of {size} bytes is smaller than the required {required} bytes")]
    ScratchTooSmall { size: usize, required: usize },

    /// An adjacency-chain constraint was violated while recording sources.
    #[error("invalid tensor allocation constraints: {0}")]
    Alloc(#[from] memory_planner::PlanError),

    /// A tensor descriptor could not be built.
    #[error(transparent)]
    Tensor(#[from] tensor_core::TensorError),

    /// The compute backend rejected a buffer or kernel.
    #[error(transparent)]
    Engine(#[from] compute_engine::EngineError),
}
