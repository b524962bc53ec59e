// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the compute backend.

use tensor_core::TensorError;

/// Errors raised by buffers, engines, and kernels.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A view does not fit inside its backing buffer.
    #[error("view of {need} bytes at offset {offset} exceeds buffer of {size} bytes")]
    OutOfBounds {
        size: usize,
        offset: usize,
        need: usize,
    },

    /// A kernel rejected its bindings or failed during execution.
    #[error("kernel '{kernel}' failed: {detail}")]
    Kernel {
        kernel: &'static str,
        detail: String,
    },

    /// The progress callback requested abortion.
    #[error("execution aborted by progress callback")]
    Aborted,

    /// The engine's worker thread has exited.
    #[error("engine worker thread is gone")]
    Disconnected,

    /// A tensor descriptor was invalid.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl EngineError {
    pub(crate) fn kernel(kernel: &'static str, detail: impl Into<String>) -> Self {
        Self::Kernel {
            kernel,
            detail: detail.into(),
        }
    }
}
