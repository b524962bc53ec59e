// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor descriptors and host tensors.

use crate::{TensorDims, TensorLayout};

/// Errors that can occur when constructing descriptors or tensors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The dimension count does not match the layout's rank.
    #[error("layout {layout} expects rank {expected}, got dims {dims} of rank {actual}")]
    RankMismatch {
        layout: TensorLayout,
        expected: usize,
        dims: TensorDims,
        actual: usize,
    },

    /// A padded dimension is smaller than the corresponding logical dimension.
    #[error("padded dims {padded} do not cover logical dims {dims}")]
    BadPadding { dims: TensorDims, padded: TensorDims },

    /// A padded channel count is not a multiple of the layout's block size.
    #[error("padded channel count {padded} is not a multiple of block {block} for layout {layout}")]
    BlockMismatch {
        layout: TensorLayout,
        padded: usize,
        block: usize,
    },

    /// The provided element buffer does not match the descriptor.
    #[error("element count mismatch: descriptor holds {expected} padded elements, got {actual}")]
    ElementCountMismatch { expected: usize, actual: usize },
}
