// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for allocation planning.

use crate::AllocId;

/// Errors raised while recording allocation constraints.
///
/// These indicate a bug in the graph builder (the only caller that creates
/// chains), so the builder treats them as fatal.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// One of the two records already has a neighbor on the side being linked.
    #[error("allocation {id:?} is already chained on the {side} side")]
    ChainConflict { id: AllocId, side: &'static str },

    /// Linking the two records would close a cycle.
    #[error("chaining {first:?} -> {second:?} would create a cycle")]
    ChainCycle { first: AllocId, second: AllocId },

    /// A record ID is out of bounds for this arena.
    #[error("allocation id {id:?} is out of bounds (arena holds {len} records)")]
    BadId { id: AllocId, len: usize },
}
