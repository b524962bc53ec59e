// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the filter orchestrator.

use compute_engine::EngineError;
use net_graph::GraphError;

/// Errors surfaced by [`crate::UNetFilter`].
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// An unsupported feature combination or bad parameter value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing inputs, mismatched images, or calls in the wrong order.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The model does not fit even with an unlimited memory budget.
    #[error("could not build filter model")]
    ModelBuild,

    /// The progress callback requested abortion; submitted work was drained.
    #[error("execution aborted")]
    Aborted,

    /// The graph layer failed.
    #[error(transparent)]
    Graph(GraphError),

    /// The compute backend failed.
    #[error(transparent)]
    Engine(EngineError),
}

impl From<GraphError> for FilterError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Engine(EngineError::Aborted) => FilterError::Aborted,
            other => FilterError::Graph(other),
        }
    }
}

impl From<EngineError> for FilterError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Aborted => FilterError::Aborted,
            other => FilterError::Engine(other),
        }
    }
}
