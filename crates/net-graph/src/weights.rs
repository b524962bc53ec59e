// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The weight map: canonical `f16` tensors keyed by operator name.
//!
//! Convolutions look up `<name>.weight` (rank-4 `oihw`) and `<name>.bias`
//! (rank-1 `x`). Maps are filled either programmatically (the built-in
//! synthetic blobs) or from a SafeTensors file via mmap for user-supplied
//! weights.

use crate::GraphError;
use half::f16;
use std::collections::HashMap;
use std::path::Path;
use tensor_core::{DType, HostTensor, TensorDesc, TensorDims, TensorLayout};

/// A string-keyed map of canonical weight tensors.
#[derive(Debug, Clone, Default)]
pub struct Weights {
    tensors: HashMap<String, HostTensor>,
}

impl Weights {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, tensor: HostTensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Looks up a tensor by exact name.
    pub fn get(&self, name: &str) -> Option<&HostTensor> {
        self.tensors.get(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns `true` if the map holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Fetches `<op_name>.weight` and validates it is a rank-4 canonical
    /// `oihw` half tensor.
    pub fn conv_weight(&self, op_name: &str) -> Result<&HostTensor, GraphError> {
        let key = format!("{op_name}.weight");
        let tensor = self
            .tensors
            .get(&key)
            .ok_or(GraphError::MissingWeight(key.clone()))?;
        let desc = tensor.desc();
        if desc.rank() != 4 || desc.layout() != TensorLayout::oihw || desc.dtype() != DType::F16 {
            return Err(GraphError::InvalidArgument(format!(
                "'{key}' must be a rank-4 oihw f16 tensor, got {}",
                desc
            )));
        }
        Ok(tensor)
    }

    /// Fetches `<op_name>.bias` and validates it is a rank-1 half tensor.
    pub fn conv_bias(&self, op_name: &str) -> Result<&HostTensor, GraphError> {
        let key = format!("{op_name}.bias");
        let tensor = self
            .tensors
            .get(&key)
            .ok_or(GraphError::MissingWeight(key.clone()))?;
        let desc = tensor.desc();
        if desc.rank() != 1 || desc.layout() != TensorLayout::x || desc.dtype() != DType::F16 {
            return Err(GraphError::InvalidArgument(format!(
                "'{key}' must be a rank-1 x f16 tensor, got {}",
                desc
            )));
        }
        Ok(tensor)
    }

    /// Loads a weight map from a SafeTensors file via mmap.
    ///
    /// Rank-4 entries become `oihw` weights, rank-1 entries become `x`
    /// biases; everything must be stored as `f16`.
    pub fn from_safetensors_file(path: &Path) -> Result<Self, GraphError> {
        let file = std::fs::File::open(path).map_err(|e| {
            GraphError::InvalidArgument(format!("cannot open '{}': {e}", path.display()))
        })?;
        // SAFETY: the mapping is read-only and lives only for this call.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
            GraphError::InvalidArgument(format!("mmap of '{}' failed: {e}", path.display()))
        })?;
        let parsed = safetensors::SafeTensors::deserialize(&mmap).map_err(|e| {
            GraphError::InvalidArgument(format!("SafeTensors parse error: {e}"))
        })?;

        let mut weights = Self::new();
        for (name, view) in parsed.tensors() {
            if view.dtype() != safetensors::Dtype::F16 {
                return Err(GraphError::InvalidArgument(format!(
                    "tensor '{name}' has dtype {:?}, expected F16",
                    view.dtype()
                )));
            }
            let dims = TensorDims::new(view.shape().to_vec());
            let layout = match dims.rank() {
                4 => TensorLayout::oihw,
                1 => TensorLayout::x,
                r => {
                    return Err(GraphError::InvalidArgument(format!(
                        "tensor '{name}' has rank {r}, expected 1 or 4"
                    )))
                }
            };
            let desc = TensorDesc::new(dims, layout, DType::F16)?;
            let values: Vec<f16> = view
                .data()
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]))
                .collect();
            weights.insert(name, HostTensor::from_f16(desc, &values)?);
        }
        tracing::info!(
            "loaded {} weight tensors from '{}' ({:.2} MB)",
            weights.len(),
            path.display(),
            mmap.len() as f64 / (1024.0 * 1024.0),
        );
        Ok(weights)
    }
}
