// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side tensor storage.

use crate::{DType, TensorDesc, TensorError};
use half::f16;

/// Typed element storage, one variant per [`DType`].
#[derive(Debug, Clone)]
enum TensorData {
    F16(Vec<f16>),
    F32(Vec<f32>),
}

/// An owned tensor in host memory.
///
/// `HostTensor` is the carrier for canonical weights: parsed out of a weight
/// blob as `oihw`/`x` `f16` tensors, then repacked into device tensors at
/// graph finalization. Storage always covers the descriptor's *padded*
/// element count.
///
/// Scalar access converts through `f32` whatever the stored dtype, which is
/// what the repacker needs when it changes precision.
#[derive(Debug, Clone)]
pub struct HostTensor {
    desc: TensorDesc,
    data: TensorData,
}

impl HostTensor {
    /// Creates a zero-filled tensor.
    pub fn zeros(desc: TensorDesc) -> Self {
        let n = desc.num_padded_elements();
        let data = match desc.dtype() {
            DType::F16 => TensorData::F16(vec![f16::ZERO; n]),
            DType::F32 => TensorData::F32(vec![0.0; n]),
        };
        Self { desc, data }
    }

    /// Creates a tensor from `f32` values, converting to the descriptor's
    /// dtype. The value count must equal the padded element count.
    pub fn from_f32(desc: TensorDesc, values: &[f32]) -> Result<Self, TensorError> {
        let n = desc.num_padded_elements();
        if values.len() != n {
            return Err(TensorError::ElementCountMismatch {
                expected: n,
                actual: values.len(),
            });
        }
        let data = match desc.dtype() {
            DType::F16 => TensorData::F16(values.iter().map(|&v| f16::from_f32(v)).collect()),
            DType::F32 => TensorData::F32(values.to_vec()),
        };
        Ok(Self { desc, data })
    }

    /// Creates an `f16` tensor directly from half-precision values.
    pub fn from_f16(desc: TensorDesc, values: &[f16]) -> Result<Self, TensorError> {
        let n = desc.num_padded_elements();
        if desc.dtype() != DType::F16 || values.len() != n {
            return Err(TensorError::ElementCountMismatch {
                expected: n,
                actual: values.len(),
            });
        }
        Ok(Self {
            desc,
            data: TensorData::F16(values.to_vec()),
        })
    }

    /// Returns the descriptor.
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    /// Returns the element data type.
    pub fn dtype(&self) -> DType {
        self.desc.dtype()
    }

    /// Reads the element at the given flat index as `f32`.
    pub fn get(&self, index: usize) -> f32 {
        match &self.data {
            TensorData::F16(v) => v[index].to_f32(),
            TensorData::F32(v) => v[index],
        }
    }

    /// Writes the element at the given flat index, converting from `f32`.
    pub fn set(&mut self, index: usize, value: f32) {
        match &mut self.data {
            TensorData::F16(v) => v[index] = f16::from_f32(value),
            TensorData::F32(v) => v[index] = value,
        }
    }

    /// Returns the whole tensor as `f32` values, converting if needed.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorData::F32(v) => v.clone(),
        }
    }

    /// Returns the underlying `f32` slice.
    ///
    /// # Panics
    /// Panics if `self.dtype() != DType::F32`.
    pub fn as_f32_slice(&self) -> &[f32] {
        match &self.data {
            TensorData::F32(v) => v,
            TensorData::F16(_) => panic!("as_f32_slice called on f16 tensor"),
        }
    }

    /// Returns the underlying `f16` slice.
    ///
    /// # Panics
    /// Panics if `self.dtype() != DType::F16`.
    pub fn as_f16_slice(&self) -> &[f16] {
        match &self.data {
            TensorData::F16(v) => v,
            TensorData::F32(_) => panic!("as_f16_slice called on f32 tensor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TensorDims, TensorLayout};

    fn bias_desc(x: usize, dtype: DType) -> TensorDesc {
        TensorDesc::new(TensorDims::new(vec![x]), TensorLayout::x, dtype).unwrap()
    }

    #[test]
    fn test_zeros() {
        let t = HostTensor::zeros(bias_desc(8, DType::F32));
        assert_eq!(t.to_f32_vec(), vec![0.0; 8]);
    }

    #[test]
    fn test_from_f32_into_f16() {
        let t = HostTensor::from_f32(bias_desc(3, DType::F16), &[0.5, -1.0, 2.0]).unwrap();
        assert_eq!(t.get(0), 0.5);
        assert_eq!(t.get(1), -1.0);
        assert_eq!(t.get(2), 2.0);
        assert_eq!(t.as_f16_slice().len(), 3);
    }

    #[test]
    fn test_element_count_mismatch() {
        let r = HostTensor::from_f32(bias_desc(4, DType::F32), &[1.0, 2.0]);
        assert!(matches!(r, Err(TensorError::ElementCountMismatch { .. })));
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut t = HostTensor::zeros(bias_desc(4, DType::F16));
        t.set(2, 1.25); // exactly representable in f16
        assert_eq!(t.get(2), 1.25);
        assert_eq!(t.get(0), 0.0);
    }

    #[test]
    #[should_panic(expected = "as_f32_slice")]
    fn test_wrong_slice_panics() {
        let t = HostTensor::zeros(bias_desc(2, DType::F16));
        let _ = t.as_f32_slice();
    }

    #[test]
    fn test_padded_storage() {
        // Logical 9, padded 16: storage covers the padded count.
        let desc = TensorDesc::padded(
            TensorDims::new(vec![9]),
            TensorDims::new(vec![16]),
            TensorLayout::x,
            DType::F16,
        )
        .unwrap();
        let t = HostTensor::zeros(desc);
        assert_eq!(t.to_f32_vec().len(), 16);
    }
}
