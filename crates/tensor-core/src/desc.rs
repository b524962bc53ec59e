// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor descriptors: logical dims, padded dims, layout, and indexing.

use crate::{DType, TensorDims, TensorError, TensorLayout};

/// Granularity (in bytes) to which tensor byte sizes are rounded when placed
/// inside a scratch buffer. Matches the widest vector load the reference
/// kernels may issue and keeps every view offset cache-line aligned.
pub const BUFFER_ALIGNMENT: usize = 64;

/// Rounds `value` up to the next multiple of `multiple`.
pub fn round_up(value: usize, multiple: usize) -> usize {
    debug_assert!(multiple > 0);
    value.div_ceil(multiple) * multiple
}

/// Integer ceiling division.
pub fn ceil_div(value: usize, divisor: usize) -> usize {
    debug_assert!(divisor > 0);
    value.div_ceil(divisor)
}

/// Immutable descriptor of a tensor: logical dims, padded dims, memory
/// layout, and element type.
///
/// Padded dims differ from logical dims only on channel axes (`O`/`I` for
/// weights, `C` for feature maps, `X` for biases), which are rounded up to
/// the layout's block size and, for convolution sources, to the backend's
/// preferred channel granularity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TensorDesc {
    dims: TensorDims,
    padded_dims: TensorDims,
    layout: TensorLayout,
    dtype: DType,
}

impl TensorDesc {
    /// Creates a descriptor with no padding (`padded_dims == dims`).
    ///
    /// Fails if the rank does not match the layout or if a channel axis is
    /// not a multiple of the layout's block size.
    pub fn new(dims: TensorDims, layout: TensorLayout, dtype: DType) -> Result<Self, TensorError> {
        Self::padded(dims.clone(), dims, layout, dtype)
    }

    /// Creates a descriptor with explicit padded dims.
    pub fn padded(
        dims: TensorDims,
        padded_dims: TensorDims,
        layout: TensorLayout,
        dtype: DType,
    ) -> Result<Self, TensorError> {
        if dims.rank() != layout.rank() || padded_dims.rank() != layout.rank() {
            return Err(TensorError::RankMismatch {
                layout,
                expected: layout.rank(),
                actual: dims.rank().max(padded_dims.rank()),
                dims,
            });
        }
        for axis in 0..dims.rank() {
            if padded_dims.dims()[axis] < dims.dims()[axis] {
                return Err(TensorError::BadPadding {
                    dims,
                    padded: padded_dims,
                });
            }
        }
        let block = layout.block_c();
        // Channel axes: O and I for rank 4, C for rank 3, X for rank 1.
        let channel_axes: &[usize] = match layout.rank() {
            4 => &[0, 1],
            3 => &[0],
            _ => &[0],
        };
        for &axis in channel_axes {
            let padded = padded_dims.dims()[axis];
            if padded % block != 0 {
                return Err(TensorError::BlockMismatch { layout, padded, block });
            }
        }
        Ok(Self {
            dims,
            padded_dims,
            layout,
            dtype,
        })
    }

    /// Returns the logical dimensions.
    pub fn dims(&self) -> &TensorDims {
        &self.dims
    }

    /// Returns the padded dimensions.
    pub fn padded_dims(&self) -> &TensorDims {
        &self.padded_dims
    }

    /// Returns the memory layout tag.
    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Returns the element data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the rank.
    pub fn rank(&self) -> usize {
        self.dims.rank()
    }

    // ── Per-axis accessors (by logical meaning) ────────────────

    /// Output channels (rank-4 weights).
    pub fn o(&self) -> usize {
        debug_assert_eq!(self.rank(), 4);
        self.dims.dims()[0]
    }

    /// Input channels (rank-4 weights).
    pub fn i(&self) -> usize {
        debug_assert_eq!(self.rank(), 4);
        self.dims.dims()[1]
    }

    /// Feature-map channels (rank 3).
    pub fn c(&self) -> usize {
        debug_assert_eq!(self.rank(), 3);
        self.dims.dims()[0]
    }

    /// Spatial height (ranks 3 and 4).
    pub fn h(&self) -> usize {
        let d = self.dims.dims();
        d[d.len() - 2]
    }

    /// Spatial width (ranks 3 and 4).
    pub fn w(&self) -> usize {
        let d = self.dims.dims();
        d[d.len() - 1]
    }

    /// Bias length (rank 1).
    pub fn x(&self) -> usize {
        debug_assert_eq!(self.rank(), 1);
        self.dims.dims()[0]
    }

    /// Padded output channels.
    pub fn padded_o(&self) -> usize {
        debug_assert_eq!(self.rank(), 4);
        self.padded_dims.dims()[0]
    }

    /// Padded input channels.
    pub fn padded_i(&self) -> usize {
        debug_assert_eq!(self.rank(), 4);
        self.padded_dims.dims()[1]
    }

    /// Padded feature-map channels.
    pub fn padded_c(&self) -> usize {
        debug_assert_eq!(self.rank(), 3);
        self.padded_dims.dims()[0]
    }

    /// Padded bias length.
    pub fn padded_x(&self) -> usize {
        debug_assert_eq!(self.rank(), 1);
        self.padded_dims.dims()[0]
    }

    // ── Sizes ──────────────────────────────────────────────────

    /// Total logical element count.
    pub fn num_elements(&self) -> usize {
        self.dims.num_elements()
    }

    /// Total padded element count (what storage must hold).
    pub fn num_padded_elements(&self) -> usize {
        self.padded_dims.num_elements()
    }

    /// Storage size in bytes (padded elements × element size).
    pub fn byte_size(&self) -> usize {
        self.num_padded_elements() * self.dtype.size_bytes()
    }

    /// Storage size rounded up to [`BUFFER_ALIGNMENT`].
    ///
    /// This is the size the memory planner reserves for the tensor.
    pub fn aligned_byte_size(&self) -> usize {
        round_up(self.byte_size(), BUFFER_ALIGNMENT)
    }

    // ── Flat element indexing ──────────────────────────────────
    //
    // These are the canonical accessors: given logical coordinates they
    // return the flat element index within padded storage, whatever the
    // layout. The repacker and the reference kernels are built on them.

    /// Flat index of weight element `(o, i, h, w)` for rank-4 layouts.
    pub fn weight_index(&self, o: usize, i: usize, h: usize, w: usize) -> usize {
        debug_assert!(o < self.padded_o() && i < self.padded_i());
        debug_assert!(h < self.h() && w < self.w());
        let pi = self.padded_i();
        let (hh, ww) = (self.h(), self.w());
        match self.layout {
            TensorLayout::oihw => ((o * pi + i) * hh + h) * ww + w,
            TensorLayout::ohwi => ((o * hh + h) * ww + w) * pi + i,
            TensorLayout::OIhw8i8o => {
                let base = (((o / 8) * (pi / 8) + i / 8) * hh + h) * ww + w;
                base * 64 + (i % 8) * 8 + o % 8
            }
            TensorLayout::OIhw16i16o => {
                let base = (((o / 16) * (pi / 16) + i / 16) * hh + h) * ww + w;
                base * 256 + (i % 16) * 16 + o % 16
            }
            TensorLayout::OIhw2o8i8o2i => {
                // Inner block order: [2o][8i][8o][2i], 256 elements.
                let base = (((o / 16) * (pi / 16) + i / 16) * hh + h) * ww + w;
                base * 256 + (o % 16 / 8) * 128 + (i % 16 / 2) * 16 + (o % 8) * 2 + i % 2
            }
            TensorLayout::OIhw8i16o2i => {
                // Inner block order: [8i][16o][2i], 256 elements.
                let base = (((o / 16) * (pi / 16) + i / 16) * hh + h) * ww + w;
                base * 256 + (i % 16 / 2) * 32 + (o % 16) * 2 + i % 2
            }
            other => unreachable!("weight_index on rank-{} layout {other}", other.rank()),
        }
    }

    /// Flat index of feature-map element `(c, h, w)` for rank-3 layouts.
    pub fn chan_index(&self, c: usize, h: usize, w: usize) -> usize {
        debug_assert!(c < self.padded_c());
        debug_assert!(h < self.h() && w < self.w());
        let pc = self.padded_c();
        let (hh, ww) = (self.h(), self.w());
        match self.layout {
            TensorLayout::chw => (c * hh + h) * ww + w,
            TensorLayout::hwc => (h * ww + w) * pc + c,
            TensorLayout::Chw8c => (((c / 8) * hh + h) * ww + w) * 8 + c % 8,
            TensorLayout::Chw16c => (((c / 16) * hh + h) * ww + w) * 16 + c % 16,
            other => unreachable!("chan_index on rank-{} layout {other}", other.rank()),
        }
    }

    /// Flat index of bias element `x`.
    pub fn x_index(&self, x: usize) -> usize {
        debug_assert_eq!(self.layout, TensorLayout::x);
        debug_assert!(x < self.padded_x());
        x
    }
}

impl std::fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}:{}", self.layout, self.padded_dims, self.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(d: &[usize]) -> TensorDims {
        TensorDims::new(d.to_vec())
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 16), 0);
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(17, 16), 32);
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(0, 4), 0);
        assert_eq!(ceil_div(1, 4), 1);
        assert_eq!(ceil_div(8, 4), 2);
        assert_eq!(ceil_div(9, 4), 3);
    }

    #[test]
    fn test_new_unpadded() {
        let d = TensorDesc::new(dims(&[3, 64, 64]), TensorLayout::chw, DType::F32).unwrap();
        assert_eq!(d.c(), 3);
        assert_eq!(d.padded_c(), 3);
        assert_eq!(d.byte_size(), 3 * 64 * 64 * 4);
    }

    #[test]
    fn test_rank_mismatch() {
        let r = TensorDesc::new(dims(&[3, 64, 64]), TensorLayout::oihw, DType::F32);
        assert!(matches!(r, Err(TensorError::RankMismatch { .. })));
    }

    #[test]
    fn test_bad_padding() {
        let r = TensorDesc::padded(
            dims(&[32, 3, 3, 3]),
            dims(&[32, 2, 3, 3]),
            TensorLayout::oihw,
            DType::F16,
        );
        assert!(matches!(r, Err(TensorError::BadPadding { .. })));
    }

    #[test]
    fn test_block_mismatch() {
        // 20 is not a multiple of 16.
        let r = TensorDesc::padded(
            dims(&[20, 64, 64]),
            dims(&[20, 64, 64]),
            TensorLayout::Chw16c,
            DType::F32,
        );
        assert!(matches!(r, Err(TensorError::BlockMismatch { .. })));
    }

    #[test]
    fn test_aligned_byte_size() {
        // 3 channels of 5x5 f32 = 300 bytes, rounded to 320.
        let d = TensorDesc::new(dims(&[3, 5, 5]), TensorLayout::chw, DType::F32).unwrap();
        assert_eq!(d.byte_size(), 300);
        assert_eq!(d.aligned_byte_size(), 320);
    }

    #[test]
    fn test_padded_channels() {
        let d = TensorDesc::padded(
            dims(&[9, 32, 32]),
            dims(&[16, 32, 32]),
            TensorLayout::Chw16c,
            DType::F32,
        )
        .unwrap();
        assert_eq!(d.c(), 9);
        assert_eq!(d.padded_c(), 16);
        assert_eq!(d.num_padded_elements(), 16 * 32 * 32);
    }

    #[test]
    fn test_chan_index_chw_vs_hwc() {
        let chw = TensorDesc::new(dims(&[4, 2, 3]), TensorLayout::chw, DType::F32).unwrap();
        let hwc = TensorDesc::new(dims(&[4, 2, 3]), TensorLayout::hwc, DType::F32).unwrap();
        assert_eq!(chw.chan_index(1, 0, 0), 6);
        assert_eq!(hwc.chan_index(1, 0, 0), 1);
        assert_eq!(chw.chan_index(0, 1, 2), 5);
        assert_eq!(hwc.chan_index(0, 1, 2), 20);
    }

    #[test]
    fn test_chan_index_blocked() {
        let d = TensorDesc::padded(
            dims(&[20, 2, 2]),
            dims(&[32, 2, 2]),
            TensorLayout::Chw16c,
            DType::F32,
        )
        .unwrap();
        // c = 17 → block 1, lane 1.
        assert_eq!(d.chan_index(17, 0, 0), 1 * 2 * 2 * 16 + 1);
        // Within block 0: (c=2, h=1, w=1) → ((0*2+1)*2+1)*16 + 2.
        assert_eq!(d.chan_index(2, 1, 1), 3 * 16 + 2);
    }

    #[test]
    fn test_weight_index_oihw() {
        let d = TensorDesc::new(dims(&[4, 3, 3, 3]), TensorLayout::oihw, DType::F16).unwrap();
        assert_eq!(d.weight_index(0, 0, 0, 0), 0);
        assert_eq!(d.weight_index(1, 0, 0, 0), 27);
        assert_eq!(d.weight_index(0, 1, 2, 1), 9 + 7);
    }

    #[test]
    fn test_weight_index_blocked_bijective() {
        // Every blocked layout must be a bijection over padded storage.
        for layout in [
            TensorLayout::OIhw8i8o,
            TensorLayout::OIhw16i16o,
            TensorLayout::OIhw2o8i8o2i,
            TensorLayout::OIhw8i16o2i,
        ] {
            let block = layout.block_c();
            let d = TensorDesc::padded(
                dims(&[block * 2, block, 3, 3]),
                dims(&[block * 2, block, 3, 3]),
                layout,
                DType::F16,
            )
            .unwrap();
            let n = d.num_padded_elements();
            let mut seen = vec![false; n];
            for o in 0..d.padded_o() {
                for i in 0..d.padded_i() {
                    for h in 0..3 {
                        for w in 0..3 {
                            let idx = d.weight_index(o, i, h, w);
                            assert!(idx < n, "{layout}: index {idx} out of {n}");
                            assert!(!seen[idx], "{layout}: duplicate index {idx}");
                            seen[idx] = true;
                        }
                    }
                }
            }
            assert!(seen.iter().all(|&s| s), "{layout}: not surjective");
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let d = TensorDesc::padded(
            dims(&[9, 128, 128]),
            dims(&[16, 128, 128]),
            TensorLayout::Chw16c,
            DType::F16,
        )
        .unwrap();
        let json = serde_json::to_string(&d).unwrap();
        let back: TensorDesc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
