// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor memory-layout tags.
//!
//! A layout decides how the logical dimensions of a [`crate::TensorDesc`]
//! map to a flat element index. Canonical layouts (`oihw`, `chw`, `hwc`,
//! `ohwi`, `x`) store elements in plain nested order; blocked layouts group
//! channels into fixed-size blocks so a compute backend can use contiguous
//! vector loads. Logical channel counts are padded up to the block size.

/// Memory-order tag for a tensor.
///
/// Naming follows the oneDNN convention: uppercase letters are blocked
/// (outer) dimensions, the trailing digit+letter groups describe the
/// within-block order. `OIhw8i16o2i` means: outer loops over `O/16` and
/// `I/16` blocks, then `h`, `w`, then an inner `[8i][16o][2i]` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[allow(non_camel_case_types)]
pub enum TensorLayout {
    /// Rank-1 bias vector.
    x,
    /// Rank-3 feature map, channel-major.
    chw,
    /// Rank-3 feature map, channel-minor (interleaved).
    hwc,
    /// Rank-3 feature map, channels blocked by 8.
    Chw8c,
    /// Rank-3 feature map, channels blocked by 16.
    Chw16c,
    /// Rank-4 weights, canonical.
    oihw,
    /// Rank-4 weights, input-channel-minor.
    ohwi,
    /// Rank-4 weights, 8×8 input/output blocking.
    OIhw8i8o,
    /// Rank-4 weights, 16×16 input/output blocking.
    OIhw16i16o,
    /// Rank-4 weights, 16×16 blocking with `[2o][8i][8o][2i]` inner order.
    OIhw2o8i8o2i,
    /// Rank-4 weights, 16×16 blocking with `[8i][16o][2i]` inner order.
    OIhw8i16o2i,
}

impl TensorLayout {
    /// Returns the rank a tensor with this layout must have.
    pub fn rank(self) -> usize {
        match self {
            TensorLayout::x => 1,
            TensorLayout::chw | TensorLayout::hwc | TensorLayout::Chw8c | TensorLayout::Chw16c => 3,
            _ => 4,
        }
    }

    /// Returns the channel block size.
    ///
    /// Logical channel counts (both `I` and `O` for weights, `C` for feature
    /// maps) are padded up to a multiple of this value.
    pub fn block_c(self) -> usize {
        match self {
            TensorLayout::Chw8c | TensorLayout::OIhw8i8o => 8,
            TensorLayout::Chw16c
            | TensorLayout::OIhw16i16o
            | TensorLayout::OIhw2o8i8o2i
            | TensorLayout::OIhw8i16o2i => 16,
            _ => 1,
        }
    }

    /// Returns `true` if this layout groups channels into blocks.
    pub fn is_blocked(self) -> bool {
        self.block_c() > 1
    }

    /// Returns a human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            TensorLayout::x => "x",
            TensorLayout::chw => "chw",
            TensorLayout::hwc => "hwc",
            TensorLayout::Chw8c => "Chw8c",
            TensorLayout::Chw16c => "Chw16c",
            TensorLayout::oihw => "oihw",
            TensorLayout::ohwi => "ohwi",
            TensorLayout::OIhw8i8o => "OIhw8i8o",
            TensorLayout::OIhw16i16o => "OIhw16i16o",
            TensorLayout::OIhw2o8i8o2i => "OIhw2o8i8o2i",
            TensorLayout::OIhw8i16o2i => "OIhw8i16o2i",
        }
    }
}

impl std::fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks() {
        assert_eq!(TensorLayout::x.rank(), 1);
        assert_eq!(TensorLayout::chw.rank(), 3);
        assert_eq!(TensorLayout::hwc.rank(), 3);
        assert_eq!(TensorLayout::oihw.rank(), 4);
        assert_eq!(TensorLayout::OIhw8i16o2i.rank(), 4);
    }

    #[test]
    fn test_block_sizes() {
        assert_eq!(TensorLayout::chw.block_c(), 1);
        assert_eq!(TensorLayout::Chw8c.block_c(), 8);
        assert_eq!(TensorLayout::Chw16c.block_c(), 16);
        assert_eq!(TensorLayout::OIhw8i8o.block_c(), 8);
        assert_eq!(TensorLayout::OIhw16i16o.block_c(), 16);
        assert_eq!(TensorLayout::OIhw2o8i8o2i.block_c(), 16);
        assert_eq!(TensorLayout::OIhw8i16o2i.block_c(), 16);
    }

    #[test]
    fn test_blocked_flag() {
        assert!(!TensorLayout::oihw.is_blocked());
        assert!(!TensorLayout::hwc.is_blocked());
        assert!(TensorLayout::OIhw16i16o.is_blocked());
    }
}
