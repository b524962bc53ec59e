// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tile planning: split the image into overlapping tiles that fit a memory
//! ceiling.
//!
//! Tiles overlap by a halo that is computed but discarded on output, so tile
//! seams never show. The *output* rectangles tile the image exactly: every
//! pixel is written once.
//!
//! [`plan_tiles`] starts with one tile covering the whole image and keeps
//! subdividing the longer axis until (a) the per-engine graphs fit the
//! budget and (b) the tile count is a multiple of the engine count, so the
//! round-robin tile assignment keeps every engine busy. When a tile cannot
//! shrink below `3 × overlap`, one last attempt runs without a ceiling.

use crate::FilterError;
use tensor_core::{ceil_div, round_up};

/// A chosen tile decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    /// Input tile extent (including overlap), aligned.
    pub tile_h: usize,
    pub tile_w: usize,
    /// Number of tiles along each axis.
    pub count_h: usize,
    pub count_w: usize,
    /// Halo thickness in pixels.
    pub overlap: usize,
    /// Tile-corner alignment in pixels.
    pub alignment: usize,
}

/// Window arithmetic for one tile of a [`TileGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    /// Input rectangle position in the image (overlap included).
    pub in_h: usize,
    pub in_w: usize,
    /// Input rectangle extent (may be clipped at the image edge).
    pub in_size_h: usize,
    pub in_size_w: usize,
    /// Offset of the input rectangle inside the tile buffer; short edge
    /// tiles sit against the bottom/right so tile corners stay aligned.
    pub align_offset_h: usize,
    pub align_offset_w: usize,
    /// Output rectangle position inside the tile buffer.
    pub out_src_h: usize,
    pub out_src_w: usize,
    /// Output rectangle position in the image.
    pub out_dst_h: usize,
    pub out_dst_w: usize,
    /// Output rectangle extent (overlap excluded).
    pub out_size_h: usize,
    pub out_size_w: usize,
}

impl TileGrid {
    /// Builds a grid for an `h × w` image from a chosen tile extent,
    /// computing the tile counts that actually cover the image.
    pub fn new(
        h: usize,
        w: usize,
        overlap: usize,
        alignment: usize,
        tile_h: usize,
        tile_w: usize,
    ) -> Self {
        let count_h = if h > tile_h {
            ceil_div(h - 2 * overlap, tile_h - 2 * overlap)
        } else {
            1
        };
        let count_w = if w > tile_w {
            ceil_div(w - 2 * overlap, tile_w - 2 * overlap)
        } else {
            1
        };
        Self {
            tile_h,
            tile_w,
            count_h,
            count_w,
            overlap,
            alignment,
        }
    }

    /// Total number of tiles.
    pub fn num_tiles(&self) -> usize {
        self.count_h * self.count_w
    }

    /// Computes the input/output windows of tile `(i, j)` for an `h × w`
    /// image.
    pub fn tile_rect(&self, i: usize, j: usize, h: usize, w: usize) -> TileRect {
        debug_assert!(i < self.count_h && j < self.count_w);
        let overlap = self.overlap;

        let in_h = i * (self.tile_h - 2 * overlap);
        let in_w = j * (self.tile_w - 2 * overlap);
        let overlap_begin_h = if i > 0 { overlap } else { 0 };
        let overlap_begin_w = if j > 0 { overlap } else { 0 };
        let overlap_end_h = if i < self.count_h - 1 { overlap } else { 0 };
        let overlap_end_w = if j < self.count_w - 1 { overlap } else { 0 };

        let in_size_h = (h - in_h).min(self.tile_h);
        let in_size_w = (w - in_w).min(self.tile_w);
        let out_size_h = in_size_h - overlap_begin_h - overlap_end_h;
        let out_size_w = in_size_w - overlap_begin_w - overlap_end_w;
        let align_offset_h = self.tile_h - round_up(in_size_h, self.alignment);
        let align_offset_w = self.tile_w - round_up(in_size_w, self.alignment);

        TileRect {
            in_h,
            in_w,
            in_size_h,
            in_size_w,
            align_offset_h,
            align_offset_w,
            out_src_h: align_offset_h + overlap_begin_h,
            out_src_w: align_offset_w + overlap_begin_w,
            out_dst_h: in_h + overlap_begin_h,
            out_dst_w: in_w + overlap_begin_w,
            out_size_h,
            out_size_w,
        }
    }
}

/// Finds a tile decomposition whose model build fits the memory ceiling.
///
/// `build` attempts to construct the per-engine graphs for the candidate
/// grid; `Some(budget)` is the ceiling in bytes, `None` means unlimited.
/// Returning `Ok(false)` triggers one more subdivision step. When neither
/// axis can shrink further, a final unlimited-budget attempt either succeeds
/// or the whole plan fails with [`FilterError::ModelBuild`].
pub fn plan_tiles(
    h: usize,
    w: usize,
    overlap: usize,
    alignment: usize,
    num_engines: usize,
    max_memory_byte_size: usize,
    mut build: impl FnMut(&TileGrid, Option<usize>) -> Result<bool, FilterError>,
) -> Result<TileGrid, FilterError> {
    let min_tile_size = 3 * overlap;
    let mut tile_h = round_up(h, alignment);
    let mut tile_w = round_up(w, alignment);
    let mut count_h = 1usize;
    let mut count_w = 1usize;

    loop {
        let grid = TileGrid {
            tile_h,
            tile_w,
            count_h,
            count_w,
            overlap,
            alignment,
        };
        if (count_h * count_w) % num_engines == 0 && build(&grid, Some(max_memory_byte_size))? {
            break;
        }

        if tile_h > min_tile_size && tile_h > tile_w {
            count_h += 1;
            tile_h = (round_up(
                ceil_div(h.saturating_sub(2 * overlap).max(1), count_h),
                alignment,
            ) + 2 * overlap)
                .max(min_tile_size);
        } else if tile_w > min_tile_size {
            count_w += 1;
            tile_w = (round_up(
                ceil_div(w.saturating_sub(2 * overlap).max(1), count_w),
                alignment,
            ) + 2 * overlap)
                .max(min_tile_size);
        } else {
            // Cannot divide further; try once more without a ceiling.
            if !build(&grid, None)? {
                return Err(FilterError::ModelBuild);
            }
            break;
        }
    }

    let grid = TileGrid::new(h, w, overlap, alignment, tile_h, tile_w);
    tracing::debug!(
        tile = format!("{}x{}", grid.tile_w, grid.tile_h),
        count = format!("{}x{}", grid.count_w, grid.count_h),
        "tile plan"
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checks that the output rectangles of a grid partition the image:
    /// every pixel covered exactly once.
    fn assert_exact_cover(grid: &TileGrid, h: usize, w: usize) {
        let mut covered = vec![0u8; h * w];
        for i in 0..grid.count_h {
            for j in 0..grid.count_w {
                let r = grid.tile_rect(i, j, h, w);
                assert!(r.out_size_h > 0 && r.out_size_w > 0, "empty tile ({i},{j})");
                assert!(r.out_dst_h + r.out_size_h <= h);
                assert!(r.out_dst_w + r.out_size_w <= w);
                for y in r.out_dst_h..r.out_dst_h + r.out_size_h {
                    for x in r.out_dst_w..r.out_dst_w + r.out_size_w {
                        covered[y * w + x] += 1;
                    }
                }
            }
        }
        assert!(
            covered.iter().all(|&c| c == 1),
            "coverage broken for {h}x{w} with {grid:?}"
        );
    }

    #[test]
    fn test_single_tile_covers_all() {
        let grid = TileGrid::new(100, 70, 16, 16, 112, 80);
        assert_eq!((grid.count_h, grid.count_w), (1, 1));
        assert_exact_cover(&grid, 100, 70);

        let r = grid.tile_rect(0, 0, 100, 70);
        assert_eq!((r.in_size_h, r.in_size_w), (100, 70));
        // Short edges are pushed against the bottom/right of the buffer.
        assert_eq!(r.align_offset_h, 112 - 112);
        assert_eq!(r.align_offset_w, 80 - 80);
    }

    #[test]
    fn test_forced_2x2_grid() {
        // A ceiling that rejects anything bigger than 544x544 forces the
        // 1024x1024 image into exactly four 512x512 output tiles.
        let bytes = |g: &TileGrid| g.tile_h * g.tile_w * 4;
        let budget = 1_500_000; // 544*544*4 fits, 1024*544*4 does not

        let grid = plan_tiles(1024, 1024, 16, 32, 2, budget, |g, b| {
            Ok(b.map_or(true, |b| bytes(g) <= b))
        })
        .unwrap();

        assert_eq!((grid.count_h, grid.count_w), (2, 2));
        assert_eq!(grid.num_tiles() % 2, 0);
        assert_exact_cover(&grid, 1024, 1024);
        for i in 0..2 {
            for j in 0..2 {
                let r = grid.tile_rect(i, j, 1024, 1024);
                assert_eq!((r.out_size_h, r.out_size_w), (512, 512));
            }
        }
    }

    #[test]
    fn test_engine_divisibility_forces_split() {
        // The build always fits, but 1 tile is not a multiple of 2 engines.
        let grid = plan_tiles(256, 256, 16, 16, 2, usize::MAX, |_, _| Ok(true)).unwrap();
        assert_eq!(grid.num_tiles() % 2, 0);
        assert_exact_cover(&grid, 256, 256);
    }

    #[test]
    fn test_min_tile_size_fallback() {
        // Nothing ever fits the ceiling; the planner must bottom out at the
        // minimum tile size and retry without a budget.
        let mut unlimited_calls = 0;
        let grid = plan_tiles(128, 128, 16, 16, 1, 1, |g, budget| {
            if budget.is_none() {
                unlimited_calls += 1;
                Ok(true)
            } else {
                Ok(false)
            }
        })
        .unwrap();
        assert_eq!(unlimited_calls, 1);
        assert!(grid.tile_h >= 3 * 16 && grid.tile_w >= 3 * 16);
        assert_exact_cover(&grid, 128, 128);
    }

    #[test]
    fn test_model_build_error_when_nothing_fits() {
        let result = plan_tiles(128, 128, 16, 16, 1, 1, |_, _| Ok(false));
        assert!(matches!(result, Err(FilterError::ModelBuild)));
    }

    #[test]
    fn test_uneven_image_edges() {
        // Sizes that are not multiples of anything still cover exactly.
        for &(h, w) in &[(97, 203), (130, 66), (500, 100), (1000, 999)] {
            let grid = plan_tiles(h, w, 16, 16, 1, 64 * 64 * 16, |g, b| {
                Ok(b.map_or(true, |b| g.tile_h * g.tile_w * 4 <= b))
            })
            .unwrap();
            assert_exact_cover(&grid, h, w);
            assert!(grid.tile_h >= 3 * 16 && grid.tile_w >= 3 * 16);
        }
    }

    // ── Property tests ─────────────────────────────────────────

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Output tiles always partition the image, whatever budget the
        /// build callback enforces.
        #[test]
        fn prop_tiles_partition_image(
            h in 33usize..700,
            w in 33usize..700,
            budget_tiles in 1usize..10,
            num_engines in 1usize..4,
        ) {
            let overlap = 16;
            let alignment = 16;
            // Budget expressed as a max tile area.
            let max_area = (h.max(w) * h.max(w)) / budget_tiles + 3 * overlap * 3 * overlap;
            let planned = plan_tiles(h, w, overlap, alignment, num_engines, max_area, |g, b| {
                Ok(b.map_or(true, |b| g.tile_h * g.tile_w <= b))
            });
            let grid = planned.unwrap();

            prop_assert!(grid.tile_h >= 3 * overlap);
            prop_assert!(grid.tile_w >= 3 * overlap);

            let mut covered = vec![0u8; h * w];
            for i in 0..grid.count_h {
                for j in 0..grid.count_w {
                    let r = grid.tile_rect(i, j, h, w);
                    for y in r.out_dst_h..r.out_dst_h + r.out_size_h {
                        for x in r.out_dst_w..r.out_dst_w + r.out_size_w {
                            covered[y * w + x] += 1;
                        }
                    }
                }
            }
            prop_assert!(covered.iter().all(|&c| c == 1));
        }
    }
}
