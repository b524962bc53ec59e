// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Best-fit offset assignment over greedily ordered chunks.
//!
//! # Algorithm
//!
//! 1. Group chained records into *chunks*: a chunk is the set of records
//!    reachable by `next` links from a record with no predecessor. Its size
//!    is the sum of member sizes; its live interval is the union of member
//!    intervals.
//! 2. Place chunks in order of decreasing size (stable, so equal sizes keep
//!    insertion order and results are reproducible).
//! 3. For each chunk, walk the already-placed records in ascending offset
//!    order, ignoring records that do not overlap the chunk in time, and
//!    pick the smallest gap that fits; append at the high-water mark when no
//!    gap fits.
//! 4. Expand the chunk: members get consecutive offsets in chain order and
//!    enter the active list at their sorted positions.
//!
//! Ignoring time-disjoint records is what lets tensors share bytes: a
//! record placed "inside" another's extent is fine as long as their live
//! intervals never intersect.

use crate::{AllocArena, AllocId};

/// Assigns a byte offset to every record in the arena and returns the
/// high-water mark (the scratch size required for all transient tensors).
///
/// Offsets of chained records are consecutive; records whose live intervals
/// overlap receive disjoint byte extents.
pub fn plan_offsets(arena: &mut AllocArena) -> usize {
    struct Chunk {
        first: AllocId,
        byte_size: usize,
        first_op: usize,
        last_op: usize,
    }

    // Collect chunks, walking each chain from its head.
    let mut chunks: Vec<Chunk> = Vec::new();
    for (id, rec) in arena.iter() {
        if rec.prev().is_some() {
            continue;
        }
        let mut chunk = Chunk {
            first: id,
            byte_size: 0,
            first_op: rec.first_op,
            last_op: rec.last_op,
        };
        let mut cur = Some(id);
        while let Some(cid) = cur {
            let r = arena.get(cid);
            chunk.byte_size += r.byte_size;
            chunk.first_op = chunk.first_op.min(r.first_op);
            chunk.last_op = chunk.last_op.max(r.last_op);
            cur = r.next();
        }
        chunks.push(chunk);
    }

    // Largest chunks first; stable sort keeps ties deterministic.
    chunks.sort_by(|a, b| b.byte_size.cmp(&a.byte_size));

    // Already-placed records, sorted by ascending byte offset.
    let mut active: Vec<AllocId> = Vec::new();
    let mut high_water = 0usize;

    for chunk in &chunks {
        let mut cur_offset = 0usize;
        let mut best_offset = None;
        let mut best_gap = usize::MAX;

        for &aid in &active {
            let a = arena.get(aid);
            // Time-disjoint records may share bytes with this chunk.
            if a.last_op < chunk.first_op || a.first_op > chunk.last_op {
                continue;
            }
            let gap = a.byte_offset.saturating_sub(cur_offset);
            if cur_offset + chunk.byte_size <= a.byte_offset && gap < best_gap {
                best_offset = Some(cur_offset);
                best_gap = gap;
            }
            cur_offset = cur_offset.max(a.byte_offset + a.byte_size);
        }

        // No gap fits: append at the current high-water mark for this
        // chunk's conflict set.
        let mut offset = best_offset.unwrap_or(cur_offset);

        let mut cur = Some(chunk.first);
        while let Some(cid) = cur {
            arena.record_mut(cid).byte_offset = offset;
            let pos = active.partition_point(|&x| arena.get(x).byte_offset <= offset);
            active.insert(pos, cid);
            offset += arena.get(cid).byte_size;
            cur = arena.get(cid).next();
        }

        high_water = high_water.max(offset);
    }

    high_water
}
