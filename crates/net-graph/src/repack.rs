// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight and bias repacking: canonical `oihw`/`x` half tensors into the
//! padded, possibly blocked layouts a backend prefers.
//!
//! The supported combinations form a closed set, checked up front against
//! a table; anything outside it is a fatal repack error. Conversion between
//! `f16` and `f32` is value-preserving, and every destination element
//! outside the copied logical extent is written as zero — including the
//! padded output-channel range and any input-channel padding at the end of
//! the destination slice.

use crate::GraphError;
use tensor_core::{DType, HostTensor, TensorLayout};

/// The closed set of supported weight repacks, keyed by
/// `(src dtype, dst dtype, src layout, dst layout)`.
///
/// The fully blocked `OIhw2o8i8o2i` and `OIhw8i16o2i` destinations exist
/// only for half-precision output.
const SUPPORTED_WEIGHT: &[(DType, DType, TensorLayout, TensorLayout)] = &[
    (DType::F16, DType::F16, TensorLayout::oihw, TensorLayout::oihw),
    (DType::F16, DType::F32, TensorLayout::oihw, TensorLayout::oihw),
    (DType::F16, DType::F16, TensorLayout::oihw, TensorLayout::OIhw8i8o),
    (DType::F16, DType::F32, TensorLayout::oihw, TensorLayout::OIhw8i8o),
    (DType::F16, DType::F16, TensorLayout::oihw, TensorLayout::OIhw16i16o),
    (DType::F16, DType::F32, TensorLayout::oihw, TensorLayout::OIhw16i16o),
    (DType::F16, DType::F16, TensorLayout::oihw, TensorLayout::OIhw2o8i8o2i),
    (DType::F16, DType::F16, TensorLayout::oihw, TensorLayout::OIhw8i16o2i),
    (DType::F16, DType::F16, TensorLayout::oihw, TensorLayout::ohwi),
    (DType::F16, DType::F32, TensorLayout::oihw, TensorLayout::ohwi),
];

/// Returns `true` if the weight repack combination is supported.
pub fn is_weight_repack_supported(
    src_dtype: DType,
    dst_dtype: DType,
    src_layout: TensorLayout,
    dst_layout: TensorLayout,
) -> bool {
    SUPPORTED_WEIGHT.contains(&(src_dtype, dst_dtype, src_layout, dst_layout))
}

/// Copies input channels `[src_begin_i, src_begin_i + src_i)` of `src` into
/// input channels `[dst_begin_i, dst_begin_i + dst_i)` of `dst`, writing
/// zero everywhere outside the source's logical extent.
///
/// `dst_i >= src_i`; the trailing `dst_i - src_i` input channels and the
/// padded output-channel range of `dst` are zero-filled. Spatial dims must
/// match.
pub fn repack_weight(
    src: &HostTensor,
    src_begin_i: usize,
    src_i: usize,
    dst: &mut HostTensor,
    dst_begin_i: usize,
    dst_i: usize,
) -> Result<(), GraphError> {
    let sdesc = src.desc().clone();
    let ddesc = dst.desc().clone();

    if !is_weight_repack_supported(sdesc.dtype(), ddesc.dtype(), sdesc.layout(), ddesc.layout()) {
        return Err(GraphError::UnsupportedRepack {
            src_dtype: sdesc.dtype(),
            src_layout: sdesc.layout(),
            dst_dtype: ddesc.dtype(),
            dst_layout: ddesc.layout(),
        });
    }
    if src_begin_i + src_i > sdesc.padded_i() || dst_begin_i + dst_i > ddesc.padded_i() {
        return Err(GraphError::InvalidArgument(format!(
            "repack range [{src_begin_i}+{src_i}) / [{dst_begin_i}+{dst_i}) out of bounds for {} -> {}",
            sdesc, ddesc
        )));
    }
    if src_i > dst_i {
        return Err(GraphError::InvalidArgument(format!(
            "repack would drop channels: src_i {src_i} > dst_i {dst_i}"
        )));
    }
    if sdesc.h() != ddesc.h() || sdesc.w() != ddesc.w() {
        return Err(GraphError::InvalidArgument(format!(
            "repack spatial mismatch: {} vs {}",
            sdesc, ddesc
        )));
    }

    for o in 0..ddesc.padded_o() {
        for i in 0..dst_i {
            for h in 0..ddesc.h() {
                for w in 0..ddesc.w() {
                    let value = if o < sdesc.o() && i < src_i {
                        src.get(sdesc.weight_index(o, src_begin_i + i, h, w))
                    } else {
                        0.0 // padding
                    };
                    dst.set(ddesc.weight_index(o, dst_begin_i + i, h, w), value);
                }
            }
        }
    }
    Ok(())
}

/// Copies a bias vector, zero-filling the padded tail.
///
/// Both tensors must use the `x` layout; the source must be half precision
/// and the destination half or single precision.
pub fn repack_bias(src: &HostTensor, dst: &mut HostTensor) -> Result<(), GraphError> {
    let sdesc = src.desc().clone();
    let ddesc = dst.desc().clone();

    let supported = sdesc.layout() == TensorLayout::x
        && ddesc.layout() == TensorLayout::x
        && sdesc.dtype() == DType::F16
        && (ddesc.dtype() == DType::F16 || ddesc.dtype() == DType::F32);
    if !supported {
        return Err(GraphError::UnsupportedRepack {
            src_dtype: sdesc.dtype(),
            src_layout: sdesc.layout(),
            dst_dtype: ddesc.dtype(),
            dst_layout: ddesc.layout(),
        });
    }
    if sdesc.x() > ddesc.padded_x() {
        return Err(GraphError::InvalidArgument(format!(
            "bias of {} values does not fit destination of {}",
            sdesc.x(),
            ddesc.padded_x()
        )));
    }

    for x in 0..sdesc.x() {
        dst.set(ddesc.x_index(x), src.get(sdesc.x_index(x)));
    }
    for x in sdesc.x()..ddesc.padded_x() {
        dst.set(ddesc.x_index(x), 0.0); // padding
    }
    Ok(())
}
