// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor descriptors and host-side tensor storage for the denoising runtime.
//!
//! # Key Components
//!
//! - [`DType`] — element types (`f16` weights on disk, `f16`/`f32` compute).
//! - [`TensorDims`] — logical dimension list (`O I H W`, `C H W`, or `X`).
//! - [`TensorLayout`] — memory order tags: canonical (`oihw`, `chw`, `hwc`,
//!   `ohwi`, `x`) and channel-blocked variants (`Chw16c`, `OIhw16i16o`, ...).
//! - [`TensorDesc`] — dims + padded dims + layout + dtype, plus the flat
//!   element indexing used by the weight repacker and the reference kernels.
//! - [`HostTensor`] — an owned tensor with dtype-converting scalar access,
//!   used for canonical weights before they are repacked onto a device.
//!
//! Device-resident tensors do not live here: they are views into a scratch
//! buffer owned by the compute backend. This crate only knows how big such a
//! view is ([`TensorDesc::aligned_byte_size`]) and how to address elements
//! inside it.

mod desc;
mod dims;
mod dtype;
mod error;
mod layout;
mod tensor;

pub use desc::{ceil_div, round_up, TensorDesc, BUFFER_ALIGNMENT};
pub use dims::TensorDims;
pub use dtype::DType;
pub use error::TensorError;
pub use layout::TensorLayout;
pub use tensor::HostTensor;
