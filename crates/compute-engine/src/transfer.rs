// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transfer functions applied by the input/output image-processing kernels.
//!
//! The network is trained on perceptually compressed values, so HDR inputs
//! pass through a log-based curve and LDR inputs through an sRGB-style gamma
//! before entering the network; the output side applies the inverse.
//!
//! The input scale is stored as atomic bits so the autoexposure kernel can
//! publish its result from an engine thread while the filter keeps one
//! shared transfer function across all graph instances.

use std::sync::atomic::{AtomicU32, Ordering};

/// Largest luminance the HDR curve is normalized against (max finite `f16`).
const HDR_Y_MAX: f32 = 65504.0;

/// The curve family a [`TransferFunc`] applies after input scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Identity curve (already display-encoded or signed data).
    Linear,
    /// Piecewise sRGB encoding for LDR linear input.
    Srgb,
    /// Perceptually uniform log curve for HDR input.
    Pu,
}

/// A forward/inverse transfer curve with a settable input scale.
pub struct TransferFunc {
    kind: TransferKind,
    /// `f32` bits of the input scale.
    input_scale_bits: AtomicU32,
}

impl TransferFunc {
    pub fn new(kind: TransferKind) -> Self {
        Self {
            kind,
            input_scale_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Returns the curve family.
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Sets the scale applied to input values before the curve.
    pub fn set_input_scale(&self, scale: f32) {
        self.input_scale_bits.store(scale.to_bits(), Ordering::Release);
    }

    /// Returns the current input scale.
    pub fn input_scale(&self) -> f32 {
        f32::from_bits(self.input_scale_bits.load(Ordering::Acquire))
    }

    /// Forward transform: scale, then encode.
    pub fn forward(&self, value: f32) -> f32 {
        let x = value * self.input_scale();
        match self.kind {
            TransferKind::Linear => x,
            TransferKind::Srgb => srgb_forward(x),
            TransferKind::Pu => pu_forward(x),
        }
    }

    /// Inverse transform: decode, then unscale.
    pub fn inverse(&self, value: f32) -> f32 {
        let x = match self.kind {
            TransferKind::Linear => value,
            TransferKind::Srgb => srgb_inverse(value),
            TransferKind::Pu => pu_inverse(value),
        };
        x / self.input_scale()
    }
}

impl std::fmt::Debug for TransferFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferFunc")
            .field("kind", &self.kind)
            .field("input_scale", &self.input_scale())
            .finish()
    }
}

fn srgb_forward(x: f32) -> f32 {
    if x <= 0.0031308 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_inverse(y: f32) -> f32 {
    if y <= 0.04045 {
        y / 12.92
    } else {
        ((y + 0.055) / 1.055).powf(2.4)
    }
}

fn pu_forward(x: f32) -> f32 {
    (1.0 + x.max(0.0)).log2() / (1.0 + HDR_Y_MAX).log2()
}

fn pu_inverse(y: f32) -> f32 {
    (y * (1.0 + HDR_Y_MAX).log2()).exp2() - 1.0
}
