// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Portable kernel implementations.
//!
//! Every kernel copies its operands out of the backing buffers, computes
//! into a local vector, and writes the result back. That keeps locking
//! trivial (one lock per copy, never nested) at the cost of extra memory
//! traffic, which is acceptable for a reference backend.
//!
//! Convolutions are 3×3, stride 1, zero-padded, addressed through the
//! descriptor's layout-aware element indexing, so one implementation covers
//! `chw` and `hwc` as well as the padded-channel cases.

use crate::{
    Activation, AutoexposureKernel, ConvKernel, EngineError, ImageCopyKernel,
    InputProcessKernel, Kernel, OutputProcessKernel, PoolKernel, PostOp, UpsampleKernel,
};
use crate::kernel::{AUTOEXPOSURE_BIN, AUTOEXPOSURE_KEY};
use crate::autoexposure_scratch_byte_size;
use tensor_core::{ceil_div, TensorDesc};

const AUTOEXPOSURE_EPS: f32 = 1e-8;

pub(crate) fn execute(kernel: Kernel) -> Result<(), EngineError> {
    match kernel {
        Kernel::Conv(k) => conv(k),
        Kernel::Pool(k) => pool(k),
        Kernel::Upsample(k) => upsample(k),
        Kernel::InputProcess(k) => input_process(k),
        Kernel::OutputProcess(k) => output_process(k),
        Kernel::Autoexposure(k) => autoexposure(k),
        Kernel::ImageCopy(k) => image_copy(k),
    }
}

// ── Convolution ────────────────────────────────────────────────

fn conv(k: ConvKernel) -> Result<(), EngineError> {
    let sdesc = k.src.desc().clone();
    let ddesc = k.dst.desc().clone();
    let wdesc = k.weight.desc().clone();

    if wdesc.h() != 3 || wdesc.w() != 3 {
        return Err(EngineError::kernel("conv", "only 3x3 kernels are supported"));
    }
    let (src_h, src_w) = (sdesc.h(), sdesc.w());
    let (expect_h, expect_w) = match k.post_op {
        None => (src_h, src_w),
        Some(PostOp::Pool) => (src_h / 2, src_w / 2),
        Some(PostOp::Upsample) => (src_h * 2, src_w * 2),
    };
    if ddesc.h() != expect_h || ddesc.w() != expect_w {
        return Err(EngineError::kernel(
            "conv",
            format!(
                "destination {}x{} does not match source {src_h}x{src_w} with post-op {:?}",
                ddesc.h(),
                ddesc.w(),
                k.post_op
            ),
        ));
    }

    let src = k.src.read_f32();
    let weight = k.weight.read_f32();
    let bias = k.bias.read_f32();
    let src2 = k.src2.as_ref().map(|v| (v.desc().clone(), v.read_f32()));
    let weight2 = k.weight2.as_ref().map(|v| (v.desc().clone(), v.read_f32()));

    let mut out = vec![0.0f32; ddesc.num_padded_elements()];

    // Value of the convolution at source coordinates (h, w) for output
    // channel o, before activation.
    let conv_at = |o: usize, h: usize, w: usize| -> f32 {
        let mut sum = bias[o];
        sum += partial(&src, &sdesc, &weight, &wdesc, 0, o, h, w);
        if let Some((s2desc, s2)) = &src2 {
            match &weight2 {
                // Separate weight tensor for the second source.
                Some((w2desc, w2)) => sum += partial(s2, s2desc, w2, w2desc, 0, o, h, w),
                // One combined weight tensor; taps offset by the first
                // source's padded channels.
                None => {
                    sum += partial(s2, s2desc, &weight, &wdesc, k.src2_weight_begin_i, o, h, w)
                }
            }
        }
        sum
    };
    let act = |v: f32| match k.activation {
        Activation::None => v,
        Activation::ReLU => v.max(0.0),
    };

    for o in 0..ddesc.padded_c() {
        match k.post_op {
            None => {
                for h in 0..src_h {
                    for w in 0..src_w {
                        out[ddesc.chan_index(o, h, w)] = act(conv_at(o, h, w));
                    }
                }
            }
            Some(PostOp::Pool) => {
                for h in 0..expect_h {
                    for w in 0..expect_w {
                        let mut best = f32::NEG_INFINITY;
                        for dh in 0..2 {
                            for dw in 0..2 {
                                best = best.max(act(conv_at(o, h * 2 + dh, w * 2 + dw)));
                            }
                        }
                        out[ddesc.chan_index(o, h, w)] = best;
                    }
                }
            }
            Some(PostOp::Upsample) => {
                for h in 0..src_h {
                    for w in 0..src_w {
                        let v = act(conv_at(o, h, w));
                        for dh in 0..2 {
                            for dw in 0..2 {
                                out[ddesc.chan_index(o, h * 2 + dh, w * 2 + dw)] = v;
                            }
                        }
                    }
                }
            }
        }
    }

    k.dst.write_f32(&out)
}

/// Accumulates one source's contribution to the convolution at `(h, w)`,
/// reading weight taps starting at input channel `begin_i`.
fn partial(
    src: &[f32],
    sdesc: &TensorDesc,
    weight: &[f32],
    wdesc: &TensorDesc,
    begin_i: usize,
    o: usize,
    h: usize,
    w: usize,
) -> f32 {
    let channels = sdesc.padded_c().min(wdesc.padded_i() - begin_i);
    let (src_h, src_w) = (sdesc.h(), sdesc.w());
    let mut sum = 0.0;
    for c in 0..channels {
        for kh in 0..3usize {
            let ih = h + kh;
            if ih < 1 || ih > src_h {
                continue; // zero padding
            }
            for kw in 0..3usize {
                let iw = w + kw;
                if iw < 1 || iw > src_w {
                    continue;
                }
                sum += src[sdesc.chan_index(c, ih - 1, iw - 1)]
                    * weight[wdesc.weight_index(o, begin_i + c, kh, kw)];
            }
        }
    }
    sum
}

// ── Pool / upsample ────────────────────────────────────────────

fn pool(k: PoolKernel) -> Result<(), EngineError> {
    let sdesc = k.src.desc().clone();
    let ddesc = k.dst.desc().clone();
    if ddesc.h() != sdesc.h() / 2 || ddesc.w() != sdesc.w() / 2 {
        return Err(EngineError::kernel("pool", "destination must halve H and W"));
    }
    let src = k.src.read_f32();
    let mut out = vec![0.0f32; ddesc.num_padded_elements()];
    for c in 0..ddesc.padded_c().min(sdesc.padded_c()) {
        for h in 0..ddesc.h() {
            for w in 0..ddesc.w() {
                let mut best = f32::NEG_INFINITY;
                for dh in 0..2 {
                    for dw in 0..2 {
                        best = best.max(src[sdesc.chan_index(c, h * 2 + dh, w * 2 + dw)]);
                    }
                }
                out[ddesc.chan_index(c, h, w)] = best;
            }
        }
    }
    k.dst.write_f32(&out)
}

fn upsample(k: UpsampleKernel) -> Result<(), EngineError> {
    let sdesc = k.src.desc().clone();
    let ddesc = k.dst.desc().clone();
    if ddesc.h() != sdesc.h() * 2 || ddesc.w() != sdesc.w() * 2 {
        return Err(EngineError::kernel("upsample", "destination must double H and W"));
    }
    let src = k.src.read_f32();
    let mut out = vec![0.0f32; ddesc.num_padded_elements()];
    for c in 0..ddesc.padded_c().min(sdesc.padded_c()) {
        for h in 0..ddesc.h() {
            for w in 0..ddesc.w() {
                out[ddesc.chan_index(c, h, w)] = src[sdesc.chan_index(c, h / 2, w / 2)];
            }
        }
    }
    k.dst.write_f32(&out)
}

// ── Input / output processing ──────────────────────────────────

enum ChannelRole {
    /// Primary input: snorm mapping, HDR clamp, transfer curve.
    Main,
    /// Albedo auxiliary: clamp to [0, 1].
    Albedo,
    /// Normal auxiliary: map [-1, 1] to [0, 1].
    Normal,
}

fn input_process(k: InputProcessKernel) -> Result<(), EngineError> {
    let ddesc = k.dst.desc().clone();
    let tile = k.tile;
    if tile.h == 0 || tile.w == 0 {
        return Err(EngineError::kernel("input_process", "empty tile"));
    }
    if tile.h_dst + tile.h > ddesc.h() || tile.w_dst + tile.w > ddesc.w() {
        return Err(EngineError::kernel("input_process", "tile exceeds tensor extent"));
    }

    // Present images in channel order; the first is the primary input.
    let mut sources: Vec<(ChannelRole, Vec<f32>)> = Vec::new();
    for (image, role) in [
        (&k.color, ChannelRole::Main),
        (&k.albedo, ChannelRole::Albedo),
        (&k.normal, ChannelRole::Normal),
    ] {
        if let Some(image) = image {
            let role = if sources.is_empty() { ChannelRole::Main } else { role };
            sources.push((role, image.read_rect(tile.h_src, tile.w_src, tile.h, tile.w)));
        }
    }
    if sources.is_empty() {
        return Err(EngineError::kernel("input_process", "no input images bound"));
    }
    if sources.len() * 3 > ddesc.padded_c() {
        return Err(EngineError::kernel("input_process", "too many input channels"));
    }

    let mut out = vec![0.0f32; ddesc.num_padded_elements()];
    for h in 0..ddesc.h() {
        // Replicate-clamp rows/columns outside the tile window so the
        // network never sees stale alignment padding.
        let th = h.saturating_sub(tile.h_dst).min(tile.h - 1);
        for w in 0..ddesc.w() {
            let tw = w.saturating_sub(tile.w_dst).min(tile.w - 1);
            for (slot, (role, rect)) in sources.iter().enumerate() {
                let base = (th * tile.w + tw) * 3;
                for c in 0..3 {
                    let raw = rect[base + c];
                    let raw = if raw.is_finite() { raw } else { 0.0 };
                    let v = match role {
                        ChannelRole::Main => {
                            let mut x = if k.snorm { raw * 0.5 + 0.5 } else { raw };
                            x = x.max(0.0);
                            if !k.hdr {
                                x = x.min(1.0);
                            }
                            k.transfer.forward(x)
                        }
                        ChannelRole::Albedo => raw.clamp(0.0, 1.0),
                        ChannelRole::Normal => (raw * 0.5 + 0.5).clamp(0.0, 1.0),
                    };
                    out[ddesc.chan_index(slot * 3 + c, h, w)] = v;
                }
            }
        }
    }
    k.dst.write_f32(&out)
}

fn output_process(k: OutputProcessKernel) -> Result<(), EngineError> {
    let sdesc = k.src.desc().clone();
    let tile = k.tile;
    if tile.h_src + tile.h > sdesc.h() || tile.w_src + tile.w > sdesc.w() {
        return Err(EngineError::kernel("output_process", "tile exceeds tensor extent"));
    }
    if sdesc.padded_c() < 3 {
        return Err(EngineError::kernel("output_process", "source has fewer than 3 channels"));
    }

    let src = k.src.read_f32();
    let mut out = vec![0.0f32; tile.h * tile.w * 3];
    for th in 0..tile.h {
        for tw in 0..tile.w {
            for c in 0..3 {
                let v = src[sdesc.chan_index(c, tile.h_src + th, tile.w_src + tw)];
                let mut x = k.transfer.inverse(v);
                if k.snorm {
                    x = (x * 2.0 - 1.0).clamp(-1.0, 1.0);
                } else {
                    x = x.max(0.0);
                    if !k.hdr {
                        x = x.min(1.0);
                    }
                }
                out[(th * tile.w + tw) * 3 + c] = x;
            }
        }
    }
    k.dst.write_rect(tile.h_dst, tile.w_dst, tile.h, tile.w, &out)
}

// ── Autoexposure ───────────────────────────────────────────────

fn autoexposure(k: AutoexposureKernel) -> Result<(), EngineError> {
    let (h, w) = (k.src.h(), k.src.w());
    let bins_h = ceil_div(h, AUTOEXPOSURE_BIN);
    let bins_w = ceil_div(w, AUTOEXPOSURE_BIN);
    let need = autoexposure_scratch_byte_size(w, h);
    if k.scratch.byte_size < need {
        return Err(EngineError::kernel(
            "autoexposure",
            format!("scratch of {} bytes, need {need}", k.scratch.byte_size),
        ));
    }

    // Pass 1: average luminance per bin, staged in op scratch.
    let pixels = k.src.to_f32_vec();
    let mut bins = vec![0.0f32; bins_h * bins_w];
    for bh in 0..bins_h {
        for bw in 0..bins_w {
            let h1 = ((bh + 1) * AUTOEXPOSURE_BIN).min(h);
            let w1 = ((bw + 1) * AUTOEXPOSURE_BIN).min(w);
            let mut sum = 0.0f32;
            let mut count = 0usize;
            for y in bh * AUTOEXPOSURE_BIN..h1 {
                for x in bw * AUTOEXPOSURE_BIN..w1 {
                    let p = &pixels[(y * w + x) * 3..(y * w + x) * 3 + 3];
                    let lum = 0.212671 * p[0] + 0.715160 * p[1] + 0.072169 * p[2];
                    if lum.is_finite() {
                        sum += lum;
                        count += 1;
                    }
                }
            }
            bins[bh * bins_w + bw] = if count > 0 { sum / count as f32 } else { 0.0 };
        }
    }
    {
        let mut guard = k.scratch.buffer.lock();
        let base = k.scratch.byte_offset / 4;
        guard.as_f32_mut()[base..base + bins.len()].copy_from_slice(&bins);
    }

    // Pass 2: log-average of the bins.
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for &lum in &bins {
        if lum > AUTOEXPOSURE_EPS {
            sum += lum.log2();
            count += 1;
        }
    }
    let result = if count > 0 {
        AUTOEXPOSURE_KEY / (sum / count as f32).exp2()
    } else {
        1.0
    };
    tracing::debug!(result, "autoexposure");
    k.transfer.set_input_scale(result);
    Ok(())
}

// ── Image copy ─────────────────────────────────────────────────

fn image_copy(k: ImageCopyKernel) -> Result<(), EngineError> {
    if k.src.h() != k.dst.h() || k.src.w() != k.dst.w() {
        return Err(EngineError::kernel(
            "image_copy",
            format!(
                "size mismatch: {}x{} vs {}x{}",
                k.src.w(),
                k.src.h(),
                k.dst.w(),
                k.dst.h()
            ),
        ));
    }
    let data = k.src.to_f32_vec();
    k.dst.write_rect(0, 0, k.dst.h(), k.dst.w(), &data)
}
