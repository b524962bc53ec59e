// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: the full filter pipeline from parameter setting
//! through tiled execution, across engine counts and modes.
//!
//! Most tests supply a narrow user weight blob (4-channel U-Net) so the
//! reference convolutions stay fast; one smoke test runs the full built-in
//! channel plan on a small image.

use compute_engine::cpu::CpuDevice;
use compute_engine::{Image, ImageDesc, ImageFormat, SyncMode};
use half::f16;
use net_graph::Weights;
use std::sync::{Arc, Mutex};
use tensor_core::{DType, HostTensor, TensorDesc, TensorDims, TensorLayout};
use unet_filter::{FilterError, UNetFilter};

// ── Helpers ────────────────────────────────────────────────────

/// A narrow 4-channel variant of the U-Net weight plan, keyed by the same
/// operator names the filter builds.
fn tiny_weights(input_c: usize) -> Weights {
    let plan = [
        ("enc_conv0", 4, input_c),
        ("enc_conv1", 4, 4),
        ("enc_conv2", 4, 4),
        ("enc_conv3", 4, 4),
        ("enc_conv4", 4, 4),
        ("enc_conv5a", 4, 4),
        ("enc_conv5b", 4, 4),
        ("dec_conv4a", 4, 8),
        ("dec_conv4b", 4, 4),
        ("dec_conv3a", 4, 8),
        ("dec_conv3b", 4, 4),
        ("dec_conv2a", 4, 8),
        ("dec_conv2b", 4, 4),
        ("dec_conv1a", 4, 4 + input_c),
        ("dec_conv1b", 4, 4),
        ("dec_conv0", 3, 4),
    ];
    let mut weights = Weights::new();
    for (name, out_c, in_c) in plan {
        let wdesc = TensorDesc::new(
            TensorDims::new(vec![out_c, in_c, 3, 3]),
            TensorLayout::oihw,
            DType::F16,
        )
        .unwrap();
        let amp = 1.0 / ((9 * in_c) as f32).sqrt();
        let values: Vec<f16> = (0..wdesc.num_padded_elements())
            .map(|k| f16::from_f32((((k * 13 + name.len()) % 17) as f32 / 17.0 - 0.5) * amp))
            .collect();
        weights.insert(format!("{name}.weight"), HostTensor::from_f16(wdesc, &values).unwrap());

        let bdesc =
            TensorDesc::new(TensorDims::new(vec![out_c]), TensorLayout::x, DType::F16).unwrap();
        let biases: Vec<f16> = (0..out_c).map(|k| f16::from_f32(k as f32 * 0.005)).collect();
        weights.insert(format!("{name}.bias"), HostTensor::from_f16(bdesc, &biases).unwrap());
    }
    weights
}

fn test_image(w: usize, h: usize, format: ImageFormat, seed: usize) -> Image {
    let data: Vec<f32> = (0..w * h * 3)
        .map(|k| ((k * 31 + seed * 7) % 101) as f32 / 101.0)
        .collect();
    Image::from_f32(ImageDesc::new(format, w, h), &data).unwrap()
}

fn assert_finite_in_unit_range(image: &Image) {
    for (k, v) in image.to_f32_vec().iter().enumerate() {
        assert!(v.is_finite(), "non-finite output at {k}");
        assert!((0.0..=1.0).contains(v), "out-of-range output {v} at {k}");
    }
}

// ── End-to-end smoke tests ─────────────────────────────────────

#[test]
fn test_denoise_builtin_ldr() {
    // The full built-in channel plan on a small single-tile image.
    let device = CpuDevice::new(1);
    let color = test_image(16, 16, ImageFormat::Float3, 1);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 16, 16));

    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();

    assert_finite_in_unit_range(&output);
    assert!(!filter.is_inplace());
    assert!(!filter.has_output_temp());
    assert_eq!(filter.tile_grid().unwrap().num_tiles(), 1);
}

#[test]
fn test_denoise_tiny_weights_half3() {
    let device = CpuDevice::new(1);
    let color = test_image(48, 32, ImageFormat::Half3, 2);
    let output = Image::new(ImageDesc::new(ImageFormat::Half3, 48, 32));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();

    assert_finite_in_unit_range(&output);
}

#[test]
fn test_denoise_with_auxiliary_buffers() {
    let device = CpuDevice::new(1);
    let color = test_image(32, 32, ImageFormat::Float3, 3);
    let albedo = test_image(32, 32, ImageFormat::Float3, 4);
    let normal = test_image(32, 32, ImageFormat::Float3, 5);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(9)));
    filter.set_image("color", Some(color));
    filter.set_image("albedo", Some(albedo));
    filter.set_image("normal", Some(normal));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();

    assert_finite_in_unit_range(&output);
}

#[test]
fn test_normal_only_filtering() {
    // Auxiliary filtering: the normal buffer is the primary (signed) input.
    let device = CpuDevice::new(1);
    let desc = ImageDesc::new(ImageFormat::Float3, 32, 32);
    let data: Vec<f32> = (0..32 * 32 * 3)
        .map(|k| ((k % 37) as f32 / 18.5) - 1.0)
        .collect();
    let normal = Image::from_f32(desc, &data).unwrap();
    let output = Image::new(desc);

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("normal", Some(normal));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();

    // Signed output range.
    for v in output.to_f32_vec() {
        assert!(v.is_finite());
        assert!((-1.0..=1.0).contains(&v));
    }
}

#[test]
fn test_hdr_autoexposure() {
    let device = CpuDevice::new(1);
    // HDR radiance well above 1.
    let data: Vec<f32> = (0..32 * 32 * 3)
        .map(|k| ((k % 53) as f32 / 53.0) * 40.0 + 0.5)
        .collect();
    let color = Image::from_f32(ImageDesc::new(ImageFormat::Float3, 32, 32), &data).unwrap();
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output.clone()));
    filter.set_bool("hdr", true);
    filter.commit().unwrap();
    // inputScale is NaN by default: the autoexposure pre-pass runs.
    assert!(filter.get_float("inputScale").unwrap().is_nan());
    filter.execute(SyncMode::Sync).unwrap();

    for v in output.to_f32_vec() {
        assert!(v.is_finite());
        assert!(v >= 0.0);
    }
}

// ── Tiling and in-place behavior ───────────────────────────────

#[test]
fn test_multi_engine_forces_even_tile_count() {
    let device = CpuDevice::new(2);
    let color = test_image(128, 128, ImageFormat::Float3, 6);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 128, 128));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();

    let grid = *filter.tile_grid().unwrap();
    assert!(grid.num_tiles() > 1);
    assert_eq!(grid.num_tiles() % 2, 0);

    filter.execute(SyncMode::Sync).unwrap();
    assert_finite_in_unit_range(&output);
}

#[test]
fn test_inplace_tiled_uses_output_temp() {
    // Output aliases the color input; with more than one tile the filter
    // must route through a temporary image in engine-0 scratch.
    let device = CpuDevice::new(2);
    let color = test_image(128, 128, ImageFormat::Float3, 7);
    let before = color.to_f32_vec();

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color.clone()));
    filter.set_image("output", Some(color.clone()));
    filter.commit().unwrap();

    assert!(filter.is_inplace());
    assert!(filter.tile_grid().unwrap().num_tiles() > 1);
    assert!(filter.has_output_temp());

    filter.execute(SyncMode::Sync).unwrap();
    let after = color.to_f32_vec();
    assert!(after.iter().all(|v| v.is_finite()));
    assert_ne!(before, after);
}

#[test]
fn test_inplace_single_tile_needs_no_temp() {
    let device = CpuDevice::new(1);
    let color = test_image(32, 32, ImageFormat::Float3, 8);

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color.clone()));
    filter.set_image("output", Some(color));
    filter.commit().unwrap();

    assert!(filter.is_inplace());
    assert_eq!(filter.tile_grid().unwrap().num_tiles(), 1);
    assert!(!filter.has_output_temp());

    filter.execute(SyncMode::Sync).unwrap();
}

#[test]
fn test_async_then_wait() {
    let device = CpuDevice::new(1);
    let color = test_image(32, 32, ImageFormat::Float3, 9);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let mut filter = UNetFilter::new(device.clone());
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();

    filter.execute(SyncMode::Async).unwrap();
    use compute_engine::Device;
    device.wait().unwrap();
    assert_finite_in_unit_range(&output);
}

// ── Progress and abort ─────────────────────────────────────────

#[test]
fn test_progress_reaches_one() {
    let device = CpuDevice::new(1);
    let color = test_image(32, 32, ImageFormat::Float3, 10);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let fractions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fractions);

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output));
    filter.set_progress_callback(Box::new(move |fraction| {
        sink.lock().unwrap().push(fraction);
        true
    }));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();

    let fractions = fractions.lock().unwrap();
    assert!(!fractions.is_empty());
    assert_eq!(*fractions.last().unwrap(), 1.0);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "not monotonic");
}

#[test]
fn test_abort_stops_execution() {
    let device = CpuDevice::new(1);
    let color = test_image(32, 32, ImageFormat::Float3, 11);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output));
    filter.set_progress_callback(Box::new(|fraction| fraction < 0.25));
    filter.commit().unwrap();

    assert!(matches!(
        filter.execute(SyncMode::Sync),
        Err(FilterError::Aborted)
    ));
}

// ── Parameter validation ───────────────────────────────────────

#[test]
fn test_execute_before_commit_fails() {
    let device = CpuDevice::new(1);
    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(test_image(16, 16, ImageFormat::Float3, 12)));
    assert!(matches!(
        filter.execute(SyncMode::Sync),
        Err(FilterError::InvalidOperation(_))
    ));
}

#[test]
fn test_missing_images_rejected() {
    let device = CpuDevice::new(1);

    let mut filter = UNetFilter::new(device.clone());
    assert!(matches!(
        filter.commit(),
        Err(FilterError::InvalidOperation(_))
    ));

    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(test_image(16, 16, ImageFormat::Float3, 13)));
    assert!(matches!(
        filter.commit(),
        Err(FilterError::InvalidOperation(_))
    ));
}

#[test]
fn test_size_mismatch_rejected() {
    let device = CpuDevice::new(1);
    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(test_image(16, 16, ImageFormat::Float3, 14)));
    filter.set_image(
        "output",
        Some(Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32))),
    );
    assert!(matches!(
        filter.commit(),
        Err(FilterError::InvalidOperation(_))
    ));
}

#[test]
fn test_mixed_input_formats_rejected() {
    let device = CpuDevice::new(1);
    let mut filter = UNetFilter::new(device);
    filter.set_image("color", Some(test_image(16, 16, ImageFormat::Float3, 15)));
    filter.set_image("albedo", Some(test_image(16, 16, ImageFormat::Half3, 16)));
    filter.set_image(
        "output",
        Some(Image::new(ImageDesc::new(ImageFormat::Float3, 16, 16))),
    );
    assert!(matches!(
        filter.commit(),
        Err(FilterError::InvalidOperation(_))
    ));
}

#[test]
fn test_mode_conflicts_rejected() {
    let device = CpuDevice::new(1);
    let base = |device: &Arc<compute_engine::cpu::CpuDevice>| {
        let mut filter = UNetFilter::new(device.clone());
        filter.set_image("color", Some(test_image(16, 16, ImageFormat::Float3, 17)));
        filter.set_image(
            "output",
            Some(Image::new(ImageDesc::new(ImageFormat::Float3, 16, 16))),
        );
        filter
    };

    let mut filter = base(&device);
    filter.set_bool("hdr", true);
    filter.set_bool("srgb", true);
    assert!(matches!(
        filter.commit(),
        Err(FilterError::InvalidOperation(_))
    ));

    let mut filter = base(&device);
    filter.set_bool("directional", true);
    filter.set_bool("hdr", true);
    assert!(matches!(
        filter.commit(),
        Err(FilterError::InvalidOperation(_))
    ));
}

#[test]
fn test_unknown_parameters_are_nonfatal() {
    let device = CpuDevice::new(1);
    let mut filter = UNetFilter::new(device);
    // Logged as warnings, never fatal.
    filter.set_bool("doesNotExist", true);
    filter.set_float("alsoNot", 1.0);
    filter.set_int("norThis", 3);
    filter.set_image("mystery", None);
    assert!(filter.get_float("bogus").is_err());
}

#[test]
fn test_recommit_after_parameter_change() {
    let device = CpuDevice::new(1);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(test_image(32, 32, ImageFormat::Float3, 18)));
    filter.set_image("output", Some(output.clone()));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();
    let first = output.to_f32_vec();

    // Commit again with a different color input; the model is rebuilt and
    // produces a different result.
    filter.set_image("color", Some(test_image(32, 32, ImageFormat::Float3, 99)));
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();
    let second = output.to_f32_vec();

    assert_ne!(first, second);
    // Committing with nothing dirty is a no-op.
    filter.commit().unwrap();
}

#[test]
fn test_explicit_input_scale_skips_autoexposure() {
    let device = CpuDevice::new(1);
    let color = test_image(32, 32, ImageFormat::Float3, 19);
    let output = Image::new(ImageDesc::new(ImageFormat::Float3, 32, 32));

    let mut filter = UNetFilter::new(device);
    filter.set_weights(Some(tiny_weights(3)));
    filter.set_image("color", Some(color));
    filter.set_image("output", Some(output.clone()));
    filter.set_float("inputScale", 1.0);
    filter.commit().unwrap();
    filter.execute(SyncMode::Sync).unwrap();
    assert_eq!(filter.get_float("hdrScale").unwrap(), 1.0);
    assert_finite_in_unit_range(&output);
}
