// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built-in weight blobs: selection by input configuration and synthetic
//! generation.
//!
//! Production deployments ship trained blobs; this crate synthesizes
//! deterministic stand-ins with the standard channel plan so the pipeline
//! runs end to end without model files (the same dual mode the weight
//! loading has always had: file-backed when provided, synthetic otherwise).
//! User-supplied SafeTensors blobs override the selection entirely.

use crate::FilterError;
use half::f16;
use net_graph::Weights;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tensor_core::{DType, HostTensor, TensorDesc, TensorDims, TensorLayout};

/// Number of network input channels for a given set of auxiliary buffers.
pub fn unet_input_channels(color: bool, albedo: bool, normal: bool) -> usize {
    3 * (color as usize + albedo as usize + normal as usize)
}

/// Selects the built-in blob name for an input configuration.
///
/// Mirrors the fixed lookup: `color`-led configurations pick LDR/HDR or
/// directional variants (with clean-aux versions when both auxiliaries are
/// prefiltered), and auxiliary-only configurations denoise the albedo or
/// normal buffer itself.
pub fn select_blob(
    color: bool,
    albedo: bool,
    normal: bool,
    hdr: bool,
    directional: bool,
    clean_aux: bool,
) -> Result<&'static str, FilterError> {
    if color {
        return Ok(match (albedo, normal) {
            (false, false) => {
                if directional {
                    "dir"
                } else if hdr {
                    "hdr"
                } else {
                    "ldr"
                }
            }
            (true, false) => {
                if hdr {
                    "hdr_alb"
                } else {
                    "ldr_alb"
                }
            }
            (true, true) => match (clean_aux, hdr) {
                (false, false) => "ldr_alb_nrm",
                (false, true) => "hdr_alb_nrm",
                (true, false) => "ldr_calb_cnrm",
                (true, true) => "hdr_calb_cnrm",
            },
            (false, true) => {
                return Err(FilterError::InvalidOperation(
                    "invalid combination of input features".into(),
                ))
            }
        });
    }

    // Auxiliary feature filtering.
    match (albedo, normal) {
        (true, false) => {
            if hdr {
                Err(FilterError::InvalidOperation(
                    "hdr mode is not supported for albedo filtering".into(),
                ))
            } else {
                Ok("alb")
            }
        }
        (false, true) => {
            if hdr {
                Err(FilterError::InvalidOperation(
                    "hdr mode is not supported for normal filtering".into(),
                ))
            } else {
                Ok("nrm")
            }
        }
        _ => Err(FilterError::InvalidOperation(
            "invalid combination of input features".into(),
        )),
    }
}

/// The standard U-Net channel plan: `(op name, out channels, in channels)`
/// with `IN` standing for the network input channel count and the concat
/// ops listing their combined input.
fn channel_plan(input_c: usize) -> Vec<(&'static str, usize, usize)> {
    vec![
        ("enc_conv0", 32, input_c),
        ("enc_conv1", 32, 32),
        ("enc_conv2", 48, 32),
        ("enc_conv3", 64, 48),
        ("enc_conv4", 80, 64),
        ("enc_conv5a", 96, 80),
        ("enc_conv5b", 96, 96),
        ("dec_conv4a", 112, 96 + 64),
        ("dec_conv4b", 112, 112),
        ("dec_conv3a", 96, 112 + 48),
        ("dec_conv3b", 96, 96),
        ("dec_conv2a", 64, 96 + 32),
        ("dec_conv2b", 64, 64),
        ("dec_conv1a", 64, 64 + input_c),
        ("dec_conv1b", 32, 64),
        ("dec_conv0", 3, 32),
    ]
}

/// Generates the synthetic built-in blob `name` for `input_c` network input
/// channels. Deterministic: the same name always yields the same weights.
pub fn builtin_weights(name: &str, input_c: usize) -> Weights {
    let mut weights = Weights::new();
    for (op, out_c, in_c) in channel_plan(input_c) {
        let mut rng = seeded_rng(name, op);
        // Keep activations in range through the deep stack.
        let amp = 1.0 / ((9 * in_c) as f32).sqrt();

        let wdesc = TensorDesc::new(
            TensorDims::new(vec![out_c, in_c, 3, 3]),
            TensorLayout::oihw,
            DType::F16,
        )
        .expect("valid weight dims");
        let values: Vec<f16> = (0..wdesc.num_padded_elements())
            .map(|_| f16::from_f32(rng.gen_range(-amp..amp)))
            .collect();
        weights.insert(
            format!("{op}.weight"),
            HostTensor::from_f16(wdesc, &values).expect("sized to desc"),
        );

        let bdesc = TensorDesc::new(TensorDims::new(vec![out_c]), TensorLayout::x, DType::F16)
            .expect("valid bias dims");
        let biases: Vec<f16> = (0..out_c)
            .map(|_| f16::from_f32(rng.gen_range(-0.01..0.01f32)))
            .collect();
        weights.insert(
            format!("{op}.bias"),
            HostTensor::from_f16(bdesc, &biases).expect("sized to desc"),
        );
    }
    weights
}

fn seeded_rng(blob: &str, op: &str) -> StdRng {
    let mut hasher = DefaultHasher::new();
    blob.hash(&mut hasher);
    op.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_table() {
        // (color, albedo, normal, hdr, directional, clean_aux) -> blob
        let cases = [
            ((true, false, false, false, false, false), "ldr"),
            ((true, false, false, true, false, false), "hdr"),
            ((true, false, false, false, true, false), "dir"),
            ((true, true, false, false, false, false), "ldr_alb"),
            ((true, true, false, true, false, false), "hdr_alb"),
            ((true, true, true, false, false, false), "ldr_alb_nrm"),
            ((true, true, true, true, false, false), "hdr_alb_nrm"),
            ((true, true, true, false, false, true), "ldr_calb_cnrm"),
            ((true, true, true, true, false, true), "hdr_calb_cnrm"),
            ((false, true, false, false, false, false), "alb"),
            ((false, false, true, false, false, false), "nrm"),
        ];
        for ((c, a, n, h, d, x), blob) in cases {
            assert_eq!(select_blob(c, a, n, h, d, x).unwrap(), blob);
        }
    }

    #[test]
    fn test_rejected_combinations() {
        // No inputs at all.
        assert!(select_blob(false, false, false, false, false, false).is_err());
        // HDR albedo/normal filtering.
        assert!(select_blob(false, true, false, true, false, false).is_err());
        assert!(select_blob(false, false, true, true, false, false).is_err());
        // Color + normal without albedo.
        assert!(select_blob(true, false, true, false, false, false).is_err());
    }

    #[test]
    fn test_input_channels() {
        assert_eq!(unet_input_channels(true, false, false), 3);
        assert_eq!(unet_input_channels(true, true, false), 6);
        assert_eq!(unet_input_channels(true, true, true), 9);
    }

    #[test]
    fn test_builtin_blob_is_complete_and_deterministic() {
        let a = builtin_weights("ldr", 3);
        let b = builtin_weights("ldr", 3);
        assert_eq!(a.len(), 16 * 2);
        for (op, out_c, in_c) in channel_plan(3) {
            let w = a.conv_weight(op).unwrap();
            assert_eq!((w.desc().o(), w.desc().i()), (out_c, in_c));
            assert_eq!(a.conv_bias(op).unwrap().desc().x(), out_c);
            // Deterministic across calls.
            assert_eq!(w.get(0), b.conv_weight(op).unwrap().get(0));
        }
    }

    #[test]
    fn test_distinct_blobs_differ() {
        let ldr = builtin_weights("ldr", 3);
        let hdr = builtin_weights("hdr", 3);
        let a = ldr.conv_weight("enc_conv0").unwrap();
        let b = hdr.conv_weight("enc_conv0").unwrap();
        assert!((0..32).any(|k| a.get(k) != b.get(k)));
    }
}
