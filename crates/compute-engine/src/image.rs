// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Three-channel images backed by device buffers.

use crate::{Buffer, EngineError};
use half::f16;
use tensor_core::{round_up, BUFFER_ALIGNMENT};

/// Pixel storage format. All images are three-channel RGB-like data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ImageFormat {
    /// Three `f32` channels per pixel.
    Float3,
    /// Three `f16` channels per pixel.
    Half3,
}

impl ImageFormat {
    /// Bytes per pixel.
    pub fn pixel_byte_size(self) -> usize {
        match self {
            ImageFormat::Float3 => 12,
            ImageFormat::Half3 => 6,
        }
    }

    /// Returns a human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Float3 => "float3",
            ImageFormat::Half3 => "half3",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format plus dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: ImageFormat,
    /// Width in pixels.
    pub w: usize,
    /// Height in pixels.
    pub h: usize,
}

impl ImageDesc {
    pub fn new(format: ImageFormat, w: usize, h: usize) -> Self {
        Self { format, w, h }
    }

    /// Raw pixel-data size in bytes.
    pub fn byte_size(&self) -> usize {
        self.w * self.h * self.format.pixel_byte_size()
    }

    /// Size rounded up to the buffer placement granularity.
    pub fn aligned_byte_size(&self) -> usize {
        round_up(self.byte_size(), BUFFER_ALIGNMENT)
    }

    /// Number of pixels.
    pub fn num_pixels(&self) -> usize {
        self.w * self.h
    }
}

/// A three-channel image: a descriptor bound to a byte range of a buffer.
///
/// Like tensor views, images do not own storage. A user-facing image owns a
/// dedicated buffer; the in-place temporary output lives in the tail of an
/// engine's scratch buffer.
#[derive(Debug, Clone)]
pub struct Image {
    buffer: Buffer,
    byte_offset: usize,
    desc: ImageDesc,
}

impl Image {
    /// Allocates a new zero-filled image with its own buffer.
    pub fn new(desc: ImageDesc) -> Self {
        Self {
            buffer: Buffer::new(desc.aligned_byte_size()),
            byte_offset: 0,
            desc,
        }
    }

    /// Creates an image view inside an existing buffer.
    pub fn view(buffer: Buffer, desc: ImageDesc, byte_offset: usize) -> Result<Self, EngineError> {
        buffer.check_range(byte_offset, desc.byte_size())?;
        Ok(Self {
            buffer,
            byte_offset,
            desc,
        })
    }

    /// Allocates an image and fills it from interleaved RGB `f32` data.
    pub fn from_f32(desc: ImageDesc, data: &[f32]) -> Result<Self, EngineError> {
        let image = Self::new(desc);
        image.write_rect(0, 0, desc.h, desc.w, data)?;
        Ok(image)
    }

    /// Returns the descriptor.
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Image height in pixels.
    pub fn h(&self) -> usize {
        self.desc.h
    }

    /// Image width in pixels.
    pub fn w(&self) -> usize {
        self.desc.w
    }

    /// Pixel format.
    pub fn format(&self) -> ImageFormat {
        self.desc.format
    }

    /// Returns `true` if the two images share any bytes of storage.
    ///
    /// This is what decides whether filtering must run in-place: the user's
    /// output image may alias an input image.
    pub fn overlaps(&self, other: &Image) -> bool {
        if !self.buffer.ptr_eq(&other.buffer) {
            return false;
        }
        let a = (self.byte_offset, self.byte_offset + self.desc.byte_size());
        let b = (other.byte_offset, other.byte_offset + other.desc.byte_size());
        a.0 < b.1 && b.0 < a.1
    }

    /// Copies a `h × w` rectangle starting at pixel `(h0, w0)` out as
    /// interleaved RGB `f32` values.
    pub fn read_rect(&self, h0: usize, w0: usize, h: usize, w: usize) -> Vec<f32> {
        debug_assert!(h0 + h <= self.desc.h && w0 + w <= self.desc.w);
        let mut out = vec![0.0f32; h * w * 3];
        let guard = self.buffer.lock();
        match self.desc.format {
            ImageFormat::Float3 => {
                let src = &guard.as_f32()[self.byte_offset / 4..];
                for row in 0..h {
                    let src_base = ((h0 + row) * self.desc.w + w0) * 3;
                    let dst_base = row * w * 3;
                    out[dst_base..dst_base + w * 3]
                        .copy_from_slice(&src[src_base..src_base + w * 3]);
                }
            }
            ImageFormat::Half3 => {
                let src = &guard.as_u16()[self.byte_offset / 2..];
                for row in 0..h {
                    let src_base = ((h0 + row) * self.desc.w + w0) * 3;
                    let dst_base = row * w * 3;
                    for k in 0..w * 3 {
                        out[dst_base + k] = f16::from_bits(src[src_base + k]).to_f32();
                    }
                }
            }
        }
        out
    }

    /// Writes interleaved RGB `f32` values into a rectangle.
    pub fn write_rect(
        &self,
        h0: usize,
        w0: usize,
        h: usize,
        w: usize,
        data: &[f32],
    ) -> Result<(), EngineError> {
        if h0 + h > self.desc.h || w0 + w > self.desc.w || data.len() != h * w * 3 {
            return Err(EngineError::Kernel {
                kernel: "image_write",
                detail: format!(
                    "rect {h}x{w}@({h0},{w0}) with {} values does not fit {}x{} image",
                    data.len(),
                    self.desc.h,
                    self.desc.w
                ),
            });
        }
        let mut guard = self.buffer.lock();
        match self.desc.format {
            ImageFormat::Float3 => {
                let dst = &mut guard.as_f32_mut()[self.byte_offset / 4..];
                for row in 0..h {
                    let dst_base = ((h0 + row) * self.desc.w + w0) * 3;
                    let src_base = row * w * 3;
                    dst[dst_base..dst_base + w * 3]
                        .copy_from_slice(&data[src_base..src_base + w * 3]);
                }
            }
            ImageFormat::Half3 => {
                let dst = &mut guard.as_u16_mut()[self.byte_offset / 2..];
                for row in 0..h {
                    let dst_base = ((h0 + row) * self.desc.w + w0) * 3;
                    let src_base = row * w * 3;
                    for k in 0..w * 3 {
                        dst[dst_base + k] = f16::from_f32(data[src_base + k]).to_bits();
                    }
                }
            }
        }
        Ok(())
    }

    /// Copies the whole image out as interleaved RGB `f32` values.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.read_rect(0, 0, self.desc.h, self.desc.w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_sizes() {
        let d = ImageDesc::new(ImageFormat::Float3, 10, 7);
        assert_eq!(d.byte_size(), 10 * 7 * 12);
        assert_eq!(d.aligned_byte_size() % 64, 0);

        let d = ImageDesc::new(ImageFormat::Half3, 10, 7);
        assert_eq!(d.byte_size(), 10 * 7 * 6);
    }

    #[test]
    fn test_rect_roundtrip_float3() {
        let img = Image::new(ImageDesc::new(ImageFormat::Float3, 4, 4));
        let data: Vec<f32> = (0..2 * 2 * 3).map(|i| i as f32).collect();
        img.write_rect(1, 1, 2, 2, &data).unwrap();
        assert_eq!(img.read_rect(1, 1, 2, 2), data);
        // Untouched pixels stay zero.
        assert_eq!(img.read_rect(0, 0, 1, 1), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rect_roundtrip_half3() {
        let img = Image::new(ImageDesc::new(ImageFormat::Half3, 3, 3));
        let data = vec![0.5f32, 1.0, -2.0];
        img.write_rect(2, 2, 1, 1, &data).unwrap();
        assert_eq!(img.read_rect(2, 2, 1, 1), data);
    }

    #[test]
    fn test_overlap_detection() {
        let a = Image::new(ImageDesc::new(ImageFormat::Float3, 8, 8));
        let b = Image::new(ImageDesc::new(ImageFormat::Float3, 8, 8));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a.clone()));

        // Two views into one buffer: overlap only when ranges intersect.
        let buf = Buffer::new(4096);
        let d = ImageDesc::new(ImageFormat::Float3, 4, 4); // 192 bytes
        let v0 = Image::view(buf.clone(), d, 0).unwrap();
        let v1 = Image::view(buf.clone(), d, 192).unwrap();
        let v2 = Image::view(buf, d, 64).unwrap();
        assert!(!v0.overlaps(&v1));
        assert!(v0.overlaps(&v2));
        assert!(v1.overlaps(&v2));
    }

    #[test]
    fn test_write_bounds() {
        let img = Image::new(ImageDesc::new(ImageFormat::Float3, 4, 4));
        let r = img.write_rect(3, 3, 2, 2, &vec![0.0; 12]);
        assert!(r.is_err());
    }
}
