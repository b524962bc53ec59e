// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device buffers and tensor views.
//!
//! A [`Buffer`] is a ref-counted handle to a block of device memory (host
//! memory for the CPU backend), stored as `u64` words so every typed view —
//! `f32`, `f16`/`u16` — is correctly aligned. Views never own storage; the
//! scratch buffer of a graph is one `Buffer` shared by every transient
//! tensor the planner placed inside it.

use crate::EngineError;
use half::f16;
use std::sync::{Arc, Mutex, MutexGuard};
use tensor_core::{DType, TensorDesc};

struct BufferInner {
    /// Stored as words so 2- and 4-byte element views are always aligned.
    words: Mutex<Vec<u64>>,
    byte_size: usize,
}

/// Ref-counted handle to a block of device memory.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Allocates a zero-initialized buffer.
    pub fn new(byte_size: usize) -> Self {
        let words = byte_size.div_ceil(8);
        Self {
            inner: Arc::new(BufferInner {
                words: Mutex::new(vec![0u64; words]),
                byte_size,
            }),
        }
    }

    /// Returns the buffer size in bytes.
    pub fn byte_size(&self) -> usize {
        self.inner.byte_size
    }

    /// Returns `true` if both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates a tensor view at `byte_offset`, bounds-checked.
    pub fn tensor_view(&self, desc: TensorDesc, byte_offset: usize) -> Result<TensorView, EngineError> {
        self.check_range(byte_offset, desc.byte_size())?;
        Ok(TensorView {
            buffer: self.clone(),
            byte_offset,
            desc,
        })
    }

    pub(crate) fn check_range(&self, byte_offset: usize, need: usize) -> Result<(), EngineError> {
        if byte_offset + need > self.inner.byte_size {
            return Err(EngineError::OutOfBounds {
                size: self.inner.byte_size,
                offset: byte_offset,
                need,
            });
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> BufferGuard<'_> {
        BufferGuard {
            words: self.inner.words.lock().expect("buffer lock poisoned"),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("byte_size", &self.inner.byte_size)
            .finish()
    }
}

/// Exclusive access to a buffer's storage, with typed views.
pub(crate) struct BufferGuard<'a> {
    words: MutexGuard<'a, Vec<u64>>,
}

impl BufferGuard<'_> {
    pub fn as_f32(&self) -> &[f32] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub fn as_u16(&self) -> &[u16] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn as_u16_mut(&mut self) -> &mut [u16] {
        bytemuck::cast_slice_mut(&mut self.words)
    }
}

/// A non-owning tensor view: a descriptor bound to a byte range of a
/// [`Buffer`].
#[derive(Clone)]
pub struct TensorView {
    buffer: Buffer,
    byte_offset: usize,
    desc: TensorDesc,
}

impl TensorView {
    /// Returns the descriptor.
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    /// Returns the byte offset within the backing buffer.
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Returns the backing buffer handle.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Element offset of this view within a typed slice of the buffer.
    pub(crate) fn elem_offset(&self) -> usize {
        debug_assert_eq!(self.byte_offset % self.desc.dtype().size_bytes(), 0);
        self.byte_offset / self.desc.dtype().size_bytes()
    }

    /// Copies the view's padded elements out as `f32` values.
    pub fn read_f32(&self) -> Vec<f32> {
        let n = self.desc.num_padded_elements();
        let base = self.elem_offset();
        let guard = self.buffer.lock();
        match self.desc.dtype() {
            DType::F32 => guard.as_f32()[base..base + n].to_vec(),
            DType::F16 => guard.as_u16()[base..base + n]
                .iter()
                .map(|&b| f16::from_bits(b).to_f32())
                .collect(),
        }
    }

    /// Writes `values` into the view, converting to the view's dtype.
    ///
    /// This is the host-upload path used when constant tensors are
    /// initialized at graph finalization.
    pub fn write_f32(&self, values: &[f32]) -> Result<(), EngineError> {
        let n = self.desc.num_padded_elements();
        if values.len() != n {
            return Err(EngineError::Kernel {
                kernel: "write",
                detail: format!("expected {n} elements, got {}", values.len()),
            });
        }
        let base = self.elem_offset();
        let mut guard = self.buffer.lock();
        match self.desc.dtype() {
            DType::F32 => guard.as_f32_mut()[base..base + n].copy_from_slice(values),
            DType::F16 => {
                let dst = &mut guard.as_u16_mut()[base..base + n];
                for (d, &v) in dst.iter_mut().zip(values) {
                    *d = f16::from_f32(v).to_bits();
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TensorView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorView")
            .field("desc", &self.desc)
            .field("byte_offset", &self.byte_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{TensorDims, TensorLayout};

    fn chw_desc(c: usize, h: usize, w: usize) -> TensorDesc {
        TensorDesc::new(TensorDims::new(vec![c, h, w]), TensorLayout::chw, DType::F32).unwrap()
    }

    #[test]
    fn test_view_bounds() {
        let buf = Buffer::new(256);
        let desc = chw_desc(1, 4, 4); // 64 bytes
        assert!(buf.tensor_view(desc.clone(), 192).is_ok());
        assert!(matches!(
            buf.tensor_view(desc, 224),
            Err(EngineError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let buf = Buffer::new(256);
        let view = buf.tensor_view(chw_desc(1, 2, 2), 64).unwrap();
        view.write_f32(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(view.read_f32(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_views_share_storage() {
        let buf = Buffer::new(256);
        let a = buf.tensor_view(chw_desc(1, 2, 2), 0).unwrap();
        let b = buf.tensor_view(chw_desc(1, 2, 2), 0).unwrap();
        a.write_f32(&[5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(b.read_f32(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_f16_view() {
        let buf = Buffer::new(64);
        let desc = TensorDesc::new(TensorDims::new(vec![4]), TensorLayout::x, DType::F16).unwrap();
        let view = buf.tensor_view(desc, 0).unwrap();
        view.write_f32(&[0.5, -1.5, 0.0, 3.0]).unwrap();
        assert_eq!(view.read_f32(), vec![0.5, -1.5, 0.0, 3.0]);
    }

    #[test]
    fn test_ptr_eq() {
        let a = Buffer::new(64);
        let b = a.clone();
        let c = Buffer::new(64);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_zero_initialized() {
        let buf = Buffer::new(128);
        let view = buf.tensor_view(chw_desc(2, 2, 2), 0).unwrap();
        assert!(view.read_f32().iter().all(|&v| v == 0.0));
    }
}
