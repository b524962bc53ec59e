// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Minimal PFM (portable float map) reader/writer for RGB images.
//!
//! The format is a tiny textual header (`PF`, dimensions, scale) followed by
//! rows of raw `f32` triples stored bottom to top; a negative scale means
//! little-endian data. Only the color `PF` variant is supported.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

/// Reads an RGB PFM file. Returns `(width, height, interleaved rgb)` with
/// rows in top-to-bottom order.
pub fn read(path: &Path) -> anyhow::Result<(usize, usize, Vec<f32>)> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("cannot open '{}': {e}", path.display()))?;
    let mut reader = BufReader::new(file);

    let magic = read_token(&mut reader)?;
    if magic != "PF" {
        anyhow::bail!("'{}': not a color PFM file (magic '{magic}')", path.display());
    }
    let w: usize = read_token(&mut reader)?.parse()?;
    let h: usize = read_token(&mut reader)?.parse()?;
    let scale: f32 = read_token(&mut reader)?.parse()?;
    let little_endian = scale < 0.0;

    let mut raw = vec![0u8; w * h * 3 * 4];
    reader.read_exact(&mut raw)?;

    let mut data = vec![0f32; w * h * 3];
    for y in 0..h {
        // PFM rows run bottom to top.
        let src_row = h - 1 - y;
        for k in 0..w * 3 {
            let b = &raw[(src_row * w * 3 + k) * 4..][..4];
            let bytes = [b[0], b[1], b[2], b[3]];
            data[y * w * 3 + k] = if little_endian {
                f32::from_le_bytes(bytes)
            } else {
                f32::from_be_bytes(bytes)
            };
        }
    }
    Ok((w, h, data))
}

/// Writes an RGB PFM file (little-endian) from top-to-bottom interleaved
/// data.
pub fn write(path: &Path, w: usize, h: usize, data: &[f32]) -> anyhow::Result<()> {
    anyhow::ensure!(
        data.len() == w * h * 3,
        "pfm write: {} values for {w}x{h} image",
        data.len()
    );
    let file = std::fs::File::create(path)
        .map_err(|e| anyhow::anyhow!("cannot create '{}': {e}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);

    write!(writer, "PF\n{w} {h}\n-1.0\n")?;
    for y in (0..h).rev() {
        for k in 0..w * 3 {
            writer.write_all(&data[y * w * 3 + k].to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads one whitespace-delimited header token.
fn read_token<R: BufRead>(reader: &mut R) -> anyhow::Result<String> {
    let mut token = String::new();
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let c = byte[0] as char;
        if c.is_whitespace() {
            if token.is_empty() {
                continue;
            }
            return Ok(token);
        }
        token.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.pfm");

        let (w, h) = (5, 3);
        let data: Vec<f32> = (0..w * h * 3).map(|k| k as f32 * 0.25).collect();
        write(&path, w, h, &data).unwrap();

        let (rw, rh, rdata) = read(&path).unwrap();
        assert_eq!((rw, rh), (w, h));
        assert_eq!(rdata, data);
    }

    #[test]
    fn test_rejects_non_pfm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.pfm");
        std::fs::write(&path, b"P6\n1 1\n255\nxxx").unwrap();
        assert!(read(&path).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.pfm");
        assert!(write(&path, 2, 2, &[0.0; 3]).is_err());
    }
}
