//! Frame output as binary PBM (P4) or 1-bit PNG
//!
//! Both formats pack eight pixels per byte with the leftmost pixel in the
//! most significant bit. Since columns are a multiple of 32 every grid row
//! maps onto whole bytes with no padding. PBM draws living cells black,
//! PNG draws them white on black.

use crate::bitgrid::Grid;
use crate::error::{LifeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Png,
    Pbm,
}

impl FrameFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FrameFormat::Png => "png",
            FrameFormat::Pbm => "pbm",
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FrameFormat {
    type Err = LifeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(FrameFormat::Png),
            "pbm" => Ok(FrameFormat::Pbm),
            other => Err(LifeError::Config(format!(
                "unknown frame format '{}' (expected png or pbm)",
                other
            ))),
        }
    }
}

/// Packed row bytes, leftmost cell in the MSB of each byte.
fn row_bytes(row: &[u32], out: &mut Vec<u8>) {
    out.clear();
    for &word in row {
        for k in 0..4 {
            // Bit 0 (leftmost cell) has to become the byte's MSB.
            out.push(((word >> (8 * k)) as u8).reverse_bits());
        }
    }
}

/// Writes `grid` to `path` in `format`, creating the directory if needed.
pub fn save_frame<P: AsRef<Path>>(grid: &Grid, path: P, format: FrameFormat) -> Result<()> {
    match format {
        FrameFormat::Png => save_png(grid, path),
        FrameFormat::Pbm => save_pbm(grid, path),
    }
}

/// Writes `grid` to `path` with living cells in black.
pub fn save_pbm<P: AsRef<Path>>(grid: &Grid, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_pbm(grid, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_pbm<W: Write>(grid: &Grid, out: &mut W) -> Result<()> {
    let dims = grid.dims();
    write!(out, "P4\n{} {}\n", dims.columns, dims.height)?;

    let mut bytes = Vec::with_capacity(dims.columns / 8);
    for row in grid.words().chunks(dims.width_in_words) {
        row_bytes(row, &mut bytes);
        out.write_all(&bytes)?;
    }
    Ok(())
}

/// Writes `grid` to `path` as a 1-bit grayscale PNG.
pub fn save_png<P: AsRef<Path>>(grid: &Grid, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    write_png(grid, writer)
}

pub fn write_png<W: Write>(grid: &Grid, out: W) -> Result<()> {
    let dims = grid.dims();
    let too_big = |_| LifeError::InvalidDimensions(format!("{} does not fit a PNG", dims));
    let width = u32::try_from(dims.columns).map_err(too_big)?;
    let height = u32::try_from(dims.height).map_err(too_big)?;

    let mut encoder = png::Encoder::new(out, width, height);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::One);
    encoder.set_compression(png::Compression::Fast);

    let mut writer = encoder.write_header().map_err(png_error)?;
    let mut stream = writer.stream_writer().map_err(png_error)?;
    let mut bytes = Vec::with_capacity(dims.columns / 8);
    for row in grid.words().chunks(dims.width_in_words) {
        row_bytes(row, &mut bytes);
        stream.write_all(&bytes)?;
    }
    stream.finish().map_err(png_error)?;
    Ok(())
}

fn png_error(e: png::EncodingError) -> LifeError {
    LifeError::Io(std::io::Error::other(e))
}

/// Frame filename for a generation
pub fn frame_filename<P: AsRef<Path>>(dir: P, generation: u64, format: FrameFormat) -> PathBuf {
    dir.as_ref()
        .join(format!("gen_{:08}.{}", generation, format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitgrid::GridDimensions;

    #[test]
    fn test_pbm_layout() {
        let dims = GridDimensions::new(32, 2).unwrap();
        let grid = Grid::zeroed(dims)
            .unwrap()
            .with_cells(&[(0, 0), (7, 0), (8, 0), (31, 1)]);

        let mut out = Vec::new();
        write_pbm(&grid, &mut out).unwrap();

        let header = b"P4\n32 2\n";
        assert_eq!(&out[..header.len()], header);
        let pixels = &out[header.len()..];
        assert_eq!(pixels.len(), 8);
        // Row 0: cells 0 and 7 in the first byte, cell 8 in the second.
        assert_eq!(&pixels[..4], &[0b1000_0001, 0b1000_0000, 0, 0]);
        // Row 1: cell 31 is the last pixel of the row.
        assert_eq!(&pixels[4..], &[0, 0, 0, 0b0000_0001]);
    }

    #[test]
    fn test_save_pbm_creates_directory() {
        let dir = std::env::temp_dir().join(format!("packed_life_frames_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let dims = GridDimensions::new(64, 3).unwrap();
        let path = frame_filename(&dir, 42, FrameFormat::Pbm);
        save_frame(&Grid::zeroed(dims).unwrap(), &path, FrameFormat::Pbm).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), b"P4\n64 3\n".len() + 8 * 3);
        assert!(path.ends_with("gen_00000042.pbm"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_png_frame_decodes() {
        let dims = GridDimensions::new(64, 3).unwrap();
        let grid = Grid::zeroed(dims)
            .unwrap()
            .with_cells(&[(0, 0), (33, 1), (63, 2)]);
        let mut out = Vec::new();
        write_png(&grid, &mut out).unwrap();

        let mut decoder = png::Decoder::new(std::io::Cursor::new(out));
        decoder.set_transformations(png::Transformations::IDENTITY);
        let mut reader = decoder.read_info().unwrap();
        let mut pixels = vec![0u8; reader.output_buffer_size()];
        let info = reader.next_frame(&mut pixels).unwrap();
        assert_eq!((info.width, info.height), (64, 3));
        assert_eq!(info.bit_depth, png::BitDepth::One);
        let rows: Vec<&[u8]> = pixels.chunks(info.line_size).collect();
        assert_eq!(rows[0], &[0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(rows[1], &[0, 0, 0, 0, 0x40, 0, 0, 0]);
        assert_eq!(rows[2], &[0, 0, 0, 0, 0, 0, 0, 0x01]);
    }

    #[test]
    fn test_frame_format_parse() {
        assert_eq!("PNG".parse::<FrameFormat>().unwrap(), FrameFormat::Png);
        assert_eq!("pbm".parse::<FrameFormat>().unwrap(), FrameFormat::Pbm);
        assert!("ppm".parse::<FrameFormat>().is_err());
        assert!(frame_filename("f", 7, FrameFormat::Png).ends_with("gen_00000007.png"));
    }
}
