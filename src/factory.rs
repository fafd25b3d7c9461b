//! Grid sizing and seeding.

use crate::bitgrid::{Grid, GridDimensions, WORD_BITS};
use crate::error::{LifeError, Result};
use rayon::prelude::*;

/// Derives grid dimensions from a cell budget and a display aspect ratio.
///
/// Height is `floor(sqrt(cells / aspect))` bumped to the next even number and
/// the column count is `floor(height * aspect)` bumped to the next multiple
/// of 32. Both bumps always move up, so the returned `total_cells` is larger
/// than the request. Callers must size everything from the returned value.
pub fn derive_dimensions(requested_cells: u64, aspect_ratio: f64) -> Result<GridDimensions> {
    if requested_cells == 0 {
        return Err(LifeError::InvalidDimensions(
            "requested cell count must be positive".to_string(),
        ));
    }
    if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
        return Err(LifeError::InvalidDimensions(format!(
            "aspect ratio must be a positive number, got {}",
            aspect_ratio
        )));
    }

    let out_of_range = |what: &str| {
        LifeError::InvalidDimensions(format!(
            "{} cells at aspect {} gives an out-of-range {}",
            requested_cells, aspect_ratio, what
        ))
    };

    let raw_height = (requested_cells as f64 / aspect_ratio).sqrt().floor();
    if raw_height > u32::MAX as f64 {
        return Err(out_of_range("height"));
    }
    let height = raw_height as u64;
    let height = (height - height % 2)
        .checked_add(2)
        .ok_or_else(|| out_of_range("height"))?;

    let raw_columns = (height as f64 * aspect_ratio).floor();
    if raw_columns > u32::MAX as f64 {
        return Err(out_of_range("column count"));
    }
    let columns = raw_columns as u64;
    let columns = (columns - columns % WORD_BITS as u64)
        .checked_add(WORD_BITS as u64)
        .ok_or_else(|| out_of_range("column count"))?;

    let to_usize = |v: u64| {
        usize::try_from(v).map_err(|_| {
            LifeError::InvalidDimensions(format!(
                "{} cells at aspect {} does not fit this platform",
                requested_cells, aspect_ratio
            ))
        })
    };
    GridDimensions::new(to_usize(columns)?, to_usize(height)?)
}

/// Counter-based hash used to seed word `index`.
///
/// The WGSL and CUDA seeders implement the same function, so a device can
/// seed its buffer in place and still match `seed_random` exactly.
#[inline]
pub fn seed_word(seed: u32, index: u32) -> u32 {
    mix32(index.wrapping_mul(0x9E37_79B9) ^ mix32(seed))
}

#[inline(always)]
fn mix32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7FEB_352D);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846C_A68B);
    x ^= x >> 16;
    x
}

/// Fills every cell independently with a fair coin derived from `seed`.
pub fn seed_random(dims: GridDimensions, seed: u32) -> Result<Grid> {
    let mut grid = Grid::zeroed(dims)?;
    fill_random(grid.words_mut(), seed);
    Ok(grid)
}

/// Single-threaded `fill_random`, for the sequential backend.
pub(crate) fn fill_random_sequential(words: &mut [u32], seed: u32) {
    for (i, word) in words.iter_mut().enumerate() {
        *word = seed_word(seed, i as u32);
    }
}

pub(crate) fn fill_random(words: &mut [u32], seed: u32) {
    words
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, word)| *word = seed_word(seed, i as u32));
}

/// Production seed from the OS-backed thread RNG.
pub fn random_seed() -> u32 {
    rand::random::<u32>()
}
