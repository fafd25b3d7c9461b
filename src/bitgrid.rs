//! Packed grid layout
//!
//! Cells are stored 32 to a `u32` word along a row. Bit `p` of word `w` in
//! row `y` is the cell at column `w * 32 + p`; bit 0 is the leftmost cell of
//! the word. Words are row-major: row 0 first, word 0 of a row first.
//!
//! Every backend (CPU loops, WGSL, CUDA) uses exactly this layout.

use crate::error::{LifeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cells per storage word.
pub const WORD_BITS: usize = 32;

#[inline(always)]
pub fn get_bit(word: u32, pos: u32) -> u32 {
    (word >> pos) & 1
}

#[inline(always)]
pub fn set_bit(word: u32, pos: u32) -> u32 {
    word | (1 << pos)
}

#[inline(always)]
pub fn clear_bit(word: u32, pos: u32) -> u32 {
    word & !(1 << pos)
}

/// How neighbor reads are resolved past the outermost rows and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Rows and columns wrap. The word left of column 0 is the last word of
    /// the same row; the row above row 0 is the last row.
    #[default]
    Torus,
    /// Everything outside the grid is dead.
    DeadBorder,
}

impl EdgePolicy {
    /// Flag value passed to the GPU kernels.
    pub fn gpu_flag(self) -> u32 {
        match self {
            EdgePolicy::Torus => 1,
            EdgePolicy::DeadBorder => 0,
        }
    }
}

impl fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgePolicy::Torus => write!(f, "torus"),
            EdgePolicy::DeadBorder => write!(f, "dead_border"),
        }
    }
}

impl FromStr for EdgePolicy {
    type Err = LifeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "torus" | "wrap" => Ok(EdgePolicy::Torus),
            "dead" | "dead_border" | "dead-border" => Ok(EdgePolicy::DeadBorder),
            other => Err(LifeError::Config(format!(
                "unknown edge policy '{}' (expected torus or dead_border)",
                other
            ))),
        }
    }
}

/// Size of a packed grid. Derived once per resize and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    /// Cells per row, always a multiple of 32.
    pub columns: usize,
    pub height: usize,
    /// `columns / 32`
    pub width_in_words: usize,
    /// `columns * height`
    pub total_cells: u64,
}

impl GridDimensions {
    pub fn new(columns: usize, height: usize) -> Result<Self> {
        if columns == 0 || height == 0 {
            return Err(LifeError::InvalidDimensions(format!(
                "grid must be non-empty, got {}x{}",
                columns, height
            )));
        }
        if columns % WORD_BITS != 0 {
            return Err(LifeError::InvalidDimensions(format!(
                "columns ({}) must be a multiple of {}",
                columns, WORD_BITS
            )));
        }
        let width_in_words = columns / WORD_BITS;
        // Device kernels index words with u32.
        let words = (width_in_words as u64)
            .checked_mul(height as u64)
            .filter(|&w| w <= u32::MAX as u64)
            .ok_or_else(|| {
                LifeError::InvalidDimensions(format!(
                    "{}x{} grid exceeds the addressable word range",
                    columns, height
                ))
            })?;
        if words > usize::MAX as u64 {
            return Err(LifeError::InvalidDimensions(format!(
                "{}x{} grid does not fit in memory on this platform",
                columns, height
            )));
        }
        Ok(Self {
            columns,
            height,
            width_in_words,
            total_cells: columns as u64 * height as u64,
        })
    }

    pub fn word_count(&self) -> usize {
        self.width_in_words * self.height
    }

    pub fn byte_size(&self) -> u64 {
        self.word_count() as u64 * 4
    }

    /// Word index and bit position of the cell at `(x, y)`.
    #[inline]
    pub fn locate(&self, x: usize, y: usize) -> (usize, u32) {
        (y * self.width_in_words + x / WORD_BITS, (x % WORD_BITS) as u32)
    }
}

impl fmt::Display for GridDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} words/row, {} cells)",
            self.columns, self.height, self.width_in_words, self.total_cells
        )
    }
}

/// One generation of packed cells in host memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    dims: GridDimensions,
    words: Vec<u32>,
}

impl Grid {
    /// All-dead grid. Allocation failure is reported, not aborted on.
    pub fn zeroed(dims: GridDimensions) -> Result<Self> {
        let words = alloc_words(dims.word_count(), "host grid")?;
        Ok(Self { dims, words })
    }

    pub fn from_words(dims: GridDimensions, words: Vec<u32>) -> Result<Self> {
        if words.len() != dims.word_count() {
            return Err(LifeError::InvalidDimensions(format!(
                "expected {} words for {}, got {}",
                dims.word_count(),
                dims,
                words.len()
            )));
        }
        Ok(Self { dims, words })
    }

    pub fn dims(&self) -> &GridDimensions {
        &self.dims
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    pub fn cell(&self, x: usize, y: usize) -> bool {
        let (i, pos) = self.dims.locate(x, y);
        get_bit(self.words[i], pos) == 1
    }

    pub fn set_cell(&mut self, x: usize, y: usize, alive: bool) {
        let (i, pos) = self.dims.locate(x, y);
        self.words[i] = if alive {
            set_bit(self.words[i], pos)
        } else {
            clear_bit(self.words[i], pos)
        };
    }

    /// Sets every listed `(x, y)` cell alive.
    pub fn with_cells(mut self, cells: &[(usize, usize)]) -> Self {
        for &(x, y) in cells {
            self.set_cell(x, y, true);
        }
        self
    }

    /// Number of living cells.
    pub fn population(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Coordinates of every living cell, row by row.
    pub fn live_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for (i, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let pos = bits.trailing_zeros() as usize;
                let y = i / self.dims.width_in_words;
                let x = (i % self.dims.width_in_words) * WORD_BITS + pos;
                cells.push((x, y));
                bits &= bits - 1;
            }
        }
        cells
    }
}

/// Zeroed word vector using fallible reservation.
pub(crate) fn alloc_words(count: usize, what: &'static str) -> Result<Vec<u32>> {
    let mut words = Vec::new();
    words
        .try_reserve_exact(count)
        .map_err(|_| LifeError::AllocationFailure {
            what,
            bytes: count as u64 * 4,
        })?;
    words.resize(count, 0);
    Ok(words)
}

/// The word under evaluation and its eight neighbors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Neighborhood {
    pub above_left: u32,
    pub above: u32,
    pub above_right: u32,
    pub left: u32,
    pub center: u32,
    pub right: u32,
    pub below_left: u32,
    pub below: u32,
    pub below_right: u32,
}

impl Neighborhood {
    /// Reads the 3x3 word block around `(row, col)`. Reads past the grid are
    /// resolved by `edges`; nothing outside `words` is ever touched.
    #[inline]
    pub fn gather(
        words: &[u32],
        dims: &GridDimensions,
        edges: EdgePolicy,
        row: usize,
        col: usize,
    ) -> Self {
        let w = dims.width_in_words;
        let h = dims.height;

        let (up, down) = match edges {
            EdgePolicy::Torus => (Some((row + h - 1) % h), Some((row + 1) % h)),
            EdgePolicy::DeadBorder => (row.checked_sub(1), Some(row + 1).filter(|&r| r < h)),
        };
        let (west, east) = match edges {
            EdgePolicy::Torus => (Some((col + w - 1) % w), Some((col + 1) % w)),
            EdgePolicy::DeadBorder => (col.checked_sub(1), Some(col + 1).filter(|&c| c < w)),
        };

        let at = |r: Option<usize>, c: Option<usize>| -> u32 {
            match (r, c) {
                (Some(r), Some(c)) => words[r * w + c],
                _ => 0,
            }
        };
        let here = Some(row);
        let mid = Some(col);

        Self {
            above_left: at(up, west),
            above: at(up, mid),
            above_right: at(up, east),
            left: at(here, west),
            center: at(here, mid),
            right: at(here, east),
            below_left: at(down, west),
            below: at(down, mid),
            below_right: at(down, east),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_accessors() {
        let w = set_bit(0, 0);
        assert_eq!(w, 1);
        let w = set_bit(w, 31);
        assert_eq!(w, 0x8000_0001);
        assert_eq!(get_bit(w, 31), 1);
        assert_eq!(get_bit(w, 30), 0);
        assert_eq!(clear_bit(w, 0), 0x8000_0000);
        // Setting twice / clearing an empty bit are no-ops.
        assert_eq!(set_bit(w, 31), w);
        assert_eq!(clear_bit(w, 5), w);
    }

    #[test]
    fn test_dimensions_validation() {
        assert!(GridDimensions::new(64, 10).is_ok());
        assert!(matches!(
            GridDimensions::new(0, 10),
            Err(LifeError::InvalidDimensions(_))
        ));
        assert!(matches!(
            GridDimensions::new(33, 10),
            Err(LifeError::InvalidDimensions(_))
        ));
        assert!(matches!(
            GridDimensions::new(32, 0),
            Err(LifeError::InvalidDimensions(_))
        ));

        let dims = GridDimensions::new(96, 4).unwrap();
        assert_eq!(dims.width_in_words, 3);
        assert_eq!(dims.word_count(), 12);
        assert_eq!(dims.total_cells, 384);
    }

    #[test]
    fn test_cell_layout() {
        let dims = GridDimensions::new(64, 2).unwrap();
        let mut grid = Grid::zeroed(dims).unwrap();

        grid.set_cell(0, 0, true);
        grid.set_cell(31, 0, true);
        grid.set_cell(32, 1, true);

        // Bit 0 is the leftmost cell of a word, bit 31 the rightmost.
        assert_eq!(grid.words()[0], 0x8000_0001);
        assert_eq!(grid.words()[1], 0);
        assert_eq!(grid.words()[2], 1);
        assert_eq!(grid.population(), 3);
        assert_eq!(grid.live_cells(), vec![(0, 0), (31, 0), (32, 1)]);

        grid.set_cell(31, 0, false);
        assert!(!grid.cell(31, 0));
        assert!(grid.cell(0, 0));
    }

    #[test]
    fn test_from_words_rejects_wrong_length() {
        let dims = GridDimensions::new(32, 4).unwrap();
        assert!(Grid::from_words(dims, vec![0; 4]).is_ok());
        assert!(matches!(
            Grid::from_words(dims, vec![0; 3]),
            Err(LifeError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_gather_interior() {
        let dims = GridDimensions::new(96, 3).unwrap();
        let words: Vec<u32> = (0..9).collect();
        let n = Neighborhood::gather(&words, &dims, EdgePolicy::DeadBorder, 1, 1);
        assert_eq!(
            n,
            Neighborhood {
                above_left: 0,
                above: 1,
                above_right: 2,
                left: 3,
                center: 4,
                right: 5,
                below_left: 6,
                below: 7,
                below_right: 8,
            }
        );
        // Interior reads do not depend on the policy.
        assert_eq!(n, Neighborhood::gather(&words, &dims, EdgePolicy::Torus, 1, 1));
    }

    #[test]
    fn test_gather_corner_torus_stays_in_row() {
        let dims = GridDimensions::new(96, 3).unwrap();
        let words: Vec<u32> = (10..19).collect();
        let n = Neighborhood::gather(&words, &dims, EdgePolicy::Torus, 0, 0);
        // Left of column 0 is the last word of the same row, not the previous row.
        assert_eq!(n.left, 12);
        assert_eq!(n.above, 16);
        assert_eq!(n.above_left, 18);
        assert_eq!(n.above_right, 17);
        assert_eq!(n.below_left, 15);
        assert_eq!(n.right, 11);
    }

    #[test]
    fn test_gather_corner_dead_border() {
        let dims = GridDimensions::new(96, 3).unwrap();
        let words = vec![u32::MAX; 9];
        let n = Neighborhood::gather(&words, &dims, EdgePolicy::DeadBorder, 2, 2);
        assert_eq!(n.center, u32::MAX);
        assert_eq!(n.left, u32::MAX);
        assert_eq!(n.above, u32::MAX);
        assert_eq!(n.above_left, u32::MAX);
        assert_eq!(n.right, 0);
        assert_eq!(n.above_right, 0);
        assert_eq!(n.below, 0);
        assert_eq!(n.below_left, 0);
        assert_eq!(n.below_right, 0);
    }

    #[test]
    fn test_edge_policy_parse() {
        assert_eq!("torus".parse::<EdgePolicy>().unwrap(), EdgePolicy::Torus);
        assert_eq!(
            "dead_border".parse::<EdgePolicy>().unwrap(),
            EdgePolicy::DeadBorder
        );
        assert!("mirror".parse::<EdgePolicy>().is_err());
    }
}
