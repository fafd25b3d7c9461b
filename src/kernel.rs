//! The B3/S23 update rule over packed words.
//!
//! Each output word depends on its 3x3 word neighborhood. Bits 1..=30 only
//! need the word itself and the words directly above and below; bit 0 borrows
//! bit 31 of the three left-hand words and bit 31 borrows bit 0 of the three
//! right-hand words. The GPU kernels in `gpu.rs` and `cuda.rs` follow the
//! same structure bit for bit.

use crate::bitgrid::{get_bit, set_bit, EdgePolicy, GridDimensions, Neighborhood};

/// Classic Life: survive on 2 or 3, birth on 3.
#[inline(always)]
pub fn next_state(alive: bool, neighbours: u32) -> bool {
    (alive && neighbours == 2) || neighbours == 3
}

/// Computes the next generation of `n.center`.
#[inline]
pub fn evolve_word(n: &Neighborhood) -> u32 {
    let mut output = 0u32;

    // Bit 0
    let mut neighbours = get_bit(n.above_left, 31);
    neighbours += get_bit(n.above, 0);
    neighbours += get_bit(n.above, 1);
    neighbours += get_bit(n.left, 31);
    neighbours += get_bit(n.center, 1);
    neighbours += get_bit(n.below_left, 31);
    neighbours += get_bit(n.below, 0);
    neighbours += get_bit(n.below, 1);
    if next_state(get_bit(n.center, 0) == 1, neighbours) {
        output = set_bit(output, 0);
    }

    // Bits 1..=30
    for p in 1..31 {
        neighbours = get_bit(n.above, p - 1);
        neighbours += get_bit(n.above, p);
        neighbours += get_bit(n.above, p + 1);
        neighbours += get_bit(n.center, p - 1);
        neighbours += get_bit(n.center, p + 1);
        neighbours += get_bit(n.below, p - 1);
        neighbours += get_bit(n.below, p);
        neighbours += get_bit(n.below, p + 1);
        if next_state(get_bit(n.center, p) == 1, neighbours) {
            output = set_bit(output, p);
        }
    }

    // Bit 31
    neighbours = get_bit(n.above, 30);
    neighbours += get_bit(n.above, 31);
    neighbours += get_bit(n.above_right, 0);
    neighbours += get_bit(n.center, 30);
    neighbours += get_bit(n.right, 0);
    neighbours += get_bit(n.below, 30);
    neighbours += get_bit(n.below, 31);
    neighbours += get_bit(n.below_right, 0);
    if next_state(get_bit(n.center, 31) == 1, neighbours) {
        output = set_bit(output, 31);
    }

    output
}

/// Evolves the consecutive rows starting at `first_row` into `out_rows`.
///
/// `out_rows.len()` must be a whole number of rows. `input` is the complete
/// previous generation and is only read.
pub fn step_rows(
    input: &[u32],
    out_rows: &mut [u32],
    dims: &GridDimensions,
    edges: EdgePolicy,
    first_row: usize,
) {
    let w = dims.width_in_words;
    debug_assert_eq!(out_rows.len() % w, 0);
    for (offset, row_out) in out_rows.chunks_mut(w).enumerate() {
        let row = first_row + offset;
        for (col, word) in row_out.iter_mut().enumerate() {
            *word = evolve_word(&Neighborhood::gather(input, dims, edges, row, col));
        }
    }
}

/// Evolves a whole grid. Panics if either buffer does not match `dims`.
pub fn step(input: &[u32], output: &mut [u32], dims: &GridDimensions, edges: EdgePolicy) {
    assert_eq!(input.len(), dims.word_count(), "input buffer does not match dimensions");
    assert_eq!(output.len(), dims.word_count(), "output buffer does not match dimensions");
    step_rows(input, output, dims, edges, 0);
}
