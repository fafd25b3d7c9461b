//! CPU backends
//!
//! Both keep generations in host `Grid`s and share `kernel::step_rows`.
//! `Parallel` hands each output row to rayon; rows only read the shared
//! input grid and write their own slice of the output, so no locking is
//! needed.

use crate::backend::Backend;
use crate::bitgrid::{EdgePolicy, Grid, GridDimensions};
use crate::error::Result;
use crate::factory;
use crate::kernel;
use rayon::prelude::*;

/// Rows per rayon task. Keeps task overhead low on narrow grids.
const ROWS_PER_TASK: usize = 4;

/// Single-threaded reference backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential {
    edges: EdgePolicy,
}

impl Sequential {
    pub fn new(edges: EdgePolicy) -> Self {
        Self { edges }
    }
}

/// Data-parallel backend on the rayon thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel {
    edges: EdgePolicy,
}

impl Parallel {
    pub fn new(edges: EdgePolicy) -> Self {
        Self { edges }
    }
}

fn check_sizes(input: &Grid, output: &Grid, dims: &GridDimensions) {
    assert_eq!(input.dims(), dims, "input grid does not match dimensions");
    assert_eq!(output.dims(), dims, "output grid does not match dimensions");
}

fn upload_host(storage: &mut Grid, grid: &Grid) {
    assert_eq!(storage.dims(), grid.dims(), "uploaded grid does not match storage");
    storage.words_mut().copy_from_slice(grid.words());
}

impl Backend for Sequential {
    type Storage = Grid;

    fn label(&self) -> &'static str {
        "CPU (sequential)"
    }

    fn edges(&self) -> EdgePolicy {
        self.edges
    }

    fn allocate(&self, dims: &GridDimensions) -> Result<Grid> {
        Grid::zeroed(*dims)
    }

    fn upload(&self, storage: &mut Grid, grid: &Grid) -> Result<()> {
        upload_host(storage, grid);
        Ok(())
    }

    fn seed(&self, storage: &mut Grid, _dims: &GridDimensions, seed: u32) -> Result<()> {
        factory::fill_random_sequential(storage.words_mut(), seed);
        Ok(())
    }

    fn step(&self, input: &Grid, output: &mut Grid, dims: &GridDimensions) -> Result<()> {
        check_sizes(input, output, dims);
        kernel::step_rows(input.words(), output.words_mut(), dims, self.edges, 0);
        Ok(())
    }

    fn download(&self, storage: &Grid, _dims: &GridDimensions) -> Result<Grid> {
        Ok(storage.clone())
    }

    fn host_view(storage: &Grid) -> Option<&Grid> {
        Some(storage)
    }
}

impl Backend for Parallel {
    type Storage = Grid;

    fn label(&self) -> &'static str {
        "CPU (rayon)"
    }

    fn edges(&self) -> EdgePolicy {
        self.edges
    }

    fn allocate(&self, dims: &GridDimensions) -> Result<Grid> {
        Grid::zeroed(*dims)
    }

    fn upload(&self, storage: &mut Grid, grid: &Grid) -> Result<()> {
        upload_host(storage, grid);
        Ok(())
    }

    fn seed(&self, storage: &mut Grid, _dims: &GridDimensions, seed: u32) -> Result<()> {
        factory::fill_random(storage.words_mut(), seed);
        Ok(())
    }

    fn step(&self, input: &Grid, output: &mut Grid, dims: &GridDimensions) -> Result<()> {
        check_sizes(input, output, dims);
        let words_in = input.words();
        let edges = self.edges;
        let chunk = dims.width_in_words * ROWS_PER_TASK;

        output
            .words_mut()
            .par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(task, rows)| {
                kernel::step_rows(words_in, rows, dims, edges, task * ROWS_PER_TASK);
            });
        Ok(())
    }

    fn download(&self, storage: &Grid, _dims: &GridDimensions) -> Result<Grid> {
        Ok(storage.clone())
    }

    fn host_view(storage: &Grid) -> Option<&Grid> {
        Some(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_grid(rng: &mut StdRng, columns: usize, height: usize) -> Grid {
        let dims = GridDimensions::new(columns, height).unwrap();
        let words = (0..dims.word_count()).map(|_| rng.random()).collect();
        Grid::from_words(dims, words).unwrap()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(2024);
        // Heights that are and are not multiples of ROWS_PER_TASK.
        for (columns, height) in [(32, 1), (64, 3), (96, 4), (320, 37), (1024, 130)] {
            let input = random_grid(&mut rng, columns, height);
            let dims = *input.dims();
            for edges in [EdgePolicy::Torus, EdgePolicy::DeadBorder] {
                let seq = Sequential::new(edges);
                let par = Parallel::new(edges);

                let mut out_seq = seq.allocate(&dims).unwrap();
                let mut out_par = par.allocate(&dims).unwrap();
                seq.step(&input, &mut out_seq, &dims).unwrap();
                par.step(&input, &mut out_par, &dims).unwrap();
                assert_eq!(out_seq, out_par, "{} {:?}", dims, edges);
            }
        }
    }

    #[test]
    fn test_parallel_matches_sequential_over_generations() {
        let dims = GridDimensions::new(256, 64).unwrap();
        let seq = Sequential::new(EdgePolicy::Torus);
        let par = Parallel::new(EdgePolicy::Torus);

        let mut a = factory::seed_random(dims, 5).unwrap();
        let mut b = a.clone();
        let mut scratch_a = seq.allocate(&dims).unwrap();
        let mut scratch_b = par.allocate(&dims).unwrap();
        for _ in 0..50 {
            seq.step(&a, &mut scratch_a, &dims).unwrap();
            par.step(&b, &mut scratch_b, &dims).unwrap();
            std::mem::swap(&mut a, &mut scratch_a);
            std::mem::swap(&mut b, &mut scratch_b);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_matches_factory() {
        let dims = GridDimensions::new(128, 10).unwrap();
        let expected = factory::seed_random(dims, 77).unwrap();

        let parallel = Parallel::default();
        let mut storage = parallel.allocate(&dims).unwrap();
        parallel.seed(&mut storage, &dims, 77).unwrap();
        assert_eq!(storage, expected);

        let sequential = Sequential::default();
        let mut storage = sequential.allocate(&dims).unwrap();
        sequential.seed(&mut storage, &dims, 77).unwrap();
        assert_eq!(storage, expected);
    }
}
