//! The engine object a render loop (or the headless runner) owns.
//!
//! `Simulation` hides which backend is active behind a boxed driver so the
//! backend can be swapped at runtime. Swapping materializes the current
//! generation on the host and uploads it to the new backend; nothing is
//! lost and the generation counter carries over.

use crate::backend::{Backend, BackendKind};
use crate::bitgrid::{EdgePolicy, Grid, GridDimensions};
use crate::cpu::{Parallel, Sequential};
use crate::double_buffer::DoubleBuffer;
use crate::error::Result;
use log::{info, warn};

/// Object-safe view of an `Engine<B>` for any backend.
trait Driver {
    fn label(&self) -> &'static str;
    fn dims(&self) -> &GridDimensions;
    fn generation(&self) -> u64;
    fn advance(&mut self) -> Result<()>;
    fn current_host(&self) -> Option<&Grid>;
    fn snapshot(&self) -> Result<Grid>;
    fn resize(&mut self, dims: GridDimensions, seed: u32) -> Result<()>;
    fn load(&mut self, grid: &Grid, generation: u64) -> Result<()>;
}

struct Engine<B: Backend> {
    backend: B,
    buffers: DoubleBuffer<B::Storage>,
}

impl<B: Backend> Driver for Engine<B> {
    fn label(&self) -> &'static str {
        self.backend.label()
    }

    fn dims(&self) -> &GridDimensions {
        self.buffers.dims()
    }

    fn generation(&self) -> u64 {
        self.buffers.generation()
    }

    fn advance(&mut self) -> Result<()> {
        self.buffers.advance(&self.backend)
    }

    fn current_host(&self) -> Option<&Grid> {
        B::host_view(self.buffers.current())
    }

    fn snapshot(&self) -> Result<Grid> {
        match B::host_view(self.buffers.current()) {
            Some(grid) => Ok(grid.clone()),
            None => self.backend.download(self.buffers.current(), self.buffers.dims()),
        }
    }

    fn resize(&mut self, dims: GridDimensions, seed: u32) -> Result<()> {
        self.buffers.resize(&self.backend, dims, seed)
    }

    fn load(&mut self, grid: &Grid, generation: u64) -> Result<()> {
        self.buffers.load(&self.backend, grid, generation)
    }
}

/// How a new driver gets its first generation.
enum Start<'a> {
    Seeded(GridDimensions, u32),
    Loaded(&'a Grid, u64),
}

fn engine<B>(backend: B, start: Start<'_>) -> Result<Box<dyn Driver>>
where
    B: Backend + 'static,
{
    let buffers = match start {
        Start::Seeded(dims, seed) => DoubleBuffer::new(&backend, dims, seed)?,
        Start::Loaded(grid, generation) => DoubleBuffer::from_grid(&backend, grid, generation)?,
    };
    Ok(Box::new(Engine { backend, buffers }))
}

fn open(kind: BackendKind, edges: EdgePolicy, start: Start<'_>) -> Result<Box<dyn Driver>> {
    match kind {
        BackendKind::Sequential => engine(Sequential::new(edges), start),
        BackendKind::Parallel => engine(Parallel::new(edges), start),
        #[cfg(feature = "wgpu-compute")]
        BackendKind::Wgpu => engine(crate::gpu::wgpu_life::WgpuBackend::new(edges)?, start),
        #[cfg(not(feature = "wgpu-compute"))]
        BackendKind::Wgpu => Err(crate::error::LifeError::BackendUnavailable(
            "built without the wgpu-compute feature".to_string(),
        )),
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => engine(crate::cuda::CudaBackend::new(edges)?, start),
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => Err(crate::error::LifeError::BackendUnavailable(
            "built without the cuda feature".to_string(),
        )),
    }
}

pub struct Simulation {
    driver: Box<dyn Driver>,
    kind: BackendKind,
    edges: EdgePolicy,
}

impl Simulation {
    /// Creates a seeded simulation on `kind`.
    pub fn new(kind: BackendKind, dims: GridDimensions, seed: u32, edges: EdgePolicy) -> Result<Self> {
        let driver = open(kind, edges, Start::Seeded(dims, seed))?;
        info!(
            "{}: {} seeded with {} ({} edges)",
            driver.label(),
            dims,
            seed,
            edges
        );
        Ok(Self { driver, kind, edges })
    }

    /// Creates a simulation whose current generation is `grid`.
    pub fn from_grid(kind: BackendKind, grid: &Grid, generation: u64, edges: EdgePolicy) -> Result<Self> {
        let driver = open(kind, edges, Start::Loaded(grid, generation))?;
        info!(
            "{}: {} loaded at generation {}",
            driver.label(),
            grid.dims(),
            generation
        );
        Ok(Self { driver, kind, edges })
    }

    /// Computes one generation. On error the current generation is unchanged.
    pub fn advance(&mut self) -> Result<()> {
        self.driver.advance()
    }

    /// Borrow of the current generation when it lives in host memory.
    /// `None` on GPU backends; use `snapshot` there.
    pub fn current_host(&self) -> Option<&Grid> {
        self.driver.current_host()
    }

    /// Host copy of the current generation on any backend.
    pub fn snapshot(&self) -> Result<Grid> {
        self.driver.snapshot()
    }

    /// Replaces the grid with a freshly seeded one of `dims`. On error the
    /// old grid keeps running.
    pub fn resize(&mut self, dims: GridDimensions, seed: u32) -> Result<()> {
        let old = *self.driver.dims();
        self.driver.resize(dims, seed)?;
        info!("resized {} -> {} (seed {})", old, dims, seed);
        Ok(())
    }

    /// Moves the current generation to another backend. If the new backend
    /// cannot be brought up the old one stays active.
    pub fn switch_backend(&mut self, kind: BackendKind) -> Result<()> {
        if kind == self.kind {
            return Ok(());
        }
        let grid = self.driver.snapshot()?;
        let generation = self.driver.generation();
        match open(kind, self.edges, Start::Loaded(&grid, generation)) {
            Ok(driver) => {
                info!(
                    "switched {} -> {} at generation {}",
                    self.driver.label(),
                    driver.label(),
                    generation
                );
                self.driver = driver;
                self.kind = kind;
                Ok(())
            }
            Err(e) => {
                warn!("staying on {}: {}", self.driver.label(), e);
                Err(e)
            }
        }
    }

    /// Replaces the current generation with `grid`, keeping the backend.
    pub fn load(&mut self, grid: &Grid, generation: u64) -> Result<()> {
        self.driver.load(grid, generation)
    }

    pub fn dims(&self) -> &GridDimensions {
        self.driver.dims()
    }

    pub fn generation(&self) -> u64 {
        self.driver.generation()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend_label(&self) -> &'static str {
        self.driver.label()
    }

    pub fn edges(&self) -> EdgePolicy {
        self.edges
    }

    pub fn total_cells(&self) -> u64 {
        self.driver.dims().total_cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifeError;
    use crate::factory::{self, derive_dimensions};

    fn small_dims() -> GridDimensions {
        derive_dimensions(20_000, 16.0 / 9.0).unwrap()
    }

    #[test]
    fn test_new_is_seeded_on_host() {
        let dims = small_dims();
        let sim = Simulation::new(BackendKind::Parallel, dims, 17, EdgePolicy::Torus).unwrap();
        assert_eq!(sim.generation(), 0);
        assert_eq!(sim.total_cells(), dims.total_cells);
        let host = sim.current_host().expect("parallel backend keeps host grids");
        assert_eq!(*host, factory::seed_random(dims, 17).unwrap());
        assert_eq!(sim.snapshot().unwrap(), *host);
    }

    #[test]
    fn test_backends_agree_through_simulation() {
        let dims = small_dims();
        let mut seq = Simulation::new(BackendKind::Sequential, dims, 5, EdgePolicy::DeadBorder).unwrap();
        let mut par = Simulation::new(BackendKind::Parallel, dims, 5, EdgePolicy::DeadBorder).unwrap();
        for _ in 0..20 {
            seq.advance().unwrap();
            par.advance().unwrap();
        }
        assert_eq!(seq.generation(), 20);
        assert_eq!(seq.snapshot().unwrap(), par.snapshot().unwrap());
    }

    #[test]
    fn test_switch_backend_preserves_state() {
        let dims = small_dims();
        let mut sim = Simulation::new(BackendKind::Sequential, dims, 8, EdgePolicy::Torus).unwrap();
        let mut reference = Simulation::new(BackendKind::Sequential, dims, 8, EdgePolicy::Torus).unwrap();
        for _ in 0..3 {
            sim.advance().unwrap();
            reference.advance().unwrap();
        }

        sim.switch_backend(BackendKind::Parallel).unwrap();
        assert_eq!(sim.backend_kind(), BackendKind::Parallel);
        assert_eq!(sim.generation(), 3);
        assert_eq!(sim.snapshot().unwrap(), reference.snapshot().unwrap());

        for _ in 0..4 {
            sim.advance().unwrap();
            reference.advance().unwrap();
        }
        assert_eq!(sim.snapshot().unwrap(), reference.snapshot().unwrap());
    }

    #[test]
    fn test_switch_to_gpu_round_trip_or_fallback() {
        let dims = small_dims();
        let mut sim = Simulation::new(BackendKind::Parallel, dims, 21, EdgePolicy::Torus).unwrap();
        sim.advance().unwrap();
        let before = sim.snapshot().unwrap();

        for kind in [BackendKind::Wgpu, BackendKind::Cuda] {
            match sim.switch_backend(kind) {
                Ok(()) => {
                    assert_eq!(sim.backend_kind(), kind);
                    assert!(sim.current_host().is_none());
                    assert_eq!(sim.snapshot().unwrap(), before);
                    sim.switch_backend(BackendKind::Parallel).unwrap();
                }
                Err(e) => {
                    assert!(matches!(e, LifeError::BackendUnavailable(_)), "{}", e);
                    assert_eq!(sim.backend_kind(), BackendKind::Parallel);
                    assert_eq!(*sim.current_host().unwrap(), before);
                }
            }
        }
        sim.advance().unwrap();
        assert_eq!(sim.generation(), 2);
    }

    #[test]
    fn test_resize_reseeds() {
        let mut sim = Simulation::new(BackendKind::Parallel, small_dims(), 1, EdgePolicy::Torus).unwrap();
        sim.advance().unwrap();
        let bigger = derive_dimensions(80_000, 1.0).unwrap();
        sim.resize(bigger, 2).unwrap();
        assert_eq!(*sim.dims(), bigger);
        assert_eq!(sim.generation(), 0);
        assert_eq!(sim.snapshot().unwrap(), factory::seed_random(bigger, 2).unwrap());
    }

    #[test]
    fn test_load_pattern() {
        let dims = GridDimensions::new(64, 16).unwrap();
        let mut sim = Simulation::new(BackendKind::Sequential, dims, 3, EdgePolicy::Torus).unwrap();

        let block = Grid::zeroed(dims)
            .unwrap()
            .with_cells(&[(31, 7), (32, 7), (31, 8), (32, 8)]);
        sim.load(&block, 0).unwrap();
        for _ in 0..10 {
            sim.advance().unwrap();
        }
        assert_eq!(sim.snapshot().unwrap(), block);
    }

    #[test]
    fn test_from_grid_keeps_generation() {
        let dims = GridDimensions::new(96, 8).unwrap();
        let grid = factory::seed_random(dims, 4).unwrap();
        let mut sim = Simulation::from_grid(BackendKind::Parallel, &grid, 500, EdgePolicy::Torus).unwrap();
        assert_eq!(sim.generation(), 500);
        sim.advance().unwrap();
        assert_eq!(sim.generation(), 501);
    }
}
