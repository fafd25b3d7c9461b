//! Two generation slots and the index of the current one.
//!
//! `advance` writes the next generation into the non-current slot and only
//! flips the index once the backend reports completion, so a failed step
//! never exposes a partial generation.

use crate::backend::Backend;
use crate::bitgrid::{Grid, GridDimensions};
use crate::error::Result;
use log::{debug, info};

pub struct DoubleBuffer<S> {
    slots: [S; 2],
    current: usize,
    dims: GridDimensions,
    generation: u64,
}

impl<S> DoubleBuffer<S> {
    /// Allocates both slots on `backend` and seeds slot 0.
    pub fn new<B>(backend: &B, dims: GridDimensions, seed: u32) -> Result<Self>
    where
        B: Backend<Storage = S>,
    {
        let mut slots = [backend.allocate(&dims)?, backend.allocate(&dims)?];
        backend.seed(&mut slots[0], &dims, seed)?;
        info!(
            "{}: allocated 2 x {:.1} MiB for {}",
            backend.label(),
            dims.byte_size() as f64 / (1024.0 * 1024.0),
            dims
        );
        Ok(Self {
            slots,
            current: 0,
            dims,
            generation: 0,
        })
    }

    /// Materializes a host grid into fresh storage on `backend`.
    pub fn from_grid<B>(backend: &B, grid: &Grid, generation: u64) -> Result<Self>
    where
        B: Backend<Storage = S>,
    {
        let dims = *grid.dims();
        let mut slots = [backend.allocate(&dims)?, backend.allocate(&dims)?];
        backend.upload(&mut slots[0], grid)?;
        Ok(Self {
            slots,
            current: 0,
            dims,
            generation,
        })
    }

    /// The most recently completed generation.
    pub fn current(&self) -> &S {
        &self.slots[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn dims(&self) -> &GridDimensions {
        &self.dims
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Computes the next generation into the other slot, then flips.
    pub fn advance<B>(&mut self, backend: &B) -> Result<()>
    where
        B: Backend<Storage = S>,
    {
        let (first, second) = self.slots.split_at_mut(1);
        let (input, output) = if self.current == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        };
        backend.step(input, output, &self.dims)?;
        self.current ^= 1;
        self.generation += 1;
        Ok(())
    }

    /// Replaces both slots with storage for `dims` and seeds the new
    /// current slot. On error the previous buffers are left as they were.
    pub fn resize<B>(&mut self, backend: &B, dims: GridDimensions, seed: u32) -> Result<()>
    where
        B: Backend<Storage = S>,
    {
        let fresh = Self::new(backend, dims, seed)?;
        debug!("resized {} -> {}", self.dims, dims);
        *self = fresh;
        Ok(())
    }

    /// Overwrites the current slot with `grid` and resets the generation.
    pub fn load<B>(&mut self, backend: &B, grid: &Grid, generation: u64) -> Result<()>
    where
        B: Backend<Storage = S>,
    {
        if *grid.dims() == self.dims {
            backend.upload(&mut self.slots[self.current], grid)?;
            self.generation = generation;
        } else {
            *self = Self::from_grid(backend, grid, generation)?;
        }
        Ok(())
    }
}
