//! Bit-packed Conway's Game of Life.
//!
//! Cells are packed 32 to a `u32` and stepped by interchangeable backends
//! (single-threaded CPU, rayon, wgpu compute, CUDA) that all produce the
//! same bits. `Simulation` is the object a render loop or the headless
//! runner owns.

pub mod backend;
pub mod bitgrid;
pub mod checkpoint;
pub mod config;
pub mod cpu;
pub mod cuda;
pub mod double_buffer;
pub mod error;
pub mod factory;
pub mod frames;
pub mod gpu;
pub mod kernel;
pub mod metrics;
pub mod simulation;

pub use backend::{Backend, BackendKind};
pub use bitgrid::{EdgePolicy, Grid, GridDimensions};
pub use error::{LifeError, Result};
pub use factory::{derive_dimensions, seed_random};
pub use simulation::Simulation;
