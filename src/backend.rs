//! Execution backends
//!
//! A backend owns how and where a generation is stored (`Storage`) and how
//! the next one is computed from it. Every backend must produce exactly the
//! output of `kernel::step` for the same input and edge policy.

use crate::bitgrid::{EdgePolicy, Grid, GridDimensions};
use crate::error::{LifeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub trait Backend {
    /// Where one generation lives: a host `Grid` or a device buffer.
    type Storage;

    fn label(&self) -> &'static str;

    fn edges(&self) -> EdgePolicy;

    /// Allocates storage for one generation. Contents are unspecified.
    fn allocate(&self, dims: &GridDimensions) -> Result<Self::Storage>;

    /// Overwrites `storage` with a host grid.
    fn upload(&self, storage: &mut Self::Storage, grid: &Grid) -> Result<()>;

    /// Overwrites `storage` with the same contents as `factory::seed_random`.
    fn seed(&self, storage: &mut Self::Storage, dims: &GridDimensions, seed: u32) -> Result<()>;

    /// Writes the generation after `input` into `output`. `input` is never
    /// modified. When this returns `Ok` the output is complete and readable.
    fn step(
        &self,
        input: &Self::Storage,
        output: &mut Self::Storage,
        dims: &GridDimensions,
    ) -> Result<()>;

    /// Copies `storage` back into host memory.
    fn download(&self, storage: &Self::Storage, dims: &GridDimensions) -> Result<Grid>;

    /// Direct view for backends whose storage already is a host grid.
    fn host_view(_storage: &Self::Storage) -> Option<&Grid> {
        None
    }
}

/// Which backend a `Simulation` runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-threaded CPU loop.
    #[serde(alias = "cpu")]
    Sequential,
    /// Rayon, one work item per row.
    #[default]
    Parallel,
    /// wgpu compute shader (Vulkan/Metal/DX12).
    Wgpu,
    /// CUDA kernel through NVRTC.
    Cuda,
}

impl BackendKind {
    pub fn all() -> &'static [BackendKind] {
        &[
            BackendKind::Sequential,
            BackendKind::Parallel,
            BackendKind::Wgpu,
            BackendKind::Cuda,
        ]
    }

    /// Whether generations live in device memory.
    pub fn is_gpu(self) -> bool {
        matches!(self, BackendKind::Wgpu | BackendKind::Cuda)
    }

    /// Whether this build contains the backend at all.
    pub fn compiled_in(self) -> bool {
        match self {
            BackendKind::Sequential | BackendKind::Parallel => true,
            BackendKind::Wgpu => cfg!(feature = "wgpu-compute"),
            BackendKind::Cuda => cfg!(feature = "cuda"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Sequential => "sequential",
            BackendKind::Parallel => "parallel",
            BackendKind::Wgpu => "wgpu",
            BackendKind::Cuda => "cuda",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = LifeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "cpu" => Ok(BackendKind::Sequential),
            "parallel" | "rayon" => Ok(BackendKind::Parallel),
            "wgpu" | "gpu" => Ok(BackendKind::Wgpu),
            "cuda" => Ok(BackendKind::Cuda),
            other => Err(LifeError::Config(format!(
                "unknown backend '{}' (expected cpu, parallel, wgpu or cuda)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip_names() {
        for &kind in BackendKind::all() {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("cpu".parse::<BackendKind>().unwrap(), BackendKind::Sequential);
        assert!("opencl".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_yaml() {
        let kind: BackendKind = serde_yaml::from_str("cpu").unwrap();
        assert_eq!(kind, BackendKind::Sequential);
        let kind: BackendKind = serde_yaml::from_str("wgpu").unwrap();
        assert_eq!(kind, BackendKind::Wgpu);
        assert_eq!(serde_yaml::to_string(&BackendKind::Parallel).unwrap().trim(), "parallel");
    }

    #[test]
    fn test_cpu_backends_always_compiled() {
        assert!(BackendKind::Sequential.compiled_in());
        assert!(BackendKind::Parallel.compiled_in());
        assert!(!BackendKind::Sequential.is_gpu());
        assert!(BackendKind::Wgpu.is_gpu());
    }
}
