//! CUDA backend
//!
//! Kernels are compiled at startup with NVRTC. Unlike wgpu there is no
//! per-binding size cap, so the largest grid is bounded by device memory.
//!
//! Build with: cargo build --release --features cuda

#[cfg(feature = "cuda")]
use crate::backend::Backend;
#[cfg(feature = "cuda")]
use crate::bitgrid::{EdgePolicy, Grid, GridDimensions};
#[cfg(feature = "cuda")]
use crate::error::{LifeError, Result};
#[cfg(feature = "cuda")]
use cudarc::driver::*;
#[cfg(feature = "cuda")]
use log::info;
#[cfg(feature = "cuda")]
use std::sync::Arc;

/// Step and seed kernels. The per-bit structure and the hash mirror
/// `kernel::evolve_word` and `factory::seed_word`.
#[cfg(feature = "cuda")]
const LIFE_CUDA_KERNEL: &str = r#"
__device__ __forceinline__ unsigned int bit(unsigned int word, unsigned int pos) {
    return (word >> pos) & 1u;
}

__device__ __forceinline__ bool next_state(unsigned int alive, unsigned int n) {
    return (alive == 1u && n == 2u) || n == 3u;
}

__device__ unsigned int evolve(
    const unsigned int* cells,
    unsigned int row,
    unsigned int col,
    unsigned int width,
    unsigned int height,
    unsigned int wrap
) {
    bool torus = wrap == 1u;
    bool has_up = torus || row > 0u;
    bool has_down = torus || row + 1u < height;
    bool has_west = torus || col > 0u;
    bool has_east = torus || col + 1u < width;

    unsigned int up = row == 0u ? height - 1u : row - 1u;
    unsigned int down = row + 1u == height ? 0u : row + 1u;
    unsigned int west = col == 0u ? width - 1u : col - 1u;
    unsigned int east = col + 1u == width ? 0u : col + 1u;

    #define AT(r, c, ok) ((ok) ? cells[(unsigned long long)(r) * width + (c)] : 0u)
    unsigned int above_left  = AT(up, west, has_up && has_west);
    unsigned int above       = AT(up, col, has_up);
    unsigned int above_right = AT(up, east, has_up && has_east);
    unsigned int left        = AT(row, west, has_west);
    unsigned int center      = AT(row, col, true);
    unsigned int right       = AT(row, east, has_east);
    unsigned int below_left  = AT(down, west, has_down && has_west);
    unsigned int below       = AT(down, col, has_down);
    unsigned int below_right = AT(down, east, has_down && has_east);
    #undef AT

    unsigned int output = 0u;

    unsigned int n = bit(above_left, 31) + bit(above, 0) + bit(above, 1)
                   + bit(left, 31) + bit(center, 1)
                   + bit(below_left, 31) + bit(below, 0) + bit(below, 1);
    if (next_state(bit(center, 0), n)) output |= 1u;

    for (unsigned int p = 1; p < 31; p++) {
        n = bit(above, p - 1) + bit(above, p) + bit(above, p + 1)
          + bit(center, p - 1) + bit(center, p + 1)
          + bit(below, p - 1) + bit(below, p) + bit(below, p + 1);
        if (next_state(bit(center, p), n)) output |= 1u << p;
    }

    n = bit(above, 30) + bit(above, 31) + bit(above_right, 0)
      + bit(center, 30) + bit(right, 0)
      + bit(below, 30) + bit(below, 31) + bit(below_right, 0);
    if (next_state(bit(center, 31), n)) output |= 1u << 31;

    return output;
}

extern "C" __global__ void life_step(
    const unsigned int* cells_in,
    unsigned int* cells_out,
    unsigned int width,
    unsigned int height,
    unsigned int wrap
) {
    unsigned int col_stride = gridDim.x * blockDim.x;
    unsigned int row_stride = gridDim.y * blockDim.y;
    for (unsigned int row = blockIdx.y * blockDim.y + threadIdx.y; row < height; row += row_stride) {
        for (unsigned int col = blockIdx.x * blockDim.x + threadIdx.x; col < width; col += col_stride) {
            cells_out[(unsigned long long)row * width + col] =
                evolve(cells_in, row, col, width, height, wrap);
        }
    }
}

__device__ __forceinline__ unsigned int mix32(unsigned int x) {
    x ^= x >> 16;
    x *= 0x7feb352du;
    x ^= x >> 15;
    x *= 0x846ca68bu;
    x ^= x >> 16;
    return x;
}

extern "C" __global__ void life_seed(unsigned int* cells, unsigned int word_count, unsigned int seed) {
    unsigned long long index = (unsigned long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (index >= word_count) return;
    unsigned int i = (unsigned int)index;
    cells[index] = mix32((i * 0x9e3779b9u) ^ mix32(seed));
}
"#;

#[cfg(feature = "cuda")]
const STEP_BLOCK: u32 = 16;
#[cfg(feature = "cuda")]
const SEED_BLOCK: u32 = 256;
/// CUDA caps gridDim.y (and z) at 65535.
#[cfg(feature = "cuda")]
const MAX_GRID_Y: u32 = 65_535;

#[cfg(feature = "cuda")]
pub struct CudaBackend {
    device: Arc<CudaDevice>,
    step_kernel: CudaFunction,
    seed_kernel: CudaFunction,
    edges: EdgePolicy,
}

#[cfg(feature = "cuda")]
fn device_error(what: &str, e: impl std::fmt::Debug) -> LifeError {
    LifeError::Device(format!("{}: {:?}", what, e))
}

#[cfg(feature = "cuda")]
impl CudaBackend {
    pub fn new(edges: EdgePolicy) -> Result<Self> {
        let device = CudaDevice::new(0)
            .map_err(|e| LifeError::BackendUnavailable(format!("CUDA device 0: {:?}", e)))?;

        let ptx = cudarc::nvrtc::compile_ptx(LIFE_CUDA_KERNEL)
            .map_err(|e| LifeError::BackendUnavailable(format!("NVRTC: {:?}", e)))?;
        device
            .load_ptx(ptx, "life", &["life_step", "life_seed"])
            .map_err(|e| device_error("load_ptx", e))?;
        let step_kernel = device
            .get_func("life", "life_step")
            .ok_or_else(|| LifeError::Device("life_step missing from module".to_string()))?;
        let seed_kernel = device
            .get_func("life", "life_seed")
            .ok_or_else(|| LifeError::Device("life_seed missing from module".to_string()))?;

        info!("CUDA device 0 initialized, kernels compiled");
        Ok(Self {
            device,
            step_kernel,
            seed_kernel,
            edges,
        })
    }

    fn check_len(storage: &CudaSlice<u32>, dims: &GridDimensions) -> Result<()> {
        if storage.len() != dims.word_count() {
            return Err(LifeError::InvalidDimensions(format!(
                "device buffer holds {} words, {} needs {}",
                storage.len(),
                dims,
                dims.word_count()
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "cuda")]
impl Backend for CudaBackend {
    type Storage = CudaSlice<u32>;

    fn label(&self) -> &'static str {
        "GPU (CUDA)"
    }

    fn edges(&self) -> EdgePolicy {
        self.edges
    }

    fn allocate(&self, dims: &GridDimensions) -> Result<CudaSlice<u32>> {
        self.device
            .alloc_zeros::<u32>(dims.word_count())
            .map_err(|_| LifeError::AllocationFailure {
                what: "CUDA grid buffer",
                bytes: dims.byte_size(),
            })
    }

    fn upload(&self, storage: &mut CudaSlice<u32>, grid: &Grid) -> Result<()> {
        Self::check_len(storage, grid.dims())?;
        self.device
            .htod_sync_copy_into(grid.words(), storage)
            .map_err(|e| device_error("upload", e))
    }

    fn seed(&self, storage: &mut CudaSlice<u32>, dims: &GridDimensions, seed: u32) -> Result<()> {
        Self::check_len(storage, dims)?;
        let words = dims.word_count() as u32;
        let cfg = LaunchConfig {
            grid_dim: (words.div_ceil(SEED_BLOCK).max(1), 1, 1),
            block_dim: (SEED_BLOCK, 1, 1),
            shared_mem_bytes: 0,
        };
        unsafe {
            self.seed_kernel
                .clone()
                .launch(cfg, (&mut *storage, words, seed))
                .map_err(|e| device_error("seed launch", e))?;
        }
        self.device.synchronize().map_err(|e| device_error("seed", e))
    }

    fn step(
        &self,
        input: &CudaSlice<u32>,
        output: &mut CudaSlice<u32>,
        dims: &GridDimensions,
    ) -> Result<()> {
        Self::check_len(input, dims)?;
        Self::check_len(output, dims)?;
        let width = dims.width_in_words as u32;
        let height = dims.height as u32;
        let cfg = LaunchConfig {
            grid_dim: (
                width.div_ceil(STEP_BLOCK).max(1),
                height.div_ceil(STEP_BLOCK).clamp(1, MAX_GRID_Y),
                1,
            ),
            block_dim: (STEP_BLOCK, STEP_BLOCK, 1),
            shared_mem_bytes: 0,
        };
        unsafe {
            self.step_kernel
                .clone()
                .launch(cfg, (input, &mut *output, width, height, self.edges.gpu_flag()))
                .map_err(|e| device_error("step launch", e))?;
        }
        // Kernel faults surface here; the output is not complete until then.
        self.device.synchronize().map_err(|e| device_error("step", e))
    }

    fn download(&self, storage: &CudaSlice<u32>, dims: &GridDimensions) -> Result<Grid> {
        Self::check_len(storage, dims)?;
        let words = self
            .device
            .dtoh_sync_copy(storage)
            .map_err(|e| device_error("download", e))?;
        Grid::from_words(*dims, words)
    }
}

/// Check if CUDA is available
#[cfg(feature = "cuda")]
pub fn cuda_available() -> bool {
    CudaDevice::new(0).is_ok()
}

#[cfg(not(feature = "cuda"))]
pub fn cuda_available() -> bool {
    false
}

#[cfg(all(test, feature = "cuda"))]
mod tests {
    use super::*;
    use crate::cpu::Sequential;
    use crate::factory;

    fn backend(edges: EdgePolicy) -> Option<CudaBackend> {
        match CudaBackend::new(edges) {
            Ok(b) => Some(b),
            Err(e) => {
                eprintln!("skipping CUDA test: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_cuda_seed_matches_host() {
        let Some(gpu) = backend(EdgePolicy::Torus) else { return };
        let dims = GridDimensions::new(288, 41).unwrap();
        let mut storage = gpu.allocate(&dims).unwrap();
        gpu.seed(&mut storage, &dims, 31337).unwrap();
        assert_eq!(
            gpu.download(&storage, &dims).unwrap(),
            factory::seed_random(dims, 31337).unwrap()
        );
    }

    #[test]
    fn test_cuda_matches_sequential() {
        for edges in [EdgePolicy::Torus, EdgePolicy::DeadBorder] {
            let Some(gpu) = backend(edges) else { return };
            let cpu = Sequential::new(edges);
            for (columns, height) in [(32, 1), (64, 3), (544, 70)] {
                let dims = GridDimensions::new(columns, height).unwrap();
                let mut host = factory::seed_random(dims, 8).unwrap();
                let mut host_next = Grid::zeroed(dims).unwrap();
                let mut a = gpu.allocate(&dims).unwrap();
                let mut b = gpu.allocate(&dims).unwrap();
                gpu.upload(&mut a, &host).unwrap();

                for _ in 0..8 {
                    cpu.step(&host, &mut host_next, &dims).unwrap();
                    std::mem::swap(&mut host, &mut host_next);
                    gpu.step(&a, &mut b, &dims).unwrap();
                    std::mem::swap(&mut a, &mut b);
                }
                assert_eq!(gpu.download(&a, &dims).unwrap(), host, "{} {:?}", dims, edges);
            }
        }
    }
}
