//! wgpu compute backend
//!
//! Generations live in device storage buffers and never leave the GPU
//! unless someone asks for a host copy. Seeding also runs on the device,
//! using the same counter hash as `factory::seed_word`, so grids far larger
//! than a comfortable host allocation can be started in place.

#[cfg(feature = "wgpu-compute")]
pub mod wgpu_life {
    use crate::backend::Backend;
    use crate::bitgrid::{EdgePolicy, Grid, GridDimensions};
    use crate::error::{LifeError, Result};
    use bytemuck::{Pod, Zeroable};
    use log::{debug, info};
    use std::borrow::Cow;

    /// Step shader. One invocation per output word; both dimensions use a
    /// grid-stride loop so the dispatch never exceeds the per-dimension
    /// workgroup limit.
    const STEP_SHADER: &str = r#"
struct Params {
    width_in_words: u32,
    height: u32,
    wrap: u32,
    seed: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> cells_in: array<u32>;
@group(0) @binding(2) var<storage, read_write> cells_out: array<u32>;

fn bit(word: u32, pos: u32) -> u32 {
    return (word >> pos) & 1u;
}

fn next_state(alive: u32, n: u32) -> bool {
    return (alive == 1u && n == 2u) || n == 3u;
}

fn fetch(row: u32, col: u32, present: bool) -> u32 {
    if (!present) {
        return 0u;
    }
    return cells_in[row * params.width_in_words + col];
}

fn evolve(row: u32, col: u32) -> u32 {
    let w = params.width_in_words;
    let h = params.height;
    let torus = params.wrap == 1u;

    let has_up = torus || row > 0u;
    let has_down = torus || row + 1u < h;
    let has_west = torus || col > 0u;
    let has_east = torus || col + 1u < w;

    let up = select(row - 1u, h - 1u, row == 0u);
    let down = select(row + 1u, 0u, row + 1u == h);
    let west = select(col - 1u, w - 1u, col == 0u);
    let east = select(col + 1u, 0u, col + 1u == w);

    let above_left = fetch(up, west, has_up && has_west);
    let above = fetch(up, col, has_up);
    let above_right = fetch(up, east, has_up && has_east);
    let left = fetch(row, west, has_west);
    let center = fetch(row, col, true);
    let right = fetch(row, east, has_east);
    let below_left = fetch(down, west, has_down && has_west);
    let below = fetch(down, col, has_down);
    let below_right = fetch(down, east, has_down && has_east);

    var output = 0u;

    var n = bit(above_left, 31u) + bit(above, 0u) + bit(above, 1u)
          + bit(left, 31u) + bit(center, 1u)
          + bit(below_left, 31u) + bit(below, 0u) + bit(below, 1u);
    if (next_state(bit(center, 0u), n)) {
        output = output | 1u;
    }

    for (var p = 1u; p < 31u; p = p + 1u) {
        n = bit(above, p - 1u) + bit(above, p) + bit(above, p + 1u)
          + bit(center, p - 1u) + bit(center, p + 1u)
          + bit(below, p - 1u) + bit(below, p) + bit(below, p + 1u);
        if (next_state(bit(center, p), n)) {
            output = output | (1u << p);
        }
    }

    n = bit(above, 30u) + bit(above, 31u) + bit(above_right, 0u)
      + bit(center, 30u) + bit(right, 0u)
      + bit(below, 30u) + bit(below, 31u) + bit(below_right, 0u);
    if (next_state(bit(center, 31u), n)) {
        output = output | (1u << 31u);
    }

    return output;
}

@compute @workgroup_size(8, 8, 1)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let col_stride = groups.x * 8u;
    let row_stride = groups.y * 8u;
    for (var row = gid.y; row < params.height; row = row + row_stride) {
        for (var col = gid.x; col < params.width_in_words; col = col + col_stride) {
            cells_out[row * params.width_in_words + col] = evolve(row, col);
        }
    }
}
"#;

    /// Seed shader. Must stay in sync with `factory::seed_word`.
    const SEED_SHADER: &str = r#"
struct Params {
    width_in_words: u32,
    height: u32,
    wrap: u32,
    seed: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read_write> cells_out: array<u32>;

fn mix32(value: u32) -> u32 {
    var x = value;
    x = x ^ (x >> 16u);
    x = x * 0x7feb352du;
    x = x ^ (x >> 15u);
    x = x * 0x846ca68bu;
    x = x ^ (x >> 16u);
    return x;
}

@compute @workgroup_size(256, 1, 1)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let index = gid.y * groups.x * 256u + gid.x;
    if (index >= params.width_in_words * params.height) {
        return;
    }
    cells_out[index] = mix32((index * 0x9e3779b9u) ^ mix32(params.seed));
}
"#;

    const STEP_WORKGROUP: u32 = 8;
    const SEED_WORKGROUP: u32 = 256;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    struct Params {
        width_in_words: u32,
        height: u32,
        wrap: u32,
        seed: u32,
    }

    impl Params {
        fn new(dims: &GridDimensions, edges: EdgePolicy, seed: u32) -> Self {
            Self {
                width_in_words: dims.width_in_words as u32,
                height: dims.height as u32,
                wrap: edges.gpu_flag(),
                seed,
            }
        }
    }

    pub struct WgpuBackend {
        device: wgpu::Device,
        queue: wgpu::Queue,
        step_pipeline: wgpu::ComputePipeline,
        step_layout: wgpu::BindGroupLayout,
        seed_pipeline: wgpu::ComputePipeline,
        seed_layout: wgpu::BindGroupLayout,
        params_buffer: wgpu::Buffer,
        limits: wgpu::Limits,
        adapter_name: String,
        edges: EdgePolicy,
    }

    fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    impl WgpuBackend {
        pub fn new(edges: EdgePolicy) -> Result<Self> {
            pollster::block_on(Self::new_async(edges))
        }

        async fn new_async(edges: EdgePolicy) -> Result<Self> {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::PRIMARY,
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| LifeError::BackendUnavailable("no wgpu adapter found".to_string()))?;

            let adapter_name = adapter.get_info().name;
            // Ask for everything the adapter offers; large grids need the
            // biggest storage bindings available.
            let limits = adapter.limits();
            info!(
                "GPU adapter: {} (max storage binding {:.1} MiB)",
                adapter_name,
                limits.max_storage_buffer_binding_size as f64 / (1024.0 * 1024.0)
            );

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("Life Device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: limits.clone(),
                    },
                    None,
                )
                .await
                .map_err(|e| LifeError::BackendUnavailable(format!("request_device: {}", e)))?;

            let step_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Life Step Shader"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(STEP_SHADER)),
            });
            let seed_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Life Seed Shader"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SEED_SHADER)),
            });

            let step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Life Step Bind Group Layout"),
                entries: &[
                    buffer_entry(0, wgpu::BufferBindingType::Uniform),
                    buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                    buffer_entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
                ],
            });
            let seed_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Life Seed Bind Group Layout"),
                entries: &[
                    buffer_entry(0, wgpu::BufferBindingType::Uniform),
                    buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: false }),
                ],
            });

            let step_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Life Step Pipeline Layout"),
                bind_group_layouts: &[&step_layout],
                push_constant_ranges: &[],
            });
            let seed_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Life Seed Pipeline Layout"),
                bind_group_layouts: &[&seed_layout],
                push_constant_ranges: &[],
            });

            let step_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Life Step Pipeline"),
                layout: Some(&step_pipeline_layout),
                module: &step_shader,
                entry_point: "main",
                compilation_options: Default::default(),
            });
            let seed_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Life Seed Pipeline"),
                layout: Some(&seed_pipeline_layout),
                module: &seed_shader,
                entry_point: "main",
                compilation_options: Default::default(),
            });

            let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Life Params"),
                size: std::mem::size_of::<Params>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            Ok(Self {
                device,
                queue,
                step_pipeline,
                step_layout,
                seed_pipeline,
                seed_layout,
                params_buffer,
                limits,
                adapter_name,
                edges,
            })
        }

        pub fn adapter_name(&self) -> &str {
            &self.adapter_name
        }

        /// Largest grid buffer this device can bind, in bytes.
        pub fn max_grid_bytes(&self) -> u64 {
            (self.limits.max_storage_buffer_binding_size as u64).min(self.limits.max_buffer_size)
        }

        fn write_params(&self, dims: &GridDimensions, seed: u32) {
            let params = Params::new(dims, self.edges, seed);
            self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        }

        /// Submits `encoder`, waits for completion, and turns any validation
        /// or out-of-memory error raised meanwhile into a `Device` error.
        fn submit_and_wait(&self, encoder: wgpu::CommandEncoder, what: &str) -> Result<()> {
            self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            self.queue.submit(Some(encoder.finish()));
            self.device.poll(wgpu::Maintain::Wait);
            let validation = pollster::block_on(self.device.pop_error_scope());
            let oom = pollster::block_on(self.device.pop_error_scope());
            match validation.or(oom) {
                Some(e) => Err(LifeError::Device(format!("{}: {}", what, e))),
                None => Ok(()),
            }
        }

        /// Workgroup counts for `groups` total, split across x and y so
        /// neither exceeds the per-dimension limit.
        fn split_groups(&self, groups: u32) -> (u32, u32) {
            let max = self.limits.max_compute_workgroups_per_dimension.max(1);
            if groups <= max {
                (groups.max(1), 1)
            } else {
                (max, groups.div_ceil(max))
            }
        }
    }

    impl Backend for WgpuBackend {
        type Storage = wgpu::Buffer;

        fn label(&self) -> &'static str {
            "GPU (wgpu)"
        }

        fn edges(&self) -> EdgePolicy {
            self.edges
        }

        fn allocate(&self, dims: &GridDimensions) -> Result<wgpu::Buffer> {
            let bytes = dims.byte_size();
            if bytes > self.max_grid_bytes() {
                return Err(LifeError::AllocationFailure {
                    what: "wgpu grid buffer (exceeds device binding limit)",
                    bytes,
                });
            }

            self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Life Cells"),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            if pollster::block_on(self.device.pop_error_scope()).is_some() {
                return Err(LifeError::AllocationFailure {
                    what: "wgpu grid buffer",
                    bytes,
                });
            }
            debug!("allocated {} byte cell buffer on {}", bytes, self.adapter_name);
            Ok(buffer)
        }

        fn upload(&self, storage: &mut wgpu::Buffer, grid: &Grid) -> Result<()> {
            if grid.dims().byte_size() != storage.size() {
                return Err(LifeError::InvalidDimensions(format!(
                    "uploaded grid {} does not match a {} byte buffer",
                    grid.dims(),
                    storage.size()
                )));
            }
            self.queue.write_buffer(storage, 0, bytemuck::cast_slice(grid.words()));
            let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Life Upload"),
            });
            self.submit_and_wait(encoder, "upload")
        }

        fn seed(&self, storage: &mut wgpu::Buffer, dims: &GridDimensions, seed: u32) -> Result<()> {
            self.write_params(dims, seed);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Life Seed Bind Group"),
                layout: &self.seed_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: storage.as_entire_binding(),
                    },
                ],
            });

            let groups = (dims.word_count() as u64).div_ceil(SEED_WORKGROUP as u64) as u32;
            let (gx, gy) = self.split_groups(groups);

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Life Seed"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Life Seed Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.seed_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(gx, gy, 1);
            }
            self.submit_and_wait(encoder, "seed")
        }

        fn step(
            &self,
            input: &wgpu::Buffer,
            output: &mut wgpu::Buffer,
            dims: &GridDimensions,
        ) -> Result<()> {
            self.write_params(dims, 0);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Life Step Bind Group"),
                layout: &self.step_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: input.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: output.as_entire_binding(),
                    },
                ],
            });

            let max = self.limits.max_compute_workgroups_per_dimension.max(1);
            let gx = (dims.width_in_words as u32).div_ceil(STEP_WORKGROUP).clamp(1, max);
            let gy = (dims.height as u32).div_ceil(STEP_WORKGROUP).clamp(1, max);

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Life Step"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Life Step Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.step_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(gx, gy, 1);
            }
            self.submit_and_wait(encoder, "step")
        }

        fn download(&self, storage: &wgpu::Buffer, dims: &GridDimensions) -> Result<Grid> {
            let size = dims.byte_size();
            self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Life Staging"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            if pollster::block_on(self.device.pop_error_scope()).is_some() {
                return Err(LifeError::AllocationFailure {
                    what: "wgpu staging buffer",
                    bytes: size,
                });
            }

            let mut encoder = self.device.create_command_encoder(&Default::default());
            encoder.copy_buffer_to_buffer(storage, 0, &staging, 0, size);
            self.queue.submit(Some(encoder.finish()));

            let slice = staging.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            self.device.poll(wgpu::Maintain::Wait);
            rx.recv()
                .map_err(|_| LifeError::Device("readback channel closed".to_string()))?
                .map_err(|e| LifeError::Device(format!("readback map failed: {}", e)))?;

            let data = slice.get_mapped_range();
            let words: Vec<u32> = bytemuck::cast_slice::<u8, u32>(&data).to_vec();
            drop(data);
            staging.unmap();
            Grid::from_words(*dims, words)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::cpu::Sequential;
        use crate::factory;

        fn backend(edges: EdgePolicy) -> Option<WgpuBackend> {
            match WgpuBackend::new(edges) {
                Ok(b) => Some(b),
                Err(e) => {
                    eprintln!("skipping wgpu test: {}", e);
                    None
                }
            }
        }

        #[test]
        fn test_wgpu_seed_matches_host() {
            let Some(gpu) = backend(EdgePolicy::Torus) else { return };
            let dims = GridDimensions::new(320, 77).unwrap();
            let mut storage = gpu.allocate(&dims).unwrap();
            gpu.seed(&mut storage, &dims, 4242).unwrap();
            let downloaded = gpu.download(&storage, &dims).unwrap();
            assert_eq!(downloaded, factory::seed_random(dims, 4242).unwrap());
        }

        #[test]
        fn test_wgpu_matches_sequential() {
            for edges in [EdgePolicy::Torus, EdgePolicy::DeadBorder] {
                let Some(gpu) = backend(edges) else { return };
                let cpu = Sequential::new(edges);
                for (columns, height) in [(32, 1), (32, 5), (96, 9), (640, 130)] {
                    let dims = GridDimensions::new(columns, height).unwrap();
                    let mut host = factory::seed_random(dims, columns as u32).unwrap();
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

        #[test]
        fn test_wgpu_rejects_oversized_grid() {
            let Some(gpu) = backend(EdgePolicy::Torus) else { return };
            let words = gpu.max_grid_bytes() / 4 + 32;
            let height = (words / 32).min(u32::MAX as u64 / 32) as usize;
            let Ok(dims) = GridDimensions::new(32 * 32, height) else { return };
            if dims.byte_size() <= gpu.max_grid_bytes() {
                return;
            }
            assert!(matches!(
                gpu.allocate(&dims),
                Err(LifeError::AllocationFailure { .. })
            ));
        }
    }
}

#[cfg(feature = "wgpu-compute")]
pub fn wgpu_available() -> bool {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .is_some()
    })
}

#[cfg(not(feature = "wgpu-compute"))]
pub fn wgpu_available() -> bool {
    false
}
