use log::{info, warn};
use packed_life::checkpoint::{self, Checkpoint};
use packed_life::config::{Config, MetricsSettings};
use packed_life::cuda;
use packed_life::factory;
use packed_life::frames::{self, FrameFormat};
use packed_life::gpu;
use packed_life::metrics::{MetricsConfig, MetricsTracker};
use packed_life::{derive_dimensions, BackendKind, EdgePolicy, Grid, LifeError, Result, Simulation};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

/// Command-line arguments (internal, maps from Config)
struct Args {
    backend: BackendKind,
    cells: u64,
    large_cells: u64,
    large: bool,
    aspect_ratio: f64,
    seed: Option<u32>,
    generations: u64,
    edges: EdgePolicy,
    frame_interval: u64,
    frame_format: FrameFormat,
    frames_dir: String,
    checkpoint_enabled: bool,
    checkpoint_interval: u64,
    checkpoint_dir: String,
    resume_from: String,
    metrics: MetricsSettings,
}

impl Default for Args {
    fn default() -> Self {
        Args::from(Config::default())
    }
}

impl From<Config> for Args {
    fn from(c: Config) -> Self {
        Self {
            backend: c.backend,
            cells: c.grid.cells,
            large_cells: c.grid.large_cells,
            large: c.grid.large,
            aspect_ratio: c.grid.aspect_ratio,
            seed: c.simulation.seed,
            generations: c.simulation.generations,
            edges: c.simulation.edges,
            frame_interval: c.output.frame_interval,
            frame_format: c.output.frame_format,
            frames_dir: c.output.frames_dir,
            checkpoint_enabled: c.checkpoint.enabled,
            checkpoint_interval: c.checkpoint.interval,
            checkpoint_dir: c.checkpoint.path,
            resume_from: c.checkpoint.resume_from,
            metrics: c.metrics,
        }
    }
}

impl Args {
    fn requested_cells(&self) -> u64 {
        if self.large {
            self.large_cells
        } else {
            self.cells
        }
    }
}

/// Value following `argv[*i]`, parsed. Exits with usage on failure.
fn next_value<T: FromStr>(argv: &[String], i: &mut usize) -> T
where
    T::Err: std::fmt::Display,
{
    let flag = &argv[*i];
    *i += 1;
    let Some(raw) = argv.get(*i) else {
        eprintln!("Missing value for {}", flag);
        std::process::exit(1);
    };
    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Invalid value '{}' for {}: {}", raw, flag, e);
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let argv: Vec<String> = env::args().collect();

    // First pass: check for --config or --generate-config
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                let config_path: String = next_value(&argv, &mut i);
                match Config::from_yaml(&config_path) {
                    Ok(config) => {
                        println!("Loaded config from: {}", config_path);
                        match config.validate() {
                            Ok(warnings) => {
                                for warning in warnings {
                                    warn!("config: {}", warning);
                                }
                            }
                            Err(e) => {
                                eprintln!("Config validation error: {}", e);
                                std::process::exit(1);
                            }
                        }
                        args = Args::from(config);
                    }
                    Err(e) => {
                        eprintln!("Error loading config file '{}': {}", config_path, e);
                        std::process::exit(1);
                    }
                }
            }
            "--generate-config" => {
                let output_path = match argv.get(i + 1) {
                    Some(p) if !p.starts_with('-') => {
                        i += 1;
                        p.clone()
                    }
                    _ => "config.yaml".to_string(),
                };
                match Config::write_template(&output_path) {
                    Ok(()) => {
                        println!("Generated config template: {}", output_path);
                        std::process::exit(0);
                    }
                    Err(e) => {
                        eprintln!("Error writing config template: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    // Second pass: CLI args override config file values
    i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1; // skip, already processed
            }
            "--cells" | "-n" => args.cells = next_value(&argv, &mut i),
            "--aspect" | "-a" => args.aspect_ratio = next_value(&argv, &mut i),
            "--large" => args.large = true,
            "--seed" | "-s" => args.seed = Some(next_value(&argv, &mut i)),
            "--backend" | "-b" => args.backend = next_value(&argv, &mut i),
            "--edges" => args.edges = next_value(&argv, &mut i),
            "--generations" | "-g" => args.generations = next_value(&argv, &mut i),
            "--frame-interval" | "-f" => args.frame_interval = next_value(&argv, &mut i),
            "--frame-format" => args.frame_format = next_value(&argv, &mut i),
            "--frames-dir" | "-d" => args.frames_dir = next_value(&argv, &mut i),
            "--metrics" => args.metrics.enabled = true,
            "--metrics-interval" => {
                args.metrics.enabled = true;
                args.metrics.interval = next_value(&argv, &mut i);
            }
            "--metrics-out" => {
                args.metrics.enabled = true;
                args.metrics.output_path = next_value(&argv, &mut i);
            }
            "--checkpoint-interval" => {
                args.checkpoint_enabled = true;
                args.checkpoint_interval = next_value(&argv, &mut i);
            }
            "--checkpoint-dir" => {
                args.checkpoint_enabled = true;
                args.checkpoint_dir = next_value(&argv, &mut i);
            }
            "--resume" => args.resume_from = next_value(&argv, &mut i),
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn print_help() {
    println!("Packed Life - bit-packed Game of Life");
    println!();
    println!("USAGE:");
    println!("    packed-life [OPTIONS]");
    println!("    packed-life --config config.yaml");
    println!("    packed-life --generate-config [output.yaml]");
    println!();
    println!("CONFIG FILE:");
    println!("    -c, --config <FILE>        Load settings from YAML config file");
    println!("    --generate-config [FILE]   Generate template config (default: config.yaml)");
    println!();
    println!("GRID:");
    println!("    -n, --cells <N>            Requested cell count (default: 2000000)");
    println!("    -a, --aspect <RATIO>       Width / height (default: 1.778)");
    println!("    --large                    Use the large cell budget (GPU backends only)");
    println!("    -s, --seed <N>             Random seed (default: random)");
    println!("    --edges <POLICY>           torus or dead_border (default: torus)");
    println!();
    println!("RUN:");
    println!("    -b, --backend <NAME>       cpu, parallel, wgpu or cuda (default: parallel)");
    println!("    -g, --generations <N>      Generations to run (default: 10000)");
    println!();
    println!("OUTPUT:");
    println!("    -f, --frame-interval <N>   Save a frame every N generations (0 = off)");
    println!("    --frame-format <FMT>       png or pbm (default: png)");
    println!("    -d, --frames-dir <PATH>    Frames output directory (default: frames)");
    println!("    --metrics                  Collect population/compression metrics");
    println!("    --metrics-interval <N>     Collect metrics every N generations");
    println!("    --metrics-out <FILE>       Write metrics as CSV");
    println!("    --checkpoint-interval <N>  Save a checkpoint every N generations");
    println!("    --checkpoint-dir <PATH>    Checkpoint directory (default: checkpoints)");
    println!("    --resume <PATH>            Resume from a checkpoint file or directory");
    println!();
    println!("    -h, --help                 Print this help message");
    println!();
    println!("Log verbosity follows RUST_LOG (default: info).");
}

/// Backend to retry with once `kind` turned out to be unusable. Large grids
/// never fall back, since only GPU backends can hold them.
fn fallback_backend(kind: BackendKind, large: bool, reason: &str) -> Result<BackendKind> {
    if large {
        return Err(LifeError::BackendUnavailable(format!(
            "{} ({}); large grids need a GPU backend",
            kind, reason
        )));
    }
    if kind == BackendKind::Parallel {
        return Err(LifeError::BackendUnavailable(reason.to_string()));
    }
    Ok(BackendKind::Parallel)
}

/// Opens `kind`, falling back to the rayon backend when a GPU backend is
/// missing from the build or the machine.
fn open_simulation<F>(kind: BackendKind, large: bool, open: F) -> Result<Simulation>
where
    F: Fn(BackendKind) -> Result<Simulation>,
{
    let present = match kind {
        BackendKind::Wgpu => gpu::wgpu_available(),
        BackendKind::Cuda => cuda::cuda_available(),
        BackendKind::Sequential | BackendKind::Parallel => true,
    };
    if !present {
        let fallback = fallback_backend(kind, large, "not available")?;
        println!("  {} not available, falling back to {} CPU...\n", kind, fallback);
        return open(fallback);
    }

    match open(kind) {
        Err(LifeError::BackendUnavailable(reason)) => {
            let fallback = fallback_backend(kind, large, &reason)?;
            warn!("{} unavailable ({}), falling back to {}", kind, reason, fallback);
            open(fallback)
        }
        other => other,
    }
}

fn resolve_resume_path(resume_from: &str) -> Result<std::path::PathBuf> {
    let path = Path::new(resume_from);
    if path.is_dir() {
        checkpoint::find_latest_checkpoint(path).ok_or_else(|| {
            LifeError::Checkpoint(format!("no checkpoints found in {}", path.display()))
        })
    } else {
        Ok(path.to_path_buf())
    }
}

/// Runs `f` on a host view of the current generation, downloading it first
/// on GPU backends.
fn with_host_grid<R>(sim: &Simulation, f: impl FnOnce(&Grid) -> R) -> Result<R> {
    match sim.current_host() {
        Some(grid) => Ok(f(grid)),
        None => {
            let grid = sim.snapshot()?;
            Ok(f(&grid))
        }
    }
}

fn run(args: Args) -> Result<()> {
    let (mut sim, seed) = if args.resume_from.is_empty() {
        let seed = args.seed.unwrap_or_else(factory::random_seed);
        let dims = derive_dimensions(args.requested_cells(), args.aspect_ratio)?;
        let sim = open_simulation(args.backend, args.large, |kind| Simulation::new(kind, dims, seed, args.edges))?;
        (sim, seed)
    } else {
        let path = resolve_resume_path(&args.resume_from)?;
        let ck = Checkpoint::load(&path)?;
        println!(
            "Resuming from {} (generation {}, {}x{})",
            path.display(),
            ck.header.generation,
            ck.header.columns,
            ck.header.height
        );
        if ck.header.edges != args.edges {
            warn!(
                "checkpoint was written with {} edges, ignoring requested {}",
                ck.header.edges, args.edges
            );
        }
        let generation = ck.header.generation;
        let edges = ck.header.edges;
        let seed = ck.header.seed;
        let grid = ck.into_grid()?;
        let sim = open_simulation(args.backend, args.large, |kind| Simulation::from_grid(kind, &grid, generation, edges))?;
        (sim, seed)
    };

    let dims = *sim.dims();
    println!("Packed Life");
    println!("===========\n");
    println!("Configuration:");
    println!("  Grid: {}", dims);
    println!(
        "  Memory: 2 x {:.1} MiB",
        dims.byte_size() as f64 / (1024.0 * 1024.0)
    );
    println!("  Seed: {}", seed);
    println!("  Edges: {}", sim.edges());
    println!("  Backend: {}", sim.backend_label());
    if sim.backend_kind() == BackendKind::Parallel {
        println!("  Threads: {}", rayon::current_num_threads());
    }
    println!("  Generations: {}", args.generations);
    println!();

    let save_frames = args.frame_interval > 0;
    let save_checkpoints = args.checkpoint_enabled && args.checkpoint_interval > 0;

    let mut metrics = MetricsTracker::new(MetricsConfig::from(&args.metrics))?;

    if save_frames {
        let path = frames::frame_filename(&args.frames_dir, sim.generation(), args.frame_format);
        with_host_grid(&sim, |grid| frames::save_frame(grid, &path, args.frame_format))??;
    }

    let start_generation = sim.generation();
    let target = start_generation + args.generations;
    let run_start = Instant::now();
    let mut window_start = Instant::now();
    let mut window_generations = 0u64;
    let mut last_report = Instant::now();

    while sim.generation() < target {
        sim.advance()?;
        window_generations += 1;
        let generation = sim.generation();

        if save_frames && generation % args.frame_interval == 0 {
            let path = frames::frame_filename(&args.frames_dir, generation, args.frame_format);
            if let Err(e) = with_host_grid(&sim, |grid| frames::save_frame(grid, &path, args.frame_format))? {
                warn!("could not save frame {}: {}", generation, e);
            }
        }

        if metrics.should_collect(generation) {
            let elapsed = window_start.elapsed().as_secs_f64();
            let step_ms = elapsed * 1000.0 / window_generations as f64;
            let rate = window_generations as f64 / elapsed.max(1e-9);
            let m = with_host_grid(&sim, |grid| metrics.collect(generation, grid, step_ms, rate))?;
            info!(
                "gen {}: population {} (density {:.4}), compression {:.2}x, {:.1} gen/s",
                m.generation, m.population, m.density, m.compression_ratio, m.generations_per_sec
            );
            window_start = Instant::now();
            window_generations = 0;
        }

        if save_checkpoints && generation % args.checkpoint_interval == 0 {
            let ck = Checkpoint::new(sim.snapshot()?, generation, seed, sim.edges(), sim.backend_kind());
            let path = checkpoint::checkpoint_filename(&args.checkpoint_dir, generation);
            match ck.save(&path) {
                Ok(()) => println!("  Checkpoint saved: {}", path.display()),
                Err(e) => warn!("could not save checkpoint {}: {}", path.display(), e),
            }
        }

        if last_report.elapsed().as_secs_f64() >= 2.0 {
            let done = generation - start_generation;
            let rate = done as f64 / run_start.elapsed().as_secs_f64();
            println!(
                "  Generation {:>10} / {} | {:>9.1} gen/s | {:.3e} cells/s",
                generation,
                target,
                rate,
                rate * dims.total_cells as f64
            );
            last_report = Instant::now();
        }
    }

    let elapsed = run_start.elapsed().as_secs_f64();
    let done = sim.generation() - start_generation;
    let rate = done as f64 / elapsed.max(1e-9);
    let population = with_host_grid(&sim, |grid| grid.population())?;

    println!("\nSimulation complete!");
    println!("  Generations: {} in {:.2}s", done, elapsed);
    println!("  Throughput: {:.1} gen/s, {:.3e} cells/s", rate, rate * dims.total_cells as f64);
    println!("  Final population: {}", population);
    metrics.print_summary();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    if args.large && !args.backend.is_gpu() {
        eprintln!(
            "--large needs a GPU backend (wgpu or cuda), not {}",
            args.backend
        );
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_gpu_falls_back_to_parallel() {
        for kind in [BackendKind::Wgpu, BackendKind::Cuda, BackendKind::Sequential] {
            assert_eq!(
                fallback_backend(kind, false, "no adapter").unwrap(),
                BackendKind::Parallel
            );
        }
    }

    #[test]
    fn test_large_grid_never_falls_back() {
        for kind in [BackendKind::Wgpu, BackendKind::Cuda] {
            assert!(matches!(
                fallback_backend(kind, true, "no adapter"),
                Err(LifeError::BackendUnavailable(_))
            ));
        }
    }

    #[test]
    fn test_parallel_has_no_fallback() {
        assert!(matches!(
            fallback_backend(BackendKind::Parallel, false, "thread pool"),
            Err(LifeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_large_grid_on_missing_gpu_is_refused() {
        let opened = std::cell::RefCell::new(Vec::new());
        let result = open_simulation(BackendKind::Wgpu, true, |kind| {
            opened.borrow_mut().push(kind);
            Err(LifeError::BackendUnavailable("no adapter".to_string()))
        });
        assert!(matches!(result, Err(LifeError::BackendUnavailable(_))));
        assert!(!opened.borrow().contains(&BackendKind::Parallel));
    }

    #[test]
    fn test_metrics_settings_from_config() {
        let mut config = Config::default();
        config.metrics.enabled = true;
        config.metrics.interval = 0;
        config.metrics.output_path = "run.csv".to_string();
        let args = Args::from(config);
        let tracker = MetricsConfig::from(&args.metrics);
        assert!(tracker.enabled);
        assert_eq!(tracker.interval, 1);
        assert_eq!(tracker.output_path.as_deref(), Some("run.csv"));
    }
}
