//! Metrics for tracking how a run evolves
//!
//! Population and density are exact. The Brotli compression ratio of the
//! packed words is a cheap order parameter: a fresh random soup does not
//! compress at all, while a grid that has settled into still lifes and
//! blinkers on an empty background compresses very well.

use crate::bitgrid::Grid;
use crate::config::MetricsSettings;
use log::info;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::time::Instant;

/// Compress at most this many leading bytes of the grid. Keeps collection
/// time bounded on multi-gigabyte grids.
const MAX_SAMPLE_BYTES: usize = 16 * 1024 * 1024;
/// Relative population change below which a sample counts as "flat".
const SETTLED_TOLERANCE: f64 = 0.001;
/// Consecutive flat samples before the run is reported as settled.
const SETTLED_SAMPLES: usize = 5;

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Interval (in generations) between collections
    pub interval: u64,
    /// CSV output file (None = log only)
    pub output_path: Option<String>,
    /// Brotli compression quality (1-11, lower = faster)
    pub brotli_quality: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 100,
            output_path: None,
            brotli_quality: 4,
        }
    }
}

impl From<&MetricsSettings> for MetricsConfig {
    fn from(s: &MetricsSettings) -> Self {
        Self {
            enabled: s.enabled,
            interval: s.interval.max(1),
            output_path: if s.output_path.is_empty() {
                None
            } else {
                Some(s.output_path.clone())
            },
            brotli_quality: s.brotli_quality.clamp(1, 11),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenerationMetrics {
    pub generation: u64,
    pub population: u64,
    /// population / total cells
    pub density: f64,
    pub compression_ratio: f64,
    pub compressed_size: usize,
    /// Bytes fed to the compressor (may be a prefix of the grid)
    pub sample_size: usize,
    /// Mean wall time of the generations since the last collection
    pub step_ms: f64,
    pub generations_per_sec: f64,
    pub computation_time_ms: f64,
}

impl GenerationMetrics {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{:.6},{:.4},{},{},{:.4},{:.2},{:.2}",
            self.generation,
            self.population,
            self.density,
            self.compression_ratio,
            self.compressed_size,
            self.sample_size,
            self.step_ms,
            self.generations_per_sec,
            self.computation_time_ms,
        )
    }

    pub fn csv_header() -> &'static str {
        "generation,population,density,compression_ratio,compressed_size,sample_size,step_ms,generations_per_sec,computation_time_ms"
    }
}

pub struct MetricsTracker {
    config: MetricsConfig,
    csv_writer: Option<BufWriter<File>>,
    history: Vec<GenerationMetrics>,
    flat_samples: usize,
    settled_generation: Option<u64>,
}

impl MetricsTracker {
    pub fn new(config: MetricsConfig) -> std::io::Result<Self> {
        let csv_writer = if let Some(ref path) = config.output_path {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "{}", GenerationMetrics::csv_header())?;
            Some(writer)
        } else {
            None
        };

        Ok(Self {
            config,
            csv_writer,
            history: Vec::new(),
            flat_samples: 0,
            settled_generation: None,
        })
    }

    pub fn should_collect(&self, generation: u64) -> bool {
        self.config.enabled && generation % self.config.interval == 0
    }

    pub fn collect(
        &mut self,
        generation: u64,
        grid: &Grid,
        step_ms: f64,
        generations_per_sec: f64,
    ) -> GenerationMetrics {
        let start = Instant::now();

        let population = grid.population();
        let total = grid.dims().total_cells;
        let density = population as f64 / total as f64;

        let bytes: &[u8] = bytemuck::cast_slice(grid.words());
        let sample = &bytes[..bytes.len().min(MAX_SAMPLE_BYTES)];
        let (compressed_size, compression_ratio) = compression_ratio(sample, self.config.brotli_quality);

        let metrics = GenerationMetrics {
            generation,
            population,
            density,
            compression_ratio,
            compressed_size,
            sample_size: sample.len(),
            step_ms,
            generations_per_sec,
            computation_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        self.track_settling(&metrics);

        if let Some(ref mut writer) = self.csv_writer {
            let _ = writeln!(writer, "{}", metrics.to_csv_row());
            let _ = writer.flush();
        }
        self.history.push(metrics.clone());
        metrics
    }

    /// Flags the first generation after which the population stayed flat
    /// for several consecutive samples.
    fn track_settling(&mut self, metrics: &GenerationMetrics) {
        if self.settled_generation.is_some() {
            return;
        }
        let Some(previous) = self.history.last() else {
            return;
        };
        let change = if previous.population == 0 {
            if metrics.population == 0 { 0.0 } else { 1.0 }
        } else {
            (metrics.population as f64 - previous.population as f64).abs() / previous.population as f64
        };

        if change < SETTLED_TOLERANCE {
            self.flat_samples += 1;
            if self.flat_samples >= SETTLED_SAMPLES {
                self.settled_generation = Some(metrics.generation);
                info!(
                    "population settled at generation {} ({} alive, density {:.4}, compression {:.2}x)",
                    metrics.generation, metrics.population, metrics.density, metrics.compression_ratio
                );
            }
        } else {
            self.flat_samples = 0;
        }
    }

    pub fn settled_generation(&self) -> Option<u64> {
        self.settled_generation
    }

    pub fn history(&self) -> &[GenerationMetrics] {
        &self.history
    }

    pub fn print_summary(&self) {
        let (Some(first), Some(last)) = (self.history.first(), self.history.last()) else {
            return;
        };

        println!();
        println!("+-------------------------------------------------------------+");
        println!("|                      METRICS SUMMARY                        |");
        println!("+-------------------------------------------------------------+");
        println!("|  Generations tracked:   {:>10} -> {:>10}              |", first.generation, last.generation);
        println!("|  Population:            {:>10} -> {:>10}              |", first.population, last.population);
        println!("|  Density:               {:>9.2}% -> {:>9.2}%              |", first.density * 100.0, last.density * 100.0);
        println!("|  Compression ratio:     {:>10.2} -> {:>10.2}              |", first.compression_ratio, last.compression_ratio);
        println!("|  Generations/sec:       {:>10.1} -> {:>10.1}              |", first.generations_per_sec, last.generations_per_sec);
        if let Some(generation) = self.settled_generation {
            println!("+-------------------------------------------------------------+");
            println!("|  Population settled at generation {:>10}                |", generation);
        }
        println!("+-------------------------------------------------------------+");

        if let Some(ref path) = self.config.output_path {
            println!("  Metrics saved to: {}", path);
        }
    }
}

/// Brotli ratio of `data`, as `(compressed_size, original / compressed)`.
pub fn compression_ratio(data: &[u8], quality: u32) -> (usize, f64) {
    use brotli::enc::BrotliEncoderParams;

    if data.is_empty() {
        return (0, 1.0);
    }

    let mut compressed = Vec::new();
    let mut params = BrotliEncoderParams::default();
    params.quality = quality as i32;

    match brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut compressed, &params) {
        Ok(_) if !compressed.is_empty() => (compressed.len(), data.len() as f64 / compressed.len() as f64),
        _ => (data.len(), 1.0),
    }
}
