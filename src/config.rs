//! Run configuration (can be loaded from YAML)

use crate::backend::BackendKind;
use crate::bitgrid::EdgePolicy;
use crate::error::{LifeError, Result};
use crate::frames::FrameFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Compute backend: "cpu", "parallel", "wgpu" or "cuda"
    pub backend: BackendKind,
    pub grid: GridConfig,
    pub simulation: SimConfig,
    pub output: OutputConfig,
    pub checkpoint: CheckpointConfig,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Cell budget for a normal run. The derived grid is slightly larger.
    pub cells: u64,
    /// Cell budget used when `large` is set. Only GPU backends can hold it.
    pub large_cells: u64,
    pub large: bool,
    /// Width / height of the grid, usually the display's aspect ratio.
    pub aspect_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed seed; a random one is drawn when absent.
    pub seed: Option<u32>,
    pub generations: u64,
    pub edges: EdgePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Save a frame every N generations (0 = never)
    pub frame_interval: u64,
    /// "png" or "pbm"
    pub frame_format: FrameFormat,
    pub frames_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// Save every N generations
    pub interval: u64,
    pub path: String,
    /// Checkpoint file (or directory, newest file wins) to resume from
    pub resume_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Collect metrics every N generations
    pub interval: u64,
    /// CSV output file (empty = log only)
    pub output_path: String,
    /// Brotli quality (1-11, lower = faster)
    pub brotli_quality: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cells: 2_000_000,
            large_cells: 4_000_000_000,
            large: false,
            aspect_ratio: 16.0 / 9.0,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            generations: 10_000,
            edges: EdgePolicy::Torus,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_interval: 0,
            frame_format: FrameFormat::Png,
            frames_dir: "frames".to_string(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 10_000,
            path: "checkpoints".to_string(),
            resume_from: String::new(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 100,
            output_path: String::new(),
            brotli_quality: 4,
        }
    }
}

impl Config {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Writes the default configuration as a starting point.
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<()> {
        Config::default().to_yaml(path)
    }

    /// The cell budget that applies to this run.
    pub fn requested_cells(&self) -> u64 {
        if self.grid.large {
            self.grid.large_cells
        } else {
            self.grid.cells
        }
    }

    /// Checks the configuration. Fatal problems are errors, everything
    /// else comes back as warnings.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.requested_cells() == 0 {
            return Err(LifeError::Config("cell budget must be greater than 0".to_string()));
        }
        if !self.grid.aspect_ratio.is_finite() || self.grid.aspect_ratio <= 0.0 {
            return Err(LifeError::Config(format!(
                "aspect_ratio must be a positive number, got {}",
                self.grid.aspect_ratio
            )));
        }
        if self.grid.large && !self.backend.is_gpu() {
            return Err(LifeError::Config(format!(
                "large grids ({} cells) need a GPU backend, not {}",
                self.grid.large_cells, self.backend
            )));
        }
        if !self.backend.compiled_in() {
            warnings.push(format!(
                "backend {} is not compiled into this build, will fall back to parallel",
                self.backend
            ));
        }

        if self.checkpoint.enabled && self.checkpoint.interval == 0 {
            return Err(LifeError::Config("checkpoint.interval must be greater than 0".to_string()));
        }
        if self.metrics.enabled && self.metrics.interval == 0 {
            return Err(LifeError::Config("metrics.interval must be greater than 0".to_string()));
        }
        if !(1..=11).contains(&self.metrics.brotli_quality) {
            warnings.push(format!(
                "brotli_quality {} is outside 1-11 and will be clamped",
                self.metrics.brotli_quality
            ));
        }

        if self.output.frame_interval > self.simulation.generations {
            warnings.push(format!(
                "frame_interval {} is greater than generations {}, no frames will be saved",
                self.output.frame_interval, self.simulation.generations
            ));
        }
        if self.output.frame_interval > 0 && self.requested_cells() > 64_000_000 {
            warnings.push(format!(
                "frames of a {} cell grid are large; consider a longer frame_interval",
                self.requested_cells()
            ));
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert_eq!(config.backend, BackendKind::Parallel);
        assert_eq!(config.requested_cells(), 2_000_000);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "
backend: cpu
grid:
  cells: 50000
simulation:
  seed: 7
  edges: dead_border
output:
  frame_format: pbm
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend, BackendKind::Sequential);
        assert_eq!(config.grid.cells, 50_000);
        assert!((config.grid.aspect_ratio - 16.0 / 9.0).abs() < 1e-12);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.edges, EdgePolicy::DeadBorder);
        assert_eq!(config.simulation.generations, 10_000);
        assert_eq!(config.output.frame_format, FrameFormat::Pbm);
        assert_eq!(config.output.frames_dir, "frames");
        assert!(!config.checkpoint.enabled);
    }

    #[test]
    fn test_large_requires_gpu() {
        let mut config = Config::default();
        config.grid.large = true;
        assert_eq!(config.requested_cells(), 4_000_000_000);
        assert!(matches!(config.validate(), Err(LifeError::Config(_))));

        config.backend = BackendKind::Wgpu;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.grid.aspect_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.grid.cells = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metrics.enabled = true;
        config.metrics.interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = Config::default();
        config.output.frame_interval = 20_000;
        config.metrics.brotli_quality = 15;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 2, "{:?}", warnings);
    }

    #[test]
    fn test_template_round_trip() {
        let path = std::env::temp_dir().join("packed_life_config_template.yaml");
        Config::write_template(&path).unwrap();
        let loaded = Config::from_yaml(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let defaults = Config::default();
        assert_eq!(loaded.backend, defaults.backend);
        assert_eq!(loaded.grid.cells, defaults.grid.cells);
        assert_eq!(loaded.simulation.seed, None);
        assert_eq!(loaded.checkpoint.path, defaults.checkpoint.path);
    }
}
