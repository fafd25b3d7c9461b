//! Checkpoints for saving and restoring a running grid
//!
//! File layout: magic bytes, `u32` header length, YAML header (readable with
//! `head -c`), `u64` word count, then the packed words little-endian.

use crate::backend::BackendKind;
use crate::bitgrid::{alloc_words, EdgePolicy, Grid, GridDimensions};
use crate::error::{LifeError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 6] = b"LIFECK";
const VERSION: u32 = 1;
/// Headers are a handful of lines; anything bigger is a corrupt file.
const MAX_HEADER_LEN: usize = 64 * 1024;
/// Words converted per write call.
const WRITE_CHUNK_WORDS: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    pub version: u32,
    pub generation: u64,
    pub columns: usize,
    pub height: usize,
    /// Seed the run started from (for info)
    pub seed: u32,
    pub edges: EdgePolicy,
    /// Backend that wrote the checkpoint (for info; any backend can resume)
    pub backend: BackendKind,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub header: CheckpointHeader,
    pub words: Vec<u32>,
}

impl Checkpoint {
    pub fn new(grid: Grid, generation: u64, seed: u32, edges: EdgePolicy, backend: BackendKind) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let dims = *grid.dims();
        Self {
            header: CheckpointHeader {
                version: VERSION,
                generation,
                columns: dims.columns,
                height: dims.height,
                seed,
                edges,
                backend,
                timestamp,
            },
            words: grid.into_words(),
        }
    }

    pub fn dims(&self) -> Result<GridDimensions> {
        GridDimensions::new(self.header.columns, self.header.height)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;

        let header_yaml = serde_yaml::to_string(&self.header)?;
        writer.write_all(&(header_yaml.len() as u32).to_le_bytes())?;
        writer.write_all(header_yaml.as_bytes())?;

        writer.write_all(&(self.words.len() as u64).to_le_bytes())?;
        let mut bytes = Vec::with_capacity(WRITE_CHUNK_WORDS.min(self.words.len()) * 4);
        for chunk in self.words.chunks(WRITE_CHUNK_WORDS) {
            bytes.clear();
            bytes.extend(chunk.iter().flat_map(|w| w.to_le_bytes()));
            writer.write_all(&bytes)?;
        }
        writer.flush()?;

        debug!(
            "wrote checkpoint {} (generation {}, {} words)",
            path.display(),
            self.header.generation,
            self.words.len()
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(LifeError::Checkpoint(format!(
                "{}: bad magic bytes",
                path.display()
            )));
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if header_len > MAX_HEADER_LEN {
            return Err(LifeError::Checkpoint(format!(
                "{}: header length {} is implausible",
                path.display(),
                header_len
            )));
        }
        let mut header_yaml = vec![0u8; header_len];
        reader.read_exact(&mut header_yaml)?;
        let header: CheckpointHeader = serde_yaml::from_slice(&header_yaml)?;
        if header.version != VERSION {
            return Err(LifeError::Checkpoint(format!(
                "{}: unsupported version {}",
                path.display(),
                header.version
            )));
        }

        let dims = GridDimensions::new(header.columns, header.height)?;
        let mut count_bytes = [0u8; 8];
        reader.read_exact(&mut count_bytes)?;
        let count = u64::from_le_bytes(count_bytes);
        if count != dims.word_count() as u64 {
            return Err(LifeError::Checkpoint(format!(
                "{}: {} words stored, {} needs {}",
                path.display(),
                count,
                dims,
                dims.word_count()
            )));
        }

        let mut words = alloc_words(dims.word_count(), "checkpoint grid")?;
        reader.read_exact(bytemuck::cast_slice_mut(words.as_mut_slice()))?;
        for word in words.iter_mut() {
            *word = u32::from_le(*word);
        }

        debug!(
            "loaded checkpoint {} (generation {}, {})",
            path.display(),
            header.generation,
            dims
        );
        Ok(Self { header, words })
    }

    /// Checks the checkpoint against the grid a run expects.
    pub fn validate(&self, dims: &GridDimensions) -> Result<()> {
        if self.header.columns != dims.columns || self.header.height != dims.height {
            return Err(LifeError::Checkpoint(format!(
                "grid mismatch: checkpoint={}x{}, config={}x{}",
                self.header.columns, self.header.height, dims.columns, dims.height
            )));
        }
        if self.words.len() != dims.word_count() {
            return Err(LifeError::Checkpoint(format!(
                "word count mismatch: got={}, expected={}",
                self.words.len(),
                dims.word_count()
            )));
        }
        Ok(())
    }

    pub fn into_grid(self) -> Result<Grid> {
        let dims = self.dims()?;
        Grid::from_words(dims, self.words)
    }
}

/// Checkpoint filename for a generation
pub fn checkpoint_filename<P: AsRef<Path>>(base_dir: P, generation: u64) -> PathBuf {
    base_dir
        .as_ref()
        .join(format!("checkpoint_gen_{}.life", generation))
}

/// Latest checkpoint in a directory by generation number
pub fn find_latest_checkpoint<P: AsRef<Path>>(base_dir: P) -> Option<PathBuf> {
    let entries = fs::read_dir(base_dir.as_ref()).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let generation = name
                .to_str()?
                .strip_prefix("checkpoint_gen_")?
                .strip_suffix(".life")?
                .parse::<u64>()
                .ok()?;
            Some((generation, entry.path()))
        })
        .max_by_key(|(generation, _)| *generation)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("packed_life_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dims = GridDimensions::new(160, 21).unwrap();
        let grid = factory::seed_random(dims, 42).unwrap();
        let checkpoint = Checkpoint::new(grid.clone(), 1000, 42, EdgePolicy::DeadBorder, BackendKind::Wgpu);

        let dir = scratch_dir("round_trip");
        let path = checkpoint_filename(&dir, 1000);
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.header, checkpoint.header);
        loaded.validate(&dims).unwrap();
        assert_eq!(loaded.into_grid().unwrap(), grid);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validate_rejects_other_dims() {
        let dims = GridDimensions::new(64, 4).unwrap();
        let checkpoint = Checkpoint::new(
            Grid::zeroed(dims).unwrap(),
            0,
            1,
            EdgePolicy::Torus,
            BackendKind::Parallel,
        );
        let other = GridDimensions::new(64, 6).unwrap();
        assert!(matches!(checkpoint.validate(&other), Err(LifeError::Checkpoint(_))));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = scratch_dir("garbage");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.life");
        fs::write(&path, b"NOTLIFE and some bytes").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(LifeError::Checkpoint(_))));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_rejects_truncated_words() {
        let dims = GridDimensions::new(64, 8).unwrap();
        let checkpoint = Checkpoint::new(
            factory::seed_random(dims, 3).unwrap(),
            7,
            3,
            EdgePolicy::Torus,
            BackendKind::Sequential,
        );
        let dir = scratch_dir("truncated");
        let path = checkpoint_filename(&dir, 7);
        checkpoint.save(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(LifeError::Io(_))));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_find_latest_checkpoint() {
        let dir = scratch_dir("latest");
        assert!(find_latest_checkpoint(&dir).is_none());

        fs::create_dir_all(&dir).unwrap();
        for generation in [100u64, 2500, 900] {
            fs::write(checkpoint_filename(&dir, generation), b"").unwrap();
        }
        fs::write(dir.join("checkpoint_gen_notanumber.life"), b"").unwrap();
        fs::write(dir.join("unrelated.txt"), b"").unwrap();

        assert_eq!(find_latest_checkpoint(&dir), Some(checkpoint_filename(&dir, 2500)));
        let _ = fs::remove_dir_all(&dir);
    }
}
