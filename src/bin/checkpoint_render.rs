//! Offline renderer for checkpoint files
//!
//! Turns `checkpoint_gen_*.life` files into PNG or PBM frames, either one file or
//! every checkpoint in a directory.
//!
//! Usage (example):
//!   cargo run --release --bin checkpoint_render -- \
//!     --input checkpoints --out-dir checkpoint_frames
//!
//! Then turn frames into a video:
//!   ffmpeg -framerate 10 -pattern_type glob -i 'checkpoint_frames/*.png' -pix_fmt yuv420p run.mp4

use packed_life::checkpoint::Checkpoint;
use packed_life::frames::{self, FrameFormat};
use std::fs;
use std::path::{Path, PathBuf};

fn usage_and_exit(msg: Option<&str>) -> ! {
    if let Some(m) = msg {
        eprintln!("Error: {m}\n");
    }
    eprintln!("checkpoint_render (offline checkpoint visualizer)");
    eprintln!();
    eprintln!("REQUIRED:");
    eprintln!("  --input <PATH>        Checkpoint file, or a directory of checkpoint_gen_*.life");
    eprintln!("  --out-dir <DIR>       Output directory for gen_########.<format> frames");
    eprintln!();
    eprintln!("OPTIONAL:");
    eprintln!("  --format <FMT>        png or pbm (default: png)");
    eprintln!();
    std::process::exit(2);
}

fn parse_args() -> (String, String, FrameFormat) {
    let argv: Vec<String> = std::env::args().collect();
    let mut input: Option<String> = None;
    let mut out_dir: Option<String> = None;
    let mut format = FrameFormat::Png;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--input" => {
                i += 1;
                input = argv.get(i).cloned();
            }
            "--out-dir" => {
                i += 1;
                out_dir = argv.get(i).cloned();
            }
            "--format" => {
                i += 1;
                format = argv
                    .get(i)
                    .and_then(|s| s.parse::<FrameFormat>().ok())
                    .unwrap_or_else(|| usage_and_exit(Some("Invalid --format value")));
            }
            "--help" | "-h" => usage_and_exit(None),
            other => usage_and_exit(Some(&format!("Unknown argument: {other}"))),
        }
        i += 1;
    }

    let input = input.unwrap_or_else(|| usage_and_exit(Some("--input is required")));
    let out_dir = out_dir.unwrap_or_else(|| usage_and_exit(Some("--out-dir is required")));
    (input, out_dir, format)
}

/// Checkpoint files under `dir`, ordered by generation.
fn list_checkpoints(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
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
        .collect();
    found.sort_by_key(|(generation, _)| *generation);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

fn render(path: &Path, out_dir: &Path, format: FrameFormat) -> packed_life::Result<()> {
    let ck = Checkpoint::load(path)?;
    let generation = ck.header.generation;
    let grid = ck.into_grid()?;
    let out = frames::frame_filename(out_dir, generation, format);
    frames::save_frame(&grid, &out, format)?;

    let population = grid.population();
    println!(
        "  gen {:>10}  {}  population {:>12} ({:.2}%)  -> {}",
        generation,
        grid.dims(),
        population,
        population as f64 * 100.0 / grid.dims().total_cells as f64,
        out.display()
    );
    Ok(())
}

fn main() {
    let (input, out_dir, format) = parse_args();
    let input = Path::new(&input);
    let out_dir = Path::new(&out_dir);

    let files = if input.is_dir() {
        match list_checkpoints(input) {
            Ok(files) => files,
            Err(e) => usage_and_exit(Some(&format!("Cannot read {}: {e}", input.display()))),
        }
    } else {
        vec![input.to_path_buf()]
    };
    if files.is_empty() {
        usage_and_exit(Some("No checkpoint_gen_*.life files found in --input"));
    }

    println!("Rendering {} checkpoint(s) into {}", files.len(), out_dir.display());
    let mut failures = 0usize;
    for path in &files {
        if let Err(e) = render(path, out_dir, format) {
            eprintln!("  {}: {e}", path.display());
            failures += 1;
        }
    }

    if failures > 0 {
        eprintln!("{failures} checkpoint(s) failed to render");
        std::process::exit(1);
    }
    println!("Done.");
}
