// ============================================================================
// Drawly CLI - headless replay and export via command-line arguments
// ============================================================================
//
// Usage examples:
//   drawly -i sketch.json -o sketch.jpg                 (replay a document, export JPEG)
//   drawly -i sketch.json --smooth catmull_rom --stats
//   drawly -i photo.png --width 800 --height 600 -o placed.png
//   drawly -i "drawings/*.json" --output-dir out/ -q 90
//   drawly -i sketch.json --base64 > sketch.b64
//
// All processing runs synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::CanvasSize;
use crate::document::{deserialize_document, document_stats, export_minimal};
use crate::io::{ExportFormat, load_image_sync};
use crate::ops::smoothing::SmoothingMode;
use crate::project::{Project, ReplayOptions};
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Drawly headless renderer.
///
/// Replays drawing documents or places images on a canvas and exports the
/// flattened result.
#[derive(Parser, Debug)]
#[command(
    name = "drawly",
    about = "Drawly headless drawing replay and export",
    long_about = "Replay Drawly JSON documents (or place raster images on a blank canvas)\n\
                  and export the flattened drawing as JPEG or PNG.\n\n\
                  Example:\n  \
                  drawly --input sketch.json --output sketch.jpg\n  \
                  drawly -i \"drawings/*.json\" --output-dir out/ --smooth moving_average"
)]
pub struct CliArgs {
    /// Input file(s): `.json` drawing documents or raster images.
    /// Glob patterns accepted (e.g. "*.json").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    /// The format follows the extension (png, otherwise JPEG).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing (files are written as `<stem>.jpg`).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// JPEG quality (1–100). Defaults to the configured export quality.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// Print the base64 JPEG export to stdout instead of writing a file.
    #[arg(long)]
    pub base64: bool,

    /// Smoothing applied to replayed strokes:
    /// none, moving_average, catmull_rom, exponential, interpolate.
    #[arg(long, value_name = "MODE")]
    pub smooth: Option<String>,

    /// Douglas-Peucker tolerance applied to replayed strokes.
    #[arg(long, value_name = "TOL")]
    pub simplify: Option<f32>,

    /// Print document statistics as JSON.
    #[arg(long)]
    pub stats: bool,

    /// Write the document without its command history to FILE.
    #[arg(long, value_name = "FILE")]
    pub minimal: Option<PathBuf>,

    /// Canvas width for image inputs.
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height for image inputs.
    #[arg(long)]
    pub height: Option<u32>,

    /// Echo warnings to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options shared by every input of one run.
struct RunOptions<'a> {
    settings: &'a EngineSettings,
    replay: ReplayOptions,
    quality: u8,
    base64: bool,
    stats: bool,
    minimal: Option<&'a Path>,
    size: CanvasSize,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, settings: &EngineSettings) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && (args.output.is_some() || args.minimal.is_some()) && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output/--minimal only accept a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let smoothing = match args.smooth.as_deref() {
        Some(name) => match SmoothingMode::from_name(name) {
            Some(mode) => mode,
            None => {
                eprintln!("error: unknown smoothing mode '{}'.", name);
                return ExitCode::FAILURE;
            }
        },
        None => settings.replay_smoothing,
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let options = RunOptions {
        settings,
        replay: ReplayOptions { smoothing, simplify: args.simplify },
        quality: args.quality.unwrap_or(settings.export_quality).clamp(1, 100),
        base64: args.base64,
        stats: args.stats,
        minimal: args.minimal.as_deref(),
        size: CanvasSize::new(
            args.width.unwrap_or(settings.canvas_width).max(1),
            args.height.unwrap_or(settings.canvas_height).max(1),
        ),
    };

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if (multi || args.verbose) && !args.base64 {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let output_path =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref());
        match run_one(input_path, output_path.as_deref(), &options) {
            Ok(()) => {
                if (args.verbose || multi) && !args.base64
                    && let Some(out) = &output_path
                {
                    let ms = file_start.elapsed().as_secs_f64() * 1000.0;
                    println!("  → {} ({:.0}ms)", out.display(), ms);
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: Option<&Path>, options: &RunOptions) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let project = if is_document(input) {
        let json = std::fs::read_to_string(input).map_err(|e| format!("read failed: {}", e))?;
        let doc = deserialize_document(&json).map_err(|e| format!("load failed: {}", e))?;

        if options.stats {
            let stats = document_stats(&doc).map_err(|e| e.to_string())?;
            let text = serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?;
            println!("{}", text);
        }
        if let Some(path) = options.minimal {
            let minimal = export_minimal(&doc).map_err(|e| e.to_string())?;
            std::fs::write(path, minimal).map_err(|e| format!("minimal export failed: {}", e))?;
        }

        Project::from_document(&doc, options.settings, options.replay)
            .map_err(|e| format!("replay failed: {}", e))?
    } else {
        let image = load_image_sync(input).map_err(|e| format!("load failed: {}", e))?;
        let mut project = Project::with_size(options.size, options.settings);
        let name = input.file_stem().map(|s| s.to_string_lossy().into_owned());
        project.import_image(image, name.as_deref());
        if options.stats {
            let stats = document_stats(&project.to_document()).map_err(|e| e.to_string())?;
            let text = serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?;
            println!("{}", text);
        }
        project
    };

    // -- Step 2: Export --------------------------------------------------
    if options.base64 {
        let encoded =
            crate::io::export_base64(&project.canvas, options.quality).map_err(|e| e.to_string())?;
        println!("{}", encoded);
        return Ok(());
    }

    if let Some(out) = output {
        project.export_to_file(out, options.quality).map_err(|e| format!("save failed: {}", e))?;
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn is_document(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives `<stem>.jpg` from the input)
/// 3. Nothing: the input is only inspected (`--stats`, `--minimal`)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let dir = output_dir?;
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    Some(dir.join(format!("{}.{}", stem, ExportFormat::Jpeg.extension())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = CliArgs::try_parse_from([
            "drawly", "-i", "a.json", "b.json", "--output-dir", "out", "-q", "70", "--smooth", "catmull_rom",
            "--simplify", "1.5", "--stats",
        ])
        .unwrap();
        assert_eq!(args.input, vec!["a.json", "b.json"]);
        assert_eq!(args.quality, Some(70));
        assert_eq!(args.simplify, Some(1.5));
        assert!(args.stats && !args.base64);
        assert!(CliArgs::try_parse_from(["drawly"]).is_err());
    }

    #[test]
    fn output_path_priority() {
        let input = Path::new("in/sketch.json");
        assert_eq!(build_output_path(input, Some(Path::new("x.png")), Some(Path::new("d"))), Some(PathBuf::from("x.png")));
        assert_eq!(build_output_path(input, None, Some(Path::new("d"))), Some(PathBuf::from("d/sketch.jpg")));
        assert_eq!(build_output_path(input, None, None), None);
    }

    #[test]
    fn replays_a_document_to_png() {
        let dir = tempfile::tempdir().unwrap();
        let doc = crate::document::create_empty_document(CanvasSize::new(20, 10), None);
        let input = dir.path().join("blank.json");
        std::fs::write(&input, crate::document::serialize_document(&doc).unwrap()).unwrap();
        let output = dir.path().join("blank.png");

        let settings = EngineSettings { device_pixel_scale: 1.0, ..EngineSettings::default() };
        let args = CliArgs::try_parse_from([
            "drawly",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(run(args, &settings), ExitCode::SUCCESS);
        let img = load_image_sync(&output).unwrap();
        assert_eq!(img.dimensions(), (20, 10));
        assert_eq!(img.get_pixel(3, 3).0, [255, 255, 255, 255]);
    }

    #[test]
    fn missing_input_fails() {
        let args = CliArgs::try_parse_from(["drawly", "-i", "/definitely/not/here-*.json"]).unwrap();
        assert_eq!(run(args, &EngineSettings::default()), ExitCode::FAILURE);
    }
}
