// ============================================================================
// paintfe-preview CLI: headless batch runs through the live-preview engine
// ============================================================================
//
// Usage examples:
//   paintfe-preview -i photo.png --effect invert -o inverted.png
//   paintfe-preview -i *.jpg --effect box-blur --param radius=4 --output-dir out/
//   paintfe-preview -i scan.png --effect posterize --param levels=3 --select 10,10,200,120
//   paintfe-preview -i a.png b.png --effect sepia --threads 2 --tile 32x32 --verbose
//
// Every file goes through a real preview session: start, apply, wait for the
// session to end, then save the active layer.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use image::{ImageFormat, RgbaImage};

use crate::document::{Document, PreviewHost, SelectionMask};
use crate::effect::SnapshotSource;
use crate::effects::{EFFECT_NAMES, build_effect};
use crate::geometry::RectI;
use crate::session::{LivePreviewManager, PreviewEvent, RenderStatus};
use crate::settings::{MAX_TILE_SIZE, RenderSettings};

/// Upper bound on how long one file may take before it is cancelled.
const FILE_TIMEOUT: Duration = Duration::from_secs(600);
/// How long a timed-out session gets to acknowledge its cancel.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "paintfe-preview",
    about = "Apply PaintFE effects to image files through the tiled live-preview renderer",
    long_about = "Render an effect over each input image with the same tiled, multi-threaded\n\
                  engine the editor uses for live previews, apply it, and save the result.\n\n\
                  Example:\n  \
                  paintfe-preview -i photo.png --effect invert -o out.png\n  \
                  paintfe-preview -i *.jpg --effect box-blur --param radius=3 --output-dir out/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Effect to apply.
    #[arg(short, long, value_name = "NAME")]
    pub effect: String,

    /// Effect parameter as key=value. Repeatable.
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp, tga, tiff. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Render worker threads (default: saved settings, else available cores).
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Tile size, e.g. 64x64.
    #[arg(long, value_name = "WxH", value_parser = parse_tile_size)]
    pub tile: Option<(u32, u32)>,

    /// Restrict the effect to a rectangle: x,y,width,height.
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_rect)]
    pub select: Option<RectI>,

    /// Store --threads and --tile as the new defaults.
    #[arg(long)]
    pub save_settings: bool,

    /// Print per-file timing and echo warnings to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Saved settings with the command-line overrides applied.
    pub fn render_settings(&self, base: RenderSettings) -> RenderSettings {
        let mut settings = base;
        if let Some(n) = self.threads {
            settings.thread_count = n;
        }
        if let Some((w, h)) = self.tile {
            settings.tile_width = w;
            settings.tile_height = h;
        }
        if self.verbose {
            settings.log_level = settings.log_level.max(log::LevelFilter::Debug);
        }
        settings
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, settings: RenderSettings) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let effect = match build_effect(&args.effect, &args.params) {
        Ok(e) => e,
        Err(msg) => {
            eprintln!("error: {}", msg);
            eprintln!("available effects: {}", EFFECT_NAMES.join(", "));
            return ExitCode::FAILURE;
        }
    };

    let mut manager = match LivePreviewManager::new(settings) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let format = parse_format(args.format.as_deref(), args.output.as_deref());

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            format,
        ) else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            any_failure = true;
            continue;
        };

        match run_one(
            &mut manager,
            &effect,
            input_path,
            &output_path,
            format,
            args.select,
            FILE_TIMEOUT,
        ) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }

        // A session that ignored its cancel blocks every later start.
        if manager.is_active() {
            let remaining = total - idx - 1;
            log::error!("preview session did not stop; skipping {} remaining input(s)", remaining);
            eprintln!(
                "error: preview session did not stop; skipping {} remaining input(s)",
                remaining
            );
            return ExitCode::FAILURE;
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(
    manager: &mut LivePreviewManager,
    effect: &Arc<dyn SnapshotSource>,
    input: &Path,
    output: &Path,
    format: ImageFormat,
    select: Option<RectI>,
    timeout: Duration,
) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let pixels = image::open(input)
        .map_err(|e| format!("load failed: {}", e))?
        .to_rgba8();
    let mut doc = Document::from_image(pixels);
    if let Some(rect) = select {
        let (w, h) = doc.canvas_size();
        doc.set_selection(Some(SelectionMask::from_rect(w, h, rect)));
    }

    // -- Step 2: Preview and apply ----------------------------------------
    let control = manager
        .start(Arc::clone(effect), &doc)
        .map_err(|e| format!("preview failed: {}", e))?;
    control.request_apply();

    let events = manager
        .wait_until_ended(&mut doc, timeout)
        .map_err(|e| format!("preview failed: {}", e))?;
    let Some(PreviewEvent::Ended { status, errors }) = events.into_iter().find(PreviewEvent::is_ended)
    else {
        control.request_cancel();
        let _ = manager.wait_until_ended(&mut doc, timeout.min(CANCEL_GRACE));
        if manager.is_active() {
            return Err(format!(
                "timed out after {:.1}s and the session did not stop",
                timeout.as_secs_f64()
            ));
        }
        return Err(format!("timed out after {:.1}s", timeout.as_secs_f64()));
    };

    match status {
        RenderStatus::Completed => {}
        RenderStatus::Cancelled => return Err("preview was cancelled".to_string()),
        RenderStatus::Error => {
            for err in &errors {
                eprintln!("  tile error: {}", err);
            }
            return Err(format!("{} tile(s) failed to render", errors.len()));
        }
    }

    // -- Step 3: Save ----------------------------------------------------
    let layer = doc.active_layer();
    let result = doc
        .layer_pixels(layer)
        .ok_or_else(|| format!("layer {} disappeared", layer))?;
    encode_and_write(result, output, format)
}

fn encode_and_write(img: &RgbaImage, path: &Path, format: ImageFormat) -> Result<(), String> {
    let res = match format {
        // No alpha channel in these encoders
        ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(img.clone())
            .to_rgb8()
            .save_with_format(path, format),
        _ => img.save_with_format(path, format),
    };
    res.map_err(|e| format!("save failed: {}", e))
}

// ============================================================================
// Helpers
// ============================================================================

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

fn format_from_name(name: &str) -> Option<ImageFormat> {
    match name.to_lowercase().as_str() {
        "png" => Some(ImageFormat::Png),
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "webp" => Some(ImageFormat::WebP),
        "bmp" => Some(ImageFormat::Bmp),
        "tga" => Some(ImageFormat::Tga),
        "tif" | "tiff" => Some(ImageFormat::Tiff),
        _ => None,
    }
}

/// Choose the output format from `--format` or the output extension.
/// Defaults to PNG when neither is known.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> ImageFormat {
    format_arg
        .and_then(format_from_name)
        .or_else(|| {
            output
                .and_then(|p| p.extension())
                .and_then(|e| e.to_str())
                .and_then(format_from_name)
        })
        .unwrap_or(ImageFormat::Png)
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: ImageFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extensions_str().first().copied().unwrap_or("png");
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    // Avoid silent overwrite of the input
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    Ok((k.to_string(), v.trim().to_string()))
}

fn parse_tile_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
    let parse = |v: &str| -> Result<u32, String> {
        match v.trim().parse::<u32>() {
            Ok(n) if n > 0 && n <= MAX_TILE_SIZE => Ok(n),
            _ => Err(format!(
                "tile dimension '{}' must be an integer in 1..={}",
                v, MAX_TILE_SIZE
            )),
        }
    };
    Ok((parse(w)?, parse(h)?))
}

fn parse_rect(s: &str) -> Result<RectI, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected X,Y,W,H, got '{}'", s));
    };
    let num = |v: &str| v.parse::<i32>().map_err(|_| format!("'{}' is not an integer", v));
    let rect = RectI::new(num(*x)?, num(*y)?, num(*w)?, num(*h)?);
    if rect.is_empty() {
        return Err(format!("selection '{}' is empty", s));
    }
    Ok(rect)
}
