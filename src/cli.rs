// ============================================================================
// FogView CLI: headless flattening of a map and its mask
// ============================================================================
//
// Usage examples:
//   fogview --map dungeon.png --output player.png
//   fogview -m dungeon.png --mask fog.png -o player.png --zoom 0.5
//   fogview -m cave.jpg -o out.png --mask-fill "#202020" --export-mask fog.png
//
// No window is opened in CLI mode. Decoding runs synchronously.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{CanvasState, Point};
use crate::io::{self, ImageIoError};
use crate::ops::raster::{Raster, Surface};
use crate::settings::{HostConfig, SettingsError};

/// FogView headless map flattener.
///
/// Composite a map under its fog mask into a single PNG without the GUI.
#[derive(Parser, Debug)]
#[command(
    name = "fogview",
    about = "FogView headless map flattener",
    long_about = "Render a map with its fog-of-war mask into a flat PNG without\n\
                  opening the GUI. Maps may be PNG, JPEG, WEBP or BMP.\n\n\
                  Example:\n  \
                  fogview --map dungeon.png --mask fog.png --output player.png"
)]
pub struct CliArgs {
    /// Map image to render.
    #[arg(short, long, value_name = "MAP")]
    pub map: PathBuf,

    /// Previously exported mask PNG (map size plus gutter on every side) or a
    /// `.fog` session file. Without it the whole map is hidden.
    #[arg(long, value_name = "MASK")]
    pub mask: Option<PathBuf>,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Also write the mask composite to this PNG.
    #[arg(long, value_name = "FILE")]
    pub export_mask: Option<PathBuf>,

    /// Settings file to start from instead of the built-in defaults.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Gutter width in world units.
    #[arg(long)]
    pub gutter: Option<u32>,

    /// Hidden-area colour (#rgb, #rrggbb, #rrggbbaa, r,g,b,a or none).
    #[arg(long, value_name = "COLOR")]
    pub mask_fill: Option<String>,

    /// Background colour behind the map.
    #[arg(long, value_name = "COLOR")]
    pub background: Option<String>,

    /// Output scale.
    #[arg(long, default_value_t = 1.0)]
    pub zoom: f32,

    /// Print timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when a CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating a window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--output" || a == "-o" || a.starts_with("--output="))
    }
}

#[derive(Debug)]
pub enum CliError {
    Image(ImageIoError),
    Settings(SettingsError),
    Usage(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Image(e) => write!(f, "{}", e),
            CliError::Settings(e) => write!(f, "{}", e),
            CliError::Usage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ImageIoError> for CliError {
    fn from(e: ImageIoError) -> Self {
        CliError::Image(e)
    }
}

impl From<SettingsError> for CliError {
    fn from(e: SettingsError) -> Self {
        CliError::Settings(e)
    }
}

/// What a successful flatten produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenReport {
    pub width: u32,
    pub height: u32,
    pub mask_restored: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the flatten and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match flatten(&args) {
        Ok(report) => {
            println!(
                "Wrote {} ({}x{}{})",
                args.output.display(),
                report.width,
                report.height,
                if report.mask_restored { ", mask applied" } else { "" }
            );
            if args.verbose {
                println!("  done in {:.1} ms", start.elapsed().as_secs_f64() * 1000.0);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(args: &CliArgs) -> Result<HostConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(SettingsError::from)?;
            HostConfig::parse(&content)?
        }
        None => HostConfig::default(),
    };
    if let Some(g) = args.gutter {
        config.gutter = g;
    }
    if let Some(fill) = &args.mask_fill {
        config.apply("mask_fill", fill)?;
    }
    if let Some(bg) = &args.background {
        config.apply("background_fill", bg)?;
    }
    Ok(config)
}

/// Composite map and mask into `args.output`.
pub fn flatten(args: &CliArgs) -> Result<FlattenReport, CliError> {
    if !(args.zoom.is_finite() && args.zoom > 0.0) {
        return Err(CliError::Usage(format!("zoom must be positive, got {}", args.zoom)));
    }
    let config = resolve_config(args)?;
    let map = io::decode_file(&args.map)?;
    let width = ((map.width() as f32 * args.zoom).round() as u32).max(1);
    let height = ((map.height() as f32 * args.zoom).round() as u32).max(1);

    let mut canvas = CanvasState::new(width, height, config);
    canvas.on_map_loaded(map);
    canvas.view.zoom = args.zoom;

    let mask_restored = match &args.mask {
        Some(path) if is_session(path) => {
            let session = io::load_session(path)?;
            if !canvas.restore_session(&session) {
                return Err(CliError::Usage(format!(
                    "session {} does not match {}",
                    path.display(),
                    args.map.display()
                )));
            }
            // Keep the requested output framing rather than the saved view.
            canvas.view.pan = Point::ZERO;
            canvas.view.zoom = args.zoom;
            true
        }
        Some(path) => {
            let mask = io::decode_file(path)?;
            if !canvas.mask.restore_alpha(&mask) {
                let raster = canvas.mask.raster();
                return Err(CliError::Usage(format!(
                    "mask {} is {}x{}, expected {}x{}",
                    path.display(),
                    mask.width(),
                    mask.height(),
                    raster.width(),
                    raster.height()
                )));
            }
            true
        }
        None => false,
    };
    canvas.commit_mask();

    let mut frame = Raster::new(width, height);
    canvas.draw(&mut frame);
    io::write_png(&frame.to_rgba_image(), &args.output)?;

    if let Some(path) = &args.export_mask {
        write_mask(&canvas, path)?;
    }

    Ok(FlattenReport { width, height, mask_restored })
}

fn is_session(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("fog"))
}

fn write_mask(canvas: &CanvasState, path: &Path) -> Result<(), CliError> {
    let png = canvas.mask.export_png()?;
    std::fs::write(path, png).map_err(ImageIoError::from)?;
    Ok(())
}
