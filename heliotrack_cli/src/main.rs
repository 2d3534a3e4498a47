//! Heliotrack CLI
//!
//! Track extracted active-region contours across a frame stack based on
//! user-defined thresholds and conditions, and write the track archive.

use anyhow::Context;
use clap::Parser;
use heliotrack_core::{track_and_merge_with_observation, FrameInput, Mode, TrackingParams};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Separators used when deriving output file names.
const SEP_IN: &str = "_";
const SEP_OUT: &str = "__";

/// Extract and track contours from active-region data based on
/// user-defined thresholds and conditions.
///
/// Example:
///   heliotrack --frames /path/to/contours.json --contour_quantity Ic
///     --penumbra_threshold 0.9 --umbra_threshold 0.5 --pore_threshold 0.65
#[derive(Debug, Parser)]
#[command(name = "heliotrack", version, about, verbatim_doc_comment)]
struct Args {
    /// Extracted contour frames (JSON produced by the region extractor).
    #[arg(long, help_heading = "core settings")]
    frames: PathBuf,

    /// Quantity used to compute the contour (e.g. Ic, B, Br).
    #[arg(long, help_heading = "contour extraction")]
    contour_quantity: String,

    /// Threshold value defining the penumbra (outer) contour.
    #[arg(long, help_heading = "contour extraction")]
    penumbra_threshold: f64,

    /// Threshold value defining the umbra (inner) contour.
    #[arg(long, help_heading = "contour extraction")]
    umbra_threshold: f64,

    /// Threshold value defining the pore (middle) contour.
    #[arg(long, help_heading = "contour extraction")]
    pore_threshold: f64,

    /// Minimum contour area in pixels² for contours to be considered.
    #[arg(long, default_value_t = 5.0, help_heading = "filtering options")]
    min_area: f64,

    /// Maximum number of consecutive frames a tracked contour can be absent
    /// and still be considered part of a valid track.
    #[arg(long, default_value_t = 3, help_heading = "filtering options")]
    max_gap: u32,

    /// Minimum number of image frames in which the contour must appear.
    #[arg(long, default_value_t = 0, help_heading = "filtering options")]
    min_frames: u32,

    /// Minimum IoU required to merge two contours into one region.
    #[arg(long, default_value_t = 0.3, help_heading = "morphology and merging")]
    iou_threshold: f64,

    /// Minimum containment ratio required to consider one region inside
    /// another.
    #[arg(long, default_value_t = 0.8, help_heading = "morphology and merging")]
    min_containment: f64,

    /// Enable image alignment (registration) before contour tracking.
    #[arg(long, help_heading = "morphology and merging")]
    registration: bool,

    /// What type of measurements is processed (sunspots or pores).
    #[arg(long, default_value = "sunspots", help_heading = "output options")]
    mode: String,

    /// Output directory for saving results.
    #[arg(long, default_value = ".", help_heading = "output options")]
    outdir: PathBuf,

    /// Base name for saved output files. If empty, it is constructed from
    /// the other inputs.
    #[arg(long, default_value = "", help_heading = "output options")]
    save_name: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(?args, "run parameters");

    let mode: Mode = args.mode.parse()?;
    let params = TrackingParams {
        penumbra_threshold: args.penumbra_threshold,
        pore_threshold: args.pore_threshold,
        umbra_threshold: args.umbra_threshold,
        min_area: args.min_area,
        max_gap: args.max_gap,
        min_frames: args.min_frames,
        iou_threshold: args.iou_threshold,
        min_containment: args.min_containment,
        registration: args.registration,
        mode,
    };
    params.validate().context("invalid parameters")?;

    let reader = BufReader::new(
        File::open(&args.frames)
            .with_context(|| format!("opening frames file {}", args.frames.display()))?,
    );
    let frames: Vec<FrameInput> =
        serde_json::from_reader(reader).context("parsing frames file")?;
    info!(frames = frames.len(), "loaded contour frames");

    let archive = track_and_merge_with_observation(
        &frames,
        &params,
        Uuid::new_v4(),
        Some(args.contour_quantity.clone()),
    )?;

    let save_name = if args.save_name.is_empty() {
        let stem = args
            .frames
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frames".to_string());
        format!(
            "{}{SEP_IN}{}{SEP_IN}{}{SEP_OUT}{}.json",
            args.contour_quantity, args.penumbra_threshold, args.umbra_threshold, stem
        )
    } else {
        args.save_name.clone()
    };

    std::fs::create_dir_all(&args.outdir)
        .with_context(|| format!("creating output directory {}", args.outdir.display()))?;
    let out_path = args.outdir.join(save_name);
    archive.save(&out_path)?;
    info!(
        tracks = archive.tracks.len(),
        path = %out_path.display(),
        "track archive written"
    );

    Ok(())
}
