//! arcweld CLI - compress G0/G1 runs into G2/G3 arcs
//!
//! Usage:
//!   arcweld-cli <input.gcode> [-o <output.gcode>] [options]
//!   arcweld-cli print.gcode --resolution 0.05 --max-radius 1000
//!   arcweld-cli print.gcode --min-arc-segments 14 --mm-per-arc-segment 1.0

use anyhow::{bail, Context, Result};
use arcweld::{ArcWelder, WelderConfig};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use std::path::PathBuf;

/// Compress many G0/G1 commands into G2/G3 arc commands, keeping the toolpath
/// within the specified resolution. This reduces file size and the number of
/// gcodes per second the printer must consume.
#[derive(Parser, Debug)]
#[command(name = "arcweld-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input G-code file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output G-code file (default: INPUT with a .welded.gcode extension)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Circle-fit tolerance in mm; points must stay within this distance of
    /// the fitted circle
    #[arg(long, default_value = "0.05")]
    resolution: f64,

    /// Maximum deviation of a chord midpoint from the arc, as a fraction of
    /// the chord length
    #[arg(long, default_value = "0.05")]
    path_tolerance: f64,

    /// Maximum arc radius in mm; larger fits are left as line segments
    #[arg(long, default_value = "1000000")]
    max_radius: f64,

    /// Require the firmware's segmentation of an emitted arc to produce at
    /// least this many segments (0 disables)
    #[arg(long, default_value = "0")]
    min_arc_segments: usize,

    /// The firmware's segmentation step in mm, used with --min-arc-segments
    /// (0 disables)
    #[arg(long, default_value = "0")]
    mm_per_arc_segment: f64,

    /// Permit helical arcs with a linear Z rise
    #[arg(long)]
    allow_3d_arcs: bool,

    /// Raise output precision to match the precision observed in the input
    #[arg(long)]
    allow_dynamic_precision: bool,

    /// Decimal digits for X/Y/Z/I/J output
    #[arg(long, default_value = "3")]
    xyz_precision: u8,

    /// Decimal digits for E output
    #[arg(long, default_value = "5")]
    e_precision: u8,

    /// G90/G91 also switch the extruder between absolute and relative mode
    #[arg(long)]
    g90_influences_extruder: bool,

    /// Commit-buffer size in lines; also bounds arc length in points
    #[arg(long, default_value = "1000")]
    buffer_size: usize,

    /// Print the final progress snapshot as JSON
    #[arg(long)]
    stats_json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("welded.gcode"));

    let config = WelderConfig {
        resolution_mm: cli.resolution,
        path_tolerance_percent: cli.path_tolerance,
        max_radius_mm: cli.max_radius,
        min_arc_segments: cli.min_arc_segments,
        mm_per_arc_segment: cli.mm_per_arc_segment,
        allow_3d_arcs: cli.allow_3d_arcs,
        allow_dynamic_precision: cli.allow_dynamic_precision,
        default_xyz_precision: cli.xyz_precision,
        default_e_precision: cli.e_precision,
        g90_g91_influences_extruder: cli.g90_influences_extruder,
        buffer_size: cli.buffer_size,
    };
    config.validate().context("Invalid configuration")?;

    info!("Source: {}", cli.input.display());
    info!("Target: {}", output_path.display());
    info!("  Resolution: {} mm", config.resolution_mm);
    info!("  Path tolerance: {}%", config.path_tolerance_percent * 100.0);
    info!("  Max radius: {} mm", config.max_radius_mm);
    if config.firmware_compensation_active() {
        info!(
            "  Firmware compensation: {} segments at {} mm",
            config.min_arc_segments, config.mm_per_arc_segment
        );
    }

    // Create progress bar
    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.set_message("Welding arcs...");

    let welder = ArcWelder::new(config);
    let progress_clone = progress.clone();
    let results = welder.process_with_callback(&cli.input, &output_path, move |snapshot| {
        progress_clone.set_position(snapshot.percent_complete.round() as u64);
        progress_clone.set_message(format!(
            "{} arcs, {} points compressed",
            snapshot.arcs_created, snapshot.points_compressed
        ));
        true
    })?;

    if !results.success {
        progress.abandon_with_message("Failed");
        bail!("{}", results.message);
    }
    progress.finish_with_message("Done!");

    let stats = &results.progress;
    println!();
    println!("Arc welding complete!");
    println!("  Output: {}", output_path.display());
    println!("  Lines processed: {}", stats.lines_processed);
    println!("  Arcs created: {}", stats.arcs_created);
    println!("  Points compressed: {}", stats.points_compressed);
    println!(
        "  Compression: {:.1}% ({:.2}x), {} -> {} bytes",
        stats.compression_percent,
        stats.compression_ratio,
        stats.source_file_size,
        stats.target_file_size
    );
    if welder.config().firmware_compensation_active() {
        println!(
            "  Firmware compensations: {}",
            stats.num_firmware_compensations
        );
    }
    if let Some(segment_statistics) = &stats.segment_statistics {
        println!();
        println!("Segment statistics:");
        println!("{}", segment_statistics);
    }

    if cli.stats_json {
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(&results.progress)
                .context("Failed to serialize statistics to JSON")?
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
