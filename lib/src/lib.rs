//! # arcweld
//!
//! A G-code post-processor that compresses runs of short linear moves
//! (G0/G1) into circular arc moves (G2/G3).
//!
//! Dense polygonal approximations of curves dominate sliced G-code. Replacing
//! them with arcs shrinks the file and lowers the command rate the printer
//! controller has to sustain, while the toolpath stays within a configured
//! tolerance of the original.
//!
//! ## Example
//!
//! ```rust,ignore
//! use arcweld::{ArcWelder, WelderConfig};
//!
//! let welder = ArcWelder::new(WelderConfig::default());
//! let results = welder.process("input.gcode".as_ref(), "output.gcode".as_ref())?;
//! println!("{} arcs created", results.progress.arcs_created);
//! ```

pub mod gcode;
pub mod geometry;

// Re-export commonly used types
pub use gcode::{
    parse_line, ArcDirection, ArcFitter, ArcFittingConfig, ArcWelder, CommandBuffer, Parameter,
    ParsedCommand, Position, PositionTracker, PrinterPoint, SegmentStatistics, UnwrittenCommand,
    WelderConfig, WelderProgress, WelderResults,
};
pub use geometry::{Circle, PointF};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for welding operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("G-code error: {0}")]
    GCode(String),
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
