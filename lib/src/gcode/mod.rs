//! G-code processing.
//!
//! This module contains the whole welding pipeline: the line parser, the
//! modal-state position tracker, the incremental arc engine, the commit
//! buffer, segment statistics, and the controller that ties them together.

pub mod arc_fitting;
pub mod buffer;
pub mod parser;
pub mod position;
pub mod statistics;
pub mod welder;

pub use arc_fitting::{
    ArcDirection, ArcFitter, ArcFittingConfig, PrinterPoint, DEFAULT_E_PRECISION,
    DEFAULT_MAX_RADIUS_MM, DEFAULT_MIN_SEGMENTS, DEFAULT_PATH_TOLERANCE_PERCENT,
    DEFAULT_RESOLUTION_MM, DEFAULT_XYZ_PRECISION,
};
pub use buffer::{CommandBuffer, UnwrittenCommand};
pub use parser::{parse_line, Parameter, ParsedCommand};
pub use position::{Position, PositionTracker};
pub use statistics::{SegmentStatistics, SEGMENT_STATISTIC_LENGTHS};
pub use welder::{ArcWelder, WelderConfig, WelderProgress, WelderResults, DEFAULT_BUFFER_SIZE};
