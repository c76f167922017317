//! Segment-length statistics.
//!
//! Two parallel histograms over a fixed set of length buckets record the
//! extrusion moves of the source stream and of the produced stream. The
//! totals feed the progress report and the summary the CLI prints.

use serde::Serialize;
use std::fmt;

/// Bucket boundaries in millimeters.
pub const SEGMENT_STATISTIC_LENGTHS: &[f64] = &[
    0.002, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 20.0, 50.0, 100.0,
];

/// Histogram of move lengths for the source and target streams.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentStatistics {
    boundaries: Vec<f64>,
    /// Per-bucket counts; index `i` holds lengths in `[boundaries[i-1], boundaries[i])`,
    /// with an extra trailing bucket for everything at or above the last boundary.
    source_counts: Vec<u64>,
    target_counts: Vec<u64>,
    source_total: u64,
    target_total: u64,
    source_length: f64,
    target_length: f64,
}

impl Default for SegmentStatistics {
    fn default() -> Self {
        Self::new(SEGMENT_STATISTIC_LENGTHS)
    }
}

impl SegmentStatistics {
    /// Create statistics over the given bucket boundaries.
    pub fn new(boundaries: &[f64]) -> Self {
        Self {
            boundaries: boundaries.to_vec(),
            source_counts: vec![0; boundaries.len() + 1],
            target_counts: vec![0; boundaries.len() + 1],
            source_total: 0,
            target_total: 0,
            source_length: 0.0,
            target_length: 0.0,
        }
    }

    /// Record one move of `length_mm`, for the source (`is_source`) or the
    /// target stream.
    pub fn update(&mut self, length_mm: f64, is_source: bool) {
        if length_mm <= 0.0 {
            return;
        }
        let bucket = self
            .boundaries
            .iter()
            .position(|&b| length_mm < b)
            .unwrap_or(self.boundaries.len());
        if is_source {
            self.source_counts[bucket] += 1;
            self.source_total += 1;
            self.source_length += length_mm;
        } else {
            self.target_counts[bucket] += 1;
            self.target_total += 1;
            self.target_length += length_mm;
        }
    }

    /// Total source moves recorded.
    pub fn source_total(&self) -> u64 {
        self.source_total
    }

    /// Total target moves recorded.
    pub fn target_total(&self) -> u64 {
        self.target_total
    }
}

impl fmt::Display for SegmentStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>22}  {:>10}  {:>10}", "length (mm)", "source", "target")?;
        for (i, count) in self.source_counts.iter().enumerate() {
            let label = if i == 0 {
                format!("< {}", self.boundaries[0])
            } else if i == self.boundaries.len() {
                format!(">= {}", self.boundaries[i - 1])
            } else {
                format!("{} to {}", self.boundaries[i - 1], self.boundaries[i])
            };
            writeln!(f, "{:>22}  {:>10}  {:>10}", label, count, self.target_counts[i])?;
        }
        write!(
            f,
            "{:>22}  {:>10}  {:>10}",
            "total", self.source_total, self.target_total
        )
    }
}
