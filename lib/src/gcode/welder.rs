//! The arc welder controller.
//!
//! [`ArcWelder`] drives the whole pipeline: it reads the source stream line
//! by line, tracks modal position state, feeds eligible moves to the
//! [`ArcFitter`], defers undecided lines in the commit buffer, and writes the
//! produced stream. Two states exist: *idle* (no candidate) and *building*
//! (`waiting_for_arc`, candidate holds at least two points). A command that
//! cannot extend the candidate forces a commit (emit one G2/G3, absorb the
//! buffered moves) or an abort (flush the buffered moves verbatim), after
//! which the command is processed again from a clean idle state.
//!
//! For any two source lines that both survive to the output, their output
//! representations appear in source order.

use crate::gcode::arc_fitting::{
    ArcFitter, ArcFittingConfig, PrinterPoint, DEFAULT_E_PRECISION, DEFAULT_MAX_RADIUS_MM,
    DEFAULT_MIN_SEGMENTS, DEFAULT_PATH_TOLERANCE_PERCENT, DEFAULT_RESOLUTION_MM,
    DEFAULT_XYZ_PRECISION,
};
use crate::gcode::buffer::{CommandBuffer, UnwrittenCommand};
use crate::gcode::parser::{parse_line, ParsedCommand};
use crate::gcode::position::{Position, PositionTracker};
use crate::gcode::statistics::SegmentStatistics;
use crate::geometry::is_equal;
use crate::{Error, Result};
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Default commit-buffer size in lines.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Seconds between progress notifications.
const NOTIFICATION_PERIOD_SECONDS: f64 = 1.0;

/// Lines processed between wall-clock checks.
const LINES_PER_CLOCK_CHECK: u64 = 1000;

/// Configuration for a welding run.
#[derive(Debug, Clone)]
pub struct WelderConfig {
    /// Half-width of the circle-fit tolerance band (mm).
    pub resolution_mm: f64,
    /// Chord-midpoint deviation allowance as a fraction of chord length.
    pub path_tolerance_percent: f64,
    /// Maximum arc radius (mm).
    pub max_radius_mm: f64,
    /// Firmware-compensation floor; 0 disables.
    pub min_arc_segments: usize,
    /// Firmware segmentation step (mm); 0 disables.
    pub mm_per_arc_segment: f64,
    /// Permit helical (Z-varying) arcs.
    pub allow_3d_arcs: bool,
    /// Raise output precision to match observed input precision.
    pub allow_dynamic_precision: bool,
    /// Initial decimal digits for X/Y/Z/I/J output.
    pub default_xyz_precision: u8,
    /// Initial decimal digits for E output.
    pub default_e_precision: u8,
    /// `G90`/`G91` also switch the extruder mode.
    pub g90_g91_influences_extruder: bool,
    /// Upper bound on the commit buffer and on arc length in points.
    pub buffer_size: usize,
}

impl Default for WelderConfig {
    fn default() -> Self {
        Self {
            resolution_mm: DEFAULT_RESOLUTION_MM,
            path_tolerance_percent: DEFAULT_PATH_TOLERANCE_PERCENT,
            max_radius_mm: DEFAULT_MAX_RADIUS_MM,
            min_arc_segments: 0,
            mm_per_arc_segment: 0.0,
            allow_3d_arcs: false,
            allow_dynamic_precision: false,
            default_xyz_precision: DEFAULT_XYZ_PRECISION,
            default_e_precision: DEFAULT_E_PRECISION,
            g90_g91_influences_extruder: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl WelderConfig {
    /// Check option sanity before processing.
    pub fn validate(&self) -> Result<()> {
        if self.resolution_mm <= 0.0 {
            return Err(Error::Config("resolution_mm must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.path_tolerance_percent) {
            return Err(Error::Config(
                "path_tolerance_percent must be a fraction below 1.0".to_string(),
            ));
        }
        if self.max_radius_mm <= 0.0 {
            return Err(Error::Config("max_radius_mm must be positive".to_string()));
        }
        if self.mm_per_arc_segment < 0.0 {
            return Err(Error::Config(
                "mm_per_arc_segment cannot be negative".to_string(),
            ));
        }
        if self.buffer_size < DEFAULT_MIN_SEGMENTS + 5 {
            return Err(Error::Config(format!(
                "buffer_size must be at least {}",
                DEFAULT_MIN_SEGMENTS + 5
            )));
        }
        Ok(())
    }

    /// Whether the firmware-compensation floor is active.
    pub fn firmware_compensation_active(&self) -> bool {
        self.min_arc_segments > 0 && self.mm_per_arc_segment > 0.0
    }

    fn arc_fitting_config(&self) -> ArcFittingConfig {
        ArcFittingConfig {
            resolution_mm: self.resolution_mm,
            path_tolerance_percent: self.path_tolerance_percent,
            max_radius_mm: self.max_radius_mm,
            min_arc_segments: self.min_arc_segments,
            mm_per_arc_segment: self.mm_per_arc_segment,
            allow_3d_arcs: self.allow_3d_arcs,
            min_segments: DEFAULT_MIN_SEGMENTS,
            max_segments: self.buffer_size - 5,
            default_xyz_precision: self.default_xyz_precision,
            default_e_precision: self.default_e_precision,
        }
    }
}

/// A progress snapshot, delivered to the callback and returned with the
/// final results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WelderProgress {
    pub lines_processed: u64,
    pub gcodes_processed: u64,
    pub points_compressed: u64,
    pub arcs_created: u64,
    pub num_firmware_compensations: u64,
    pub source_file_position: u64,
    pub source_file_size: u64,
    pub target_file_size: u64,
    pub percent_complete: f64,
    pub seconds_elapsed: f64,
    pub seconds_remaining: f64,
    pub compression_ratio: f64,
    pub compression_percent: f64,
    pub segment_statistics: Option<SegmentStatistics>,
}

impl fmt::Display for WelderProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% complete, {} lines, {} arcs, {} points compressed, \
             compression {:.1}% ({:.2}x), {:.0}s elapsed, {:.0}s remaining",
            self.percent_complete,
            self.lines_processed,
            self.arcs_created,
            self.points_compressed,
            self.compression_percent,
            self.compression_ratio,
            self.seconds_elapsed,
            self.seconds_remaining
        )
    }
}

/// Outcome of a welding run.
#[derive(Debug, Clone)]
pub struct WelderResults {
    /// The run completed without cancellation or a fatal error.
    pub success: bool,
    /// The progress callback requested cancellation.
    pub cancelled: bool,
    /// Failure description; empty on success.
    pub message: String,
    /// The final progress snapshot.
    pub progress: WelderProgress,
}

impl WelderResults {
    fn failed(message: &str) -> Self {
        Self {
            success: false,
            cancelled: false,
            message: message.to_string(),
            progress: WelderProgress::default(),
        }
    }
}

/// The top-level arc welding processor.
#[derive(Debug, Clone, Default)]
pub struct ArcWelder {
    config: WelderConfig,
}

/// Result of one pass of the state machine over a command.
enum Applied {
    Done,
    Reprocess,
}

impl ArcWelder {
    /// Create a welder with the given configuration.
    pub fn new(config: WelderConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &WelderConfig {
        &self.config
    }

    /// Process `source` into `target` without progress reporting.
    pub fn process(&self, source: &Path, target: &Path) -> Result<WelderResults> {
        self.process_with_callback(source, target, |_| true)
    }

    /// Process `source` into `target`, delivering progress snapshots to
    /// `callback` roughly once per second. A `false` return from the callback
    /// cancels the run after the current line.
    ///
    /// Failure to open either file is reported through [`WelderResults`], not
    /// as an error; both handles are closed on every exit path.
    pub fn process_with_callback<F>(
        &self,
        source: &Path,
        target: &Path,
        callback: F,
    ) -> Result<WelderResults>
    where
        F: FnMut(&WelderProgress) -> bool,
    {
        info!(
            "processing '{}' -> '{}': resolution {}mm, path tolerance {}%, max radius {}mm",
            source.display(),
            target.display(),
            self.config.resolution_mm,
            self.config.path_tolerance_percent * 100.0,
            self.config.max_radius_mm
        );
        let source_size = std::fs::metadata(source).map(|m| m.len()).unwrap_or(0);
        let source_file = match File::open(source) {
            Ok(file) => file,
            Err(err) => {
                debug!("source open failed: {}", err);
                return Ok(WelderResults::failed("Unable to open the source file."));
            }
        };
        let target_file = match File::create(target) {
            Ok(file) => file,
            Err(err) => {
                debug!("target open failed: {}", err);
                return Ok(WelderResults::failed("Unable to open the target file."));
            }
        };
        self.process_stream(
            BufReader::new(source_file),
            BufWriter::new(target_file),
            source_size,
            callback,
        )
    }

    /// Process an already-open stream. `source_size` is used for progress
    /// percentages only; pass 0 when unknown.
    pub fn process_stream<R, W, F>(
        &self,
        mut reader: R,
        writer: W,
        source_size: u64,
        callback: F,
    ) -> Result<WelderResults>
    where
        R: BufRead,
        W: Write,
        F: FnMut(&WelderProgress) -> bool,
    {
        let mut state = ProcessState::new(&self.config, writer, callback, source_size);
        state.write_header()?;

        let mut continue_processing = state.send_progress();
        let mut line = String::new();
        while continue_processing {
            line.clear();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            state.bytes_read += bytes as u64;
            state.lines_processed += 1;

            let cmd = parse_line(&line);
            if !cmd.is_empty {
                state.gcodes_processed += 1;
            }
            state.process_command(&cmd)?;

            if state.lines_processed % LINES_PER_CLOCK_CHECK == 0 && state.update_is_due() {
                continue_processing = state.send_progress();
            }
        }

        state.finish()?;
        state.writer.flush()?;

        let progress = state.snapshot(source_size);
        (state.callback)(&progress);

        Ok(WelderResults {
            success: continue_processing,
            cancelled: !continue_processing,
            message: String::new(),
            progress,
        })
    }
}

/// All mutable state of one welding run.
struct ProcessState<'a, W: Write, F: FnMut(&WelderProgress) -> bool> {
    config: &'a WelderConfig,
    arc: ArcFitter,
    tracker: PositionTracker,
    buffer: CommandBuffer,
    statistics: SegmentStatistics,
    writer: W,
    callback: F,
    waiting_for_arc: bool,
    previous_feedrate: f64,
    previous_is_extruder_relative: bool,
    lines_processed: u64,
    gcodes_processed: u64,
    points_compressed: u64,
    arcs_created: u64,
    bytes_read: u64,
    bytes_written: u64,
    source_size: u64,
    start: Instant,
    last_update: Instant,
}

impl<'a, W: Write, F: FnMut(&WelderProgress) -> bool> ProcessState<'a, W, F> {
    fn new(config: &'a WelderConfig, writer: W, callback: F, source_size: u64) -> Self {
        let now = Instant::now();
        Self {
            arc: ArcFitter::new(config.arc_fitting_config()),
            tracker: PositionTracker::new(config.g90_g91_influences_extruder, config.buffer_size),
            buffer: CommandBuffer::with_capacity(config.buffer_size - 5),
            statistics: SegmentStatistics::default(),
            writer,
            callback,
            config,
            waiting_for_arc: false,
            previous_feedrate: -1.0,
            previous_is_extruder_relative: false,
            lines_processed: 0,
            gcodes_processed: 0,
            points_compressed: 0,
            arcs_created: 0,
            bytes_read: 0,
            bytes_written: 0,
            source_size,
            start: now,
            last_update: now,
        }
    }

    /// Run a command through the state machine. A commit triggered by the
    /// command re-processes it once from the resulting idle state.
    fn process_command(&mut self, cmd: &ParsedCommand) -> Result<()> {
        let mut is_reprocess = false;
        loop {
            match self.apply_command(cmd, is_reprocess)? {
                Applied::Done => return Ok(()),
                Applied::Reprocess if !is_reprocess => is_reprocess = true,
                Applied::Reprocess => {
                    // One level of re-entry is enough: after a commit the
                    // machine is idle and cannot commit again.
                    return Err(Error::GCode(format!(
                        "re-entry loop while processing: {}",
                        cmd.gcode
                    )));
                }
            }
        }
    }

    fn apply_command(&mut self, cmd: &ParsedCommand, is_reprocess: bool) -> Result<Applied> {
        self.tracker.update(cmd);
        let cur = self.tracker.current().clone();
        let prev = self.tracker.previous().clone();

        let has_e_changed = cur.is_extruding() || cur.is_retracting();
        let mut movement_length = 0.0;
        if cur.has_xy_changed && has_e_changed {
            movement_length = if self.config.allow_3d_arcs {
                let dz = cur.gcode_z() - prev.gcode_z();
                let dx = cur.gcode_x() - prev.gcode_x();
                let dy = cur.gcode_y() - prev.gcode_y();
                (dx * dx + dy * dy + dz * dz).sqrt()
            } else {
                let dx = cur.gcode_x() - prev.gcode_x();
                let dy = cur.gcode_y() - prev.gcode_y();
                (dx * dx + dy * dy).sqrt()
            };
            if movement_length > 0.0 && !is_reprocess {
                self.statistics.update(movement_length, true);
            }
        }

        let is_linear_move = cmd.command == "G0" || cmd.command == "G1";
        if self.config.allow_dynamic_precision && is_linear_move {
            for p in &cmd.parameters {
                match p.name {
                    'X' | 'Y' | 'Z' => self.arc.update_xyz_precision(p.precision),
                    'E' => self.arc.update_e_precision(p.precision),
                    _ => {}
                }
            }
        }

        let mut arc_added = false;
        if self.is_eligible(cmd, is_linear_move, &prev, &cur) {
            if !self.waiting_for_arc {
                debug!("starting new arc from gcode: {}", cmd.gcode);
                self.previous_is_extruder_relative = prev.is_extruder_relative;
                // Lines already deferred precede the arc's start point.
                self.write_unwritten_commands()?;
                // The previous position is the arc's start; it carries no
                // extrusion of its own.
                let seed = PrinterPoint::new(
                    prev.gcode_x(),
                    prev.gcode_y(),
                    prev.gcode_z(),
                    prev.e_relative,
                    0.0,
                );
                self.arc.try_add_point(seed);
            }

            let point = PrinterPoint::new(
                cur.gcode_x(),
                cur.gcode_y(),
                cur.gcode_z(),
                cur.e_relative,
                movement_length,
            );
            arc_added = self.arc.try_add_point(point);
            if arc_added {
                if !self.waiting_for_arc {
                    self.waiting_for_arc = true;
                    self.previous_feedrate = prev.f;
                } else {
                    debug!("adding point to arc from gcode: {}", cmd.gcode);
                }
            }
        }

        if !arc_added {
            if self.arc.num_segments() < self.arc.min_segments() {
                if self.arc.num_segments() != 0 {
                    debug!("not enough segments to form an arc, resetting: {}", cmd.gcode);
                }
                self.waiting_for_arc = false;
                self.arc.clear();
            } else if self.waiting_for_arc {
                if self.arc.is_shape() {
                    // The current command is not part of the arc; roll it back
                    // and re-process it once the arc is out.
                    self.tracker.undo_update();
                    self.emit_current_arc()?;
                    return Ok(Applied::Reprocess);
                }
                debug!("the current candidate is not a valid arc, resetting");
                self.waiting_for_arc = false;
                self.arc.clear();
            }
        }

        if self.waiting_for_arc || !arc_added {
            self.buffer.push_back(UnwrittenCommand::new(
                cmd.gcode.clone(),
                cmd.comment.clone(),
                movement_length,
            ));
        }
        if !self.waiting_for_arc {
            self.write_unwritten_commands()?;
        }
        Ok(Applied::Done)
    }

    /// Whether the command may extend (or start) an arc.
    fn is_eligible(
        &self,
        cmd: &ParsedCommand,
        is_linear_move: bool,
        prev: &Position,
        cur: &Position,
    ) -> bool {
        if cmd.is_empty {
            return false;
        }
        if !cmd.is_known_command {
            debug!("command '{}' is unknown, skipping: {}", cmd.command, cmd.gcode);
            return false;
        }
        if !is_linear_move {
            debug!(
                "command '{}' is not a linear move, skipping: {}",
                cmd.command, cmd.gcode
            );
            return false;
        }
        if !self.config.allow_3d_arcs && !is_equal(cur.z, prev.z) {
            debug!("z axis position changed, cannot convert: {}", cmd.gcode);
            return false;
        }
        if cur.is_relative {
            debug!("xyz axes are in relative mode, cannot convert: {}", cmd.gcode);
            return false;
        }
        if !cur.offsets_equal(prev) {
            debug!("coordinate offsets changed, cannot convert: {}", cmd.gcode);
            return false;
        }
        if cur.is_extruder_relative != prev.is_extruder_relative {
            debug!(
                "extruder axis mode changed, cannot add point to the current arc: {}",
                cmd.gcode
            );
            return false;
        }
        if self.waiting_for_arc {
            // Both extruding or both retracting; switching between the two
            // terminates the arc.
            let phase_ok = (prev.is_extruding() && cur.is_extruding())
                || (prev.is_retracting() && cur.is_retracting());
            if !phase_ok {
                debug!(
                    "extruding or retracting state changed, cannot add point to the current arc: {}",
                    cmd.gcode
                );
                return false;
            }
            if !is_equal(prev.f, cur.f) {
                debug!(
                    "feedrate changed, cannot add point to the current arc: {}",
                    cmd.gcode
                );
                return false;
            }
            if prev.feature_tag != cur.feature_tag {
                debug!(
                    "feature type changed, cannot add point to the current arc: {}",
                    cmd.gcode
                );
                return false;
            }
        }
        true
    }

    /// Emit the current candidate as one G2/G3. The tracker's current
    /// position must be the arc's endpoint state.
    fn emit_current_arc(&mut self) -> Result<()> {
        let num_segments = self.arc.num_segments();
        let absorbed = num_segments - 1;
        let comment = self.buffer.merged_trailing_comments(absorbed);

        let cur = self.tracker.current();
        let mut feedrate = cur.f;
        if self.previous_feedrate > 0.0 && is_equal(self.previous_feedrate, feedrate) {
            feedrate = 0.0;
        }
        let mut gcode = if self.previous_is_extruder_relative {
            self.arc.gcode_relative(feedrate)
        } else {
            self.arc.gcode_absolute(cur.gcode_e(), feedrate)
        }
        .ok_or_else(|| Error::GCode("attempted to emit an arc without a valid shape".to_string()))?;
        if !comment.is_empty() {
            gcode.push(';');
            gcode.push_str(&comment);
        }
        debug!("arc created with {} segments: {}", num_segments, gcode);

        // The absorbed moves leave the buffer; the start point was either
        // written already or is still pending ahead of them.
        for _ in 0..absorbed {
            self.buffer.pop_back();
        }
        self.points_compressed += absorbed as u64;
        self.arcs_created += 1;

        self.write_unwritten_commands()?;
        self.statistics.update(self.arc.arc_length(), false);
        self.write_line(&gcode)?;

        self.waiting_for_arc = false;
        self.arc.clear();
        Ok(())
    }

    /// End-of-stream (or cancellation): commit a committable candidate,
    /// abandon anything else, and drain the buffer. Nothing is rolled back or
    /// re-processed here; the tracker already sits at the arc's endpoint.
    fn finish(&mut self) -> Result<()> {
        if self.waiting_for_arc && self.arc.is_shape() {
            debug!("processing the final shape");
            self.emit_current_arc()?;
        } else {
            self.waiting_for_arc = false;
            self.arc.clear();
        }
        self.write_unwritten_commands()?;
        Ok(())
    }

    fn write_unwritten_commands(&mut self) -> Result<()> {
        while let Some(cmd) = self.buffer.pop_front() {
            if cmd.extrusion_length > 0.0 {
                self.statistics.update(cmd.extrusion_length, false);
            }
            self.write_line(&cmd.gcode)?;
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }

    /// The deterministic header block: name, copyright, and the effective
    /// configuration, followed by one blank line.
    fn write_header(&mut self) -> Result<()> {
        let mut header = String::new();
        header.push_str(&format!(
            "; Postprocessed by arcweld v{}\n",
            crate::VERSION
        ));
        header.push_str("; Copyright (C) 2026 - arcweld contributors\n");
        header.push_str(&format!("; resolution={:.2}mm\n", self.config.resolution_mm));
        header.push_str(&format!(
            "; path_tolerance={:.0}%\n",
            self.config.path_tolerance_percent * 100.0
        ));
        header.push_str(&format!("; max_radius={:.2}mm\n", self.config.max_radius_mm));
        if self.config.g90_g91_influences_extruder {
            header.push_str("; g90_influences_extruder=True\n");
        }
        if self.config.firmware_compensation_active() {
            header.push_str("; firmware_compensation=True\n");
            header.push_str(&format!(
                "; mm_per_arc_segment={:.2}mm\n",
                self.config.mm_per_arc_segment
            ));
            header.push_str(&format!(
                "; min_arc_segments={}\n",
                self.config.min_arc_segments
            ));
        }
        if self.config.allow_3d_arcs {
            header.push_str("; allow_3d_arcs=True\n");
        }
        if self.config.allow_dynamic_precision {
            header.push_str("; allow_dynamic_precision=True\n");
        }
        header.push_str(&format!(
            "; default_xyz_precision={}\n",
            self.config.default_xyz_precision
        ));
        header.push_str(&format!(
            "; default_e_precision={}\n",
            self.config.default_e_precision
        ));
        header.push('\n');
        self.writer.write_all(header.as_bytes())?;
        self.bytes_written += header.len() as u64;
        Ok(())
    }

    fn update_is_due(&mut self) -> bool {
        if self.last_update.elapsed().as_secs_f64() >= NOTIFICATION_PERIOD_SECONDS {
            self.last_update = Instant::now();
            return true;
        }
        false
    }

    fn send_progress(&mut self) -> bool {
        let progress = self.snapshot(self.bytes_read);
        (self.callback)(&progress)
    }

    fn snapshot(&self, source_position: u64) -> WelderProgress {
        let seconds_elapsed = self.start.elapsed().as_secs_f64();
        let percent_complete = if self.source_size > 0 {
            source_position as f64 / self.source_size as f64 * 100.0
        } else {
            0.0
        };
        let bytes_per_second = if seconds_elapsed > 0.0 {
            source_position as f64 / seconds_elapsed
        } else {
            0.0
        };
        let seconds_remaining = if bytes_per_second > 0.0 {
            self.source_size.saturating_sub(source_position) as f64 / bytes_per_second
        } else {
            0.0
        };
        let (compression_ratio, compression_percent) =
            if source_position > 0 && self.bytes_written > 0 {
                (
                    source_position as f64 / self.bytes_written as f64,
                    (1.0 - self.bytes_written as f64 / source_position as f64) * 100.0,
                )
            } else {
                (0.0, 0.0)
            };
        WelderProgress {
            lines_processed: self.lines_processed,
            gcodes_processed: self.gcodes_processed,
            points_compressed: self.points_compressed,
            arcs_created: self.arcs_created,
            num_firmware_compensations: self.arc.num_firmware_compensations() as u64,
            source_file_position: source_position,
            source_file_size: self.source_size,
            target_file_size: self.bytes_written,
            percent_complete,
            seconds_elapsed,
            seconds_remaining,
            compression_ratio,
            compression_percent,
            segment_statistics: Some(self.statistics.clone()),
        }
    }
}
