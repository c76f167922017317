//! Modal-state position tracking.
//!
//! The tracker interprets the modal semantics of the source stream: absolute
//! versus relative positioning (`G90`/`G91`), extruder mode (`M82`/`M83`),
//! workspace offsets (`G92`), firmware offsets (`M206`), units (`G20`/`G21`)
//! and homing (`G28`). For every processed command it produces a fresh
//! [`Position`] snapshot; the previous snapshot stays available so callers can
//! compare before/after state, and [`PositionTracker::undo_update`] rolls the
//! tracker back exactly one step when a command has to be re-processed.
//!
//! Coordinates are tracked in the units of the source file and are never
//! converted.

use crate::gcode::parser::ParsedCommand;
use crate::geometry::{is_equal, EPSILON};
use std::collections::VecDeque;

/// A snapshot of the full printer state after one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Workspace coordinates.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Workspace offsets established by `G92`.
    pub x_offset: f64,
    pub y_offset: f64,
    pub z_offset: f64,
    /// Firmware home offsets established by `M206`.
    pub x_firmware_offset: f64,
    pub y_firmware_offset: f64,
    /// Absolute filament position (never reset by `G92 E`).
    pub e: f64,
    /// `G92 E` offset.
    pub e_offset: f64,
    /// Filament delta produced by the last command.
    pub e_relative: f64,
    /// Modal feedrate.
    pub f: f64,
    /// XYZ axes in relative mode (`G91`).
    pub is_relative: bool,
    /// Extruder axis in relative mode (`M83`).
    pub is_extruder_relative: bool,
    /// Units are millimeters (`G21`).
    pub is_metric: bool,
    /// Slicer feature marker from the most recent `TYPE:`/`FEATURE:` comment.
    pub feature_tag: Option<String>,
    /// Whether the last command changed X or Y.
    pub has_xy_changed: bool,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            x_offset: 0.0,
            y_offset: 0.0,
            z_offset: 0.0,
            x_firmware_offset: 0.0,
            y_firmware_offset: 0.0,
            e: 0.0,
            e_offset: 0.0,
            e_relative: 0.0,
            f: 0.0,
            is_relative: false,
            is_extruder_relative: false,
            is_metric: true,
            feature_tag: None,
            has_xy_changed: false,
        }
    }
}

impl Position {
    /// X coordinate as the source file would write it.
    #[inline]
    pub fn gcode_x(&self) -> f64 {
        self.x - self.x_offset
    }

    /// Y coordinate as the source file would write it.
    #[inline]
    pub fn gcode_y(&self) -> f64 {
        self.y - self.y_offset
    }

    /// Z coordinate as the source file would write it.
    #[inline]
    pub fn gcode_z(&self) -> f64 {
        self.z - self.z_offset
    }

    /// E value as the source file would write it in absolute mode.
    #[inline]
    pub fn gcode_e(&self) -> f64 {
        self.e - self.e_offset
    }

    /// The last command pushed filament forward.
    #[inline]
    pub fn is_extruding(&self) -> bool {
        self.e_relative > EPSILON
    }

    /// The last command pulled filament back.
    #[inline]
    pub fn is_retracting(&self) -> bool {
        self.e_relative < -EPSILON
    }

    /// All workspace and firmware offsets match another snapshot.
    pub fn offsets_equal(&self, other: &Position) -> bool {
        is_equal(self.x_offset, other.x_offset)
            && is_equal(self.y_offset, other.y_offset)
            && is_equal(self.z_offset, other.z_offset)
            && is_equal(self.x_firmware_offset, other.x_firmware_offset)
            && is_equal(self.y_firmware_offset, other.y_firmware_offset)
    }
}

/// Applies commands to positions and keeps a bounded history of snapshots.
#[derive(Debug)]
pub struct PositionTracker {
    positions: VecDeque<Position>,
    max_positions: usize,
    g90_influences_extruder: bool,
}

impl PositionTracker {
    /// Create a tracker with a history bound of `buffer_size` snapshots.
    pub fn new(g90_influences_extruder: bool, buffer_size: usize) -> Self {
        let mut positions = VecDeque::with_capacity(buffer_size.max(2));
        // Seed with two identical snapshots so previous() is always valid.
        positions.push_back(Position::default());
        positions.push_back(Position::default());
        Self {
            positions,
            max_positions: buffer_size.max(2),
            g90_influences_extruder,
        }
    }

    /// The state after the most recently processed command.
    pub fn current(&self) -> &Position {
        self.positions.back().expect("tracker history is never empty")
    }

    /// The state before the most recently processed command.
    pub fn previous(&self) -> &Position {
        let n = self.positions.len();
        &self.positions[n - 2]
    }

    /// Process one command, producing a new current snapshot.
    pub fn update(&mut self, cmd: &ParsedCommand) {
        let mut next = self.current().clone();
        next.e_relative = 0.0;
        next.has_xy_changed = false;
        self.apply(cmd, &mut next);
        self.positions.push_back(next);
        while self.positions.len() > self.max_positions {
            self.positions.pop_front();
        }
    }

    /// Roll back exactly one `update`. The rolled-back snapshot is discarded.
    pub fn undo_update(&mut self) {
        if self.positions.len() > 2 {
            self.positions.pop_back();
        }
    }

    fn apply(&self, cmd: &ParsedCommand, next: &mut Position) {
        // Feature markers ride on comments and can appear on any line.
        let trimmed = cmd.comment.trim();
        if trimmed.starts_with("TYPE:") || trimmed.starts_with("FEATURE:") {
            next.feature_tag = Some(trimmed.to_string());
        }

        if cmd.is_empty {
            return;
        }

        match cmd.command.as_str() {
            "G0" | "G1" | "G2" | "G3" => self.apply_move(cmd, next),
            "G20" => next.is_metric = false,
            "G21" => next.is_metric = true,
            "G28" => apply_home(cmd, next),
            "G90" => {
                next.is_relative = false;
                if self.g90_influences_extruder {
                    next.is_extruder_relative = false;
                }
            }
            "G91" => {
                next.is_relative = true;
                if self.g90_influences_extruder {
                    next.is_extruder_relative = true;
                }
            }
            "G92" => apply_set_position(cmd, next),
            "M82" => next.is_extruder_relative = false,
            "M83" => next.is_extruder_relative = true,
            "M206" => apply_firmware_offset(cmd, next),
            _ => {}
        }
    }

    fn apply_move(&self, cmd: &ParsedCommand, next: &mut Position) {
        let prev_x = next.x;
        let prev_y = next.y;
        for p in &cmd.parameters {
            match p.name {
                'X' => {
                    next.x = if next.is_relative {
                        next.x + p.value
                    } else {
                        next.x_offset + p.value
                    }
                }
                'Y' => {
                    next.y = if next.is_relative {
                        next.y + p.value
                    } else {
                        next.y_offset + p.value
                    }
                }
                'Z' => {
                    next.z = if next.is_relative {
                        next.z + p.value
                    } else {
                        next.z_offset + p.value
                    }
                }
                'E' => {
                    let old_e = next.e;
                    next.e = if next.is_extruder_relative {
                        next.e + p.value
                    } else {
                        next.e_offset + p.value
                    };
                    next.e_relative = next.e - old_e;
                }
                'F' => next.f = p.value,
                _ => {}
            }
        }
        next.has_xy_changed = !is_equal(next.x, prev_x) || !is_equal(next.y, prev_y);
    }
}

fn apply_set_position(cmd: &ParsedCommand, next: &mut Position) {
    if cmd.parameters.is_empty() {
        // Bare G92 zeroes every axis.
        next.x_offset = next.x;
        next.y_offset = next.y;
        next.z_offset = next.z;
        next.e_offset = next.e;
        return;
    }
    for p in &cmd.parameters {
        match p.name {
            'X' => next.x_offset = next.x - p.value,
            'Y' => next.y_offset = next.y - p.value,
            'Z' => next.z_offset = next.z - p.value,
            'E' => next.e_offset = next.e - p.value,
            _ => {}
        }
    }
}

fn apply_home(cmd: &ParsedCommand, next: &mut Position) {
    let axes: Vec<char> = cmd.parameters.iter().map(|p| p.name).collect();
    let all = axes.is_empty();
    if all || axes.contains(&'X') {
        next.x = 0.0;
        next.x_offset = 0.0;
    }
    if all || axes.contains(&'Y') {
        next.y = 0.0;
        next.y_offset = 0.0;
    }
    if all || axes.contains(&'Z') {
        next.z = 0.0;
        next.z_offset = 0.0;
    }
}

fn apply_firmware_offset(cmd: &ParsedCommand, next: &mut Position) {
    for p in &cmd.parameters {
        match p.name {
            'X' => next.x_firmware_offset = p.value,
            'Y' => next.y_firmware_offset = p.value,
            _ => {}
        }
    }
}
