//! The commit buffer.
//!
//! While an arc is being built, the fate of each buffered source line is
//! undecided: it will either be written back verbatim (the candidate was
//! abandoned) or absorbed into the emitted G2/G3. [`CommandBuffer`] holds
//! those lines in order; the flush path drains from the front, the absorb
//! path pops from the back.

use std::collections::VecDeque;

/// A deferred source line, kept byte-faithful for the flush path.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwrittenCommand {
    /// The verbatim source line.
    pub gcode: String,
    /// Comment text carried by the line (feeds arc comment synthesis).
    pub comment: String,
    /// Extrusion-move length of the line (mm), zero for travel and non-moves.
    pub extrusion_length: f64,
}

impl UnwrittenCommand {
    /// Create a new unwritten command.
    pub fn new(gcode: String, comment: String, extrusion_length: f64) -> Self {
        Self {
            gcode,
            comment,
            extrusion_length,
        }
    }
}

/// Ordered queue of deferred lines.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: VecDeque<UnwrittenCommand>,
}

impl CommandBuffer {
    /// Create a buffer with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: VecDeque::with_capacity(capacity),
        }
    }

    /// Number of deferred lines.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Defer a line.
    pub fn push_back(&mut self, command: UnwrittenCommand) {
        self.commands.push_back(command);
    }

    /// Take the oldest deferred line (flush path).
    pub fn pop_front(&mut self) -> Option<UnwrittenCommand> {
        self.commands.pop_front()
    }

    /// Drop the newest deferred line (absorb path).
    pub fn pop_back(&mut self) -> Option<UnwrittenCommand> {
        self.commands.pop_back()
    }

    /// Read a deferred line by position without removing it.
    pub fn get(&self, index: usize) -> Option<&UnwrittenCommand> {
        self.commands.get(index)
    }

    /// Iterate the deferred lines in order.
    pub fn iter(&self) -> impl Iterator<Item = &UnwrittenCommand> {
        self.commands.iter()
    }

    /// Concatenate the distinct non-empty comments of the trailing `count`
    /// entries, in order, joined with `" - "`.
    pub fn merged_trailing_comments(&self, count: usize) -> String {
        let skip = self.commands.len().saturating_sub(count);
        let mut merged = String::new();
        for command in self.commands.iter().skip(skip) {
            if command.comment.is_empty() || command.comment == merged_last(&merged) {
                continue;
            }
            if !merged.is_empty() {
                merged.push_str(" - ");
            }
            merged.push_str(&command.comment);
        }
        merged
    }
}

/// The most recently appended comment fragment of a merged string.
fn merged_last(merged: &str) -> &str {
    match merged.rsplit_once(" - ") {
        Some((_, last)) => last,
        None => merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(gcode: &str, comment: &str) -> UnwrittenCommand {
        UnwrittenCommand::new(gcode.to_string(), comment.to_string(), 0.0)
    }

    #[test]
    fn test_fifo_order() {
        let mut buf = CommandBuffer::with_capacity(4);
        buf.push_back(cmd("G1 X1", ""));
        buf.push_back(cmd("G1 X2", ""));
        buf.push_back(cmd("G1 X3", ""));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.get(0).unwrap().gcode, "G1 X1");
        assert_eq!(buf.pop_front().unwrap().gcode, "G1 X1");
        assert_eq!(buf.pop_back().unwrap().gcode, "G1 X3");
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.get(0).unwrap().gcode, "G1 X2");
        assert!(buf.get(1).is_none());
    }

    #[test]
    fn test_merged_trailing_comments() {
        let mut buf = CommandBuffer::with_capacity(8);
        buf.push_back(cmd("G1 X0", "skirt"));
        buf.push_back(cmd("G1 X1", "outer wall"));
        buf.push_back(cmd("G1 X2", ""));
        buf.push_back(cmd("G1 X3", "outer wall"));
        buf.push_back(cmd("G1 X4", "infill"));
        // Only the trailing four entries participate.
        assert_eq!(buf.merged_trailing_comments(4), "outer wall - infill");
    }

    #[test]
    fn test_merged_comments_empty() {
        let mut buf = CommandBuffer::with_capacity(4);
        buf.push_back(cmd("G1 X0", ""));
        buf.push_back(cmd("G1 X1", ""));
        assert_eq!(buf.merged_trailing_comments(2), "");
    }

    #[test]
    fn test_merged_comments_distinct_repeats() {
        let mut buf = CommandBuffer::with_capacity(4);
        buf.push_back(cmd("G1 X0", "wall"));
        buf.push_back(cmd("G1 X1", "wall"));
        buf.push_back(cmd("G1 X2", "wall"));
        assert_eq!(buf.merged_trailing_comments(3), "wall");
    }
}
