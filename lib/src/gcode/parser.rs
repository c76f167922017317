//! G-code line parsing.
//!
//! Turns a single text line into a [`ParsedCommand`]: the command token
//! ("G1", "M104", or empty), a list of named numeric parameters, and the
//! trailing comment. Parsing never fails; anything the scanner cannot make
//! sense of degrades to an unknown command that passes through the welder
//! untouched.
//!
//! Parameters record the number of decimal digits observed in the source
//! text, which feeds the dynamic-precision option of the arc engine.

/// Commands whose semantics the welder (or its position tracker) understands.
const KNOWN_COMMANDS: &[&str] = &[
    "G0", "G1", "G2", "G3", "G20", "G21", "G28", "G90", "G91", "G92", "M82", "M83", "M206",
];

/// A single named numeric parameter, e.g. `X10.25`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter letter, uppercased (`X`, `Y`, `Z`, `E`, `F`, ...).
    pub name: char,
    /// Numeric value.
    pub value: f64,
    /// Decimal digits observed in the source text.
    pub precision: u8,
}

/// One parsed G-code line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCommand {
    /// The verbatim source line, with the line terminator stripped.
    pub gcode: String,
    /// Command token, uppercased (`G1`, `M104`), or empty for comment/blank lines.
    pub command: String,
    /// Named parameters in source order.
    pub parameters: Vec<Parameter>,
    /// Comment text following `;`, without the semicolon.
    pub comment: String,
    /// Whether the command is one the welder understands.
    pub is_known_command: bool,
    /// Whether the line carries no command at all.
    pub is_empty: bool,
}

impl ParsedCommand {
    /// Look up a parameter by letter.
    pub fn parameter(&self, name: char) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Parse one line of G-code.
pub fn parse_line(line: &str) -> ParsedCommand {
    let gcode = line.trim_end_matches(['\r', '\n']).to_string();

    // Split off the comment first; everything after ';' is opaque text.
    let (content, comment) = match gcode.split_once(';') {
        Some((code, comment)) => (code, comment.to_string()),
        None => (gcode.as_str(), String::new()),
    };
    let content = content.trim();

    if content.is_empty() {
        return ParsedCommand {
            gcode,
            comment,
            is_empty: true,
            ..Default::default()
        };
    }

    // Scan letter/number words. Slicer output is usually space separated, but
    // packed forms like "G1X10Y10" are legal and must parse identically.
    let bytes = content.as_bytes();
    let mut idx = 0;
    let mut words: Vec<(char, &str)> = Vec::new();
    let mut malformed = false;

    while idx < bytes.len() {
        let c = bytes[idx] as char;
        if c.is_ascii_whitespace() {
            idx += 1;
            continue;
        }
        if c == '*' {
            // Checksum tail; everything after it is not part of the command.
            break;
        }
        if !c.is_ascii_alphabetic() {
            malformed = true;
            break;
        }
        let start = idx + 1;
        let mut end = start;
        while end < bytes.len() {
            let n = bytes[end] as char;
            if n.is_ascii_digit() || n == '.' || n == '-' || n == '+' {
                end += 1;
            } else {
                break;
            }
        }
        words.push((c.to_ascii_uppercase(), &content[start..end]));
        idx = end;
    }

    // A leading line number ("N10 G1 ...") is not the command.
    if words.first().map(|w| w.0) == Some('N') {
        words.remove(0);
    }

    if malformed || words.is_empty() {
        return ParsedCommand {
            gcode,
            comment,
            is_empty: true,
            ..Default::default()
        };
    }

    // The first word is the command: letter plus integer code.
    let (cmd_letter, cmd_number) = words[0];
    let command = match cmd_number.parse::<i64>() {
        Ok(n) => format!("{}{}", cmd_letter, n),
        Err(_) => {
            // A command with no usable number (e.g. a bare "T") is unknown.
            format!("{}{}", cmd_letter, cmd_number)
        }
    };
    let is_known_command = KNOWN_COMMANDS.contains(&command.as_str());

    let mut parameters = Vec::with_capacity(words.len() - 1);
    for &(name, text) in &words[1..] {
        if text.is_empty() {
            // Valueless words are legal for some commands ("G28 X").
            parameters.push(Parameter {
                name,
                value: 0.0,
                precision: 0,
            });
        } else if let Ok(value) = text.parse::<f64>() {
            parameters.push(Parameter {
                name,
                value,
                precision: decimal_digits(text),
            });
        }
    }

    ParsedCommand {
        gcode,
        command,
        parameters,
        comment,
        is_known_command,
        is_empty: false,
    }
}

/// Count the decimal digits in a numeric literal, e.g. `"10.25"` -> 2.
fn decimal_digits(text: &str) -> u8 {
    match text.split_once('.') {
        Some((_, frac)) => frac.chars().take_while(|c| c.is_ascii_digit()).count() as u8,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_line() {
        let cmd = parse_line("G1 X10.5 Y20.0 E0.1");
        assert_eq!(cmd.command, "G1");
        assert!(cmd.is_known_command);
        assert!(!cmd.is_empty);
        assert_eq!(cmd.parameters.len(), 3);
        assert_eq!(cmd.parameter('X').unwrap().value, 10.5);
        assert_eq!(cmd.parameter('Y').unwrap().value, 20.0);
        assert_eq!(cmd.parameter('E').unwrap().value, 0.1);
    }

    #[test]
    fn test_packed_words() {
        let cmd = parse_line("G1X10Y-20.25E.5");
        assert_eq!(cmd.command, "G1");
        assert_eq!(cmd.parameter('X').unwrap().value, 10.0);
        assert_eq!(cmd.parameter('Y').unwrap().value, -20.25);
        assert_eq!(cmd.parameter('E').unwrap().value, 0.5);
    }

    #[test]
    fn test_comment_line() {
        let cmd = parse_line("; just a comment");
        assert!(cmd.is_empty);
        assert_eq!(cmd.command, "");
        assert_eq!(cmd.comment, " just a comment");
    }

    #[test]
    fn test_trailing_comment() {
        let cmd = parse_line("G0 Z10 ; move up");
        assert_eq!(cmd.command, "G0");
        assert_eq!(cmd.comment, " move up");
        assert_eq!(cmd.parameter('Z').unwrap().value, 10.0);
    }

    #[test]
    fn test_blank_line() {
        let cmd = parse_line("");
        assert!(cmd.is_empty);
        assert!(cmd.comment.is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let cmd = parse_line("M104 S200");
        assert_eq!(cmd.command, "M104");
        assert!(!cmd.is_known_command);
        assert!(!cmd.is_empty);
    }

    #[test]
    fn test_lowercase_input() {
        let cmd = parse_line("g1 x5 y6");
        assert_eq!(cmd.command, "G1");
        assert!(cmd.parameter('X').is_some());
    }

    #[test]
    fn test_crlf_stripped() {
        let cmd = parse_line("G1 X1\r");
        assert_eq!(cmd.gcode, "G1 X1");
    }

    #[test]
    fn test_leading_zero_padding() {
        // "G01" normalizes to "G1".
        let cmd = parse_line("G01 X5");
        assert_eq!(cmd.command, "G1");
        assert!(cmd.is_known_command);
    }

    #[test]
    fn test_precision_tracking() {
        let cmd = parse_line("G1 X10.123 Y7 E0.12345");
        assert_eq!(cmd.parameter('X').unwrap().precision, 3);
        assert_eq!(cmd.parameter('Y').unwrap().precision, 0);
        assert_eq!(cmd.parameter('E').unwrap().precision, 5);
    }

    #[test]
    fn test_line_number_and_checksum() {
        let cmd = parse_line("N42 G1 X5 Y6 *93");
        assert_eq!(cmd.command, "G1");
        assert_eq!(cmd.parameter('X').unwrap().value, 5.0);
        assert_eq!(cmd.parameter('Y').unwrap().value, 6.0);
    }

    #[test]
    fn test_garbage_degrades_to_empty() {
        let cmd = parse_line("@#!$");
        assert!(cmd.is_empty);
        assert_eq!(cmd.gcode, "@#!$");
    }

    #[test]
    fn test_verbatim_preserved() {
        let line = "G1  X1.0   Y2.0 ; odd   spacing";
        let cmd = parse_line(line);
        assert_eq!(cmd.gcode, line);
    }
}
