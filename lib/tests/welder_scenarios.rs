//! End-to-end welding scenarios over real files.

use arcweld::{parse_line, ArcWelder, PositionTracker, WelderConfig};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Run a welder over `source` written to a temp file; returns the output text
/// and the results.
fn weld_file(source: &str, config: WelderConfig) -> (String, arcweld::WelderResults) {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.gcode");
    let output = dir.path().join("output.gcode");
    fs::write(&input, source).unwrap();

    let welder = ArcWelder::new(config);
    let results = welder.process(&input, &output).unwrap();
    assert!(results.success, "welding failed: {}", results.message);
    (fs::read_to_string(&output).unwrap(), results)
}

/// Output lines with the header block stripped.
fn body(output: &str) -> Vec<String> {
    let mut lines = output.lines();
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
    }
    lines.map(|l| l.to_string()).collect()
}

fn arc_lines(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| l.starts_with("G2") || l.starts_with("G3"))
        .cloned()
        .collect()
}

/// Final absolute extruder position after replaying a stream.
fn final_e(text: &str) -> f64 {
    let mut tracker = PositionTracker::new(false, 10);
    for line in text.lines() {
        tracker.update(&parse_line(line));
    }
    tracker.current().e
}

/// 36 G1 moves sampled from a radius-10 arc from (10, 0) to (0, 10).
fn quarter_circle_source() -> String {
    let mut src = String::from("G90\nM82\nG92 X10 Y0\nG1 F1800\n");
    for i in 1..=36 {
        let angle = (i as f64) * std::f64::consts::PI / 72.0;
        src.push_str(&format!(
            "G1 X{:.4} Y{:.4} E{:.2}\n",
            10.0 * angle.cos(),
            10.0 * angle.sin(),
            0.01 * i as f64
        ));
    }
    src
}

#[test]
fn perfect_quarter_circle_becomes_one_arc() {
    let source = quarter_circle_source();
    let (output, results) = weld_file(&source, WelderConfig::default());
    let lines = body(&output);
    let arcs = arc_lines(&lines);

    assert_eq!(arcs.len(), 1);
    assert_eq!(results.progress.arcs_created, 1);
    assert_eq!(results.progress.points_compressed, 36);
    assert_eq!(arcs[0], "G3 X0 Y10 I-10 J0 E0.36");

    // The non-move prologue passes through verbatim, in order, before the arc.
    let prologue: Vec<&str> = vec!["G90", "M82", "G92 X10 Y0", "G1 F1800"];
    let positions: Vec<usize> = prologue
        .iter()
        .map(|p| lines.iter().position(|l| l == p).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(positions[3] < lines.iter().position(|l| l.starts_with("G3")).unwrap());
}

#[test]
fn emitted_arc_stays_within_tolerance() {
    let source = quarter_circle_source();
    let (output, _) = weld_file(&source, WelderConfig::default());
    let arc = arc_lines(&body(&output)).remove(0);
    let cmd = parse_line(&arc);

    // Reconstruct the circle from the arc's I/J offsets; start point is (10, 0).
    let i = cmd.parameter('I').unwrap().value;
    let j = cmd.parameter('J').unwrap().value;
    let center = (10.0 + i, 0.0 + j);
    let radius = (i * i + j * j).sqrt();

    // Every original vertex stays inside the tolerance band.
    for line in source.lines() {
        let cmd = parse_line(line);
        if cmd.command != "G1" {
            continue;
        }
        let (Some(x), Some(y)) = (cmd.parameter('X'), cmd.parameter('Y')) else {
            continue;
        };
        let dist = ((x.value - center.0).powi(2) + (y.value - center.1).powi(2)).sqrt();
        assert!(
            (dist - radius).abs() <= 0.05 + 1e-3,
            "vertex ({}, {}) deviates {:.5}",
            x.value,
            y.value,
            (dist - radius).abs()
        );
    }
}

#[test]
fn straight_line_passes_through_verbatim() {
    let mut source = String::from("G90\nM82\n");
    for i in 1..=20 {
        source.push_str(&format!("G1 X{}.0 Y5.0 E{:.2}\n", i, 0.01 * i as f64));
    }
    let (output, results) = weld_file(&source, WelderConfig::default());
    let lines = body(&output);

    assert_eq!(results.progress.arcs_created, 0);
    assert!(arc_lines(&lines).is_empty());
    for line in source.lines() {
        assert!(
            lines.iter().any(|l| l == line),
            "source line lost: {}",
            line
        );
    }
}

#[test]
fn travel_between_arcs_produces_two_arcs() {
    let mut source = String::from("G90\nM82\nG92 X10 Y0 Z0.2\nG1 F1800\n");
    // First arc: radius 10 around the origin, counter-clockwise.
    for i in 1..=20 {
        let angle = (i as f64).to_radians() * 2.5;
        source.push_str(&format!(
            "G1 X{:.4} Y{:.4} E{:.2}\n",
            10.0 * angle.cos(),
            10.0 * angle.sin(),
            0.01 * i as f64
        ));
    }
    // Z-lifted rapid to the second circle.
    source.push_str("G0 X30 Y0 Z0.4\n");
    // Second arc: radius 5 around (35, 0), clockwise from (30, 0).
    for i in 1..=20 {
        let angle = 180.0_f64.to_radians() - (i as f64).to_radians() * 5.0;
        source.push_str(&format!(
            "G1 X{:.4} Y{:.4} E{:.2}\n",
            35.0 + 5.0 * angle.cos(),
            5.0 * angle.sin(),
            0.2 + 0.01 * i as f64
        ));
    }

    let (output, results) = weld_file(&source, WelderConfig::default());
    let lines = body(&output);
    let arcs = arc_lines(&lines);

    assert_eq!(results.progress.arcs_created, 2);
    assert_eq!(arcs.len(), 2);
    assert!(arcs[0].starts_with("G3"), "first arc: {}", arcs[0]);
    assert!(arcs[1].starts_with("G2"), "second arc: {}", arcs[1]);
    assert_eq!(results.progress.points_compressed, 40);

    // The travel survives verbatim, between the two arcs.
    let travel = lines.iter().position(|l| l == "G0 X30 Y0 Z0.4").unwrap();
    let first = lines.iter().position(|l| l.starts_with("G3")).unwrap();
    let second = lines.iter().position(|l| l.starts_with("G2")).unwrap();
    assert!(first < travel && travel < second);
}

#[test]
fn feedrate_change_splits_the_arc() {
    let mut source = String::from("G90\nM82\nG92 X10 Y0\nG1 F1500\n");
    for i in 1..=20 {
        let angle = (i as f64).to_radians() * 2.5;
        let f = if i == 11 { " F3000" } else { "" };
        source.push_str(&format!(
            "G1 X{:.4} Y{:.4} E{:.2}{}\n",
            10.0 * angle.cos(),
            10.0 * angle.sin(),
            0.01 * i as f64,
            f
        ));
    }
    let (output, results) = weld_file(&source, WelderConfig::default());
    let arcs = arc_lines(&body(&output));

    assert_eq!(results.progress.arcs_created, 2);
    assert_eq!(arcs.len(), 2);
    assert!(!arcs[0].contains(" F"), "first arc keeps F1500: {}", arcs[0]);
    assert!(arcs[1].ends_with(" F3000"), "second arc: {}", arcs[1]);
}

#[test]
fn helix_becomes_one_arc_with_z_endpoint() {
    let mut source = String::from("G90\nM82\nG92 X10 Y0 Z0.2\nG1 F1800\n");
    for i in 1..=30 {
        let angle = (i as f64) * std::f64::consts::PI / 30.0;
        source.push_str(&format!(
            "G1 X{:.4} Y{:.4} Z{:.2} E{:.2}\n",
            10.0 * angle.cos(),
            10.0 * angle.sin(),
            0.2 + 0.01 * i as f64,
            0.01 * i as f64
        ));
    }
    let config = WelderConfig {
        allow_3d_arcs: true,
        ..WelderConfig::default()
    };
    let (output, results) = weld_file(&source, config);
    let arcs = arc_lines(&body(&output));

    assert_eq!(results.progress.arcs_created, 1);
    assert_eq!(arcs.len(), 1);
    assert_eq!(arcs[0], "G3 X-10 Y0 Z0.5 I-10 J0 E0.3");
}

#[test]
fn radius_above_maximum_is_left_alone() {
    let mut source = String::from("G90\nM82\nG92 X150 Y0\nG1 F1800\n");
    for i in 1..=15 {
        let angle = (i as f64) * 0.01;
        source.push_str(&format!(
            "G1 X{:.4} Y{:.4} E{:.2}\n",
            150.0 * angle.cos(),
            150.0 * angle.sin(),
            0.01 * i as f64
        ));
    }
    let config = WelderConfig {
        max_radius_mm: 100.0,
        ..WelderConfig::default()
    };
    let (output, results) = weld_file(&source, config);
    let lines = body(&output);

    assert_eq!(results.progress.arcs_created, 0);
    assert!(arc_lines(&lines).is_empty());
    for line in source.lines() {
        assert!(lines.iter().any(|l| l == line), "source line lost: {}", line);
    }
}

#[test]
fn extrusion_is_conserved() {
    let source = quarter_circle_source();
    let (output, _) = weld_file(&source, WelderConfig::default());
    assert!((final_e(&source) - final_e(&output)).abs() < 1e-5);
}

#[test]
fn output_is_smaller_when_arcs_are_created() {
    let source = quarter_circle_source();
    let (_, results) = weld_file(&source, WelderConfig::default());
    assert!(results.progress.arcs_created > 0);
    assert!(results.progress.target_file_size < results.progress.source_file_size);
}

#[test]
fn welding_its_own_output_is_a_fixed_point() {
    let source = quarter_circle_source();
    let (first, _) = weld_file(&source, WelderConfig::default());
    let (second, results) = weld_file(&first, WelderConfig::default());

    // No further arcs, and the first output survives untouched below the new
    // header.
    assert_eq!(results.progress.arcs_created, 0);
    assert!(second.ends_with(&first));
}

#[test]
fn missing_source_reports_failure_without_error() {
    let dir = tempdir().unwrap();
    let welder = ArcWelder::new(WelderConfig::default());
    let results = welder
        .process(
            Path::new("/nonexistent/input.gcode"),
            &dir.path().join("out.gcode"),
        )
        .unwrap();
    assert!(!results.success);
    assert!(!results.cancelled);
    assert_eq!(results.message, "Unable to open the source file.");
}

#[test]
fn unwritable_target_reports_failure_without_error() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.gcode");
    fs::write(&input, "G1 X1 Y1\n").unwrap();
    let welder = ArcWelder::new(WelderConfig::default());
    let results = welder
        .process(&input, Path::new("/nonexistent/dir/out.gcode"))
        .unwrap();
    assert!(!results.success);
    assert_eq!(results.message, "Unable to open the target file.");
}

#[test]
fn crlf_input_is_handled() {
    let source = quarter_circle_source().replace('\n', "\r\n");
    let (output, results) = weld_file(&source, WelderConfig::default());
    assert_eq!(results.progress.arcs_created, 1);
    assert!(arc_lines(&body(&output))[0].starts_with("G3"));
}

#[test]
fn firmware_compensation_counts_rejections() {
    // Tiny radius-2 arc; with a 1mm firmware step a 40-segment floor cannot
    // be met.
    let mut source = String::from("G90\nM82\nG92 X2 Y0\nG1 F1800\n");
    for i in 1..=20 {
        let angle = (i as f64).to_radians() * 4.0;
        source.push_str(&format!(
            "G1 X{:.4} Y{:.4} E{:.2}\n",
            2.0 * angle.cos(),
            2.0 * angle.sin(),
            0.01 * i as f64
        ));
    }
    let config = WelderConfig {
        min_arc_segments: 40,
        mm_per_arc_segment: 1.0,
        ..WelderConfig::default()
    };
    let (output, results) = weld_file(&source, config);

    assert_eq!(results.progress.arcs_created, 0);
    assert!(results.progress.num_firmware_compensations > 0);
    assert!(arc_lines(&body(&output)).is_empty());
}
