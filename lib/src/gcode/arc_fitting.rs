//! Incremental arc fitting.
//!
//! [`ArcFitter`] maintains the current candidate arc: an ordered sequence of
//! toolhead points together with the best-fit circle through them. Points are
//! offered one at a time with [`ArcFitter::try_add_point`]; a point is
//! accepted only if the whole sequence still fits a single circular arc
//! within the configured tolerances, so a rejection leaves the fitter
//! unchanged and the caller free to commit or abandon the candidate.
//!
//! Fitting works on the XY plane. With `allow_3d_arcs` the Z axis may rise or
//! fall monotonically across the sequence and the emitted arc carries an
//! explicit Z endpoint (a helical move).

use crate::geometry::{cross2f, is_equal, is_zero, normalize_angle, Circle, PointF, EPSILON};
use log::debug;
use std::f64::consts::PI;

/// Default circle-fit tolerance band half-width (mm).
pub const DEFAULT_RESOLUTION_MM: f64 = 0.05;
/// Default chord-midpoint deviation allowance, as a fraction of chord length.
pub const DEFAULT_PATH_TOLERANCE_PERCENT: f64 = 0.05;
/// Default maximum arc radius (mm). Near-straight paths fit enormous circles;
/// anything larger than this is left as line segments.
pub const DEFAULT_MAX_RADIUS_MM: f64 = 1_000_000.0;
/// Default number of decimal digits for X/Y/Z/I/J output.
pub const DEFAULT_XYZ_PRECISION: u8 = 3;
/// Default number of decimal digits for E output.
pub const DEFAULT_E_PRECISION: u8 = 5;
/// Fewest points that can form an emittable arc.
pub const DEFAULT_MIN_SEGMENTS: usize = 3;

/// Hard ceiling for dynamic precision.
const MAX_PRECISION: u8 = 6;

/// The toolhead position reached by one linear move, with the incremental
/// extrusion spent reaching it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrinterPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Filament pushed (or pulled, negative) by the move that reached this point.
    pub e_relative: f64,
    /// Length of the move that reached this point (mm).
    pub distance: f64,
}

impl PrinterPoint {
    /// Create a new printer point.
    pub const fn new(x: f64, y: f64, z: f64, e_relative: f64, distance: f64) -> Self {
        Self {
            x,
            y,
            z,
            e_relative,
            distance,
        }
    }

    /// Project onto the XY plane.
    #[inline]
    pub fn xy(&self) -> PointF {
        PointF::new(self.x, self.y)
    }
}

/// Direction of an arc (clockwise or counter-clockwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    /// Clockwise arc (G2)
    Clockwise,
    /// Counter-clockwise arc (G3)
    CounterClockwise,
}

impl ArcDirection {
    /// Returns the G-code command for this direction.
    pub fn gcode_command(&self) -> &'static str {
        match self {
            ArcDirection::Clockwise => "G2",
            ArcDirection::CounterClockwise => "G3",
        }
    }
}

/// Configuration for arc fitting.
#[derive(Debug, Clone)]
pub struct ArcFittingConfig {
    /// Half-width of the circle-fit tolerance band (mm). Every accepted point
    /// must lie within this distance of the fitted circle.
    pub resolution_mm: f64,

    /// Maximum deviation of any original chord midpoint from the fitted
    /// circle, as a fraction of that chord's length.
    pub path_tolerance_percent: f64,

    /// Maximum arc radius (mm).
    pub max_radius_mm: f64,

    /// If > 0 together with `mm_per_arc_segment`, the firmware's predicted
    /// segmentation of an emitted arc must produce at least this many
    /// segments.
    pub min_arc_segments: usize,

    /// The firmware's segmentation step (mm), used with `min_arc_segments`.
    pub mm_per_arc_segment: f64,

    /// Permit helical (Z-varying) arcs.
    pub allow_3d_arcs: bool,

    /// Fewest points that make the candidate emittable.
    pub min_segments: usize,

    /// Most points a single candidate may hold.
    pub max_segments: usize,

    /// Initial decimal-digit precision for X/Y/Z/I/J output.
    pub default_xyz_precision: u8,

    /// Initial decimal-digit precision for E output.
    pub default_e_precision: u8,
}

impl Default for ArcFittingConfig {
    fn default() -> Self {
        Self {
            resolution_mm: DEFAULT_RESOLUTION_MM,
            path_tolerance_percent: DEFAULT_PATH_TOLERANCE_PERCENT,
            max_radius_mm: DEFAULT_MAX_RADIUS_MM,
            min_arc_segments: 0,
            mm_per_arc_segment: 0.0,
            allow_3d_arcs: false,
            min_segments: DEFAULT_MIN_SEGMENTS,
            max_segments: 995,
            default_xyz_precision: DEFAULT_XYZ_PRECISION,
            default_e_precision: DEFAULT_E_PRECISION,
        }
    }
}

impl ArcFittingConfig {
    /// Builder: set the circle-fit tolerance.
    pub fn resolution_mm(mut self, resolution_mm: f64) -> Self {
        self.resolution_mm = resolution_mm;
        self
    }

    /// Builder: set the chord-midpoint tolerance fraction.
    pub fn path_tolerance_percent(mut self, tolerance: f64) -> Self {
        self.path_tolerance_percent = tolerance;
        self
    }

    /// Builder: set the maximum radius.
    pub fn max_radius_mm(mut self, radius: f64) -> Self {
        self.max_radius_mm = radius;
        self
    }

    /// Builder: enable helical arcs.
    pub fn allow_3d_arcs(mut self, allow: bool) -> Self {
        self.allow_3d_arcs = allow;
        self
    }

    /// Builder: set the firmware-compensation floor.
    pub fn firmware_compensation(
        mut self,
        min_arc_segments: usize,
        mm_per_arc_segment: f64,
    ) -> Self {
        self.min_arc_segments = min_arc_segments;
        self.mm_per_arc_segment = mm_per_arc_segment;
        self
    }
}

/// Result of validating a candidate point sequence against one circle.
struct CandidateFit {
    circle: Circle,
    direction: ArcDirection,
    sweep: f64,
}

/// The incremental arc candidate.
#[derive(Debug)]
pub struct ArcFitter {
    config: ArcFittingConfig,
    points: Vec<PrinterPoint>,
    circle: Option<Circle>,
    direction: Option<ArcDirection>,
    sweep: f64,
    shape_length: f64,
    e_relative_total: f64,
    xyz_precision: u8,
    e_precision: u8,
    num_firmware_compensations: usize,
}

impl ArcFitter {
    /// Create an empty fitter with the given configuration.
    pub fn new(config: ArcFittingConfig) -> Self {
        let xyz_precision = config.default_xyz_precision.min(MAX_PRECISION);
        let e_precision = config.default_e_precision.min(MAX_PRECISION);
        Self {
            config,
            points: Vec::new(),
            circle: None,
            direction: None,
            sweep: 0.0,
            shape_length: 0.0,
            e_relative_total: 0.0,
            xyz_precision,
            e_precision,
            num_firmware_compensations: 0,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ArcFittingConfig {
        &self.config
    }

    /// Number of accepted points.
    pub fn num_segments(&self) -> usize {
        self.points.len()
    }

    /// Fewest points that make the candidate emittable.
    pub fn min_segments(&self) -> usize {
        self.config.min_segments
    }

    /// Arcs rejected solely by the firmware-compensation floor.
    pub fn num_firmware_compensations(&self) -> usize {
        self.num_firmware_compensations
    }

    /// Current decimal-digit precision for X/Y/Z/I/J output.
    pub fn xyz_precision(&self) -> u8 {
        self.xyz_precision
    }

    /// Current decimal-digit precision for E output.
    pub fn e_precision(&self) -> u8 {
        self.e_precision
    }

    /// Raise the XYZ output precision to match an observed input precision.
    pub fn update_xyz_precision(&mut self, precision: u8) {
        self.xyz_precision = self.xyz_precision.max(precision.min(MAX_PRECISION));
    }

    /// Raise the E output precision to match an observed input precision.
    pub fn update_e_precision(&mut self, precision: u8) {
        self.e_precision = self.e_precision.max(precision.min(MAX_PRECISION));
    }

    /// Sum of the chord lengths of the accepted points.
    pub fn shape_length(&self) -> f64 {
        self.shape_length
    }

    /// Length of the fitted arc (radius times swept angle).
    pub fn arc_length(&self) -> f64 {
        match self.circle {
            Some(circle) => circle.radius * self.sweep,
            None => 0.0,
        }
    }

    /// Total relative extrusion across the accepted moves. The first point is
    /// the arc's start position and contributes nothing.
    pub fn e_relative_total(&self) -> f64 {
        self.e_relative_total
    }

    /// The candidate has enough points and a determined circle to be emitted.
    /// With firmware compensation active, `min_arc_segments` also bounds the
    /// point count from below.
    pub fn is_shape(&self) -> bool {
        if self.points.len() < self.config.min_segments {
            return false;
        }
        if self.config.min_arc_segments > 0
            && self.config.mm_per_arc_segment > 0.0
            && self.points.len() < self.config.min_arc_segments
        {
            return false;
        }
        self.circle.is_some()
    }

    /// Discard the candidate. Precision state and the firmware-compensation
    /// counter survive; they are properties of the stream, not the candidate.
    pub fn clear(&mut self) {
        self.points.clear();
        self.circle = None;
        self.direction = None;
        self.sweep = 0.0;
        self.shape_length = 0.0;
        self.e_relative_total = 0.0;
    }

    /// Offer a point to the candidate. Returns `true` iff the point was
    /// accepted; on `false` the fitter is unchanged.
    pub fn try_add_point(&mut self, p: PrinterPoint) -> bool {
        if self.points.len() >= self.config.max_segments {
            debug!(
                "arc rejected: segment count would exceed {}",
                self.config.max_segments
            );
            return false;
        }

        let chord = match self.points.last() {
            Some(last) => {
                let d = if self.config.allow_3d_arcs {
                    let dz = p.z - last.z;
                    (last.xy().distance_squared(&p.xy()) + dz * dz).sqrt()
                } else {
                    last.xy().distance(&p.xy())
                };
                if is_zero(d) {
                    debug!("arc rejected: duplicate point ({}, {})", p.x, p.y);
                    return false;
                }
                if !self.config.allow_3d_arcs && !is_equal(p.z, last.z) {
                    debug!("arc rejected: z changed from {} to {}", last.z, p.z);
                    return false;
                }
                if self.config.allow_3d_arcs && !self.z_is_monotonic(&p) {
                    debug!("arc rejected: z reversed direction at {}", p.z);
                    return false;
                }
                d
            }
            None => 0.0,
        };

        if self.points.len() < 2 {
            if !self.points.is_empty() {
                self.e_relative_total += p.e_relative;
            }
            self.shape_length += chord;
            self.points.push(p);
            return true;
        }

        match self.evaluate_candidate(&p) {
            Some(fit) => {
                self.e_relative_total += p.e_relative;
                self.shape_length += chord;
                self.points.push(p);
                self.circle = Some(fit.circle);
                self.direction = Some(fit.direction);
                self.sweep = fit.sweep;
                true
            }
            None => false,
        }
    }

    /// Z must keep moving the way it has been moving.
    fn z_is_monotonic(&self, p: &PrinterPoint) -> bool {
        let first = match self.points.first() {
            Some(q) => q,
            None => return true,
        };
        let last = self.points[self.points.len() - 1];
        let so_far = last.z - first.z;
        let step = p.z - last.z;
        if so_far.abs() < EPSILON || step.abs() < EPSILON {
            return true;
        }
        so_far.signum() == step.signum()
    }

    /// Validate the accepted points plus `p` against a single circle.
    fn evaluate_candidate(&mut self, p: &PrinterPoint) -> Option<CandidateFit> {
        let pts: Vec<PointF> = self
            .points
            .iter()
            .map(|q| q.xy())
            .chain(std::iter::once(p.xy()))
            .collect();
        let n = pts.len();

        let circle = match Circle::from_three_points(pts[0], pts[n / 2], pts[n - 1]) {
            Some(c) => c,
            None => {
                debug!("arc rejected: points are collinear");
                return None;
            }
        };

        if circle.radius > self.config.max_radius_mm {
            debug!(
                "arc rejected: radius {:.3} exceeds maximum {:.3}",
                circle.radius, self.config.max_radius_mm
            );
            return None;
        }

        for q in &pts {
            if circle.deviation(q) > self.config.resolution_mm {
                debug!(
                    "arc rejected: point {} deviates {:.5} from the circle",
                    q,
                    circle.deviation(q)
                );
                return None;
            }
        }

        // Direction comes from the first turning triple; the sweep walk then
        // holds every step to that rotation sense.
        let direction = match arc_direction(&pts) {
            Some(d) => d,
            None => {
                debug!("arc rejected: no turning direction");
                return None;
            }
        };

        let mut sweep = 0.0;
        let mut prev_angle = pts[0].angle_around(&circle.center);
        for q in &pts[1..] {
            let angle = q.angle_around(&circle.center);
            let delta = normalize_angle(angle - prev_angle);
            let advances = match direction {
                ArcDirection::CounterClockwise => delta > 0.0,
                ArcDirection::Clockwise => delta < 0.0,
            };
            if !advances {
                debug!("arc rejected: sweep reversed at {}", q);
                return None;
            }
            sweep += delta.abs();
            prev_angle = angle;
        }
        if sweep >= 2.0 * PI {
            debug!("arc rejected: sweep {:.3} rad is a full turn or more", sweep);
            return None;
        }

        // The circle may pass through every vertex yet bulge away from the
        // straight segments between them.
        for pair in pts.windows(2) {
            let chord = pair[0].distance(&pair[1]);
            let midpoint = pair[0].midpoint(&pair[1]);
            let allowed = self.config.path_tolerance_percent * chord;
            if circle.deviation(&midpoint) > allowed {
                debug!(
                    "arc rejected: chord midpoint deviates {:.5}, allowed {:.5}",
                    circle.deviation(&midpoint),
                    allowed
                );
                return None;
            }
        }

        if self.config.min_arc_segments > 0 && self.config.mm_per_arc_segment > 0.0 {
            let predicted = (circle.radius * sweep) / self.config.mm_per_arc_segment;
            if predicted < self.config.min_arc_segments as f64 {
                self.num_firmware_compensations += 1;
                debug!(
                    "arc rejected: firmware would render {:.1} segments, minimum is {}",
                    predicted, self.config.min_arc_segments
                );
                return None;
            }
        }

        Some(CandidateFit {
            circle,
            direction,
            sweep,
        })
    }

    /// First accepted point (the arc's start position).
    pub fn start_point(&self) -> Option<&PrinterPoint> {
        self.points.first()
    }

    /// Last accepted point (the arc's endpoint).
    pub fn end_point(&self) -> Option<&PrinterPoint> {
        self.points.last()
    }

    /// Emit the arc with a relative E word.
    pub fn gcode_relative(&self, f: f64) -> Option<String> {
        self.shape_gcode(self.e_relative_total, f)
    }

    /// Emit the arc with an absolute E word (`end_e` is the extruder position
    /// at the arc's endpoint).
    pub fn gcode_absolute(&self, end_e: f64, f: f64) -> Option<String> {
        self.shape_gcode(end_e, f)
    }

    fn shape_gcode(&self, e: f64, f: f64) -> Option<String> {
        if !self.is_shape() {
            return None;
        }
        let circle = self.circle?;
        let direction = self.direction?;
        let start = self.points.first()?;
        let end = self.points.last()?;

        let mut gcode = String::with_capacity(64);
        gcode.push_str(direction.gcode_command());
        gcode.push_str(" X");
        gcode.push_str(&format_coordinate(end.x, self.xyz_precision));
        gcode.push_str(" Y");
        gcode.push_str(&format_coordinate(end.y, self.xyz_precision));
        if self.config.allow_3d_arcs && !is_equal(start.z, end.z) {
            gcode.push_str(" Z");
            gcode.push_str(&format_coordinate(end.z, self.xyz_precision));
        }
        gcode.push_str(" I");
        gcode.push_str(&format_coordinate(
            circle.center.x - start.x,
            self.xyz_precision,
        ));
        gcode.push_str(" J");
        gcode.push_str(&format_coordinate(
            circle.center.y - start.y,
            self.xyz_precision,
        ));
        gcode.push_str(" E");
        gcode.push_str(&format_coordinate(e, self.e_precision));
        if f > 0.0 {
            gcode.push_str(" F");
            gcode.push_str(&format_coordinate(f, 0));
        }
        Some(gcode)
    }
}

/// Rotation sense of a point sequence: the cross product of the first pair of
/// chords that actually turns.
fn arc_direction(pts: &[PointF]) -> Option<ArcDirection> {
    for triple in pts.windows(3) {
        let cross = cross2f(triple[1] - triple[0], triple[2] - triple[1]);
        if !is_zero(cross) {
            return Some(if cross > 0.0 {
                ArcDirection::CounterClockwise
            } else {
                ArcDirection::Clockwise
            });
        }
    }
    None
}

/// Format a coordinate at the given decimal precision, trimming trailing
/// zeros the way slicers do (`10.000` -> `10`, `0.360` -> `0.36`).
fn format_coordinate(value: f64, precision: u8) -> String {
    let mut s = format!("{:.*}", precision as usize, value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
