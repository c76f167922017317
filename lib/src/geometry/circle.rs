//! Circle type and three-point circle construction.

use super::PointF;

/// A circle in the XY plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: PointF,
    pub radius: f64,
}

impl Circle {
    /// Create a circle from a center and radius.
    #[inline]
    pub const fn new(center: PointF, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Construct the unique circle passing through three points, using the
    /// perpendicular-bisector determinant form. Returns `None` for collinear
    /// (or coincident) points.
    pub fn from_three_points(p1: PointF, p2: PointF, p3: PointF) -> Option<Circle> {
        let (ax, ay) = (p1.x, p1.y);
        let (bx, by) = (p2.x, p2.y);
        let (cx, cy) = (p3.x, p3.y);

        let d = 2.0 * (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by));
        if d.abs() < 1e-10 {
            return None;
        }

        let a_sq = ax * ax + ay * ay;
        let b_sq = bx * bx + by * by;
        let c_sq = cx * cx + cy * cy;

        let ux = (a_sq * (by - cy) + b_sq * (cy - ay) + c_sq * (ay - by)) / d;
        let uy = (a_sq * (cx - bx) + b_sq * (ax - cx) + c_sq * (bx - ax)) / d;

        let center = PointF::new(ux, uy);
        let radius = center.distance(&p1);
        if !radius.is_finite() {
            return None;
        }
        Some(Circle { center, radius })
    }

    /// Radial deviation of a point from the circle: `| |p - center| - radius |`.
    #[inline]
    pub fn deviation(&self, p: &PointF) -> f64 {
        (self.center.distance(p) - self.radius).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_three_points() {
        // Points on a circle centered at (5, 5) with radius 5.
        let c = Circle::from_three_points(
            PointF::new(10.0, 5.0),
            PointF::new(5.0, 10.0),
            PointF::new(0.0, 5.0),
        )
        .unwrap();
        assert!((c.center.x - 5.0).abs() < 1e-9);
        assert!((c.center.y - 5.0).abs() < 1e-9);
        assert!((c.radius - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_collinear_points() {
        let c = Circle::from_three_points(
            PointF::new(0.0, 0.0),
            PointF::new(5.0, 5.0),
            PointF::new(10.0, 10.0),
        );
        assert!(c.is_none());
    }

    #[test]
    fn test_deviation() {
        let c = Circle::new(PointF::zero(), 10.0);
        assert!(c.deviation(&PointF::new(10.0, 0.0)) < 1e-12);
        assert!((c.deviation(&PointF::new(10.5, 0.0)) - 0.5).abs() < 1e-12);
        assert!((c.deviation(&PointF::new(9.0, 0.0)) - 1.0).abs() < 1e-12);
    }
}
