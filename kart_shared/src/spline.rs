//! Cubic Hermite spline over the unit parameter domain.

use crate::math::Vec3;

/// Curve through two points with prescribed derivatives at each end.
///
/// Derivatives are per unit of the parameter `t`, so a velocity measured in
/// m/s has to be scaled by the real duration the curve spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HermiteCubicSpline {
    pub start_position: Vec3,
    pub start_derivative: Vec3,
    pub target_position: Vec3,
    pub target_derivative: Vec3,
}

impl HermiteCubicSpline {
    pub fn position(&self, t: f32) -> Vec3 {
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;

        self.start_position * h00
            + self.start_derivative * h10
            + self.target_position * h01
            + self.target_derivative * h11
    }

    pub fn derivative(&self, t: f32) -> Vec3 {
        let p0 = self.start_position;
        let m0 = self.start_derivative;
        let p1 = self.target_position;
        let m1 = self.target_derivative;

        let a = p0 * 6.0 + m0 * 3.0 + m1 * 3.0 - p1 * 6.0;
        let b = p0 * -6.0 - m0 * 4.0 - m1 * 2.0 + p1 * 6.0;
        a * (t * t) + b * t + m0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn curve() -> HermiteCubicSpline {
        HermiteCubicSpline {
            start_position: Vec3::new(1.0, 2.0, 3.0),
            start_derivative: Vec3::new(4.0, -1.0, 0.5),
            target_position: Vec3::new(-2.0, 7.0, 0.0),
            target_derivative: Vec3::new(0.0, 3.0, -2.0),
        }
    }

    #[test]
    fn endpoints_match() {
        let s = curve();
        assert_eq!(s.position(0.0), s.start_position);
        assert_eq!(s.position(1.0), s.target_position);
        assert_eq!(s.derivative(0.0), s.start_derivative);

        let d1 = s.derivative(1.0);
        assert_relative_eq!(d1.x, s.target_derivative.x, epsilon = 1e-5);
        assert_relative_eq!(d1.y, s.target_derivative.y, epsilon = 1e-5);
        assert_relative_eq!(d1.z, s.target_derivative.z, epsilon = 1e-5);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let s = curve();
        let h = 1e-3;
        for &t in &[0.2f32, 0.5, 0.8] {
            let numeric = (s.position(t + h) - s.position(t - h)) / (2.0 * h);
            let analytic = s.derivative(t);
            assert_relative_eq!(numeric.x, analytic.x, epsilon = 1e-2);
            assert_relative_eq!(numeric.y, analytic.y, epsilon = 1e-2);
            assert_relative_eq!(numeric.z, analytic.z, epsilon = 1e-2);
        }
    }

    #[test]
    fn straight_line_secant_gives_midpoint() {
        let s = HermiteCubicSpline {
            start_position: Vec3::ZERO,
            start_derivative: Vec3::new(10.0, 0.0, 0.0),
            target_position: Vec3::new(10.0, 0.0, 0.0),
            target_derivative: Vec3::new(10.0, 0.0, 0.0),
        };
        let mid = s.position(0.5);
        assert_relative_eq!(mid.x, 5.0, epsilon = 1e-5);
        assert_relative_eq!(mid.y, 0.0);
    }
}
