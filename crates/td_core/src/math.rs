//! 2D vector and rectangle utilities.
//!
//! The simulation is wall-clock driven and makes no cross-hardware replay
//! promise, so plain `f32` is used throughout. Every direction handed to
//! movement code goes through [`Vec2::normalize_or_zero`] or
//! [`Vec2::try_normalize`] first.

use serde::{Deserialize, Serialize};

/// Lengths below this are treated as zero when normalizing.
pub const EPSILON: f32 = 1e-6;

/// 2D vector in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

impl Vec2 {
    /// Zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` radians.
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Squared length.
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Linearly interpolate between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Perpendicular vector (rotated 90° counter-clockwise).
    #[must_use]
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Unit vector in the same direction, or `None` for (near) zero vectors.
    #[must_use]
    pub fn try_normalize(self) -> Option<Self> {
        let len = self.length();
        if len <= EPSILON || !len.is_finite() {
            return None;
        }
        Some(Self::new(self.x / len, self.y / len))
    }

    /// Unit vector in the same direction, or zero.
    #[must_use]
    pub fn normalize_or_zero(self) -> Self {
        self.try_normalize().unwrap_or(Self::ZERO)
    }

    /// True when both components are finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }
}

/// Axis-aligned rectangle, `min` inclusive and `max` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Lower-left corner.
    pub min: Vec2,
    /// Upper-right corner.
    pub max: Vec2,
}

impl Rect {
    /// Create a rectangle from two corners in any order.
    #[must_use]
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: Vec2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Rectangle centered on `center` with the given half extents.
    #[must_use]
    pub fn from_center(center: Vec2, half_width: f32, half_height: f32) -> Self {
        Self::from_corners(
            Vec2::new(center.x - half_width, center.y - half_height),
            Vec2::new(center.x + half_width, center.y + half_height),
        )
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        self.min.lerp(self.max, 0.5)
    }

    /// True when `point` lies inside or on the edge.
    #[must_use]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Closest point of the rectangle to `point`.
    #[must_use]
    pub fn closest_point(&self, point: Vec2) -> Vec2 {
        Vec2::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
        )
    }

    /// True when the circle touches or overlaps the rectangle.
    #[must_use]
    pub fn intersects_circle(&self, center: Vec2, radius: f32) -> bool {
        self.closest_point(center).distance_squared(center) <= radius * radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_distance_squared() {
        let a = Vec2::new(3.0, 0.0);
        let b = Vec2::new(0.0, 4.0);
        // 3² + 4² = 25
        assert_eq!(a.distance_squared(b), 25.0);
        assert_eq!(a.distance(b), 5.0);
    }

    #[test]
    fn test_vec2_dot() {
        let a = Vec2::new(2.0, 3.0);
        let b = Vec2::new(4.0, -1.0);
        assert_eq!(a.dot(b), 5.0);
    }

    #[test]
    fn test_vec2_lerp() {
        let a = Vec2::ZERO;
        let b = Vec2::new(10.0, 20.0);
        assert_eq!(a.lerp(b, 0.5), Vec2::new(5.0, 10.0));
    }

    #[test]
    fn test_vec2_normalize() {
        let norm = Vec2::new(3.0, 4.0).normalize_or_zero();
        assert!((norm.length() - 1.0).abs() < 1e-5);
        // Direction preserved: x/y ratio matches 3/4
        assert!((norm.x * 4.0 - norm.y * 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(Vec2::ZERO.try_normalize(), None);
        assert_eq!(Vec2::ZERO.normalize_or_zero(), Vec2::ZERO);
        assert_eq!(Vec2::new(f32::NAN, 1.0).try_normalize(), None);
    }

    #[test]
    fn test_perp_is_orthogonal() {
        let v = Vec2::new(0.6, 0.8);
        assert!(v.dot(v.perp()).abs() < 1e-6);
    }

    #[test]
    fn test_rect_circle_intersection() {
        let rect = Rect::from_corners(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0));
        assert!(rect.intersects_circle(Vec2::new(5.0, 5.0), 1.0));
        assert!(rect.intersects_circle(Vec2::new(12.0, 5.0), 2.0));
        assert!(!rect.intersects_circle(Vec2::new(13.0, 13.0), 2.0));
        assert!(rect.contains(Vec2::new(10.0, 0.0)));
        assert_eq!(rect.center(), Vec2::new(5.0, 5.0));
    }
}
