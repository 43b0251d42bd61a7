//! Axis-Aligned Bounds
//!
//! `left < right`, `top < bottom`. Same layout as the star delta record
//! on the wire.

use serde::{Serialize, Deserialize};

use super::vec2::Vec2;

/// Axis-aligned rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Minimum x
    pub left: f32,
    /// Minimum y
    pub top: f32,
    /// Maximum x
    pub right: f32,
    /// Maximum y
    pub bottom: f32,
}

impl Rect {
    /// Create from edges.
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Square of side `size` centred on `center`.
    pub fn from_center(center: Vec2, size: f32) -> Self {
        let half = size / 2.0;
        Self::new(center.x - half, center.y - half, center.x + half, center.y + half)
    }

    /// Square box extending `radius` in every direction from `center`.
    pub fn around(center: Vec2, radius: f32) -> Self {
        Self::from_center(center, radius * 2.0)
    }

    /// Width.
    #[inline]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Height.
    #[inline]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Centre point.
    #[inline]
    pub fn center(&self) -> Vec2 {
        Vec2::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// Closed containment test.
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }

    /// Whether the two rectangles share any area or edge.
    #[inline]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
    }

    /// Whether the interiors overlap (touching edges do not count).
    #[inline]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// The four quadrants: north-west, north-east, south-west, south-east.
    pub fn quadrants(&self) -> [Rect; 4] {
        let c = self.center();
        [
            Rect::new(self.left, self.top, c.x, c.y),
            Rect::new(c.x, self.top, self.right, c.y),
            Rect::new(self.left, c.y, c.x, self.bottom),
            Rect::new(c.x, c.y, self.right, self.bottom),
        ]
    }
}
