//! Point-in-polygon test for the PSD selection regions
//!
//! Winding-number test over a closed loop, with a half-open bounding-box
//! pre-filter: the box contains `x ∈ [min_x, max_x)` and
//! `y ∈ [min_y, max_y)`, so points on the far edges are rejected before
//! the winding number is ever computed.

use serde::{Deserialize, Serialize};

/// A point on the selection plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box, half-open on the maximum edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Bounding box of a vertex list; empty input collapses to the origin
    pub fn of(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self {
                min_x: 0.0,
                max_x: 0.0,
                min_y: 0.0,
                max_y: 0.0,
            };
        };

        let mut bbox = Self {
            min_x: first.x,
            max_x: first.x,
            min_y: first.y,
            max_y: first.y,
        };
        for p in &points[1..] {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        bbox
    }

    pub fn contains(&self, p: Point) -> bool {
        self.min_x <= p.x && p.x < self.max_x && self.min_y <= p.y && p.y < self.max_y
    }
}

/// A closed selection polygon with a precomputed bounding box
#[derive(Debug, Clone)]
pub struct Polygon {
    // vertices[n] == vertices[0], the winding loop relies on it
    vertices: Vec<Point>,
    bbox: BoundingBox,
}

impl Polygon {
    /// Build from an open vertex list; the loop is closed internally
    ///
    /// Returns `None` with fewer than three vertices.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let bbox = BoundingBox::of(&points);
        let mut vertices = points;
        vertices.push(vertices[0]);
        Some(Self { vertices, bbox })
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Number of distinct vertices
    pub fn vertices_number(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Bounding-box pre-filter followed by the winding-number test
    pub fn contains(&self, p: Point) -> bool {
        self.bbox.contains(p) && self.winding_number(p) != 0
    }

    /// Winding number of `p`; zero only when the point is outside
    pub fn winding_number(&self, p: Point) -> i32 {
        let mut wn = 0;

        for edge in self.vertices.windows(2) {
            let (v0, v1) = (edge[0], edge[1]);

            if v0.y <= p.y {
                // An upward crossing with p left of the edge
                if v1.y > p.y && is_left(v0, v1, p) > 0.0 {
                    wn += 1;
                }
            } else {
                // A downward crossing with p right of the edge
                if v1.y <= p.y && is_left(v0, v1, p) < 0.0 {
                    wn -= 1;
                }
            }
        }

        wn
    }
}

/// Twice the signed area of the triangle (p0, p1, p):
/// positive when p is left of the line through p0 and p1
fn is_left(p0: Point, p1: Point, p: Point) -> f64 {
    (p1.x - p0.x) * (p.y - p0.y) - (p.x - p0.x) * (p1.y - p0.y)
}
