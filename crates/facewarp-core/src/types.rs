use crate::error::AlignError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Relative tolerance on the scatter determinant below which a point set
/// counts as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-12;

/// A real-valued image coordinate. Serialised as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &Point2D) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point2D {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point2D> for [f64; 2] {
    fn from(p: Point2D) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point2D {
    fn from((x, y): (f32, f32)) -> Self {
        Self {
            x: x as f64,
            y: y as f64,
        }
    }
}

/// Ordered landmark coordinates.
///
/// When two sets are fitted against each other, the i-th point of one
/// corresponds to the i-th point of the other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointSet(Vec<Point2D>);

impl PointSet {
    pub fn new(points: Vec<Point2D>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point2D> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Point2D] {
        &self.0
    }

    pub fn push(&mut self, point: Point2D) {
        self.0.push(point);
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(Point2D::is_finite)
    }

    /// Arithmetic mean of the points, `None` for an empty set.
    pub fn centroid(&self) -> Option<Point2D> {
        if self.0.is_empty() {
            return None;
        }
        let n = self.0.len() as f64;
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point2D::new(sx / n, sy / n))
    }

    /// Root-mean-square distance from the centroid, `0.0` for an empty set.
    pub fn rms_radius(&self) -> f64 {
        let Some(c) = self.centroid() else {
            return 0.0;
        };
        let sum: f64 = self.0.iter().map(|p| p.distance_squared(&c)).sum();
        (sum / self.0.len() as f64).sqrt()
    }

    /// Largest absolute coordinate of any point.
    pub fn max_abs_coordinate(&self) -> f64 {
        self.0
            .iter()
            .map(|p| p.x.abs().max(p.y.abs()))
            .fold(0.0, f64::max)
    }

    pub fn scaled(&self, k: f64) -> PointSet {
        self.0.iter().map(|p| Point2D::new(p.x * k, p.y * k)).collect()
    }

    pub fn translated(&self, dx: f64, dy: f64) -> PointSet {
        self.0.iter().map(|p| Point2D::new(p.x + dx, p.y + dy)).collect()
    }

    /// Mirror about the y-axis (negate every x).
    pub fn mirrored_x(&self) -> PointSet {
        self.0.iter().map(|p| Point2D::new(-p.x, p.y)).collect()
    }

    /// Sum of squared distances between corresponding points.
    pub fn sum_squared_distance(&self, other: &PointSet) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a.distance_squared(b))
            .sum()
    }

    /// True when every point lies on a single line (or coincides).
    ///
    /// Fewer than three points are always collinear.
    pub fn is_collinear(&self) -> bool {
        let Some(c) = self.centroid() else {
            return true;
        };
        if self.0.len() < 3 {
            return true;
        }

        let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
        for p in &self.0 {
            let dx = p.x - c.x;
            let dy = p.y - c.y;
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }

        let trace = sxx + syy;
        if trace <= 0.0 {
            return true;
        }
        let det = sxx * syy - sxy * sxy;
        det <= COLLINEAR_TOLERANCE * trace * trace
    }

    /// Concatenate sets in order.
    pub fn concat<'a>(sets: impl IntoIterator<Item = &'a PointSet>) -> PointSet {
        sets.into_iter().flat_map(|s| s.0.iter().copied()).collect()
    }
}

impl From<Vec<Point2D>> for PointSet {
    fn from(points: Vec<Point2D>) -> Self {
        Self(points)
    }
}

impl From<&[(f32, f32)]> for PointSet {
    fn from(points: &[(f32, f32)]) -> Self {
        points.iter().copied().map(Point2D::from).collect()
    }
}

impl From<&[(f64, f64)]> for PointSet {
    fn from(points: &[(f64, f64)]) -> Self {
        points.iter().copied().map(Point2D::from).collect()
    }
}

impl<const N: usize> From<[(f64, f64); N]> for PointSet {
    fn from(points: [(f64, f64); N]) -> Self {
        points.into_iter().map(Point2D::from).collect()
    }
}

impl From<&[[f64; 2]]> for PointSet {
    fn from(points: &[[f64; 2]]) -> Self {
        points.iter().copied().map(Point2D::from).collect()
    }
}

impl FromIterator<Point2D> for PointSet {
    fn from_iter<I: IntoIterator<Item = Point2D>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a Point2D;
    type IntoIter = std::slice::Iter<'a, Point2D>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for PointSet {
    type Output = Point2D;

    fn index(&self, index: usize) -> &Point2D {
        &self.0[index]
    }
}

/// Raster dimensions in pixels. Serialised as `[width, height]`, parsed
/// from `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    /// Non-empty in both dimensions.
    pub fn is_positive(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl From<[u32; 2]> for Size {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<Size> for [u32; 2] {
    fn from(s: Size) -> Self {
        [s.width, s.height]
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| AlignError::geometry(format!("expected WxH, got {s:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| AlignError::geometry(format!("bad dimension {v:?} in {s:?}: {e}")))
        };
        Ok(Self::new(parse(w)?, parse(h)?))
    }
}
