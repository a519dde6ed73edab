//! Static region map and point classification.
//!
//! Regions are loaded once at startup. Their declaration order is both the
//! tie-break for overlapping regions and the ring order of the signal cycle.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const EDGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Boundary {
    /// Inclusive axis-aligned rectangle, normalized so `min <= max`.
    Rect { min: Point, max: Point },
    Polygon(Vec<Point>),
}

impl Boundary {
    pub fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Boundary::Rect {
            min: Point::new(x1.min(x2), y1.min(y2)),
            max: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        match self {
            Boundary::Rect { min, max } => {
                (min.x..=max.x).contains(&point.x) && (min.y..=max.y).contains(&point.y)
            }
            Boundary::Polygon(vertices) => polygon_contains(vertices, point),
        }
    }

    /// Whether the two interiors share any area. Touching edges do not count.
    pub fn overlaps(&self, other: &Boundary) -> bool {
        let ours = self.outline();
        let theirs = other.outline();
        let crossing = edges(&ours).any(|(a, b)| {
            edges(&theirs).any(|(c, d)| segments_cross(a, b, c, d))
        });
        crossing
            || sample_points(&ours).any(|point| other.strictly_contains(&theirs, point))
            || sample_points(&theirs).any(|point| self.strictly_contains(&ours, point))
    }

    fn outline(&self) -> Vec<Point> {
        match self {
            Boundary::Rect { min, max } => vec![
                *min,
                Point::new(max.x, min.y),
                *max,
                Point::new(min.x, max.y),
            ],
            Boundary::Polygon(vertices) => vertices.clone(),
        }
    }

    fn strictly_contains(&self, outline: &[Point], point: Point) -> bool {
        self.contains(point) && !edges(outline).any(|(a, b)| on_segment(a, b, point))
    }
}

fn edges(outline: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    outline
        .iter()
        .zip(outline.iter().cycle().skip(1))
        .map(|(a, b)| (*a, *b))
}

/// Vertices plus the vertex mean, which catches coincident outlines.
fn sample_points(outline: &[Point]) -> impl Iterator<Item = Point> + '_ {
    let count = outline.len().max(1) as f64;
    let mean = Point::new(
        outline.iter().map(|p| p.x).sum::<f64>() / count,
        outline.iter().map(|p| p.y).sum::<f64>() / count,
    );
    outline.iter().copied().chain(std::iter::once(mean))
}

fn orientation(a: Point, b: Point, p: Point) -> f64 {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() <= EDGE_EPSILON { 0.0 } else { cross.signum() }
}

/// Proper crossing only: collinear or endpoint contact is not a crossing.
fn segments_cross(a: Point, b: Point, c: Point, d: Point) -> bool {
    orientation(a, b, c) * orientation(a, b, d) < 0.0
        && orientation(c, d, a) * orientation(c, d, b) < 0.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub boundary: Boundary,
}

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("failed to read region file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse region file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("region map is empty")]
    Empty,
    #[error("duplicate region name: {0}")]
    DuplicateName(String),
    #[error("region {0} must define exactly one of rect or polygon")]
    AmbiguousBoundary(String),
    #[error("region {0} polygon needs at least 3 vertices")]
    DegeneratePolygon(String),
}

/// On-disk form of a region entry.
#[derive(Debug, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    #[serde(default)]
    pub rect: Option<[f64; 4]>,
    #[serde(default)]
    pub polygon: Option<Vec<[f64; 2]>>,
}

/// Immutable, ordered set of uniquely named regions.
#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    pub fn new(regions: Vec<Region>) -> Result<Self, RegionError> {
        if regions.is_empty() {
            return Err(RegionError::Empty);
        }
        let mut names = HashSet::new();
        for region in &regions {
            if !names.insert(region.name.as_str()) {
                return Err(RegionError::DuplicateName(region.name.clone()));
            }
            if let Boundary::Polygon(vertices) = &region.boundary
                && vertices.len() < 3
            {
                return Err(RegionError::DegeneratePolygon(region.name.clone()));
            }
        }
        warn_on_overlap(&regions);
        Ok(Self { regions })
    }

    pub fn from_specs(specs: Vec<RegionSpec>) -> Result<Self, RegionError> {
        let regions = specs
            .into_iter()
            .map(|spec| {
                let boundary = match (spec.rect, spec.polygon) {
                    (Some([x1, y1, x2, y2]), None) => Boundary::rect(x1, y1, x2, y2),
                    (None, Some(points)) => Boundary::Polygon(
                        points.into_iter().map(|[x, y]| Point::new(x, y)).collect(),
                    ),
                    _ => return Err(RegionError::AmbiguousBoundary(spec.name)),
                };
                Ok(Region {
                    name: spec.name,
                    boundary,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(regions)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RegionError> {
        let contents = std::fs::read_to_string(path)?;
        let specs: Vec<RegionSpec> = serde_json::from_str(&contents)?;
        Self::from_specs(specs)
    }

    /// Region names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|region| region.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Name of the first declared region containing `point`.
    pub fn classify(&self, point: Point) -> Option<&str> {
        classify(point, &self.regions)
    }
}

/// First region in `regions` whose boundary contains `point`. Boundary points count as inside.
pub fn classify(point: Point, regions: &[Region]) -> Option<&str> {
    regions
        .iter()
        .find(|region| region.boundary.contains(point))
        .map(|region| region.name.as_str())
}

fn polygon_contains(vertices: &[Point], point: Point) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[j];
        if on_segment(a, b, point) {
            return true;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let crossing_x = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < crossing_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

fn warn_on_overlap(regions: &[Region]) {
    for (index, first) in regions.iter().enumerate() {
        for second in &regions[index + 1..] {
            if first.boundary.overlaps(&second.boundary) {
                warn!(
                    first = %first.name,
                    second = %second.name,
                    "Regions overlap, first declared wins"
                );
            }
        }
    }
}
