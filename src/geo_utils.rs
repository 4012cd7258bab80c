//! Planar geometry helpers shared by the spatial index, run segmentation,
//! and association engine.
//!
//! Points and sections are assumed to arrive in one shared planar,
//! length-preserving coordinate system, so every measure here is straight
//! Euclidean. No projection handling happens in this crate.

use geo::{Coord, Distance, Euclidean, LineString, MultiLineString, Point};

/// Euclidean distance between two coordinates.
pub fn point_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Euclidean::distance(Point::from(a), Point::from(b))
}

/// Closest point on the segment `[a, b]` to `p` (clamped projection).
pub fn project_onto_segment(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 < 1e-12 {
        // Degenerate segment
        return a;
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    Coord {
        x: a.x + t * dx,
        y: a.y + t * dy,
    }
}

/// Distance from `p` to the nearest point on the segment `[a, b]`.
pub fn segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    point_distance(p, project_onto_segment(p, a, b))
}

/// Total length of a polyline.
pub fn polyline_length(line: &LineString<f64>) -> f64 {
    line.0.windows(2).map(|w| point_distance(w[0], w[1])).sum()
}

/// Distance from `p` to the nearest point anywhere on a polyline.
///
/// Returns infinity for an empty polyline.
pub fn polyline_distance(p: Coord<f64>, line: &LineString<f64>) -> f64 {
    if line.0.len() == 1 {
        return point_distance(p, line.0[0]);
    }
    line.0
        .windows(2)
        .map(|w| segment_distance(p, w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}

/// Index of the sub-line of a multi-line closest to `p`.
///
/// Ties keep the first sub-line. Returns `None` for an empty multi-line.
pub fn nearest_part(p: Coord<f64>, lines: &MultiLineString<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, line) in lines.0.iter().enumerate() {
        let d = polyline_distance(p, line);
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}
