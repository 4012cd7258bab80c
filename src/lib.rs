//! # Section Matcher
//!
//! Spatial association of surveyed GPS route points to named road sections.
//!
//! Given a dense, route-ordered stream of GPS points and a collection of
//! line features ("sections"), the engine assigns every point the section it
//! physically travels along, tolerating GPS jitter, gaps, and points that
//! legitimately match nothing (roundabouts, cul-de-sacs, dead ends). Results
//! come back as contiguous [`PointRun`]s with a coverage ratio so a reviewer
//! can accept, delete, or re-resolve each association before anything is
//! persisted.
//!
//! The companion [`dbf`] module reads and rewrites the fixed-layout binary
//! attribute tables those assignments are persisted to, preserving field
//! typing exactly across the read-modify-write cycle.
//!
//! ## Features
//!
//! - `parallel`: rayon-backed bulk numeric extraction for large attribute files
//! - `synthetic`: deterministic survey-data generator for benches and stress tests
//!
//! ## Example
//!
//! ```rust
//! use geo::LineString;
//! use section_matcher::{identify_runs, AssignConfig, RoutePoint, Section, SectionShape};
//!
//! let sections = vec![Section::new(
//!     "S1",
//!     Some("Main St"),
//!     SectionShape::Polyline(LineString::from(vec![(0.0, 0.0), (100.0, 0.0)])),
//! )];
//! let points: Vec<RoutePoint> = (0..3)
//!     .map(|i| RoutePoint::new(i, f64::from(i) * 10.0, 0.5, "R1", f64::from(i)))
//!     .collect();
//!
//! let runs = identify_runs(&points, &sections, &AssignConfig::default()).unwrap();
//! assert_eq!(runs.len(), 1);
//! assert_eq!(runs[0].section_id, "S1");
//! assert!(runs[0].coverage > 0.0);
//! ```

use geo::{Coord, LineString, MultiLineString, Point};
use serde::{Deserialize, Serialize};

pub mod dbf;
pub mod engine;
pub mod error;
pub mod geo_utils;
pub mod matching;
pub mod runs;
pub mod spatial_index;

#[cfg(feature = "synthetic")]
pub mod synthetic;

// Re-export main API
pub use dbf::{AttributeRow, AttributeTable, FieldDescriptor, FieldKind, FieldValue};
pub use engine::{
    ApplyOutcome, PointCollection, SectionCollection, SectionSummary, SurveyEngine,
    DELETED_SECTION_ID,
};
pub use error::{MatchError, Result};
pub use matching::identify_runs;
pub use runs::PointRun;
pub use spatial_index::{NearestSegment, SectionIndex, SegmentRef};

// ============================================================================
// Core Types
// ============================================================================

/// One surveyed GPS point as the association engine sees it.
///
/// `fid` ties the point back to its slot in the owning points collection so
/// accepted assignments can be written to the right attribute row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    /// Slot of the backing feature in its points collection.
    pub fid: u32,
    pub x: f64,
    pub y: f64,
    /// Route this point was logged on; associations never cross routes.
    pub route: String,
    /// Ascending log order within the route.
    pub sequence: f64,
}

impl RoutePoint {
    pub fn new(fid: u32, x: f64, y: f64, route: &str, sequence: f64) -> Self {
        RoutePoint {
            fid,
            x,
            y,
            route: route.to_string(),
            sequence,
        }
    }

    pub fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

/// Line geometry of a section feature.
///
/// Sections are only ever single polylines or sets of disjoint polylines
/// sharing one identity; everything else is rejected at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionShape {
    /// One continuous polyline.
    Polyline(LineString<f64>),
    /// Several disjoint polylines sharing one id and attribute row.
    MultiPolyline(MultiLineString<f64>),
}

impl SectionShape {
    /// Total length over every constituent polyline.
    pub fn length(&self) -> f64 {
        match self {
            SectionShape::Polyline(line) => geo_utils::polyline_length(line),
            SectionShape::MultiPolyline(lines) => {
                lines.0.iter().map(geo_utils::polyline_length).sum()
            }
        }
    }

    /// Distance from `c` to the nearest point anywhere on the shape.
    ///
    /// Infinity when the shape has no coordinates.
    pub fn distance_to(&self, c: Coord<f64>) -> f64 {
        match self {
            SectionShape::Polyline(line) => geo_utils::polyline_distance(c, line),
            SectionShape::MultiPolyline(lines) => lines
                .0
                .iter()
                .map(|line| geo_utils::polyline_distance(c, line))
                .fold(f64::INFINITY, f64::min),
        }
    }
}

/// A named road/line feature that points get assigned to.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Unique id, the value written into per-point section-id attributes.
    pub id: String,
    /// Display name surfaced by review tooling.
    pub name: Option<String>,
    pub shape: SectionShape,
}

impl Section {
    pub fn new(id: &str, name: Option<&str>, shape: SectionShape) -> Self {
        Section {
            id: id.to_string(),
            name: name.map(str::to_string),
            shape,
        }
    }
}

/// Geometry of any feature the session layer can own.
///
/// A closed union: every algorithm in this crate branches exhaustively on
/// exactly these three cases.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(Point<f64>),
    Polyline(LineString<f64>),
    MultiPolyline(MultiLineString<f64>),
}

impl FeatureGeometry {
    /// Human-readable kind label used in geometry-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            FeatureGeometry::Point(_) => "point",
            FeatureGeometry::Polyline(_) => "polyline",
            FeatureGeometry::MultiPolyline(_) => "multi-polyline",
        }
    }
}

/// Tuning for the per-route denoising pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignConfig {
    /// Rolling vote window width in points. Sane range 10-20.
    pub window_width: usize,
    /// Nearest-section matches beyond this distance (planar units) are
    /// treated as "no section here".
    pub max_distance: f64,
}

impl Default for AssignConfig {
    fn default() -> Self {
        AssignConfig {
            window_width: 12,  // 6-point suppression tail on each end
            max_distance: 50.0, // survey-grade GPS accuracy envelope
        }
    }
}

/// Well-known attribute field names the session layer reads and writes.
///
/// Collections validate at load time that the fields their role requires are
/// present in the attribute table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// Route identifier on point records.
    pub route: String,
    /// Ascending per-route sequence number on point records.
    pub sequence: String,
    /// Assigned section id on point records (empty = unassigned).
    pub section_id: String,
    /// Unique id on section records.
    pub unique_id: String,
    /// Display name on section records.
    pub section_name: String,
}

impl Default for AttributeSchema {
    fn default() -> Self {
        AttributeSchema {
            route: "Route".to_string(),
            sequence: "SeqNum".to_string(),
            section_id: "SectionID".to_string(),
            unique_id: "UniqueID".to_string(),
            section_name: "SectName".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AssignConfig::default();
        assert_eq!(config.window_width, 12);
        assert_eq!(config.max_distance, 50.0);
    }

    #[test]
    fn test_shape_length_sums_all_parts() {
        let shape = SectionShape::MultiPolyline(MultiLineString(vec![
            LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]),
            LineString::from(vec![(0.0, 50.0), (50.0, 50.0)]),
        ]));
        assert_eq!(shape.length(), 150.0);
    }

    #[test]
    fn test_shape_distance_spans_parts() {
        let shape = SectionShape::MultiPolyline(MultiLineString(vec![
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0)]),
            LineString::from(vec![(0.0, 100.0), (10.0, 100.0)]),
        ]));
        assert_eq!(shape.distance_to(Coord { x: 5.0, y: 98.0 }), 2.0);
        let empty = SectionShape::MultiPolyline(MultiLineString(vec![]));
        assert!(empty.distance_to(Coord { x: 0.0, y: 0.0 }).is_infinite());
    }

    #[test]
    fn test_geometry_kind_labels() {
        assert_eq!(
            FeatureGeometry::Point(Point::new(0.0, 0.0)).kind(),
            "point"
        );
        assert_eq!(
            FeatureGeometry::Polyline(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])).kind(),
            "polyline"
        );
    }

    #[test]
    fn test_route_point_coord() {
        let p = RoutePoint::new(3, 1.5, -2.5, "R9", 40.0);
        assert_eq!(p.coord(), Coord { x: 1.5, y: -2.5 });
        assert_eq!(p.route, "R9");
    }
}
