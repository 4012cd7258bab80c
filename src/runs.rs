//! Contiguous runs of same-section points and their coverage.
//!
//! A [`PointRun`] is a transient view over route-ordered points that share
//! one section assignment (or none). Runs are recomputed from scratch after
//! every edit rather than patched in place, so there is no cache to
//! invalidate.

use std::collections::HashSet;

use crate::error::{MatchError, Result};
use crate::geo_utils::{nearest_part, point_distance, polyline_length};
use crate::{RoutePoint, Section, SectionShape};

/// Ratio of offset growth to travel distance beyond which consecutive
/// points count as diverging from the section.
const TAIL_DIVERGENCE_RATIO: f64 = 0.6;

/// A maximal contiguous sequence of same-route points sharing one section
/// assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRun {
    /// Route-ordered member points.
    pub points: Vec<RoutePoint>,
    /// The section this run claims to travel along, when the label resolved.
    pub section: Option<Section>,
    /// Section-id label (empty = unassigned). Kept even when no section with
    /// this id exists, so stale persisted ids survive a re-derivation.
    pub section_id: String,
    /// Traveled length over matched section length; 0 without a match.
    pub coverage: f64,
}

impl PointRun {
    /// Build a run bound to `section` (or unassigned) and compute coverage.
    pub fn new(points: Vec<RoutePoint>, section: Option<Section>) -> Self {
        let section_id = section
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default();
        PointRun::with_label(points, section, section_id)
    }

    fn with_label(points: Vec<RoutePoint>, section: Option<Section>, section_id: String) -> Self {
        let mut run = PointRun {
            points,
            section,
            section_id,
            coverage: 0.0,
        };
        let matched = run.section_length();
        if matched > 0.0 {
            run.coverage = run.length() / matched;
        }
        run
    }

    /// Whether this run carries a section-id label.
    pub fn is_assigned(&self) -> bool {
        !self.section_id.is_empty()
    }

    /// Traveled length: sum of consecutive point distances.
    ///
    /// Zero for empty and singleton runs.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| point_distance(w[0].coord(), w[1].coord()))
            .sum()
    }

    /// Length of the matched portion of the bound section.
    ///
    /// Plain polylines count in full. Multi-lines count only the sub-lines
    /// that are nearest to at least one member point, deduplicated by
    /// sub-line index, so unrelated branches of the same feature never
    /// inflate the coverage denominator.
    pub fn section_length(&self) -> f64 {
        let section = match &self.section {
            Some(s) => s,
            None => return 0.0,
        };
        match &section.shape {
            SectionShape::Polyline(line) => polyline_length(line),
            SectionShape::MultiPolyline(lines) => {
                let mut touched = HashSet::new();
                for point in &self.points {
                    if let Some(part) = nearest_part(point.coord(), lines) {
                        touched.insert(part);
                    }
                }
                touched.iter().map(|&i| polyline_length(&lines.0[i])).sum()
            }
        }
    }

    /// Split tails that diverge from the bound section into unassigned runs.
    ///
    /// Each point's *offset* is its distance to the nearest point anywhere
    /// on the section. A tail accumulates while each step toward the run's
    /// end grows the offset by more than 0.6x the distance traveled, and
    /// resets the moment a step fails, so only a tail anchored at the run's
    /// true end survives; the mirror walk produces the leading tail. The
    /// middle keeps the section binding, tails come back unassigned. Runs
    /// with no section, fewer than two points, or no detected tail return
    /// `[self]` unchanged.
    pub fn trim(self) -> Vec<PointRun> {
        let section = match &self.section {
            Some(s) => s.clone(),
            None => return vec![self],
        };
        let n = self.points.len();
        if n < 2 {
            return vec![self];
        }

        let offsets: Vec<f64> = self
            .points
            .iter()
            .map(|p| section.shape.distance_to(p.coord()))
            .collect();
        let steps: Vec<f64> = self
            .points
            .windows(2)
            .map(|w| point_distance(w[0].coord(), w[1].coord()))
            .collect();

        // Forward walk accumulates a suffix moving away from the section.
        let mut trailing = 0usize;
        for i in 0..n - 1 {
            if offsets[i + 1] - offsets[i] > TAIL_DIVERGENCE_RATIO * steps[i] {
                trailing += 1;
            } else {
                trailing = 0;
            }
        }

        // Backward walk accumulates a prefix that starts away from it.
        let mut leading = 0usize;
        for i in (0..n - 1).rev() {
            if offsets[i] - offsets[i + 1] > TAIL_DIVERGENCE_RATIO * steps[i] {
                leading += 1;
            } else {
                leading = 0;
            }
        }

        if leading == 0 && trailing == 0 {
            return vec![self];
        }

        // The two walks cannot claim the same index, so the middle slice is
        // never empty.
        let mut pieces = Vec::with_capacity(3);
        if leading > 0 {
            pieces.push(PointRun::new(self.points[..leading].to_vec(), None));
        }
        pieces.push(PointRun::new(
            self.points[leading..n - trailing].to_vec(),
            Some(section),
        ));
        if trailing > 0 {
            pieces.push(PointRun::new(self.points[n - trailing..].to_vec(), None));
        }
        pieces
    }

    /// Split a route-ordered point array into maximal runs of equal label.
    ///
    /// `labels[i]` is the section id assigned to `points[i]`, empty when
    /// unassigned. Labels are resolved against `sections` by id; unresolved
    /// labels keep their id but bind no geometry.
    ///
    /// # Example
    ///
    /// ```rust
    /// use geo::LineString;
    /// use section_matcher::{PointRun, RoutePoint, Section, SectionShape};
    ///
    /// let points: Vec<RoutePoint> = (0..4)
    ///     .map(|i| RoutePoint::new(i, f64::from(i), 0.0, "R1", f64::from(i)))
    ///     .collect();
    /// let labels: Vec<String> = ["S1", "S1", "", ""].iter().map(|s| s.to_string()).collect();
    /// let sections = vec![Section::new(
    ///     "S1",
    ///     None,
    ///     SectionShape::Polyline(LineString::from(vec![(0.0, 0.0), (10.0, 0.0)])),
    /// )];
    ///
    /// let runs = PointRun::from_point_array(&points, &labels, &sections).unwrap();
    /// assert_eq!(runs.len(), 2);
    /// assert_eq!(runs[0].section_id, "S1");
    /// assert!(!runs[1].is_assigned());
    /// ```
    pub fn from_point_array(
        points: &[RoutePoint],
        labels: &[String],
        sections: &[Section],
    ) -> Result<Vec<PointRun>> {
        if points.len() != labels.len() {
            return Err(MatchError::LengthMismatch {
                context: "section labels per point",
                expected: points.len(),
                actual: labels.len(),
            });
        }

        let mut runs = Vec::new();
        if points.is_empty() {
            return Ok(runs);
        }

        let mut start = 0;
        for i in 1..=points.len() {
            if i < points.len() && labels[i] == labels[start] {
                continue;
            }
            let label = labels[start].clone();
            let section = if label.is_empty() {
                None
            } else {
                sections.iter().find(|s| s.id == label).cloned()
            };
            runs.push(PointRun::with_label(
                points[start..i].to_vec(),
                section,
                label,
            ));
            start = i;
        }
        Ok(runs)
    }
}

// ============================================================================
// Tests
// ============================================================================
