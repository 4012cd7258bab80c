//! R-tree index over section geometry for nearest-segment queries.
//!
//! Every constituent polyline of every section contributes its consecutive
//! coordinate pairs as independent segments tagged with the owning section
//! slot and sub-line index, so the nearest hit for a multi-line feature
//! naturally identifies its closest sub-line too.

use rstar::primitives::{GeomWithData, Line};
use rstar::{PointDistance, RTree};

use crate::{Section, SectionShape};

/// Which section (and which of its sub-lines) an indexed segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRef {
    /// Slot in the sections slice the index was built from.
    pub section: usize,
    /// Sub-line index within the section (0 for plain polylines).
    pub part: usize,
}

type IndexedSegment = GeomWithData<Line<[f64; 2]>, SegmentRef>;

/// One nearest-segment query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestSegment {
    pub section: usize,
    pub part: usize,
    /// Euclidean distance from the query point to the segment.
    pub distance: f64,
}

/// Bulk-built nearest-segment index over a slice of sections.
///
/// Immutable after build; one association pass issues one query per point.
pub struct SectionIndex {
    tree: RTree<IndexedSegment>,
}

impl SectionIndex {
    pub fn build(sections: &[Section]) -> Self {
        let started = std::time::Instant::now();
        let mut segments = Vec::new();
        for (slot, section) in sections.iter().enumerate() {
            match &section.shape {
                SectionShape::Polyline(line) => collect_segments(&mut segments, slot, 0, line),
                SectionShape::MultiPolyline(lines) => {
                    for (part, line) in lines.0.iter().enumerate() {
                        collect_segments(&mut segments, slot, part, line);
                    }
                }
            }
        }
        let count = segments.len();
        let tree = RTree::bulk_load(segments);
        log::debug!(
            "[Index] {} segments from {} sections in {:?}",
            count,
            sections.len(),
            started.elapsed()
        );
        SectionIndex { tree }
    }

    /// Nearest indexed segment to `(x, y)`.
    ///
    /// `None` when the index is empty; callers treat that as "no section
    /// anywhere", never as an error.
    pub fn nearest(&self, x: f64, y: f64) -> Option<NearestSegment> {
        let query = [x, y];
        self.tree
            .nearest_neighbor(&query)
            .map(|seg| NearestSegment {
                section: seg.data.section,
                part: seg.data.part,
                distance: seg.geom().distance_2(&query).sqrt(),
            })
    }

    /// Number of indexed segments.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

fn collect_segments(
    out: &mut Vec<IndexedSegment>,
    section: usize,
    part: usize,
    line: &geo::LineString<f64>,
) {
    for w in line.0.windows(2) {
        out.push(GeomWithData::new(
            Line::new([w[0].x, w[0].y], [w[1].x, w[1].y]),
            SegmentRef { section, part },
        ));
    }
}
