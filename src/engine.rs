//! Session store owning the loaded feature collections.
//!
//! A survey session loads exactly two collections: the route-ordered GPS
//! points and the named sections. Every attribute write flows through
//! [`SurveyEngine`], which validates ownership first and keeps a dirty flag
//! per collection so the caller knows when a table needs rewriting. Runs are
//! transient views; after any mutation the caller re-derives them instead of
//! patching them in place.
//!
//! The engine never touches files. [`SurveyEngine::points_dbf`] and
//! [`SurveyEngine::sections_dbf`] hand back serialized table bytes only when
//! the corresponding collection has unsaved changes.

use std::collections::HashMap;

use serde::Serialize;

use crate::dbf::{AttributeTable, FieldValue};
use crate::error::{MatchError, Result};
use crate::matching;
use crate::runs::PointRun;
use crate::{AssignConfig, AttributeSchema, FeatureGeometry, RoutePoint, Section, SectionShape};

/// Section-id sentinel marking points the reviewer discarded.
pub const DELETED_SECTION_ID: &str = "Deleted";

const POINTS_COLLECTION: &str = "points";

/// The ordered GPS points of one survey, with their attribute table.
#[derive(Debug, Clone)]
pub struct PointCollection {
    points: Vec<RoutePoint>,
    table: AttributeTable,
    schema: AttributeSchema,
    /// Endpoint marks from manual association. Session state, never persisted.
    start_stop: Vec<bool>,
    dirty: bool,
}

impl PointCollection {
    /// Validate and index a loaded point layer.
    ///
    /// Every geometry must be a point, the table must carry the schema's
    /// route, sequence, and section-id fields, and the geometry count must
    /// match the row count. The row slot doubles as the feature id.
    pub fn new(
        geometries: Vec<FeatureGeometry>,
        table: AttributeTable,
        schema: &AttributeSchema,
    ) -> Result<PointCollection> {
        if geometries.len() != table.len() {
            return Err(MatchError::LengthMismatch {
                context: "point geometries per table row",
                expected: table.len(),
                actual: geometries.len(),
            });
        }
        for name in [&schema.route, &schema.sequence, &schema.section_id] {
            if !table.has_field(name) {
                return Err(MatchError::MissingField { name: name.clone() });
            }
        }

        let mut points = Vec::with_capacity(geometries.len());
        for (fid, geometry) in geometries.into_iter().enumerate() {
            let pt = match geometry {
                FeatureGeometry::Point(p) => p,
                other => {
                    return Err(MatchError::GeometryMismatch {
                        expected: "point",
                        actual: other.kind(),
                    })
                }
            };
            let route = table
                .value(fid, &schema.route)
                .and_then(FieldValue::id_string)
                .unwrap_or_default();
            let sequence = table
                .value(fid, &schema.sequence)
                .and_then(FieldValue::as_f64)
                .unwrap_or(0.0);
            points.push(RoutePoint::new(fid as u32, pt.x(), pt.y(), &route, sequence));
        }

        log::debug!("[Session] loaded {} points", points.len());
        let start_stop = vec![false; points.len()];
        Ok(PointCollection {
            points,
            table,
            schema: schema.clone(),
            start_stop,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The engine-facing view of every point, in load order (fid order).
    pub fn route_points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    /// Whether the table has changes not yet handed out for saving.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Manual-association endpoint marks, indexed by fid.
    pub fn start_stop_flags(&self) -> &[bool] {
        &self.start_stop
    }

    /// Persisted section-id label for one point; empty when unassigned,
    /// `None` when the fid does not exist.
    pub fn section_label(&self, fid: u32) -> Option<String> {
        if (fid as usize) >= self.points.len() {
            return None;
        }
        Some(self.label(fid as usize))
    }

    fn label(&self, slot: usize) -> String {
        self.table
            .value(slot, &self.schema.section_id)
            .and_then(FieldValue::id_string)
            .unwrap_or_default()
    }
}

/// The named road sections, indexed by unique id.
#[derive(Debug, Clone)]
pub struct SectionCollection {
    sections: Vec<Section>,
    table: AttributeTable,
    by_id: HashMap<String, usize>,
    dirty: bool,
}

impl SectionCollection {
    /// Validate and index a loaded section layer.
    ///
    /// Geometries must all be polylines or multi-polylines; ids come from
    /// the schema's unique-id field and must not repeat. Display names are
    /// optional.
    pub fn new(
        geometries: Vec<FeatureGeometry>,
        table: AttributeTable,
        schema: &AttributeSchema,
    ) -> Result<SectionCollection> {
        if geometries.len() != table.len() {
            return Err(MatchError::LengthMismatch {
                context: "section geometries per table row",
                expected: table.len(),
                actual: geometries.len(),
            });
        }
        if !table.has_field(&schema.unique_id) {
            return Err(MatchError::MissingField {
                name: schema.unique_id.clone(),
            });
        }

        let mut sections = Vec::with_capacity(geometries.len());
        let mut by_id = HashMap::with_capacity(geometries.len());
        for (slot, geometry) in geometries.into_iter().enumerate() {
            let shape = match geometry {
                FeatureGeometry::Polyline(line) => SectionShape::Polyline(line),
                FeatureGeometry::MultiPolyline(lines) => SectionShape::MultiPolyline(lines),
                other => {
                    return Err(MatchError::GeometryMismatch {
                        expected: "polyline or multi-polyline",
                        actual: other.kind(),
                    })
                }
            };
            let id = table
                .value(slot, &schema.unique_id)
                .and_then(FieldValue::id_string)
                .unwrap_or_default();
            let name = table
                .value(slot, &schema.section_name)
                .and_then(|v| v.as_str().map(str::to_string));
            if by_id.insert(id.clone(), slot).is_some() {
                return Err(MatchError::DuplicateSectionId { id });
            }
            sections.push(Section { id, name, shape });
        }

        log::debug!("[Session] loaded {} sections", sections.len());
        Ok(SectionCollection {
            sections,
            table,
            by_id,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, id: &str) -> Option<&Section> {
        self.by_id.get(id).map(|&slot| &self.sections[slot])
    }
}

/// Counts from one bulk apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ApplyOutcome {
    /// Bound runs whose id was written out.
    pub applied: usize,
    /// Runs whose points were marked with the deleted sentinel.
    pub deleted: usize,
    /// Runs at/above the threshold with no section to write.
    pub skipped: usize,
}

/// One section's standing in the review queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionSummary {
    pub section_id: String,
    pub section_name: Option<String>,
    /// Coverage of each contributing bound run, in input order.
    pub run_coverages: Vec<f64>,
    pub total_coverage: f64,
}

/// Owns both collections for one review session and mediates every write.
#[derive(Debug, Clone)]
pub struct SurveyEngine {
    points: PointCollection,
    sections: SectionCollection,
    config: AssignConfig,
}

impl SurveyEngine {
    pub fn new(points: PointCollection, sections: SectionCollection) -> SurveyEngine {
        Self::with_config(points, sections, AssignConfig::default())
    }

    pub fn with_config(
        points: PointCollection,
        sections: SectionCollection,
        config: AssignConfig,
    ) -> SurveyEngine {
        SurveyEngine {
            points,
            sections,
            config,
        }
    }

    pub fn points(&self) -> &PointCollection {
        &self.points
    }

    pub fn sections(&self) -> &SectionCollection {
        &self.sections
    }

    pub fn config(&self) -> &AssignConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AssignConfig) {
        self.config = config;
    }

    /// Run the automatic association pass over the current state.
    ///
    /// Read-only: nothing is written until the caller applies runs.
    pub fn identify_runs(&self) -> Result<Vec<PointRun>> {
        matching::identify_runs(&self.points.points, &self.sections.sections, &self.config)
    }

    /// Rebuild runs from the persisted per-point section ids, with no
    /// voting and no trimming. This is what a reload from disk would show.
    pub fn derive_runs(&self) -> Result<Vec<PointRun>> {
        let mut runs = Vec::new();
        for (_route, group) in matching::group_by_route(&self.points.points) {
            let labels: Vec<String> = group.iter().map(|p| self.points.label(p.fid as usize)).collect();
            runs.extend(PointRun::from_point_array(
                &group,
                &labels,
                &self.sections.sections,
            )?);
        }
        Ok(runs)
    }

    /// Write the run's section id to every member point that has no id yet,
    /// so earlier manual decisions win over the automatic pass. Returns the
    /// number of points written.
    pub fn apply_run(&mut self, run: &PointRun) -> Result<usize> {
        self.check_membership(run)?;
        if !run.is_assigned() {
            return Ok(0);
        }
        let field = self.points.schema.section_id.clone();
        let mut written = 0;
        for point in &run.points {
            let slot = point.fid as usize;
            if self.points.label(slot).is_empty() {
                self.points
                    .table
                    .set_value(slot, &field, FieldValue::Text(run.section_id.clone()))?;
                self.points.dirty = true;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Mark every member point with the deleted sentinel and clear its
    /// endpoint flag. Unlike [`apply_run`](Self::apply_run) this overwrites
    /// existing assignments.
    pub fn delete_run(&mut self, run: &PointRun) -> Result<usize> {
        self.check_membership(run)?;
        let field = self.points.schema.section_id.clone();
        for point in &run.points {
            let slot = point.fid as usize;
            self.points.table.set_value(
                slot,
                &field,
                FieldValue::Text(DELETED_SECTION_ID.to_string()),
            )?;
            self.points.start_stop[slot] = false;
        }
        if !run.points.is_empty() {
            self.points.dirty = true;
        }
        Ok(run.points.len())
    }

    /// The reviewer's bulk policy: every run below `min_coverage` is
    /// discarded wholesale (unassigned runs always land there for any
    /// positive threshold, since their coverage is 0), bound runs at or
    /// above it keep their id.
    pub fn apply_assignments(
        &mut self,
        runs: &[PointRun],
        min_coverage: f64,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        for run in runs {
            if run.coverage < min_coverage {
                self.delete_run(run)?;
                outcome.deleted += 1;
            } else if run.is_assigned() {
                self.apply_run(run)?;
                outcome.applied += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        log::info!(
            "[Apply] {} runs at min coverage {}: {} applied, {} deleted, {} skipped",
            runs.len(),
            min_coverage,
            outcome.applied,
            outcome.deleted,
            outcome.skipped
        );
        Ok(outcome)
    }

    /// All points on the endpoints' shared route with sequence between the
    /// two picks, inclusive, in ascending sequence order. Picks on
    /// different routes select nothing.
    pub fn points_between(&self, fid_a: u32, fid_b: u32) -> Result<Vec<RoutePoint>> {
        let a = self.point(fid_a)?;
        let b = self.point(fid_b)?;
        if a.route != b.route {
            return Ok(Vec::new());
        }
        let lo = a.sequence.min(b.sequence);
        let hi = a.sequence.max(b.sequence);
        let mut span: Vec<RoutePoint> = self
            .points
            .points
            .iter()
            .filter(|p| p.route == a.route && p.sequence >= lo && p.sequence <= hi)
            .cloned()
            .collect();
        span.sort_by(|x, y| x.sequence.total_cmp(&y.sequence));
        Ok(span)
    }

    /// Manually bind the inclusive span between two picked points to a
    /// section. The whole span takes the section id (overwriting existing
    /// assignments) and the two picks become the marked endpoints. Nothing
    /// is written when the span is empty.
    pub fn associate_between(&mut self, fid_a: u32, fid_b: u32, section_id: &str) -> Result<usize> {
        if !self.sections.by_id.contains_key(section_id) {
            return Err(MatchError::UnknownSection {
                id: section_id.to_string(),
            });
        }
        let span = self.points_between(fid_a, fid_b)?;
        if span.is_empty() {
            return Ok(0);
        }
        let field = self.points.schema.section_id.clone();
        for point in &span {
            let slot = point.fid as usize;
            self.points
                .table
                .set_value(slot, &field, FieldValue::Text(section_id.to_string()))?;
            self.points.start_stop[slot] = false;
        }
        self.points.start_stop[fid_a as usize] = true;
        self.points.start_stop[fid_b as usize] = true;
        self.points.dirty = true;
        Ok(span.len())
    }

    /// Reset every point's section id and endpoint flag, e.g. before
    /// rerunning the automatic pass from scratch.
    pub fn clear_assignments(&mut self) -> Result<()> {
        let field = self.points.schema.section_id.clone();
        for slot in 0..self.points.points.len() {
            self.points.table.set_value(slot, &field, FieldValue::Null)?;
        }
        self.points.start_stop.fill(false);
        if !self.points.points.is_empty() {
            self.points.dirty = true;
        }
        Ok(())
    }

    /// Review-queue feed: every section with the coverages of its
    /// contributing bound runs, least-covered sections first.
    pub fn section_summaries(&self, runs: &[PointRun]) -> Vec<SectionSummary> {
        let mut summaries: Vec<SectionSummary> = self
            .sections
            .sections
            .iter()
            .map(|s| SectionSummary {
                section_id: s.id.clone(),
                section_name: s.name.clone(),
                run_coverages: Vec::new(),
                total_coverage: 0.0,
            })
            .collect();
        for run in runs {
            if run.section.is_none() {
                continue;
            }
            if let Some(&slot) = self.sections.by_id.get(&run.section_id) {
                summaries[slot].run_coverages.push(run.coverage);
                summaries[slot].total_coverage += run.coverage;
            }
        }
        summaries.sort_by(|a, b| a.total_coverage.total_cmp(&b.total_coverage));
        summaries
    }

    /// The summaries rendered for the external review/export surface.
    pub fn summaries_json(&self, runs: &[PointRun]) -> serde_json::Result<String> {
        serde_json::to_string(&self.section_summaries(runs))
    }

    /// Annotate a section's attribute row (reviewer notes, resolved flags).
    pub fn annotate_section(&mut self, section_id: &str, field: &str, value: FieldValue) -> Result<()> {
        let slot = *self
            .sections
            .by_id
            .get(section_id)
            .ok_or_else(|| MatchError::UnknownSection {
                id: section_id.to_string(),
            })?;
        self.sections.table.set_value(slot, field, value)?;
        self.sections.dirty = true;
        Ok(())
    }

    /// Serialize the points table when it has unsaved changes; `Ok(None)`
    /// means there is nothing to write. The dirty flag clears on success.
    pub fn points_dbf(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.points.dirty {
            return Ok(None);
        }
        let bytes = self.points.table.serialize()?;
        self.points.dirty = false;
        Ok(Some(bytes))
    }

    /// Serialize the sections table when it has unsaved changes; `Ok(None)`
    /// means there is nothing to write. The dirty flag clears on success.
    pub fn sections_dbf(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.sections.dirty {
            return Ok(None);
        }
        let bytes = self.sections.table.serialize()?;
        self.sections.dirty = false;
        Ok(Some(bytes))
    }

    fn point(&self, fid: u32) -> Result<&RoutePoint> {
        self.points
            .points
            .get(fid as usize)
            .ok_or(MatchError::UnknownFeature { fid })
    }

    /// Every run point must be one of this session's points. Catches runs
    /// built against another session or stale state before anything mutates.
    fn check_membership(&self, run: &PointRun) -> Result<()> {
        for point in &run.points {
            let owned = self.point(point.fid)?;
            if owned.route != point.route
                || owned.sequence.total_cmp(&point.sequence).is_ne()
                || owned.x.total_cmp(&point.x).is_ne()
                || owned.y.total_cmp(&point.y).is_ne()
            {
                return Err(MatchError::ForeignFeature {
                    fid: point.fid,
                    collection: POINTS_COLLECTION.to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
