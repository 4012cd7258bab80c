//! Synthetic survey-data generator for stress testing and benchmarking.
//!
//! Builds a deterministic street grid of named sections plus route point
//! streams that climb the grid with configurable GPS noise and off-network
//! detours, carrying ground-truth labels to validate assignments against.
//!
//! Feature-gated behind `synthetic`; not included in production builds.
//!
//! # Example
//!
//! ```rust
//! use section_matcher::synthetic::SurveyScenario;
//!
//! let scenario = SurveyScenario {
//!     grid: 4,
//!     block: 400.0,
//!     points_per_leg: 20,
//!     noise: 4.0,
//!     route_count: 8,
//!     detour_points: 5,
//!     seed: 42,
//! };
//!
//! let dataset = scenario.generate();
//! assert_eq!(dataset.points.len(), dataset.truth.len());
//! assert_eq!(dataset.sections.len(), 8);
//! ```

use geo::{LineString, Point};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dbf::{AttributeRow, AttributeTable, FieldDescriptor, FieldKind, FieldValue};
use crate::{AttributeSchema, FeatureGeometry, RoutePoint, Section, SectionShape};

/// Configuration for one generated survey scenario.
///
/// The section network is a square grid: `grid` vertical avenues and `grid`
/// horizontal streets, `block` units apart. Each route climbs one avenue
/// from bottom to top and then wanders off the network.
#[derive(Debug, Clone)]
pub struct SurveyScenario {
    /// Streets per direction; the grid spans `(grid - 1) * block` units.
    /// Must be at least 2.
    pub grid: usize,
    /// Distance between adjacent parallel streets (planar units).
    pub block: f64,
    /// Points logged along each block-long leg of a route.
    pub points_per_leg: usize,
    /// GPS noise amplitude: each coordinate shifts up to this far.
    pub noise: f64,
    /// Routes to generate; route `r` climbs avenue `r % grid`.
    pub route_count: usize,
    /// Off-network points appended after each route's climb.
    pub detour_points: usize,
    /// RNG seed for deterministic reproduction.
    pub seed: u64,
}

/// A complete generated survey with ground truth.
pub struct SurveyDataset {
    pub sections: Vec<Section>,
    /// All routes' points, in fid order.
    pub points: Vec<RoutePoint>,
    /// Ground-truth section id per point, aligned with `points`.
    /// Empty for detour points that belong to no section.
    pub truth: Vec<String>,
}

impl SurveyScenario {
    /// Generate the dataset. Identical seeds produce identical output.
    pub fn generate(&self) -> SurveyDataset {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let sections = self.grid_sections();
        let extent = self.block * (self.grid - 1) as f64;

        let mut points = Vec::new();
        let mut truth = Vec::new();
        for r in 0..self.route_count {
            let route = format!("R{r}");
            let avenue = r % self.grid;
            let avenue_id = format!("V{avenue}");
            let x0 = avenue as f64 * self.block;
            let mut sequence = 1.0;

            for leg in 0..self.grid - 1 {
                let base = leg as f64 * self.block;
                for i in 0..self.points_per_leg {
                    let frac = i as f64 / self.points_per_leg as f64;
                    let x = x0 + jitter(&mut rng, self.noise);
                    let y = base + frac * self.block + jitter(&mut rng, self.noise);
                    points.push(RoutePoint::new(points.len() as u32, x, y, &route, sequence));
                    truth.push(avenue_id.clone());
                    sequence += 1.0;
                }
            }
            // Top-of-avenue endpoint, then the off-network detour.
            let x = x0 + jitter(&mut rng, self.noise);
            let y = extent + jitter(&mut rng, self.noise);
            points.push(RoutePoint::new(points.len() as u32, x, y, &route, sequence));
            truth.push(avenue_id.clone());
            sequence += 1.0;

            for j in 1..=self.detour_points {
                let away = j as f64 * self.block;
                let x = x0 + away + jitter(&mut rng, self.noise);
                let y = extent + away + jitter(&mut rng, self.noise);
                points.push(RoutePoint::new(points.len() as u32, x, y, &route, sequence));
                truth.push(String::new());
                sequence += 1.0;
            }
        }

        log::debug!(
            "[Synthetic] {} sections, {} points over {} routes (seed {})",
            sections.len(),
            points.len(),
            self.route_count,
            self.seed
        );
        SurveyDataset {
            sections,
            points,
            truth,
        }
    }

    fn grid_sections(&self) -> Vec<Section> {
        let mut sections = Vec::with_capacity(self.grid * 2);
        for c in 0..self.grid {
            let x = c as f64 * self.block;
            let vertices: Vec<(f64, f64)> =
                (0..self.grid).map(|k| (x, k as f64 * self.block)).collect();
            sections.push(Section::new(
                &format!("V{c}"),
                Some(&format!("Avenue {c}")),
                SectionShape::Polyline(LineString::from(vertices)),
            ));
        }
        for h in 0..self.grid {
            let y = h as f64 * self.block;
            let vertices: Vec<(f64, f64)> =
                (0..self.grid).map(|k| (k as f64 * self.block, y)).collect();
            sections.push(Section::new(
                &format!("H{h}"),
                Some(&format!("Street {h}")),
                SectionShape::Polyline(LineString::from(vertices)),
            ));
        }
        sections
    }
}

impl SurveyDataset {
    /// Feature-collection form of the points, ready for
    /// [`PointCollection::new`](crate::PointCollection::new).
    pub fn point_inputs(&self, schema: &AttributeSchema) -> (Vec<FeatureGeometry>, AttributeTable) {
        let geometries = self
            .points
            .iter()
            .map(|p| FeatureGeometry::Point(Point::new(p.x, p.y)))
            .collect();
        let fields = vec![
            FieldDescriptor::new(&schema.route, FieldKind::Character, 16, 0),
            FieldDescriptor::new(&schema.sequence, FieldKind::Numeric, 12, 0),
            FieldDescriptor::new(&schema.section_id, FieldKind::Character, 16, 0),
        ];
        let rows = self
            .points
            .iter()
            .map(|p| {
                let mut row = AttributeRow::new();
                row.insert(schema.route.clone(), FieldValue::Text(p.route.clone()));
                row.insert(schema.sequence.clone(), FieldValue::Number(p.sequence));
                row.insert(schema.section_id.clone(), FieldValue::Null);
                row
            })
            .collect();
        (geometries, AttributeTable::new(fields, rows))
    }

    /// Feature-collection form of the sections, ready for
    /// [`SectionCollection::new`](crate::SectionCollection::new).
    pub fn section_inputs(
        &self,
        schema: &AttributeSchema,
    ) -> (Vec<FeatureGeometry>, AttributeTable) {
        let geometries = self
            .sections
            .iter()
            .map(|s| match &s.shape {
                SectionShape::Polyline(line) => FeatureGeometry::Polyline(line.clone()),
                SectionShape::MultiPolyline(lines) => {
                    FeatureGeometry::MultiPolyline(lines.clone())
                }
            })
            .collect();
        let fields = vec![
            FieldDescriptor::new(&schema.unique_id, FieldKind::Character, 16, 0),
            FieldDescriptor::new(&schema.section_name, FieldKind::Character, 24, 0),
        ];
        let rows = self
            .sections
            .iter()
            .map(|s| {
                let mut row = AttributeRow::new();
                row.insert(schema.unique_id.clone(), FieldValue::Text(s.id.clone()));
                let name = match &s.name {
                    Some(name) => FieldValue::Text(name.clone()),
                    None => FieldValue::Null,
                };
                row.insert(schema.section_name.clone(), name);
                row
            })
            .collect();
        (geometries, AttributeTable::new(fields, rows))
    }
}

fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-amplitude..=amplitude)
}
