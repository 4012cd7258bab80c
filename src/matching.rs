//! Per-route denoising pass that assigns every point a section.
//!
//! ## Algorithm
//!
//! 1. Partition points by route id and sort each group by sequence number
//!    (associations never cross route boundaries)
//! 2. Query the spatial index once per point for (nearest section, distance)
//! 3. Smooth the raw nearest labels with a rolling majority vote: interior
//!    points take the window majority whenever their nearest distance is
//!    within tolerance; the half-window tails at both ends additionally
//!    require a point's own nearest label to match the majority until one
//!    vote has been accepted, which suppresses stray matches where a route
//!    approaches or leaves the network
//! 4. Segment the label array into maximal runs and trim diverging tails
//!
//! The pass never mutates attributes; applying runs is the caller's policy.

use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::runs::PointRun;
use crate::spatial_index::SectionIndex;
use crate::{AssignConfig, RoutePoint, Section};

/// Assign every point a section and segment the result into trimmed runs.
///
/// Within one route, runs come back in point-sequence order; ordering across
/// routes is unspecified. Unassignable points (nothing within tolerance, or
/// an empty sections collection) come back in unassigned runs rather than
/// erroring.
pub fn identify_runs(
    points: &[RoutePoint],
    sections: &[Section],
    config: &AssignConfig,
) -> Result<Vec<PointRun>> {
    let started = std::time::Instant::now();
    let index = SectionIndex::build(sections);
    let routes = group_by_route(points);
    let route_count = routes.len();

    let mut runs = Vec::new();
    for (route, group) in routes {
        let (nearest, distances) = nearest_labels(&group, &index, sections);
        let labels = vote_labels(&nearest, &distances, config);
        let before = runs.len();
        for run in PointRun::from_point_array(&group, &labels, sections)? {
            runs.extend(run.trim());
        }
        log::debug!(
            "[Assign] route {}: {} points -> {} runs",
            route,
            group.len(),
            runs.len() - before
        );
    }

    log::info!(
        "[Assign] {} points over {} routes against {} sections -> {} runs in {:?}",
        points.len(),
        route_count,
        sections.len(),
        runs.len(),
        started.elapsed()
    );
    Ok(runs)
}

/// Partition points by route id, each group sorted ascending by sequence.
pub(crate) fn group_by_route(points: &[RoutePoint]) -> BTreeMap<String, Vec<RoutePoint>> {
    let mut routes: BTreeMap<String, Vec<RoutePoint>> = BTreeMap::new();
    for point in points {
        routes
            .entry(point.route.clone())
            .or_default()
            .push(point.clone());
    }
    for group in routes.values_mut() {
        group.sort_by(|a, b| a.sequence.total_cmp(&b.sequence));
    }
    routes
}

/// Nearest-section label and distance per point.
///
/// Points with no indexed segment anywhere get an empty label at infinite
/// distance.
fn nearest_labels(
    points: &[RoutePoint],
    index: &SectionIndex,
    sections: &[Section],
) -> (Vec<String>, Vec<f64>) {
    let mut labels = Vec::with_capacity(points.len());
    let mut distances = Vec::with_capacity(points.len());
    for point in points {
        match index.nearest(point.x, point.y) {
            Some(hit) => {
                labels.push(sections[hit.section].id.clone());
                distances.push(hit.distance);
            }
            None => {
                labels.push(String::new());
                distances.push(f64::INFINITY);
            }
        }
    }
    (labels, distances)
}

/// Any label achieving the maximum count.
///
/// Ties are not deterministically broken; callers must accept any label
/// whose count equals the maximum. `None` only for an empty slice.
pub fn most_frequent(labels: &[String]) -> Option<String> {
    let mut counts: HashMap<&String, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(label, _)| label.clone())
}

/// Smooth raw nearest labels with the rolling majority vote.
///
/// `nearest[i]` / `distances[i]` are the per-point index results in route
/// order. Returns one label per point, empty = unassigned.
pub fn vote_labels(nearest: &[String], distances: &[f64], config: &AssignConfig) -> Vec<String> {
    let n = nearest.len();
    debug_assert_eq!(n, distances.len());
    let mut labels = vec![String::new(); n];
    if n == 0 {
        return labels;
    }

    let width = config.window_width.max(1);
    let half = width / 2;
    let mut window: Vec<String> = nearest.iter().take(width).cloned().collect();

    let lead_end = half.min(n);
    let tail_start = n.saturating_sub(half).max(lead_end);

    // Leading tail: the initial window stays fixed. Points stay unassigned
    // until one matches the window majority outright.
    let lead_majority = most_frequent(&window).unwrap_or_default();
    let mut accepted = false;
    for i in 0..lead_end {
        if distances[i] < config.max_distance && (accepted || nearest[i] == lead_majority) {
            labels[i] = lead_majority.clone();
            accepted = true;
        }
    }

    // Interior: slide the window (drop the oldest vote, admit the one half a
    // window ahead), then take its majority when the distance allows.
    for i in lead_end..n.saturating_sub(half) {
        window.remove(0);
        window.push(nearest[i + half].clone());
        if distances[i] < config.max_distance {
            if let Some(majority) = most_frequent(&window) {
                labels[i] = majority;
            }
        }
    }

    // Trailing tail: the final window state stays fixed. Walked outside-in
    // so suppression protects the outermost points.
    let tail_majority = most_frequent(&window).unwrap_or_default();
    let mut accepted = false;
    for i in (tail_start..n).rev() {
        if distances[i] < config.max_distance && (accepted || nearest[i] == tail_majority) {
            labels[i] = tail_majority.clone();
            accepted = true;
        }
    }

    labels
}

// ============================================================================
// Tests
// ============================================================================
