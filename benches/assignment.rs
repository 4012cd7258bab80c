//! Criterion benchmarks for the association pass and the attribute codec.
//!
//! Run with: `cargo bench --features synthetic`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use section_matcher::synthetic::SurveyScenario;
use section_matcher::{identify_runs, AssignConfig, AttributeSchema, AttributeTable};

fn scenario(route_count: usize) -> SurveyScenario {
    SurveyScenario {
        grid: 6,
        block: 400.0,
        points_per_leg: 25,
        noise: 4.0,
        route_count,
        detour_points: 5,
        seed: 7,
    }
}

fn bench_identify_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("identify_runs");
    let config = AssignConfig::default();

    for route_count in [4, 16, 64] {
        let dataset = scenario(route_count).generate();
        group.bench_with_input(
            BenchmarkId::new("grid_survey", dataset.points.len()),
            &dataset,
            |b, dataset| {
                b.iter(|| identify_runs(&dataset.points, &dataset.sections, &config));
            },
        );
    }

    group.finish();
}

fn bench_attribute_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribute_table");

    let schema = AttributeSchema::default();
    let (_, table) = scenario(64).generate().point_inputs(&schema);
    let bytes = table.serialize().unwrap();

    group.bench_function("serialize", |b| {
        b.iter(|| table.serialize());
    });
    group.bench_function("parse", |b| {
        b.iter(|| AttributeTable::parse(&bytes));
    });

    #[cfg(feature = "parallel")]
    group.bench_function("parse_parallel", |b| {
        use section_matcher::dbf::ParallelExtractor;
        b.iter(|| AttributeTable::parse_with(&bytes, &ParallelExtractor));
    });

    group.finish();
}

criterion_group!(benches, bench_identify_runs, bench_attribute_codec);
criterion_main!(benches);
