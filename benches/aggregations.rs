//! Aggregation benchmarks
//!
//! Measures the dashboard queries against synthetic runner tables of
//! increasing size, plus the per-cell parsers they lean on.
//!
//! Run with: cargo bench --bench aggregations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeSet;
use tally::bands::AgeBands;
use tally::duration::parse_minutes;
use tally::marathon::{Gender, RunnerRecord, RunnerTable};
use tally::normalize::normalize;

const SMALL_SIZE: usize = 1_000; // 1K runners
const MEDIUM_SIZE: usize = 50_000; // roughly one big-city marathon

const COUNTRIES: [&str; 8] = ["USA", "KEN", "ETH", "JPN", "GBR", "ITA", "MEX", "CAN"];

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_precision_loss)]
fn runners(n: usize) -> RunnerTable {
    let bands = AgeBands::default();
    let records: Vec<RunnerRecord> = (0..n)
        .map(|i| {
            let age = 18 + (i % 65) as i32;
            let country = COUNTRIES[i % COUNTRIES.len()].to_string();
            RunnerRecord {
                first_name: format!("Runner{i}"),
                age,
                age_group: bands.label_for(age).to_string(),
                gender: [Gender::M, Gender::W, Gender::X][i % 3],
                city: "City".to_string(),
                region: if country == "USA" { "USA" } else { "Abroad" }.to_string(),
                country_code: country,
                state_province: "ST".to_string(),
                overall_place: i as i64 + 1,
                overall_time: "3:30:00".to_string(),
                pace: "08:01".to_string(),
                gender_place: i as i64 / 3 + 1,
                age_grade_time: "3:10:00".to_string(),
                age_grade_place: i as i64 + 1,
                age_grade_percent: 60.0 + (i % 30) as f64,
                races_count: (i % 40) as i32,
                pace_minutes: 6.0 + (i % 300) as f64 / 100.0,
            }
        })
        .collect();
    RunnerTable::from_records(&records, 0).unwrap()
}

/// Benchmark count by (age group, gender)
fn bench_age_group_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("age_group_counts");
    let genders = BTreeSet::from([Gender::W]);

    for size in [SMALL_SIZE, MEDIUM_SIZE] {
        let table = runners(size);
        group.bench_with_input(BenchmarkId::new("all_genders", size), &table, |b, t| {
            b.iter(|| t.age_group_counts(black_box(&BTreeSet::new())).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("women", size), &table, |b, t| {
            b.iter(|| t.age_group_counts(black_box(&genders)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark mean pace by (age, gender, region)
fn bench_avg_pace(c: &mut Criterion) {
    let mut group = c.benchmark_group("avg_pace_by_age");

    for size in [SMALL_SIZE, MEDIUM_SIZE] {
        let table = runners(size);
        group.bench_with_input(BenchmarkId::new("default_genders", size), &table, |b, t| {
            b.iter(|| t.avg_pace_by_age(black_box(&BTreeSet::new())).unwrap());
        });
    }

    group.finish();
}

/// Benchmark the two top-N tables
fn bench_top_n(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_n");
    let table = runners(MEDIUM_SIZE);

    group.bench_function("top_countries_10", |b| {
        b.iter(|| table.top_countries(black_box(10), &BTreeSet::new()).unwrap());
    });
    group.bench_function("top_runners_10", |b| {
        b.iter(|| table.top_runners_by_races(black_box(10), &BTreeSet::new()).unwrap());
    });

    group.finish();
}

/// Benchmark cell parsers
fn bench_parsers(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsers");

    group.bench_function("parse_minutes_mmss", |b| {
        b.iter(|| parse_minutes(black_box("07:42")).unwrap());
    });
    group.bench_function("parse_minutes_hhmmss", |b| {
        b.iter(|| parse_minutes(black_box("01:02:03.250")).unwrap());
    });

    let tokens = ["<LOQ", "<5", "12.34", "42", "NO RfD", "not tested"];
    group.bench_function("normalize_mixed", |b| {
        b.iter(|| {
            for token in &tokens {
                black_box(normalize(black_box(token)));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_age_group_counts,
    bench_avg_pace,
    bench_top_n,
    bench_parsers
);
criterion_main!(benches);
