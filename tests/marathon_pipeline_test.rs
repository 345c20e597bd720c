//! Integration test: runner CSV on disk through every dashboard table
//!
//! 1. Write a runner CSV to a temp dir
//! 2. Load it with a config-built age band set
//! 3. Run each aggregation twice and compare
//! 4. Export the normalized table and read it back

use arrow::array::Array;
use std::collections::BTreeSet;
use std::io::Write;
use tally::bands::AgeBands;
use tally::config::TallyConfig;
use tally::marathon::{runner_schema, Gender, RunnerTable};
use tally::storage::{self, Table};

const HEADER: &str = "firstName,bib,age,gender,city,countryCode,stateProvince,overallPlace,overallTime,pace,genderPlace,ageGradeTime,ageGradePlace,ageGradePercent,racesCount";

/// 60 complete runners over three countries plus 3 incomplete rows
fn write_runner_csv(path: &std::path::Path) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for i in 0..60u32 {
        let country = ["USA", "KEN", "JPN"][(i % 3) as usize];
        let gender = ["M", "W"][(i % 2) as usize];
        let age = 18 + (i % 60);
        let minutes = 6 + (i % 5);
        writeln!(
            file,
            "Runner{i},{i},{age},{gender},City{i},{country},ST,{place},3:00:00,{minutes:02}:30,{i},2:55:00,{i},70.0,{races}",
            place = i + 1,
            races = i % 17,
        )
        .unwrap();
    }
    writeln!(file, "NoAge,100,,M,Oslo,NOR,OS,61,3:00:00,06:00,1,2:55:00,1,70.0,1").unwrap();
    writeln!(file, "NoState,101,40,W,Oslo,NOR,,62,3:00:00,06:00,1,2:55:00,1,70.0,1").unwrap();
    writeln!(file, "BadAge,102,forty,W,Oslo,NOR,OS,63,3:00:00,06:00,1,2:55:00,1,70.0,1").unwrap();
}

fn load() -> (tempfile::TempDir, RunnerTable) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runners.csv");
    write_runner_csv(&path);

    let config = TallyConfig::from_toml_str("[marathon.age_bands]\nstep = 20\n").unwrap();
    let bands = AgeBands::new(config.marathon.age_bands).unwrap();
    let runners = RunnerTable::load_csv(&path, &bands).unwrap();
    (dir, runners)
}

#[test]
fn test_incomplete_rows_are_dropped() {
    let (_dir, runners) = load();
    assert_eq!(runners.num_rows(), 60);
    assert_eq!(runners.dropped_rows(), 3);

    let summary = runners.summary().unwrap();
    assert_eq!(summary.runners, 60);
    assert_eq!(summary.nationalities, 3);
    assert_eq!(summary.men + summary.women, 60);
}

#[test]
fn test_band_step_from_config() {
    let (_dir, runners) = load();
    let groups = runners.age_group_counts(&BTreeSet::new()).unwrap();
    let labels = storage::utf8(&groups, "ageGroup").unwrap();
    let labels: BTreeSet<&str> = (0..labels.len()).map(|i| labels.value(i)).collect();
    assert_eq!(labels, BTreeSet::from(["10-30", "30-50", "50-70", "70-90"]));

    let counts = storage::int64(&groups, "count").unwrap();
    assert_eq!(counts.values().iter().sum::<i64>(), 60);
}

#[test]
fn test_aggregations_are_idempotent() {
    let (_dir, runners) = load();
    let women = BTreeSet::from([Gender::W]);

    assert_eq!(
        runners.runners_by_age(&women).unwrap(),
        runners.runners_by_age(&women).unwrap()
    );
    assert_eq!(
        runners.avg_pace_by_age_group(&women).unwrap(),
        runners.avg_pace_by_age_group(&women).unwrap()
    );
    assert_eq!(
        runners.top_countries(2, &women).unwrap(),
        runners.top_countries(2, &women).unwrap()
    );
}

#[test]
fn test_top_countries_keeps_every_gender_row() {
    let (_dir, runners) = load();
    let top = runners.top_countries(2, &BTreeSet::new()).unwrap();
    let countries = storage::utf8(&top, "countryCode").unwrap();
    let distinct: BTreeSet<&str> = (0..countries.len()).map(|i| countries.value(i)).collect();
    assert_eq!(distinct.len(), 2);
    assert_eq!(top.num_rows(), 4);

    let counts = storage::int64(&top, "count").unwrap();
    for i in 1..counts.len() {
        assert!(counts.value(i - 1) >= counts.value(i));
    }
}

#[test]
fn test_top_runners_by_races() {
    let (_dir, runners) = load();
    let top = runners.top_runners_by_races(5, &BTreeSet::new()).unwrap();
    assert_eq!(top.num_rows(), 5);

    let races = storage::int32(&top, "racesCount").unwrap();
    assert_eq!(races.value(0), 16);
    for i in 1..races.len() {
        assert!(races.value(i - 1) >= races.value(i));
    }
}

#[test]
fn test_avg_pace_is_rounded() {
    let (_dir, runners) = load();
    let batch = runners.avg_pace_by_age(&BTreeSet::new()).unwrap();
    let avg = storage::float64(&batch, "avgPace").unwrap();
    for i in 0..avg.len() {
        let scaled = avg.value(i) * 100.0;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }
}

#[test]
fn test_export_round_trip() {
    let (dir, runners) = load();
    let bytes = runners.export_csv().unwrap();

    let export = dir.path().join("export.csv");
    std::fs::write(&export, &bytes).unwrap();
    let reread = std::fs::read(&export).unwrap();

    let restored = Table::from_csv_bytes(runner_schema(), &reread).unwrap();
    assert_eq!(
        restored.combined().unwrap(),
        runners.table().combined().unwrap()
    );
}

#[test]
fn test_missing_file() {
    let err = RunnerTable::load_csv("/nonexistent/runners.csv", &AgeBands::default()).unwrap_err();
    assert!(err.to_string().contains("Storage error"));
}
