use std::collections::HashSet;

use chrono::NaiveDate;
use lakehouse_core::config::GeneratorConfig;
use lakehouse_core::generator::{generate, season_factor, sector_multiplier};
use lakehouse_core::types::Measure;
use lakehouse_core::PipelineError;

fn small_config() -> GeneratorConfig {
    GeneratorConfig {
        regions: vec!["North".into(), "South".into(), "East".into()],
        sources: vec!["Electricity".into(), "Gas".into()],
        sectors: vec!["Residential".into(), "Industry".into()],
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        record_count: 1_000,
        ..GeneratorConfig::default()
    }
}

#[test]
fn same_seed_reproduces_the_same_batch() {
    let first = generate(&small_config()).expect("generate");
    let second = generate(&small_config()).expect("generate");
    assert_eq!(first.records, second.records);
    assert_eq!(first.report, second.report);

    let mut other_seed = small_config();
    other_seed.seed = 8;
    let third = generate(&other_seed).expect("generate");
    assert_ne!(first.records, third.records);
}

#[test]
fn batch_has_exactly_the_requested_size() {
    let batch = generate(&small_config()).expect("generate");
    assert_eq!(batch.records.len(), 1_000);
    assert_eq!(batch.report.records, 1_000);
    assert_eq!(batch.report.duplicates_injected, 10);
}

#[test]
fn values_stay_within_the_configured_domain() {
    let config = small_config();
    let batch = generate(&config).expect("generate");

    let regions: HashSet<String> = config.regions.iter().cloned().collect();
    let months: HashSet<u32> = batch
        .records
        .iter()
        .filter_map(|r| r.date)
        .map(|d| chrono::Datelike::month(&d))
        .collect();
    assert_eq!(months.len(), 12);

    for record in &batch.records {
        let date = record.date.expect("generator always writes a date");
        assert!(date >= config.start_date && date <= config.end_date);
        assert!(record.consumption_mwh.value().map_or(true, |v| v >= 0.0));
        assert!(record.co2_tonnes.value().map_or(true, |v| v >= 0.0));
        assert!(record.temperature_c.value().is_some());

        let folded = lakehouse_core::silver::canonical_label(&record.region).unwrap();
        assert!(regions.contains(&folded), "unexpected region {folded}");
    }
}

#[test]
fn every_category_combination_is_generated() {
    let config = small_config();
    let batch = generate(&config).expect("generate");

    let combos: HashSet<(String, String, String)> = batch
        .records
        .iter()
        .map(|r| {
            (
                r.region.trim().to_lowercase(),
                r.source.trim().to_lowercase(),
                r.sector.trim().to_lowercase(),
            )
        })
        .collect();
    assert_eq!(combos.len(), 3 * 2 * 2);
}

#[test]
fn clean_config_produces_no_dirty_rows() {
    let config = GeneratorConfig {
        missing_consumption_rate: 0.0,
        missing_co2_rate: 0.0,
        bad_type_rate: 0.0,
        noisy_label_rate: 0.0,
        duplicate_rate: 0.0,
        ..small_config()
    };
    let batch = generate(&config).expect("generate");

    assert!(batch.records.iter().all(|r| r.consumption_mwh.value().is_some()));
    assert!(batch.records.iter().all(|r| r.co2_tonnes.value().is_some()));
    assert_eq!(batch.report.invalid_consumption, 0);
    assert_eq!(batch.report.noisy_labels, 0);
    assert_eq!(batch.report.duplicates_injected, 0);
}

#[test]
fn non_numeric_consumption_is_injected_and_counted() {
    let config = GeneratorConfig {
        bad_type_rate: 0.05,
        ..small_config()
    };
    let batch = generate(&config).expect("generate");

    let unique = &batch.records[..batch.records.len() - batch.report.duplicates_injected];
    let invalid = unique
        .iter()
        .filter(|r| r.consumption_mwh == Measure::Invalid)
        .count();
    let missing = unique
        .iter()
        .filter(|r| r.consumption_mwh == Measure::Missing)
        .count();
    assert_eq!(invalid, batch.report.invalid_consumption);
    assert_eq!(missing, batch.report.missing_consumption);
    assert!(invalid > 0);
}

#[test]
fn invalid_parameters_fail_before_generation() {
    let mut config = small_config();
    config.regions.clear();
    assert!(matches!(generate(&config), Err(PipelineError::Config(_))));

    let mut config = small_config();
    config.record_count = 0;
    assert!(matches!(generate(&config), Err(PipelineError::Config(_))));

    let mut config = small_config();
    config.duplicate_rate = 1.5;
    assert!(matches!(generate(&config), Err(PipelineError::Config(_))));

    let mut config = small_config();
    config.bad_type_rate = -0.1;
    assert!(matches!(generate(&config), Err(PipelineError::Config(_))));
}

#[test]
fn seasonal_and_sector_factors_match_the_reference_model() {
    assert_eq!(season_factor(1), 1.25);
    assert_eq!(season_factor(7), 1.10);
    assert_eq!(season_factor(4), 1.0);
    assert_eq!(sector_multiplier("Industry"), 1.3);
    assert_eq!(sector_multiplier("Agriculture"), 1.0);
}
