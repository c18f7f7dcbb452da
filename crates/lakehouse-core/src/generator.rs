//! Synthetic Bronze data for the energy & emissions pipeline.
//!
//! Records are reproducible for a given seed. A configurable share of them is
//! deliberately dirty (missing or non-numeric measures, untidy labels, exact
//! duplicates) so the Silver stage has something to clean.

use std::path::Path;

use chrono::{Datelike, Duration};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::Serialize;
use tracing::info;

use crate::artifacts::{self, ArtifactReceipt};
use crate::config::GeneratorConfig;
use crate::error::{PipelineError, Result};
use crate::types::{Measure, RawRecord};

const CONSUMPTION_MEAN_MWH: f64 = 900.0;
const CONSUMPTION_STD_MWH: f64 = 180.0;
const TEMPERATURE_MEAN_C: f64 = 12.0;
const TEMPERATURE_STD_C: f64 = 8.0;
/// Heating demand: each degree below this adds `HEATING_MWH_PER_DEGREE`.
const HEATING_BASELINE_C: f64 = 8.0;
const HEATING_MWH_PER_DEGREE: f64 = 18.0;
const CO2_MEAN_TONNES: f64 = 420.0;
const CO2_STD_TONNES: f64 = 90.0;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GeneratorReport {
    pub records: usize,
    pub duplicates_injected: usize,
    pub missing_consumption: usize,
    pub invalid_consumption: usize,
    pub missing_co2: usize,
    pub noisy_labels: usize,
}

#[derive(Debug)]
pub struct GeneratedBatch {
    pub records: Vec<RawRecord>,
    pub report: GeneratorReport,
}

/// Higher demand in winter, slightly higher in summer.
pub fn season_factor(month: u32) -> f64 {
    match month {
        12 | 1 | 2 => 1.25,
        6..=8 => 1.10,
        _ => 1.0,
    }
}

pub fn sector_multiplier(sector: &str) -> f64 {
    match sector {
        "Residential" => 0.9,
        "Industry" => 1.3,
        "Transport" => 1.15,
        _ => 1.0,
    }
}

pub fn generate(config: &GeneratorConfig) -> Result<GeneratedBatch> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let consumption_noise = normal(CONSUMPTION_MEAN_MWH, CONSUMPTION_STD_MWH)?;
    let temperature_noise = normal(TEMPERATURE_MEAN_C, TEMPERATURE_STD_C)?;
    let co2_noise = normal(CO2_MEAN_TONNES, CO2_STD_TONNES)?;

    let span_days = (config.end_date - config.start_date).num_days();
    let duplicates = ((config.record_count as f64) * config.duplicate_rate).round() as usize;
    // Duplicates are carved out of the requested total, never added on top.
    let duplicates = duplicates.min(config.record_count.saturating_sub(1));
    let unique = config.record_count - duplicates;

    let mut report = GeneratorReport::default();
    let mut records = Vec::with_capacity(config.record_count);

    let regions = config.regions.len();
    let sources = config.sources.len();
    let sectors = config.sectors.len();

    for i in 0..unique {
        // Round-robin categories so every region/source/sector combination appears.
        let region = &config.regions[i % regions];
        let source = &config.sources[(i / regions) % sources];
        let sector = &config.sectors[(i / (regions * sources)) % sectors];

        let offset = rng.gen_range(0..=span_days);
        let date = config
            .start_date
            .checked_add_signed(Duration::days(offset))
            .unwrap_or(config.start_date);
        let season = season_factor(date.month());

        let temperature = round_to(temperature_noise.sample(&mut rng), 2);
        let base = consumption_noise.sample(&mut rng) * season;
        let consumption =
            (base + (HEATING_BASELINE_C - temperature) * HEATING_MWH_PER_DEGREE).max(0.0);
        let co2 = (co2_noise.sample(&mut rng) * season * sector_multiplier(sector)).max(0.0);

        // Both draws happen for every row so the stream stays aligned across rates.
        let missing = rng.gen::<f64>() < config.missing_consumption_rate;
        let garbled = rng.gen::<f64>() < config.bad_type_rate;
        let consumption_mwh = if garbled {
            report.invalid_consumption += 1;
            Measure::Invalid
        } else if missing {
            report.missing_consumption += 1;
            Measure::Missing
        } else {
            Measure::Value(consumption)
        };

        let co2_tonnes = if rng.gen::<f64>() < config.missing_co2_rate {
            report.missing_co2 += 1;
            Measure::Missing
        } else {
            Measure::Value(co2)
        };

        let mut record = RawRecord {
            region: region.clone(),
            source: source.clone(),
            sector: sector.clone(),
            date: Some(date),
            consumption_mwh,
            temperature_c: Measure::Value(temperature),
            co2_tonnes,
        };

        if rng.gen::<f64>() < config.noisy_label_rate {
            report.noisy_labels += 1;
            dirty_label(&mut rng, &mut record);
        }

        records.push(record);
    }

    for _ in 0..duplicates {
        let idx = rng.gen_range(0..unique);
        records.push(records[idx].clone());
    }

    report.records = records.len();
    report.duplicates_injected = duplicates;

    Ok(GeneratedBatch { records, report })
}

/// Generates the Bronze layer and writes it as CSV.
pub fn run(config: &GeneratorConfig, output: &Path) -> Result<(GeneratorReport, ArtifactReceipt)> {
    let batch = generate(config)?;
    let receipt = artifacts::write_csv(output, &batch.records)?;

    info!(
        path = %output.display(),
        records = batch.report.records,
        duplicates = batch.report.duplicates_injected,
        missing_consumption = batch.report.missing_consumption,
        invalid_consumption = batch.report.invalid_consumption,
        missing_co2 = batch.report.missing_co2,
        noisy_labels = batch.report.noisy_labels,
        "Generated Bronze dataset"
    );

    Ok((batch.report, receipt))
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(mean, std_dev)
        .map_err(|e| PipelineError::Config(format!("invalid noise distribution: {e}")))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn dirty_label(rng: &mut StdRng, record: &mut RawRecord) {
    let field = match rng.gen_range(0..3) {
        0 => &mut record.region,
        1 => &mut record.source,
        _ => &mut record.sector,
    };
    *field = match rng.gen_range(0..3) {
        0 => format!("  {field} "),
        1 => field.to_uppercase(),
        _ => field.to_lowercase(),
    };
}

