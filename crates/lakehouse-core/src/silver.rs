use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts::{self, ArtifactReceipt};
use crate::config::GeneratorConfig;
use crate::error::{PipelineError, Result};
use crate::types::{RawRecord, SilverRecord, RECORD_COLUMNS};

const STAGE: &str = "silver";

pub const CONSUMPTION_RANGE_MWH: (f64, f64) = (0.0, 2_000_000.0);
pub const CO2_RANGE_TONNES: (f64, f64) = (0.0, 5_000_000.0);
pub const TEMPERATURE_RANGE_C: (f64, f64) = (-40.0, 60.0);

/// Spellings that do not title-case into their canonical label.
static LABEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("renewable", "Renewables"),
        ("renewables", "Renewables"),
        ("electric", "Electricity"),
        ("elec", "Electricity"),
        ("natural gas", "Gas"),
        ("industrial", "Industry"),
        ("transportation", "Transport"),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingDate,
    MissingConsumption,
    MissingTemperature,
    MissingCo2,
    BlankCategory,
    ConsumptionOutOfRange,
    TemperatureOutOfRange,
    Co2OutOfRange,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SilverReport {
    pub input_rows: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub kept: usize,
    pub rejections: BTreeMap<RejectReason, usize>,
}

impl SilverReport {
    fn reject(&mut self, reason: RejectReason) {
        self.rejected += 1;
        *self.rejections.entry(reason).or_default() += 1;
    }
}

#[derive(Debug)]
pub struct SilverOutput {
    pub records: Vec<SilverRecord>,
    pub report: SilverReport,
}

/// Collapses inner whitespace and case-folds a label. Blank labels fold to `None`.
fn fold_label(raw: &str) -> Option<String> {
    let folded = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!folded.is_empty()).then_some(folded)
}

/// Maps a label onto its canonical spelling: a known alias, otherwise Title Case.
/// Blank labels have no canonical form.
pub fn canonical_label(raw: &str) -> Option<String> {
    let folded = fold_label(raw)?;

    if let Some(alias) = LABEL_ALIASES.get(folded.as_str()) {
        return Some((*alias).to_string());
    }

    Some(
        folded
            .split(' ')
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Configured category spellings keyed by their folded form. A raw label that
/// folds onto a configured one keeps the configured spelling, so `US-East`
/// never turns into `Us-east`.
#[derive(Debug, Clone, Default)]
pub struct LabelCatalog {
    spellings: HashMap<String, String>,
}

impl LabelCatalog {
    pub fn new<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let spellings = labels
            .into_iter()
            .filter_map(|label| {
                let spelling = label.split_whitespace().collect::<Vec<_>>().join(" ");
                fold_label(label).map(|folded| (folded, spelling))
            })
            .collect();
        Self { spellings }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            config
                .regions
                .iter()
                .chain(&config.sources)
                .chain(&config.sectors)
                .map(String::as_str),
        )
    }

    pub fn canonical(&self, raw: &str) -> Option<String> {
        let folded = fold_label(raw)?;
        match self.spellings.get(&folded) {
            Some(spelling) => Some(spelling.clone()),
            None => canonical_label(raw),
        }
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn within(value: f64, (min, max): (f64, f64)) -> bool {
    value >= min && value <= max
}

/// Validates one Bronze record. The first failing rule decides the reason.
/// Non-numeric measure cells count as missing.
pub fn clean_record(
    raw: &RawRecord,
    labels: &LabelCatalog,
) -> std::result::Result<SilverRecord, RejectReason> {
    let date = raw.date.ok_or(RejectReason::MissingDate)?;
    let consumption_mwh = raw
        .consumption_mwh
        .value()
        .ok_or(RejectReason::MissingConsumption)?;
    let temperature_c = raw
        .temperature_c
        .value()
        .ok_or(RejectReason::MissingTemperature)?;
    let co2_tonnes = raw.co2_tonnes.value().ok_or(RejectReason::MissingCo2)?;

    let region = labels.canonical(&raw.region).ok_or(RejectReason::BlankCategory)?;
    let source = labels.canonical(&raw.source).ok_or(RejectReason::BlankCategory)?;
    let sector = labels.canonical(&raw.sector).ok_or(RejectReason::BlankCategory)?;

    if !within(consumption_mwh, CONSUMPTION_RANGE_MWH) {
        return Err(RejectReason::ConsumptionOutOfRange);
    }
    if !within(temperature_c, TEMPERATURE_RANGE_C) {
        return Err(RejectReason::TemperatureOutOfRange);
    }
    if !within(co2_tonnes, CO2_RANGE_TONNES) {
        return Err(RejectReason::Co2OutOfRange);
    }

    Ok(SilverRecord {
        region,
        source,
        sector,
        date,
        consumption_mwh,
        temperature_c,
        co2_tonnes,
    })
}

/// Reads a Bronze CSV stream, drops exact duplicate rows and cleans the rest.
pub fn transform_reader<R: Read>(reader: R, labels: &LabelCatalog) -> Result<SilverOutput> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let missing: Vec<&str> = RECORD_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h.trim() == *column))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::schema(
            STAGE,
            format!("Bronze input is missing required columns: {}", missing.join(", ")),
        ));
    }
    let headers = csv::StringRecord::from(headers.iter().map(str::trim).collect::<Vec<_>>());

    let mut report = SilverReport::default();
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut kept = Vec::new();

    for (line, row) in csv_reader.records().enumerate() {
        let row = row.map_err(|err| {
            PipelineError::schema(STAGE, format!("malformed Bronze row {}: {err}", line + 1))
        })?;
        report.input_rows += 1;

        if !seen.insert(row.iter().map(str::to_string).collect()) {
            report.duplicates += 1;
            continue;
        }

        let raw: RawRecord = row.deserialize(Some(&headers)).map_err(|err| {
            PipelineError::schema(STAGE, format!("Bronze row {} does not match schema: {err}", line + 1))
        })?;

        match clean_record(&raw, labels) {
            Ok(record) => kept.push(record),
            Err(reason) => report.reject(reason),
        }
    }

    report.kept = kept.len();
    Ok(SilverOutput {
        records: kept,
        report,
    })
}

/// Bronze CSV in, Silver Parquet out. A schema failure writes nothing.
pub fn run(
    input: &Path,
    output: &Path,
    labels: &LabelCatalog,
) -> Result<(SilverReport, ArtifactReceipt)> {
    let file = File::open(input)?;
    let SilverOutput { records, report } = transform_reader(file, labels)?;

    let df = to_frame(&records)?;
    let receipt = artifacts::write_parquet(output, &df)?;

    if report.rejected > 0 || report.duplicates > 0 {
        warn!(
            duplicates = report.duplicates,
            rejected = report.rejected,
            reasons = ?report.rejections,
            "Dropped Bronze rows during cleaning"
        );
    }
    info!(
        input = %input.display(),
        output = %output.display(),
        input_rows = report.input_rows,
        kept = report.kept,
        "Silver layer created"
    );

    Ok((report, receipt))
}

fn days_since_epoch(date: NaiveDate) -> Result<i32> {
    let days = (date - NaiveDate::default()).num_days();
    i32::try_from(days)
        .map_err(|_| PipelineError::schema(STAGE, format!("date {date} is outside the Date range")))
}

pub fn to_frame(records: &[SilverRecord]) -> Result<DataFrame> {
    let date = Series::new(
        "date".into(),
        records
            .iter()
            .map(|r| days_since_epoch(r.date))
            .collect::<Result<Vec<_>>>()?,
    )
    .cast(&DataType::Date)?;

    let df = DataFrame::new(vec![
        Series::new(
            "region".into(),
            records.iter().map(|r| r.region.as_str()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "source".into(),
            records.iter().map(|r| r.source.as_str()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "sector".into(),
            records.iter().map(|r| r.sector.as_str()).collect::<Vec<_>>(),
        )
        .into(),
        date.into(),
        Series::new(
            "consumption_mwh".into(),
            records.iter().map(|r| r.consumption_mwh).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "temperature_c".into(),
            records.iter().map(|r| r.temperature_c).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "co2_tonnes".into(),
            records.iter().map(|r| r.co2_tonnes).collect::<Vec<_>>(),
        )
        .into(),
    ])?;

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_trimmed_and_title_cased() {
        assert_eq!(canonical_label("  north ").as_deref(), Some("North"));
        assert_eq!(canonical_label("SOUTH").as_deref(), Some("South"));
        assert_eq!(canonical_label("north   east").as_deref(), Some("North East"));
        assert_eq!(canonical_label("   "), None);
    }

    #[test]
    fn aliases_map_to_canonical_spelling() {
        assert_eq!(canonical_label("renewable").as_deref(), Some("Renewables"));
        assert_eq!(canonical_label(" Natural  GAS").as_deref(), Some("Gas"));
        assert_eq!(canonical_label("Transportation").as_deref(), Some("Transport"));
    }

    #[test]
    fn configured_spelling_wins_over_title_case() {
        let labels = LabelCatalog::new(["NorthEast", "US-East", "Renewables"]);
        assert_eq!(labels.canonical(" northeast ").as_deref(), Some("NorthEast"));
        assert_eq!(labels.canonical("US-EAST").as_deref(), Some("US-East"));
        assert_eq!(labels.canonical("renewable").as_deref(), Some("Renewables"));
        assert_eq!(labels.canonical("mid  west").as_deref(), Some("Mid West"));
        assert_eq!(labels.canonical(""), None);
    }

    #[test]
    fn epoch_days_round_trip_through_chrono() {
        for date in [
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            NaiveDate::from_ymd_opt(1969, 12, 31).unwrap(),
            NaiveDate::MIN,
            NaiveDate::MAX,
        ] {
            let days = days_since_epoch(date).expect("chrono dates fit the Date range");
            assert_eq!(
                NaiveDate::default() + chrono::Duration::days(i64::from(days)),
                date
            );
        }
    }
}
