use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::artifacts::{self, ArtifactReceipt};
use crate::error::{PipelineError, Result};
use crate::artifacts::require_columns;
use crate::types::{CarbonIntensityRow, EmissionsMonthlyRow, EnergyMonthlyRow, RECORD_COLUMNS};

const STAGE: &str = "gold";

pub const ENERGY_MONTHLY_FILE: &str = "energy_monthly.parquet";
pub const EMISSIONS_MONTHLY_FILE: &str = "emissions_monthly.parquet";
pub const CARBON_INTENSITY_FILE: &str = "carbon_intensity.parquet";

pub const ENERGY_MONTHLY_COLUMNS: [&str; 8] = [
    "region",
    "source",
    "year",
    "month",
    "avg_consumption_mwh",
    "max_consumption_mwh",
    "avg_temp_c",
    "record_count",
];

pub const EMISSIONS_MONTHLY_COLUMNS: [&str; 7] = [
    "region",
    "sector",
    "year",
    "month",
    "avg_co2_tonnes",
    "total_co2_tonnes",
    "record_count",
];

pub const CARBON_INTENSITY_COLUMNS: [&str; 6] = [
    "region",
    "year",
    "month",
    "total_energy_mwh",
    "total_co2_tonnes",
    "co2_per_mwh",
];

#[derive(Debug, Clone)]
pub struct GoldMarts {
    pub energy_monthly: DataFrame,
    pub emissions_monthly: DataFrame,
    pub carbon_intensity: DataFrame,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GoldReport {
    pub silver_rows: usize,
    pub energy_monthly_rows: usize,
    pub emissions_monthly_rows: usize,
    pub carbon_intensity_rows: usize,
    pub null_intensity_rows: usize,
}

/// Locations of the three marts inside a Gold directory.
#[derive(Debug, Clone)]
pub struct GoldPaths {
    pub energy_monthly: PathBuf,
    pub emissions_monthly: PathBuf,
    pub carbon_intensity: PathBuf,
}

impl GoldPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            energy_monthly: dir.join(ENERGY_MONTHLY_FILE),
            emissions_monthly: dir.join(EMISSIONS_MONTHLY_FILE),
            carbon_intensity: dir.join(CARBON_INTENSITY_FILE),
        }
    }
}

/// Builds the three marts. The input is put into a canonical order first, so
/// shuffled Silver rows aggregate to identical values.
pub fn aggregate(silver: &DataFrame) -> Result<GoldMarts> {
    require_columns(STAGE, silver, &RECORD_COLUMNS)?;

    let base = silver
        .clone()
        .lazy()
        .sort(RECORD_COLUMNS, SortMultipleOptions::default())
        .with_columns([
            col("date").dt().year().cast(DataType::Int32).alias("year"),
            col("date").dt().month().cast(DataType::Int32).alias("month"),
        ]);

    let energy_monthly = base
        .clone()
        .group_by([col("region"), col("source"), col("year"), col("month")])
        .agg([
            col("consumption_mwh").mean().alias("avg_consumption_mwh"),
            col("consumption_mwh").max().alias("max_consumption_mwh"),
            col("temperature_c").mean().alias("avg_temp_c"),
            len().cast(DataType::Int64).alias("record_count"),
        ])
        .sort(
            ["region", "source", "year", "month"],
            SortMultipleOptions::default(),
        )
        .collect()?;

    let emissions_monthly = base
        .clone()
        .group_by([col("region"), col("sector"), col("year"), col("month")])
        .agg([
            col("co2_tonnes").mean().alias("avg_co2_tonnes"),
            col("co2_tonnes").sum().alias("total_co2_tonnes"),
            len().cast(DataType::Int64).alias("record_count"),
        ])
        .sort(
            ["region", "sector", "year", "month"],
            SortMultipleOptions::default(),
        )
        .collect()?;

    // Totals span every source and every sector of a region/month; a zero energy
    // total yields a null intensity rather than a division error or NaN.
    let carbon_intensity = base
        .group_by([col("region"), col("year"), col("month")])
        .agg([
            col("consumption_mwh").sum().alias("total_energy_mwh"),
            col("co2_tonnes").sum().alias("total_co2_tonnes"),
        ])
        .with_column(
            when(col("total_energy_mwh").eq(lit(0.0)))
                .then(lit(NULL).cast(DataType::Float64))
                .otherwise(col("total_co2_tonnes") / col("total_energy_mwh"))
                .alias("co2_per_mwh"),
        )
        .sort(["region", "year", "month"], SortMultipleOptions::default())
        .collect()?;

    Ok(GoldMarts {
        energy_monthly,
        emissions_monthly,
        carbon_intensity,
    })
}

/// Silver Parquet in, three Gold Parquet marts out.
pub fn run(input: &Path, output_dir: &Path) -> Result<(GoldReport, Vec<ArtifactReceipt>)> {
    let silver = artifacts::read_parquet(input)?;
    let marts = aggregate(&silver)?;
    let paths = GoldPaths::in_dir(output_dir);

    let report = GoldReport {
        silver_rows: silver.height(),
        energy_monthly_rows: marts.energy_monthly.height(),
        emissions_monthly_rows: marts.emissions_monthly.height(),
        carbon_intensity_rows: marts.carbon_intensity.height(),
        null_intensity_rows: marts.carbon_intensity.column("co2_per_mwh")?.null_count(),
    };

    let receipts = vec![
        artifacts::write_parquet(&paths.energy_monthly, &marts.energy_monthly)?,
        artifacts::write_parquet(&paths.emissions_monthly, &marts.emissions_monthly)?,
        artifacts::write_parquet(&paths.carbon_intensity, &marts.carbon_intensity)?,
    ];

    info!(
        input = %input.display(),
        output_dir = %output_dir.display(),
        energy_monthly = report.energy_monthly_rows,
        emissions_monthly = report.emissions_monthly_rows,
        carbon_intensity = report.carbon_intensity_rows,
        null_intensity = report.null_intensity_rows,
        "Gold layer created"
    );

    Ok((report, receipts))
}

/// The marts as typed rows, ready for the warehouse loader.
#[derive(Debug, Clone, Default)]
pub struct GoldRows {
    pub energy_monthly: Vec<EnergyMonthlyRow>,
    pub emissions_monthly: Vec<EmissionsMonthlyRow>,
    pub carbon_intensity: Vec<CarbonIntensityRow>,
}

impl GoldRows {
    pub fn from_marts(marts: &GoldMarts) -> Result<Self> {
        Ok(Self {
            energy_monthly: energy_rows(&marts.energy_monthly)?,
            emissions_monthly: emissions_rows(&marts.emissions_monthly)?,
            carbon_intensity: intensity_rows(&marts.carbon_intensity)?,
        })
    }

    pub fn read_dir(dir: &Path) -> Result<Self> {
        let paths = GoldPaths::in_dir(dir);
        Ok(Self {
            energy_monthly: energy_rows(&artifacts::read_parquet(&paths.energy_monthly)?)?,
            emissions_monthly: emissions_rows(&artifacts::read_parquet(&paths.emissions_monthly)?)?,
            carbon_intensity: intensity_rows(&artifacts::read_parquet(&paths.carbon_intensity)?)?,
        })
    }

    pub fn len(&self) -> usize {
        self.energy_monthly.len() + self.emissions_monthly.len() + self.carbon_intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn column_as(df: &DataFrame, name: &str, dtype: &DataType) -> Result<Column> {
    df.column(name)?
        .cast(dtype)
        .map_err(|err| PipelineError::schema(STAGE, format!("column {name} has wrong type: {err}")))
}

fn null_cell(mart: &str, idx: usize) -> PipelineError {
    PipelineError::schema(STAGE, format!("{mart} row {idx} has null key or measure"))
}

pub fn energy_rows(df: &DataFrame) -> Result<Vec<EnergyMonthlyRow>> {
    require_columns(STAGE, df, &ENERGY_MONTHLY_COLUMNS)?;

    let region = column_as(df, "region", &DataType::String)?;
    let source = column_as(df, "source", &DataType::String)?;
    let year = column_as(df, "year", &DataType::Int32)?;
    let month = column_as(df, "month", &DataType::Int32)?;
    let avg = column_as(df, "avg_consumption_mwh", &DataType::Float64)?;
    let max = column_as(df, "max_consumption_mwh", &DataType::Float64)?;
    let temp = column_as(df, "avg_temp_c", &DataType::Float64)?;
    let count = column_as(df, "record_count", &DataType::Int64)?;

    let (region, source) = (region.str()?, source.str()?);
    let (year, month) = (year.i32()?, month.i32()?);
    let (avg, max, temp, count) = (avg.f64()?, max.f64()?, temp.f64()?, count.i64()?);

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (
            Some(region),
            Some(source),
            Some(year),
            Some(month),
            Some(avg_consumption_mwh),
            Some(max_consumption_mwh),
            Some(avg_temp_c),
            Some(record_count),
        ) = (
            region.get(idx),
            source.get(idx),
            year.get(idx),
            month.get(idx),
            avg.get(idx),
            max.get(idx),
            temp.get(idx),
            count.get(idx),
        )
        else {
            return Err(null_cell("energy_monthly", idx));
        };

        rows.push(EnergyMonthlyRow {
            region: region.to_string(),
            source: source.to_string(),
            year,
            month,
            avg_consumption_mwh,
            max_consumption_mwh,
            avg_temp_c,
            record_count,
        });
    }
    Ok(rows)
}

pub fn emissions_rows(df: &DataFrame) -> Result<Vec<EmissionsMonthlyRow>> {
    require_columns(STAGE, df, &EMISSIONS_MONTHLY_COLUMNS)?;

    let region = column_as(df, "region", &DataType::String)?;
    let sector = column_as(df, "sector", &DataType::String)?;
    let year = column_as(df, "year", &DataType::Int32)?;
    let month = column_as(df, "month", &DataType::Int32)?;
    let avg = column_as(df, "avg_co2_tonnes", &DataType::Float64)?;
    let total = column_as(df, "total_co2_tonnes", &DataType::Float64)?;
    let count = column_as(df, "record_count", &DataType::Int64)?;

    let (region, sector) = (region.str()?, sector.str()?);
    let (year, month) = (year.i32()?, month.i32()?);
    let (avg, total, count) = (avg.f64()?, total.f64()?, count.i64()?);

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (
            Some(region),
            Some(sector),
            Some(year),
            Some(month),
            Some(avg_co2_tonnes),
            Some(total_co2_tonnes),
            Some(record_count),
        ) = (
            region.get(idx),
            sector.get(idx),
            year.get(idx),
            month.get(idx),
            avg.get(idx),
            total.get(idx),
            count.get(idx),
        )
        else {
            return Err(null_cell("emissions_monthly", idx));
        };

        rows.push(EmissionsMonthlyRow {
            region: region.to_string(),
            sector: sector.to_string(),
            year,
            month,
            avg_co2_tonnes,
            total_co2_tonnes,
            record_count,
        });
    }
    Ok(rows)
}

pub fn intensity_rows(df: &DataFrame) -> Result<Vec<CarbonIntensityRow>> {
    require_columns(STAGE, df, &CARBON_INTENSITY_COLUMNS)?;

    let region = column_as(df, "region", &DataType::String)?;
    let year = column_as(df, "year", &DataType::Int32)?;
    let month = column_as(df, "month", &DataType::Int32)?;
    let energy = column_as(df, "total_energy_mwh", &DataType::Float64)?;
    let co2 = column_as(df, "total_co2_tonnes", &DataType::Float64)?;
    let ratio = column_as(df, "co2_per_mwh", &DataType::Float64)?;

    let region = region.str()?;
    let (year, month) = (year.i32()?, month.i32()?);
    let (energy, co2, ratio) = (energy.f64()?, co2.f64()?, ratio.f64()?);

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (Some(region), Some(year), Some(month), Some(total_energy_mwh), Some(total_co2_tonnes)) = (
            region.get(idx),
            year.get(idx),
            month.get(idx),
            energy.get(idx),
            co2.get(idx),
        ) else {
            return Err(null_cell("carbon_intensity", idx));
        };

        rows.push(CarbonIntensityRow {
            region: region.to_string(),
            year,
            month,
            total_energy_mwh,
            total_co2_tonnes,
            co2_per_mwh: ratio.get(idx).filter(|value| value.is_finite()),
        });
    }
    Ok(rows)
}
