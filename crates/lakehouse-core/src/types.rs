// crates/lakehouse-core/src/types.rs

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Column order of the Bronze CSV and the Silver Parquet artifact.
pub const RECORD_COLUMNS: [&str; 7] = [
    "region",
    "source",
    "sector",
    "date",
    "consumption_mwh",
    "temperature_c",
    "co2_tonnes",
];

/// Text written in place of a measure that is not a number.
pub const INVALID_MEASURE: &str = "N/A";

/// A Bronze measure cell. The raw layer keeps empty cells and cells that do
/// not parse as a number apart from real values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measure {
    Value(f64),
    Missing,
    Invalid,
}

impl Measure {
    pub fn value(self) -> Option<f64> {
        match self {
            Measure::Value(v) => Some(v),
            Measure::Missing | Measure::Invalid => None,
        }
    }
}

impl From<Option<f64>> for Measure {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Measure::Missing, Measure::Value)
    }
}

impl Serialize for Measure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Measure::Value(v) => serializer.serialize_f64(*v),
            Measure::Missing => serializer.serialize_none(),
            Measure::Invalid => serializer.serialize_str(INVALID_MEASURE),
        }
    }
}

impl<'de> Deserialize<'de> for Measure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cell = String::deserialize(deserializer)?;
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(Measure::Missing);
        }
        Ok(cell.parse::<f64>().map_or(Measure::Invalid, Measure::Value))
    }
}

/// One Bronze observation exactly as written by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub region: String,
    pub source: String,
    pub sector: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub date: Option<NaiveDate>,
    pub consumption_mwh: Measure,
    pub temperature_c: Measure,
    pub co2_tonnes: Measure,
}

/// A validated observation with canonical category labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SilverRecord {
    pub region: String,
    pub source: String,
    pub sector: String,
    pub date: NaiveDate,
    pub consumption_mwh: f64,
    pub temperature_c: f64,
    pub co2_tonnes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyMonthlyRow {
    pub region: String,
    pub source: String,
    pub year: i32,
    pub month: i32,
    pub avg_consumption_mwh: f64,
    pub max_consumption_mwh: f64,
    pub avg_temp_c: f64,
    pub record_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionsMonthlyRow {
    pub region: String,
    pub sector: String,
    pub year: i32,
    pub month: i32,
    pub avg_co2_tonnes: f64,
    pub total_co2_tonnes: f64,
    pub record_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarbonIntensityRow {
    pub region: String,
    pub year: i32,
    pub month: i32,
    pub total_energy_mwh: f64,
    pub total_co2_tonnes: f64,
    pub co2_per_mwh: Option<f64>,
}

/// Natural key of a `dim_time` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: i32,
}

impl YearMonth {
    pub fn new(year: i32, month: i32) -> Self {
        Self { year, month }
    }
}

impl EnergyMonthlyRow {
    pub fn period(&self) -> YearMonth {
        YearMonth::new(self.year, self.month)
    }
}

impl EmissionsMonthlyRow {
    pub fn period(&self) -> YearMonth {
        YearMonth::new(self.year, self.month)
    }
}

impl CarbonIntensityRow {
    pub fn period(&self) -> YearMonth {
        YearMonth::new(self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_cell(cell: &str) -> Measure {
        let csv = format!("region,source,sector,date,consumption_mwh,temperature_c,co2_tonnes\nNorth,Gas,Industry,2024-01-01,{cell},1.0,2.0\n");
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let record: RawRecord = reader
            .deserialize()
            .next()
            .expect("one row")
            .expect("row deserializes");
        record.consumption_mwh
    }

    #[test]
    fn measure_cells_keep_missing_and_invalid_apart() {
        assert_eq!(read_cell("12.5"), Measure::Value(12.5));
        assert_eq!(read_cell(""), Measure::Missing);
        assert_eq!(read_cell("N/A"), Measure::Invalid);
        assert_eq!(read_cell("twelve"), Measure::Invalid);
        assert_eq!(Measure::Invalid.value(), None);
    }

    #[test]
    fn invalid_measure_is_written_as_text() {
        let record = RawRecord {
            region: "North".into(),
            source: "Gas".into(),
            sector: "Industry".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1),
            consumption_mwh: Measure::Invalid,
            temperature_c: Measure::Value(1.5),
            co2_tonnes: Measure::Missing,
        };
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.serialize(&record).expect("serialize");
        let bytes = writer.into_inner().expect("flush");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            "North,Gas,Industry,2024-01-01,N/A,1.5,\n"
        );
    }
}
