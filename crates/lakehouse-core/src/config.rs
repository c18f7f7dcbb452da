use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Top-level settings for one batch run. Every section falls back to the
/// defaults below, so an empty (or absent) TOML file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub generator: GeneratorConfig,
    pub paths: PathsConfig,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub regions: Vec<String>,
    pub sources: Vec<String>,
    pub sectors: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub record_count: usize,
    pub seed: u64,
    pub missing_consumption_rate: f64,
    pub missing_co2_rate: f64,
    /// Share of consumption cells written as non-numeric text.
    pub bad_type_rate: f64,
    pub noisy_label_rate: f64,
    pub duplicate_rate: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            regions: to_strings(&["North", "South", "East", "West"]),
            sources: to_strings(&["Electricity", "Gas", "Oil", "Renewables"]),
            sectors: to_strings(&["Residential", "Industry", "Transport"]),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            record_count: 10_000,
            seed: 7,
            missing_consumption_rate: 0.02,
            missing_co2_rate: 0.015,
            bad_type_rate: 0.01,
            noisy_label_rate: 0.03,
            duplicate_rate: 0.01,
        }
    }
}

impl GeneratorConfig {
    /// Rejects parameters the generator cannot honour. Runs before any record
    /// is produced.
    pub fn validate(&self) -> Result<()> {
        for (name, values) in [
            ("regions", &self.regions),
            ("sources", &self.sources),
            ("sectors", &self.sectors),
        ] {
            if values.is_empty() {
                return Err(PipelineError::Config(format!("{name} must not be empty")));
            }
            if values.iter().any(|v| v.trim().is_empty()) {
                return Err(PipelineError::Config(format!(
                    "{name} must not contain blank labels"
                )));
            }
        }

        if self.record_count == 0 {
            return Err(PipelineError::Config(
                "record_count must be greater than zero".into(),
            ));
        }

        if self.end_date < self.start_date {
            return Err(PipelineError::Config(format!(
                "end_date {} precedes start_date {}",
                self.end_date, self.start_date
            )));
        }

        for (name, rate) in [
            ("missing_consumption_rate", self.missing_consumption_rate),
            ("missing_co2_rate", self.missing_co2_rate),
            ("bad_type_rate", self.bad_type_rate),
            ("noisy_label_rate", self.noisy_label_rate),
            ("duplicate_rate", self.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(PipelineError::Config(format!(
                    "{name} must be within [0, 1], got {rate}"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl PathsConfig {
    pub fn bronze_csv(&self) -> PathBuf {
        self.data_dir.join("bronze").join("energy_emissions_raw.csv")
    }

    pub fn silver_parquet(&self) -> PathBuf {
        self.data_dir
            .join("silver")
            .join("energy_emissions_silver.parquet")
    }

    pub fn gold_dir(&self) -> PathBuf {
        self.data_dir.join("gold")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub top_n: i64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 10,
            top_n: 5,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml_str(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        if self.warehouse.max_connections == 0 {
            return Err(PipelineError::Config(
                "warehouse.max_connections must be greater than zero".into(),
            ));
        }
        if self.warehouse.top_n <= 0 {
            return Err(PipelineError::Config(
                "warehouse.top_n must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").expect("defaults are valid");
        assert_eq!(config.generator.regions.len(), 4);
        assert_eq!(config.generator.seed, 7);
        assert_eq!(config.warehouse.top_n, 5);
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [generator]
            regions = ["North", "South", "East"]
            record_count = 1000
            start_date = "2024-01-01"
            end_date = "2024-12-31"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.generator.regions.len(), 3);
        assert_eq!(config.generator.record_count, 1000);
        assert_eq!(config.generator.sectors.len(), 3);
    }

    #[test]
    fn empty_category_set_is_rejected() {
        let err = PipelineConfig::from_toml_str("[generator]\nsectors = []\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn zero_record_count_is_rejected() {
        let mut config = GeneratorConfig::default();
        config.record_count = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let mut config = GeneratorConfig::default();
        config.end_date = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PipelineConfig::from_toml_str("[generator]\nregion = [\"North\"]\n").unwrap_err();
        assert!(matches!(err, PipelineError::Toml(_)));
    }

    #[test]
    fn bundled_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../lakehouse.toml");
        let config = PipelineConfig::load(Some(&path)).expect("bundled config");
        let defaults = PipelineConfig::default();
        assert_eq!(config.generator.regions, defaults.generator.regions);
        assert_eq!(config.generator.end_date, defaults.generator.end_date);
        assert_eq!(config.generator.record_count, defaults.generator.record_count);
        assert_eq!(config.paths.data_dir, defaults.paths.data_dir);
    }
}
