use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::artifacts::ArtifactReceipt;
use crate::config::PipelineConfig;
use crate::db::DbPool;
use crate::error::Result;
use crate::generator::{self, GeneratorReport};
use crate::gold::{self, GoldReport, GoldRows};
use crate::silver::{self, LabelCatalog, SilverReport};
use crate::warehouse::{LoadReport, WarehouseLoader};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silver: Option<SilverReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gold: Option<GoldReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactReceipt>,
}

/// Generator → Silver → Gold, each stage reading the previous stage's file.
pub fn run_file_stages(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;

    let bronze_path = config.paths.bronze_csv();
    let silver_path = config.paths.silver_parquet();
    let gold_dir = config.paths.gold_dir();

    let mut summary = RunSummary::default();

    let (generated, bronze) = generator::run(&config.generator, &bronze_path)?;
    summary.generator = Some(generated);
    summary.artifacts.push(bronze);

    let labels = LabelCatalog::from_config(&config.generator);
    let (cleaned, silver_artifact) = silver::run(&bronze_path, &silver_path, &labels)?;
    summary.silver = Some(cleaned);
    summary.artifacts.push(silver_artifact);

    let (aggregated, gold_artifacts) = gold::run(&silver_path, &gold_dir)?;
    summary.gold = Some(aggregated);
    summary.artifacts.extend(gold_artifacts);

    Ok(summary)
}

/// Reads the Gold directory and loads it row by row. Schema problems in the
/// marts are fatal; individual row failures end up in the report.
pub async fn load_gold_dir(pool: &DbPool, gold_dir: &Path) -> Result<LoadReport> {
    let rows = GoldRows::read_dir(gold_dir)?;
    info!(
        gold_dir = %gold_dir.display(),
        rows = rows.len(),
        "Loading Gold marts"
    );

    let mut loader = WarehouseLoader::new(pool);
    Ok(loader.load(&rows).await)
}
