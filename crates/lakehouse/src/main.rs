use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use lakehouse_core::config::PipelineConfig;
use lakehouse_core::pipeline::{self, RunSummary};
use lakehouse_core::{db, generator, gold, queries, silver};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Energy & emissions lakehouse batch pipeline", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the synthetic Bronze CSV
    Generate(GenerateArgs),
    /// Clean Bronze CSV into the Silver Parquet artifact
    Silver(SilverArgs),
    /// Aggregate Silver into the three Gold marts
    Gold(GoldArgs),
    /// Apply the star-schema migrations
    Migrate(DatabaseArgs),
    /// Load the Gold marts into the star schema
    Load(LoadArgs),
    /// Print the analytical queries over the warehouse
    Report(ReportArgs),
    /// Run every stage end to end
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Bronze CSV to write
    #[arg(long)]
    output: Option<PathBuf>,
    /// Override the configured record count
    #[arg(long)]
    records: Option<usize>,
    /// Override the configured random seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct SilverArgs {
    /// Bronze CSV to read
    #[arg(long)]
    input: Option<PathBuf>,
    /// Silver Parquet to write
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GoldArgs {
    /// Silver Parquet to read
    #[arg(long)]
    input: Option<PathBuf>,
    /// Directory receiving the Gold marts
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct DatabaseArgs {
    /// Postgres connection string (falls back to DATABASE_URL / LAKEHOUSE_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[command(flatten)]
    database: DatabaseArgs,
    /// Directory holding the Gold marts
    #[arg(long)]
    gold_dir: Option<PathBuf>,
    /// Skip running migrations before loading
    #[arg(long)]
    skip_migrations: bool,
    /// Exit non-zero when any row fails to load
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[command(flatten)]
    database: DatabaseArgs,
    /// Year used by the filtered carbon-intensity query
    #[arg(long)]
    year: Option<i32>,
    /// Rows per region in the ranking query
    #[arg(long)]
    top: Option<i64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    database: DatabaseArgs,
    /// Stop after the Gold stage
    #[arg(long)]
    skip_load: bool,
    /// Exit non-zero when any row fails to load
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())
        .context("failed to load pipeline configuration")?;

    match cli.command {
        Command::Generate(args) => handle_generate(config, args),
        Command::Silver(args) => handle_silver(&config, args),
        Command::Gold(args) => handle_gold(&config, args),
        Command::Migrate(args) => handle_migrate(&config, args).await,
        Command::Load(args) => handle_load(&config, args).await,
        Command::Report(args) => handle_report(&config, args).await,
        Command::Run(args) => handle_run(&config, args).await,
    }
}

fn handle_generate(mut config: PipelineConfig, args: GenerateArgs) -> Result<()> {
    if let Some(records) = args.records {
        config.generator.record_count = records;
    }
    if let Some(seed) = args.seed {
        config.generator.seed = seed;
    }
    let output = args.output.unwrap_or_else(|| config.paths.bronze_csv());

    let (report, artifact) = generator::run(&config.generator, &output)?;
    print_summary(&RunSummary {
        generator: Some(report),
        artifacts: vec![artifact],
        ..RunSummary::default()
    })
}

fn handle_silver(config: &PipelineConfig, args: SilverArgs) -> Result<()> {
    let input = args.input.unwrap_or_else(|| config.paths.bronze_csv());
    let output = args.output.unwrap_or_else(|| config.paths.silver_parquet());

    let labels = silver::LabelCatalog::from_config(&config.generator);

    let (report, artifact) = silver::run(&input, &output, &labels)
        .with_context(|| format!("failed to build Silver from {}", input.display()))?;
    print_summary(&RunSummary {
        silver: Some(report),
        artifacts: vec![artifact],
        ..RunSummary::default()
    })
}

fn handle_gold(config: &PipelineConfig, args: GoldArgs) -> Result<()> {
    let input = args.input.unwrap_or_else(|| config.paths.silver_parquet());
    let output_dir = args.output_dir.unwrap_or_else(|| config.paths.gold_dir());

    let (report, artifacts) = gold::run(&input, &output_dir)
        .with_context(|| format!("failed to build Gold from {}", input.display()))?;
    print_summary(&RunSummary {
        gold: Some(report),
        artifacts,
        ..RunSummary::default()
    })
}

async fn handle_migrate(config: &PipelineConfig, args: DatabaseArgs) -> Result<()> {
    let pool = connect_pool(config, &args).await?;
    let result = db::run_migrations(&pool).await;
    pool.close().await;
    result?;
    info!("Database migrations applied");
    Ok(())
}

async fn handle_load(config: &PipelineConfig, args: LoadArgs) -> Result<()> {
    let gold_dir = args.gold_dir.unwrap_or_else(|| config.paths.gold_dir());
    let pool = connect_pool(config, &args.database).await?;

    let result = load(&pool, &gold_dir, args.skip_migrations).await;
    pool.close().await;

    let summary = RunSummary {
        load: Some(result?),
        ..RunSummary::default()
    };
    print_summary(&summary)?;
    check_strict(&summary, args.strict)
}

async fn load(
    pool: &db::DbPool,
    gold_dir: &Path,
    skip_migrations: bool,
) -> Result<lakehouse_core::warehouse::LoadReport> {
    if skip_migrations {
        warn!("Skipping migrations before loading");
    } else {
        db::run_migrations(pool).await?;
    }
    let report = pipeline::load_gold_dir(pool, gold_dir)
        .await
        .with_context(|| format!("failed to load Gold marts from {}", gold_dir.display()))?;
    Ok(report)
}

async fn handle_report(config: &PipelineConfig, args: ReportArgs) -> Result<()> {
    let pool = connect_pool(config, &args.database).await?;
    let top = args.top.unwrap_or(config.warehouse.top_n);
    let result = print_report(&pool, top, args.year).await;
    pool.close().await;
    result
}

async fn print_report(pool: &db::DbPool, top: i64, year: Option<i32>) -> Result<()> {
    let mut counts = Table::new();
    counts.set_header(vec!["Table", "Rows"]);
    for row in queries::table_counts(pool).await? {
        counts.add_row(vec![row.table_name, row.row_count.to_string()]);
    }
    println!("Row counts\n{counts}\n");

    let mut ranking = Table::new();
    ranking.set_header(vec!["Region", "Rank", "Year", "Month", "CO2 per MWh"]);
    for row in queries::top_carbon_intensity(pool, top).await? {
        ranking.add_row(vec![
            row.region,
            row.rank_in_region.to_string(),
            row.year.to_string(),
            row.month.to_string(),
            format_optional(row.co2_per_mwh),
        ]);
    }
    println!("Top {top} carbon intensity months per region\n{ranking}\n");

    let mut sources = Table::new();
    sources.set_header(vec!["Source", "Avg monthly consumption (MWh)"]);
    for row in queries::avg_monthly_consumption_by_source(pool).await? {
        sources.add_row(vec![row.source, format!("{:.2}", row.avg_consumption_mwh)]);
    }
    println!("Average monthly consumption per source\n{sources}\n");

    let observations = match year {
        Some(year) => queries::carbon_intensity_for_year(pool, year).await?,
        None => queries::carbon_intensity_by_region(pool).await?,
    };
    let mut intensity = Table::new();
    intensity.set_header(vec!["Region", "Year", "Month", "Energy (MWh)", "CO2 (t)", "CO2 per MWh"]);
    for row in observations {
        intensity.add_row(vec![
            row.region,
            row.year.to_string(),
            row.month.to_string(),
            format!("{:.2}", row.total_energy_mwh),
            format!("{:.2}", row.total_co2_tonnes),
            format_optional(row.co2_per_mwh),
        ]);
    }
    match year {
        Some(year) => println!("Carbon intensity in {year}\n{intensity}\n"),
        None => println!("Carbon intensity by region and month\n{intensity}\n"),
    }

    let nulls = queries::null_intensity_count(pool).await?;
    println!("Months with undefined carbon intensity: {nulls}");
    Ok(())
}

async fn handle_run(config: &PipelineConfig, args: RunArgs) -> Result<()> {
    let mut summary = pipeline::run_file_stages(config)?;

    if args.skip_load {
        info!("Skipping warehouse load at user request");
    } else {
        let pool = connect_pool(config, &args.database).await?;
        let result = load(&pool, &config.paths.gold_dir(), false).await;
        pool.close().await;
        summary.load = Some(result?);
    }

    print_summary(&summary)?;
    check_strict(&summary, args.strict)
}

async fn connect_pool(config: &PipelineConfig, args: &DatabaseArgs) -> Result<db::DbPool> {
    dotenvy::dotenv().ok();
    let database_url = match &args.database_url {
        Some(url) => url.clone(),
        None => std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("LAKEHOUSE_DATABASE_URL"))
            .context("DATABASE_URL (or LAKEHOUSE_DATABASE_URL) must be set")?,
    };
    db::connect(&database_url, &config.warehouse)
        .await
        .context("failed to connect to Postgres")
}

fn check_strict(summary: &RunSummary, strict: bool) -> Result<()> {
    let failed = summary.load.as_ref().map_or(0, |load| load.failed());
    if strict && failed > 0 {
        bail!("{failed} rows failed to load");
    }
    Ok(())
}

fn print_summary<T: Serialize>(summary: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "NULL".to_string(), |v| format!("{v:.4}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakehouse_core::warehouse::{LoadFailure, LoadReport};

    #[test]
    fn cli_accepts_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["lakehouse", "run", "--skip-load", "--config", "lakehouse.toml"])
            .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(Path::new("lakehouse.toml")));
        assert!(matches!(cli.command, Command::Run(RunArgs { skip_load: true, strict: false, .. })));
    }

    #[test]
    fn strict_mode_fails_only_when_rows_failed() {
        let mut summary = RunSummary {
            load: Some(LoadReport::default()),
            ..RunSummary::default()
        };
        assert!(check_strict(&summary, true).is_ok());

        if let Some(load) = summary.load.as_mut() {
            load.failures.push(LoadFailure {
                table: "fact_carbon_intensity",
                key: "North/2024-01".into(),
                error: "boom".into(),
            });
        }
        assert!(check_strict(&summary, false).is_ok());
        assert!(check_strict(&summary, true).is_err());
    }

    #[test]
    fn null_intensity_renders_as_null() {
        assert_eq!(format_optional(None), "NULL");
        assert_eq!(format_optional(Some(0.123456)), "0.1235");
    }
}
