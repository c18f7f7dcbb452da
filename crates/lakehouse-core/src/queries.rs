//! Analytical queries over the star schema, as consumed by dashboards.

use serde::Serialize;

use crate::db::DbPool;
use crate::error::Result;

/// Tables covered by the row-count sanity check, dimensions first.
pub const WAREHOUSE_TABLES: [&str; 7] = [
    "dim_region",
    "dim_energy_source",
    "dim_sector",
    "dim_time",
    "fact_energy_monthly",
    "fact_emissions_monthly",
    "fact_carbon_intensity",
];

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TableCount {
    pub table_name: String,
    pub row_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct IntensityObservation {
    pub region: String,
    pub year: i32,
    pub month: i32,
    pub total_energy_mwh: f64,
    pub total_co2_tonnes: f64,
    pub co2_per_mwh: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RankedIntensity {
    pub region: String,
    pub year: i32,
    pub month: i32,
    pub co2_per_mwh: Option<f64>,
    pub rank_in_region: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SourceConsumption {
    pub source: String,
    pub avg_consumption_mwh: f64,
}

pub async fn table_counts(pool: &DbPool) -> Result<Vec<TableCount>> {
    let rows = sqlx::query_as::<_, TableCount>(
        r#"
        SELECT 'dim_region' AS table_name, COUNT(*) AS row_count FROM dim_region
        UNION ALL SELECT 'dim_energy_source', COUNT(*) FROM dim_energy_source
        UNION ALL SELECT 'dim_sector', COUNT(*) FROM dim_sector
        UNION ALL SELECT 'dim_time', COUNT(*) FROM dim_time
        UNION ALL SELECT 'fact_energy_monthly', COUNT(*) FROM fact_energy_monthly
        UNION ALL SELECT 'fact_emissions_monthly', COUNT(*) FROM fact_emissions_monthly
        UNION ALL SELECT 'fact_carbon_intensity', COUNT(*) FROM fact_carbon_intensity
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Carbon intensity joined to its region and month, in calendar order.
pub async fn carbon_intensity_by_region(pool: &DbPool) -> Result<Vec<IntensityObservation>> {
    let rows = sqlx::query_as::<_, IntensityObservation>(
        r#"
        SELECT r.region_name AS region, t.year, t.month,
               f.total_energy_mwh, f.total_co2_tonnes, f.co2_per_mwh
        FROM fact_carbon_intensity f
        JOIN dim_region r ON r.region_id = f.region_id
        JOIN dim_time t ON t.time_id = f.time_id
        ORDER BY r.region_name, t.year, t.month
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Highest-intensity months per region. `ROW_NUMBER` keeps exactly `limit`
/// rows per region; equal intensities rank chronologically and nulls go last.
pub async fn top_carbon_intensity(pool: &DbPool, limit: i64) -> Result<Vec<RankedIntensity>> {
    let rows = sqlx::query_as::<_, RankedIntensity>(
        r#"
        SELECT region, year, month, co2_per_mwh, rank_in_region
        FROM (
            SELECT r.region_name AS region, t.year, t.month, f.co2_per_mwh,
                   ROW_NUMBER() OVER (
                       PARTITION BY r.region_name
                       ORDER BY f.co2_per_mwh DESC NULLS LAST, t.year, t.month
                   ) AS rank_in_region
            FROM fact_carbon_intensity f
            JOIN dim_region r ON r.region_id = f.region_id
            JOIN dim_time t ON t.time_id = f.time_id
        ) ranked
        WHERE rank_in_region <= $1
        ORDER BY region, rank_in_region
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn avg_monthly_consumption_by_source(pool: &DbPool) -> Result<Vec<SourceConsumption>> {
    let rows = sqlx::query_as::<_, SourceConsumption>(
        r#"
        SELECT s.source_name AS source, AVG(f.avg_consumption_mwh) AS avg_consumption_mwh
        FROM fact_energy_monthly f
        JOIN dim_energy_source s ON s.source_id = f.source_id
        GROUP BY s.source_name
        ORDER BY avg_consumption_mwh DESC, s.source_name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn carbon_intensity_for_year(pool: &DbPool, year: i32) -> Result<Vec<IntensityObservation>> {
    let rows = sqlx::query_as::<_, IntensityObservation>(
        r#"
        SELECT r.region_name AS region, t.year, t.month,
               f.total_energy_mwh, f.total_co2_tonnes, f.co2_per_mwh
        FROM fact_carbon_intensity f
        JOIN dim_region r ON r.region_id = f.region_id
        JOIN dim_time t ON t.time_id = f.time_id
        WHERE t.year = $1
        ORDER BY r.region_name, t.month
        "#,
    )
    .bind(year)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn null_intensity_count(pool: &DbPool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM fact_carbon_intensity WHERE co2_per_mwh IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}
