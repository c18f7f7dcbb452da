//! Loads Gold marts into the star schema.
//!
//! Every Gold row is loaded in its own transaction: the dimensions it
//! references are resolved (or created) first, then its fact row is upserted.
//! A row that fails is retried once and, if it fails again, reported while the
//! rest of the batch carries on.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use sqlx::{Connection, PgConnection, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::DbPool;
use crate::gold::GoldRows;
use crate::types::{CarbonIntensityRow, EmissionsMonthlyRow, EnergyMonthlyRow, YearMonth};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("dimension {0} conflicted on insert but could not be read back")]
    DimensionUnresolved(DimensionKey),
}

/// Natural key of a dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimensionKey {
    Region(String),
    Source(String),
    Sector(String),
    Time(YearMonth),
}

impl DimensionKey {
    fn lookup_sql(&self) -> &'static str {
        match self {
            DimensionKey::Region(_) => "SELECT region_id FROM dim_region WHERE region_name = $1",
            DimensionKey::Source(_) => {
                "SELECT source_id FROM dim_energy_source WHERE source_name = $1"
            }
            DimensionKey::Sector(_) => "SELECT sector_id FROM dim_sector WHERE sector_name = $1",
            DimensionKey::Time(_) => "SELECT time_id FROM dim_time WHERE year = $1 AND month = $2",
        }
    }

    fn insert_sql(&self) -> &'static str {
        match self {
            DimensionKey::Region(_) => {
                "INSERT INTO dim_region (region_name) VALUES ($1) RETURNING region_id"
            }
            DimensionKey::Source(_) => {
                "INSERT INTO dim_energy_source (source_name) VALUES ($1) RETURNING source_id"
            }
            DimensionKey::Sector(_) => {
                "INSERT INTO dim_sector (sector_name) VALUES ($1) RETURNING sector_id"
            }
            DimensionKey::Time(_) => {
                "INSERT INTO dim_time (year, month) VALUES ($1, $2) RETURNING time_id"
            }
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionKey::Region(name) => write!(f, "region '{name}'"),
            DimensionKey::Source(name) => write!(f, "energy source '{name}'"),
            DimensionKey::Sector(name) => write!(f, "sector '{name}'"),
            DimensionKey::Time(period) => write!(f, "time {}-{:02}", period.year, period.month),
        }
    }
}

/// One Gold row on its way to a fact table.
#[derive(Debug, Clone, Copy)]
pub enum FactRow<'a> {
    Energy(&'a EnergyMonthlyRow),
    Emissions(&'a EmissionsMonthlyRow),
    Intensity(&'a CarbonIntensityRow),
}

impl FactRow<'_> {
    pub fn table(&self) -> &'static str {
        match self {
            FactRow::Energy(_) => "fact_energy_monthly",
            FactRow::Emissions(_) => "fact_emissions_monthly",
            FactRow::Intensity(_) => "fact_carbon_intensity",
        }
    }

    pub fn natural_key(&self) -> String {
        match self {
            FactRow::Energy(r) => format!("{}/{}/{}-{:02}", r.region, r.source, r.year, r.month),
            FactRow::Emissions(r) => {
                format!("{}/{}/{}-{:02}", r.region, r.sector, r.year, r.month)
            }
            FactRow::Intensity(r) => format!("{}/{}-{:02}", r.region, r.year, r.month),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub table: &'static str,
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub attempted: usize,
    pub loaded: usize,
    pub retried: usize,
    pub dimensions_created: usize,
    pub energy_facts: usize,
    pub emissions_facts: usize,
    pub intensity_facts: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn record_loaded(&mut self, row: &FactRow<'_>, created: usize) {
        self.loaded += 1;
        self.dimensions_created += created;
        match row {
            FactRow::Energy(_) => self.energy_facts += 1,
            FactRow::Emissions(_) => self.emissions_facts += 1,
            FactRow::Intensity(_) => self.intensity_facts += 1,
        }
    }
}

/// Keys resolved inside a row transaction; merged into the cache on commit.
#[derive(Debug, Default)]
struct ResolvedKeys {
    keys: Vec<(DimensionKey, i32)>,
    created: usize,
}

pub struct WarehouseLoader<'p> {
    pool: &'p DbPool,
    committed_keys: HashMap<DimensionKey, i32>,
}

impl<'p> WarehouseLoader<'p> {
    pub fn new(pool: &'p DbPool) -> Self {
        Self {
            pool,
            committed_keys: HashMap::new(),
        }
    }

    /// Loads every mart row. Row failures are collected in the report, never
    /// propagated.
    pub async fn load(&mut self, rows: &GoldRows) -> LoadReport {
        let mut report = LoadReport::default();

        let facts = rows
            .energy_monthly
            .iter()
            .map(FactRow::Energy)
            .chain(rows.emissions_monthly.iter().map(FactRow::Emissions))
            .chain(rows.carbon_intensity.iter().map(FactRow::Intensity));

        for fact in facts {
            report.attempted += 1;
            self.load_with_retry(fact, &mut report).await;
        }

        info!(
            attempted = report.attempted,
            loaded = report.loaded,
            retried = report.retried,
            failed = report.failed(),
            dimensions_created = report.dimensions_created,
            "Loaded Gold marts into the warehouse"
        );

        report
    }

    async fn load_with_retry(&mut self, fact: FactRow<'_>, report: &mut LoadReport) {
        let first = match self.load_row(&fact).await {
            Ok(resolved) => {
                self.commit_keys(resolved, &fact, report);
                return;
            }
            Err(err) => err,
        };

        warn!(
            table = fact.table(),
            key = %fact.natural_key(),
            error = %first,
            "Row load failed, retrying once"
        );
        report.retried += 1;

        match self.load_row(&fact).await {
            Ok(resolved) => self.commit_keys(resolved, &fact, report),
            Err(err) => {
                warn!(
                    table = fact.table(),
                    key = %fact.natural_key(),
                    error = %err,
                    "Row load failed after retry"
                );
                report.failures.push(LoadFailure {
                    table: fact.table(),
                    key: fact.natural_key(),
                    error: err.to_string(),
                });
            }
        }
    }

    fn commit_keys(&mut self, resolved: ResolvedKeys, fact: &FactRow<'_>, report: &mut LoadReport) {
        report.record_loaded(fact, resolved.created);
        self.committed_keys.extend(resolved.keys);
    }

    async fn load_row(&self, fact: &FactRow<'_>) -> Result<ResolvedKeys, LoadError> {
        let mut tx = self.pool.begin().await?;
        let mut resolved = ResolvedKeys::default();

        match fact {
            FactRow::Energy(row) => {
                let region_id = self
                    .resolve(&mut tx, DimensionKey::Region(row.region.clone()), &mut resolved)
                    .await?;
                let source_id = self
                    .resolve(&mut tx, DimensionKey::Source(row.source.clone()), &mut resolved)
                    .await?;
                let time_id = self
                    .resolve(&mut tx, DimensionKey::Time(row.period()), &mut resolved)
                    .await?;
                upsert_energy_fact(&mut tx, region_id, source_id, time_id, row).await?;
            }
            FactRow::Emissions(row) => {
                let region_id = self
                    .resolve(&mut tx, DimensionKey::Region(row.region.clone()), &mut resolved)
                    .await?;
                let sector_id = self
                    .resolve(&mut tx, DimensionKey::Sector(row.sector.clone()), &mut resolved)
                    .await?;
                let time_id = self
                    .resolve(&mut tx, DimensionKey::Time(row.period()), &mut resolved)
                    .await?;
                upsert_emissions_fact(&mut tx, region_id, sector_id, time_id, row).await?;
            }
            FactRow::Intensity(row) => {
                let region_id = self
                    .resolve(&mut tx, DimensionKey::Region(row.region.clone()), &mut resolved)
                    .await?;
                let time_id = self
                    .resolve(&mut tx, DimensionKey::Time(row.period()), &mut resolved)
                    .await?;
                upsert_intensity_fact(&mut tx, region_id, time_id, row).await?;
            }
        }

        tx.commit().await?;
        Ok(resolved)
    }

    /// Lookup by natural key; on a miss insert inside a savepoint; if the insert
    /// hits the unique constraint (another writer won), roll the savepoint back
    /// and read the committed key.
    async fn resolve(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: DimensionKey,
        resolved: &mut ResolvedKeys,
    ) -> Result<i32, LoadError> {
        if let Some(id) = self.committed_keys.get(&key) {
            return Ok(*id);
        }
        if let Some((_, id)) = resolved.keys.iter().find(|(k, _)| *k == key) {
            return Ok(*id);
        }

        if let Some(id) = lookup_dimension(tx.as_mut(), &key).await? {
            resolved.keys.push((key, id));
            return Ok(id);
        }

        let mut savepoint = Connection::begin(&mut **tx).await?;
        match insert_dimension(savepoint.as_mut(), &key).await {
            Ok(id) => {
                savepoint.commit().await?;
                debug!(dimension = %key, id, "Created dimension row");
                resolved.created += 1;
                resolved.keys.push((key, id));
                Ok(id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                savepoint.rollback().await?;
                debug!(dimension = %key, "Dimension created concurrently, re-reading key");
                match lookup_dimension(tx.as_mut(), &key).await? {
                    Some(id) => {
                        resolved.keys.push((key, id));
                        Ok(id)
                    }
                    None => Err(LoadError::DimensionUnresolved(key)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

async fn lookup_dimension(
    conn: &mut PgConnection,
    key: &DimensionKey,
) -> Result<Option<i32>, sqlx::Error> {
    let query = sqlx::query_scalar::<Postgres, i32>(key.lookup_sql());
    let query = match key {
        DimensionKey::Region(name) | DimensionKey::Source(name) | DimensionKey::Sector(name) => {
            query.bind(name.as_str())
        }
        DimensionKey::Time(period) => query.bind(period.year).bind(period.month),
    };
    query.fetch_optional(conn).await
}

async fn insert_dimension(conn: &mut PgConnection, key: &DimensionKey) -> Result<i32, sqlx::Error> {
    let query = sqlx::query_scalar::<Postgres, i32>(key.insert_sql());
    let query = match key {
        DimensionKey::Region(name) | DimensionKey::Source(name) | DimensionKey::Sector(name) => {
            query.bind(name.as_str())
        }
        DimensionKey::Time(period) => query.bind(period.year).bind(period.month),
    };
    query.fetch_one(conn).await
}

async fn upsert_energy_fact(
    tx: &mut Transaction<'_, Postgres>,
    region_id: i32,
    source_id: i32,
    time_id: i32,
    row: &EnergyMonthlyRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO fact_energy_monthly
            (region_id, source_id, time_id, avg_consumption_mwh, max_consumption_mwh, avg_temp_c, records)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (region_id, source_id, time_id)
        DO UPDATE SET
            avg_consumption_mwh = EXCLUDED.avg_consumption_mwh,
            max_consumption_mwh = EXCLUDED.max_consumption_mwh,
            avg_temp_c = EXCLUDED.avg_temp_c,
            records = EXCLUDED.records
        "#,
    )
    .bind(region_id)
    .bind(source_id)
    .bind(time_id)
    .bind(row.avg_consumption_mwh)
    .bind(row.max_consumption_mwh)
    .bind(row.avg_temp_c)
    .bind(row.record_count)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

async fn upsert_emissions_fact(
    tx: &mut Transaction<'_, Postgres>,
    region_id: i32,
    sector_id: i32,
    time_id: i32,
    row: &EmissionsMonthlyRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO fact_emissions_monthly
            (region_id, sector_id, time_id, avg_co2_tonnes, total_co2_tonnes, records)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (region_id, sector_id, time_id)
        DO UPDATE SET
            avg_co2_tonnes = EXCLUDED.avg_co2_tonnes,
            total_co2_tonnes = EXCLUDED.total_co2_tonnes,
            records = EXCLUDED.records
        "#,
    )
    .bind(region_id)
    .bind(sector_id)
    .bind(time_id)
    .bind(row.avg_co2_tonnes)
    .bind(row.total_co2_tonnes)
    .bind(row.record_count)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

async fn upsert_intensity_fact(
    tx: &mut Transaction<'_, Postgres>,
    region_id: i32,
    time_id: i32,
    row: &CarbonIntensityRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO fact_carbon_intensity
            (region_id, time_id, total_energy_mwh, total_co2_tonnes, co2_per_mwh)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (region_id, time_id)
        DO UPDATE SET
            total_energy_mwh = EXCLUDED.total_energy_mwh,
            total_co2_tonnes = EXCLUDED.total_co2_tonnes,
            co2_per_mwh = EXCLUDED.co2_per_mwh
        "#,
    )
    .bind(region_id)
    .bind(time_id)
    .bind(row.total_energy_mwh)
    .bind(row.total_co2_tonnes)
    .bind(row.co2_per_mwh)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_keys_render_their_natural_key() {
        assert_eq!(DimensionKey::Region("North".into()).to_string(), "region 'North'");
        assert_eq!(
            DimensionKey::Time(YearMonth::new(2024, 3)).to_string(),
            "time 2024-03"
        );
    }

    #[test]
    fn time_dimension_binds_two_parameters() {
        let key = DimensionKey::Time(YearMonth::new(2024, 1));
        assert!(key.lookup_sql().contains("$2"));
        assert!(key.insert_sql().contains("RETURNING time_id"));
        let key = DimensionKey::Sector("Industry".into());
        assert!(!key.lookup_sql().contains("$2"));
    }

    #[test]
    fn fact_rows_report_their_table_and_grouping_key() {
        let row = CarbonIntensityRow {
            region: "East".into(),
            year: 2023,
            month: 7,
            total_energy_mwh: 0.0,
            total_co2_tonnes: 12.0,
            co2_per_mwh: None,
        };
        let fact = FactRow::Intensity(&row);
        assert_eq!(fact.table(), "fact_carbon_intensity");
        assert_eq!(fact.natural_key(), "East/2023-07");
    }
}
