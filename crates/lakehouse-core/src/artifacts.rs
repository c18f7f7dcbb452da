use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{DataFrame, ParquetReader, SerReader};
use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Where a stage wrote its output, how many rows it holds and a content
/// fingerprint so reruns on identical input can be compared.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactReceipt {
    pub path: String,
    pub rows: usize,
    pub blake3: String,
}

pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<ArtifactReceipt> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| PipelineError::Io(err.into_error()))?;

    persist(path, &bytes, records.len())
}

pub fn write_parquet(path: &Path, df: &DataFrame) -> Result<ArtifactReceipt> {
    let bytes = create_parquet_bytes(df)?;
    persist(path, &bytes, df.height())
}

pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    debug!(path = %path.display(), rows = df.height(), "Read parquet artifact");
    Ok(df)
}

/// Fails with a schema error naming every absent column.
pub fn require_columns(stage: &'static str, df: &DataFrame, columns: &[&str]) -> Result<()> {
    let present = df.get_column_names();
    let missing: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !present.iter().any(|p| p.as_str() == *c))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::schema(
            stage,
            format!("missing required columns: {}", missing.join(", ")),
        ))
    }
}

fn create_parquet_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = df.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)?;
    }
    Ok(buffer)
}

/// Writes to a sibling temp file and renames it into place, so a failed stage
/// never leaves a truncated artifact behind.
fn persist(path: &Path, bytes: &[u8], rows: usize) -> Result<ArtifactReceipt> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    fs::write(&tmp, bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }

    Ok(ArtifactReceipt {
        path: path.display().to_string(),
        rows,
        blake3: compute_hash(bytes),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn compute_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_a_sibling() {
        let tmp = temp_path(Path::new("data/gold/energy_monthly.parquet"));
        assert_eq!(tmp, PathBuf::from("data/gold/energy_monthly.parquet.tmp"));
    }

    #[test]
    fn missing_columns_are_all_named() {
        let df = polars::df!("region" => ["North"], "year" => [2024]).expect("frame");
        assert!(require_columns("gold", &df, &["region", "year"]).is_ok());

        match require_columns("gold", &df, &["region", "month", "co2_per_mwh"]) {
            Err(PipelineError::Schema { stage, message }) => {
                assert_eq!(stage, "gold");
                assert!(message.contains("month, co2_per_mwh"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn identical_bytes_share_a_fingerprint() {
        assert_eq!(compute_hash(b"abc"), compute_hash(b"abc"));
        assert_ne!(compute_hash(b"abc"), compute_hash(b"abd"));
    }
}
