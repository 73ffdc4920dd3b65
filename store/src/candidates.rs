use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use entity::portfolio::{CandidateUniverse, InstrumentId, InstrumentMeta};
use log::{info, warn};
use serde::Deserialize;

use crate::CandidateStore;

/// Candidate universe read from a CSV file with a `code` column and optional `name` and `rank`
/// columns.
pub struct CsvCandidateStore {
    path: PathBuf,
}

impl CsvCandidateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Deserialize)]
struct CandidateRecord {
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    rank: Option<u32>,
}

#[async_trait]
impl CandidateStore for CsvCandidateStore {
    async fn load(&self) -> anyhow::Result<CandidateUniverse> {
        let buf = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read candidates file {}", self.path.display()))?;

        let universe = parse_candidates(&buf)
            .with_context(|| format!("Failed to parse candidates file {}", self.path.display()))?;

        info!(
            "Loaded {} candidates from {}",
            universe.len(),
            self.path.display()
        );
        Ok(universe)
    }
}

fn parse_candidates(buf: &str) -> anyhow::Result<CandidateUniverse> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(buf.as_bytes());

    let mut universe = CandidateUniverse::new();
    for (line, record) in reader.deserialize::<CandidateRecord>().enumerate() {
        let record = record?;
        if record.code.is_empty() {
            warn!("Skipping candidate row {} with an empty code", line + 1);
            continue;
        }

        universe.insert(
            InstrumentId::from(record.code),
            InstrumentMeta {
                name: record.name.filter(|name| !name.is_empty()),
                rank: record.rank,
            },
        );
    }

    Ok(universe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::portfolio::HoldingSet;

    #[test]
    fn parses_codes_as_opaque_strings() {
        let universe = parse_candidates("code,name,rank\n005930,Samsung,1\n000660,SK Hynix,\n").unwrap();
        assert_eq!(universe.len(), 2);

        let samsung = universe.get(&InstrumentId::from("005930")).unwrap();
        assert_eq!(samsung.name.as_deref(), Some("Samsung"));
        assert_eq!(samsung.rank, Some(1));

        let hynix = universe.get(&InstrumentId::from("000660")).unwrap();
        assert_eq!(hynix.rank, None);
    }

    #[test]
    fn code_only_file_and_blank_rows() {
        let universe = parse_candidates("code\nAAPL\n \nMSFT\n").unwrap();
        let ids = universe.eligible(&HoldingSet::new(), None);
        assert_eq!(
            ids.iter().map(InstrumentId::as_str).collect::<Vec<_>>(),
            ["AAPL", "MSFT"]
        );
    }

    #[test]
    fn missing_code_column_is_an_error() {
        assert!(parse_candidates("name\nApple\n").is_err());
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.csv");
        std::fs::write(&path, "code,name\nAAPL,Apple\nMSFT,Microsoft\n").unwrap();

        let universe = CsvCandidateStore::new(&path).load().await.unwrap();
        assert_eq!(universe.len(), 2);

        let missing = CsvCandidateStore::new(dir.path().join("missing.csv"));
        assert!(missing.load().await.is_err());
    }
}
