use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use entity::portfolio::HoldingSet;
use log::info;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::HoldingStore;

/// Holdings kept as `{ "stocks": [...] }` in a single JSON file.
pub struct JsonHoldingStore {
    path: PathBuf,
}

impl JsonHoldingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        PathBuf::from(staging)
    }
}

#[async_trait]
impl HoldingStore for JsonHoldingStore {
    async fn load(&self) -> anyhow::Result<HoldingSet> {
        let path = self.path.as_path();

        // A missing file is a configuration error, not an empty portfolio
        if !path.exists() {
            return Err(anyhow!("Holdings file {} does not exist", path.display()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(false)
            .open(path)
            .await
            .with_context(|| format!("Failed to open holdings file {}", path.display()))?;

        let mut buf = String::with_capacity(usize::try_from(file.metadata().await?.len())?);
        file.read_to_string(&mut buf)
            .await
            .with_context(|| format!("Failed to read holdings file {}", path.display()))?;

        let holdings: HoldingSet = serde_json::from_str(&buf)
            .with_context(|| format!("Failed to parse holdings file {}", path.display()))?;

        info!("Loaded {} holdings from {}", holdings.len(), path.display());
        Ok(holdings)
    }

    async fn save(&self, holdings: &HoldingSet) -> anyhow::Result<()> {
        let buf =
            serde_json::to_string_pretty(holdings).context("Failed to serialize holdings")?;

        if let Some(parent) = self.path.parent().filter(|dir| dir != &Path::new("")) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        // Write the whole document next to the target, then swap it in
        let staging = self.staging_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)
            .await
            .with_context(|| format!("Failed to open {}", staging.display()))?;
        file.write_all(buf.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(
            "Saved {} holdings to {}",
            holdings.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::portfolio::InstrumentId;

    fn holdings(ids: &[&str]) -> HoldingSet {
        ids.iter().copied().map(InstrumentId::from).collect()
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_stocks.json");
        let store = JsonHoldingStore::new(&path);

        let error = store.load().await.unwrap_err();
        assert!(error.to_string().contains("does not exist"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_list_on_disk_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_stocks.json");
        std::fs::write(&path, r#"{ "stocks": [] }"#).unwrap();

        let store = JsonHoldingStore::new(&path);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stocks").join("current_stocks.json");
        let store = JsonHoldingStore::new(&path);

        let set = holdings(&["005930", "000660", "035420"]);
        store.save(&set).await.unwrap();

        assert_eq!(store.load().await.unwrap(), set);
        assert!(!store.staging_path().exists());

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            serde_json::json!({ "stocks": ["005930", "000660", "035420"] })
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current_stocks.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let store = JsonHoldingStore::new(&path);
        assert!(store.load().await.is_err());
    }
}
