//! Durable record of the labels humans have applied.
//!
//! The label store, not the session index, is the source of truth for
//! whether an item is complete.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ItemId;
use crate::source::Item;

pub trait LabelStore: Send + Sync {
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn is_complete(&self, item: &ItemId) -> Result<bool>;

    /// Filters `items` down to the ones not yet complete, keeping order.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn remove_completed(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        let mut incomplete = Vec::with_capacity(items.len());
        for item in items {
            if !self.is_complete(&item.id)? {
                incomplete.push(item);
            }
        }
        Ok(incomplete)
    }

    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn list_completed(&self) -> Result<Vec<ItemId>>;

    ///
    /// # Errors
    /// Returns an error if the label cannot be persisted.
    fn record_label(&mut self, item: &ItemId, label: &str) -> Result<()>;

    ///
    /// # Errors
    /// Returns an error if the completion cannot be persisted.
    fn record_complete(&mut self, item: &ItemId) -> Result<()>;

    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn labels_for(&self, item: &ItemId) -> Result<BTreeSet<String>>;
}

/// Where a session writes its labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub path: PathBuf,
}

impl OutputSpec {
    ///
    /// # Errors
    /// Returns an error if an existing output file cannot be parsed.
    pub fn open(&self) -> Result<Box<dyn LabelStore>> {
        Ok(Box::new(JsonLabelStore::open(&self.path)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Label store backed by one JSON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct JsonLabelStore {
    path: PathBuf,
    records: BTreeMap<ItemId, LabelRecord>,
}

impl JsonLabelStore {
    /// Opens the store at `path`, starting empty if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        let records = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read labels from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse labels from {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &BTreeMap<ItemId, LabelRecord> {
        &self.records
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.records)
    }

    /// Stores `record` only if the file write succeeds; memory never runs
    /// ahead of disk.
    fn commit(&mut self, item: &ItemId, record: LabelRecord) -> Result<()> {
        let previous = self.records.insert(item.clone(), record);
        if let Err(err) = self.save() {
            match previous {
                Some(previous) => self.records.insert(item.clone(), previous),
                None => self.records.remove(item),
            };
            return Err(err);
        }
        Ok(())
    }
}

impl LabelStore for JsonLabelStore {
    fn is_complete(&self, item: &ItemId) -> Result<bool> {
        Ok(self.records.get(item).is_some_and(|record| record.complete))
    }

    fn list_completed(&self) -> Result<Vec<ItemId>> {
        Ok(self
            .records
            .iter()
            .filter(|(_, record)| record.complete)
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn record_label(&mut self, item: &ItemId, label: &str) -> Result<()> {
        let mut record = self.records.get(item).cloned().unwrap_or_default();
        if record.labels.iter().any(|existing| existing == label) {
            return Ok(());
        }
        record.labels.push(label.to_string());
        record.updated_at = Some(Utc::now());
        self.commit(item, record)
    }

    fn record_complete(&mut self, item: &ItemId) -> Result<()> {
        let mut record = self.records.get(item).cloned().unwrap_or_default();
        if record.complete {
            return Ok(());
        }
        record.complete = true;
        record.updated_at = Some(Utc::now());
        self.commit(item, record)
    }

    fn labels_for(&self, item: &ItemId) -> Result<BTreeSet<String>> {
        Ok(self
            .records
            .get(item)
            .map(|record| record.labels.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Writes `value` as pretty JSON via write-to-temp-then-rename.
///
/// # Errors
/// Returns an error if serialization or any filesystem step fails.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    let temp_path = path.with_extension("json.tmp");
    {
        let mut temp = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        temp.write_all(json.as_bytes())
            .context("Failed to write temp file")?;
        temp.sync_all().context("Failed to flush temp file")?;
    }
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
