//! Item sources: where the data to be labeled comes from.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ItemId;

/// What gets posted for an item. Each kind maps to one Bot API send method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemContent {
    Text(String),
    Image(PathBuf),
    Animation(PathBuf),
    Document(PathBuf),
}

impl ItemContent {
    /// Classifies a file by extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let content = match ext.as_str() {
            "txt" => Self::Text(
                fs::read_to_string(path)
                    .with_context(|| format!("read text item {}", path.display()))?,
            ),
            "png" | "jpg" | "jpeg" => Self::Image(path.to_path_buf()),
            "mp4" | "gif" => Self::Animation(path.to_path_buf()),
            _ => Self::Document(path.to_path_buf()),
        };
        Ok(content)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Animation(_) => "animation",
            Self::Document(_) => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub content: ItemContent,
}

/// Stable, read-only enumeration of the items in a session.
pub trait ItemSource: Send + Sync {
    ///
    /// # Errors
    /// Returns an error if the underlying data cannot be read.
    fn list_items(&self) -> Result<Vec<Item>>;
}

/// Serializable description of a source, stored with the session config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Every file in a directory is one item; the file name is its id.
    Directory { path: PathBuf },
    /// One JSON object per line.
    JsonLines {
        path: PathBuf,
        /// Field holding the item id. Falls back to the line number.
        #[serde(default)]
        id_key: Option<String>,
        /// JSON pointer (e.g. `/body/text`) of the text to post instead of
        /// the whole object.
        #[serde(default)]
        text_pointer: Option<String>,
    },
}

impl SourceSpec {
    pub fn open(&self) -> Box<dyn ItemSource> {
        match self {
            Self::Directory { path } => Box::new(DirectorySource::new(path.clone())),
            Self::JsonLines {
                path,
                id_key,
                text_pointer,
            } => Box::new(JsonLinesSource {
                path: path.clone(),
                id_key: id_key.clone(),
                text_pointer: text_pointer.clone(),
            }),
        }
    }
}

pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl ItemSource for DirectorySource {
    fn list_items(&self) -> Result<Vec<Item>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("read item directory {}", self.dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.context("read directory entry")?;
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| anyhow!("non UTF-8 file name: {}", path.display()))?;
                Ok(Item {
                    id: ItemId::new(name),
                    content: ItemContent::from_path(&path)?,
                })
            })
            .collect()
    }
}

pub struct JsonLinesSource {
    path: PathBuf,
    id_key: Option<String>,
    text_pointer: Option<String>,
}

impl JsonLinesSource {
    pub fn new(path: PathBuf, id_key: Option<String>, text_pointer: Option<String>) -> Self {
        Self {
            path,
            id_key,
            text_pointer,
        }
    }

    fn item_id(&self, value: &Value, line_no: usize) -> ItemId {
        let keyed = self
            .id_key
            .as_deref()
            .and_then(|key| value.get(key))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        ItemId::new(keyed.unwrap_or_else(|| format!("line-{line_no}")))
    }

    fn text(&self, value: &Value) -> String {
        let selected = self
            .text_pointer
            .as_deref()
            .and_then(|pointer| value.pointer(pointer));
        match selected {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        }
    }
}

impl ItemSource for JsonLinesSource {
    fn list_items(&self) -> Result<Vec<Item>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read items from {}", self.path.display()))?;

        let mut items = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = i + 1;
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("parse line {line_no} of {}", self.path.display()))?;
            items.push(Item {
                id: self.item_id(&value, line_no),
                content: ItemContent::Text(self.text(&value)),
            });
        }
        Ok(items)
    }
}
