//! Ordered, offset-addressable access to the Substack export.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConvertError, Result};

/// One post from the export, as found in the source. Every field is optional
/// here; the mapping step decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Substack's `post_id`, usually `<number>.<slug>`.
    #[serde(default, alias = "post_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default, alias = "html")]
    pub body_html: Option<String>,
    #[serde(default, alias = "post_date")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default, rename = "type")]
    pub post_type: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub podcast_url: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub comments: Vec<SourceComment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceComment {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// One slot of a batch. An `Err` here is confined to that item.
pub type Entry = Result<SourceItem>;

/// An export with a stable order and, ideally, a known size.
pub trait SourceCollection: Send + Sync {
    /// Number of items, or `None` when the source cannot tell.
    fn total(&self) -> Result<Option<u64>>;

    /// Up to `limit` entries starting at `offset`. A returned `Err` means the
    /// source itself failed; per-item problems come back inside the vector.
    fn read(&self, offset: u64, limit: usize) -> Result<Vec<Entry>>;
}

impl<T: SourceCollection + ?Sized> SourceCollection for std::sync::Arc<T> {
    fn total(&self) -> Result<Option<u64>> {
        (**self).total()
    }

    fn read(&self, offset: u64, limit: usize) -> Result<Vec<Entry>> {
        (**self).read(offset, limit)
    }
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    items: Vec<SourceItem>,
    total_known: bool,
}

impl VecSource {
    pub fn new(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            total_known: true,
        }
    }

    /// Same items, but `total()` reports an unknown size.
    pub fn without_total(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            total_known: false,
        }
    }
}

impl SourceCollection for VecSource {
    fn total(&self) -> Result<Option<u64>> {
        Ok(self.total_known.then_some(self.items.len() as u64))
    }

    fn read(&self, offset: u64, limit: usize) -> Result<Vec<Entry>> {
        let start = (offset as usize).min(self.items.len());
        Ok(self.items[start..]
            .iter()
            .take(limit)
            .cloned()
            .map(Ok)
            .collect())
    }
}

/// A file holding one JSON object per line. Blank lines are ignored.
///
/// Lines are indexed up front so the total is known, but each line is only
/// parsed when its batch is read; a malformed line fails that item alone.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    lines: Vec<(usize, String)>,
}

impl JsonLinesSource {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConvertError::Source(format!("{}: {e}", path.display())))?;
        let source = Self::index(path.to_path_buf(), &contents);
        debug!(path = %path.display(), items = source.lines.len(), "indexed export");
        Ok(source)
    }

    fn index(path: PathBuf, contents: &str) -> Self {
        let lines = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| (n + 1, line.to_string()))
            .collect();
        Self { path, lines }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceCollection for JsonLinesSource {
    fn total(&self) -> Result<Option<u64>> {
        Ok(Some(self.lines.len() as u64))
    }

    fn read(&self, offset: u64, limit: usize) -> Result<Vec<Entry>> {
        let start = (offset as usize).min(self.lines.len());
        Ok(self.lines[start..]
            .iter()
            .take(limit)
            .map(|(line_no, line)| {
                serde_json::from_str::<SourceItem>(line)
                    .map_err(|e| ConvertError::schema(format!("line {line_no}"), e.to_string()))
            })
            .collect())
    }
}
