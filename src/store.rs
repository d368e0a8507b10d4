//! Persistent index snapshot store.
//!
//! The whole index lives in one JSON array of [`IndexedPassage`] records.
//! Lifecycle: [`IndexStore::rebuild`] replaces the entire contents from a
//! fresh chunking pass (no incremental updates), persisting immediately;
//! [`IndexStore::load`] reads the snapshot wholesale into memory.
//!
//! The snapshot write goes through a temp file in the same directory
//! followed by an atomic rename, so a concurrent reader sees either the
//! old snapshot or the new one, never a torn file.
//!
//! Schema tolerance: records written before the `quote` field existed
//! load with an empty quote.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::reader::Passage;

/// Maximum stored quote length, in characters, including the ellipsis.
pub const MAX_QUOTE_CHARS: usize = 200;

/// A passage plus its embedding and display quote, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPassage {
    #[serde(rename = "file")]
    pub source_file: String,
    #[serde(rename = "title")]
    pub section_title: String,
    pub anchor: String,
    #[serde(rename = "seq")]
    pub sequence: u64,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub quote: String,
}

/// Ordered collection of indexed passages backed by a JSON snapshot file.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    items: Vec<IndexedPassage>,
}

impl IndexStore {
    /// Create an empty store bound to a snapshot path. Nothing is read
    /// until [`load`](Self::load) is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            items: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted snapshot. A missing file yields an empty store;
    /// a malformed file fails the whole load with a diagnostic rather
    /// than silently dropping records.
    pub fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            self.items = Vec::new();
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::snapshot(&self.path, e.to_string()))?;
        self.items = serde_json::from_str(&raw)
            .map_err(|e| Error::snapshot(&self.path, format!("malformed snapshot: {}", e)))?;
        Ok(())
    }

    /// Write the current contents to the snapshot path atomically
    /// (temp file in the same directory, then rename).
    pub fn save(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| Error::snapshot(&self.path, e.to_string()))?;

        let json = serde_json::to_vec(&self.items)
            .map_err(|e| Error::snapshot(&self.path, e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::snapshot(&self.path, e.to_string()))?;
        std::io::Write::write_all(&mut tmp, &json)
            .map_err(|e| Error::snapshot(&self.path, e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::snapshot(&self.path, e.to_string()))?;
        Ok(())
    }

    /// Replace the entire store contents from a chunking pass and persist.
    ///
    /// Fails with [`Error::Precondition`] when the passage and embedding
    /// counts differ; in that case neither memory nor the snapshot file
    /// is touched.
    pub fn rebuild(&mut self, passages: &[Passage], embeddings: Vec<Vec<f32>>) -> Result<()> {
        if passages.len() != embeddings.len() {
            return Err(Error::Precondition(format!(
                "passage/embedding count mismatch: {} passages, {} embeddings",
                passages.len(),
                embeddings.len()
            )));
        }
        self.items = passages
            .iter()
            .zip(embeddings)
            .map(|(p, embedding)| IndexedPassage {
                source_file: p.source_file.clone(),
                section_title: p.section_title.clone(),
                anchor: p.anchor.clone(),
                sequence: p.sequence,
                embedding,
                quote: make_quote(&p.text),
            })
            .collect();
        self.save()
    }

    /// The full in-memory collection, in sequence order.
    pub fn all(&self) -> &[IndexedPassage] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace contents in memory without persisting. Test seam.
    #[doc(hidden)]
    pub fn set_items(&mut self, items: Vec<IndexedPassage>) {
        self.items = items;
    }
}

/// Normalize passage text into a display quote: collapse whitespace runs
/// to single spaces, trim, and truncate to [`MAX_QUOTE_CHARS`] characters
/// with a `…` marker when truncated.
pub fn make_quote(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= MAX_QUOTE_CHARS {
        return normalized;
    }
    let mut quote: String = normalized.chars().take(MAX_QUOTE_CHARS - 1).collect();
    quote.push('…');
    quote
}
