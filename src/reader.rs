//! Paragraph-level book chunker.
//!
//! Splits Markdown-formatted book text into ordered [`Passage`]s, one per
//! paragraph, each tagged with the nearest preceding heading as its
//! section title.
//!
//! # Algorithm
//!
//! 1. Scan lines in order. A line whose first non-whitespace character is
//!    `#` becomes the current section title and flushes the buffer.
//! 2. A blank line flushes the buffer.
//! 3. Any other line accumulates into the buffer.
//! 4. A flush emits a passage only when the trimmed buffer is non-empty;
//!    the per-file `sequence` counter increments only on emission.
//! 5. The trailing buffer is flushed at end of file.
//!
//! Sequence numbers restart at 0 for every file. When several files are
//! merged into one corpus the pipeline renumbers globally before the
//! passages are embedded (see [`crate::pipeline::collect_passages`]).

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

/// One paragraph of book text with stable ordering and identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    /// Path of the source file, as given to the parser.
    pub source_file: String,
    /// Nearest preceding heading, or `""` before the first heading.
    pub section_title: String,
    /// The paragraph text (lines joined with `\n`, trimmed).
    pub text: String,
    /// Content-derived stable identifier, used for citation links.
    pub anchor: String,
    /// Position in document-then-line order.
    pub sequence: u64,
}

/// Derive a passage anchor: the first 10 hex characters of the SHA-256
/// digest of the trimmed text. Identical passages across rebuilds get
/// identical anchors.
pub fn anchor_for(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..10].to_string()
}

/// Parse a single book file into ordered passages.
///
/// Files with no headings produce passages with an empty section title.
pub fn parse_book_file(path: &Path) -> Result<Vec<Passage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read book file: {}", path.display()))?;
    Ok(parse_book_text(&path.display().to_string(), &content))
}

/// Parse book text that is already in memory.
///
/// Separated from [`parse_book_file`] so the chunking algorithm can be
/// tested without touching the filesystem.
pub fn parse_book_text(source_file: &str, content: &str) -> Vec<Passage> {
    let mut passages = Vec::new();
    let mut title = String::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut sequence: u64 = 0;

    let mut flush = |buf: &mut Vec<&str>, title: &str, sequence: &mut u64, out: &mut Vec<Passage>| {
        if buf.is_empty() {
            return;
        }
        let text = buf.join("\n").trim().to_string();
        buf.clear();
        if text.is_empty() {
            return;
        }
        out.push(Passage {
            source_file: source_file.to_string(),
            section_title: title.to_string(),
            anchor: anchor_for(&text),
            sequence: *sequence,
            text,
        });
        *sequence += 1;
    };

    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            flush(&mut buf, &title, &mut sequence, &mut passages);
            title = line
                .trim_start()
                .trim_start_matches('#')
                .trim()
                .to_string();
            continue;
        }
        if line.trim().is_empty() {
            flush(&mut buf, &title, &mut sequence, &mut passages);
        } else {
            buf.push(line);
        }
    }
    flush(&mut buf, &title, &mut sequence, &mut passages);

    passages
}

/// Parse every `*.md` file under a directory tree, in lexicographic path
/// order, concatenating per-file passages.
///
/// Sequence numbers are per file here; callers that merge files into one
/// corpus must renumber (the pipeline does).
pub fn parse_book_dir(dir: &Path) -> Result<Vec<Passage>> {
    let mut paths: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("md"))
                .unwrap_or(false)
        })
        .collect();

    // Deterministic enumeration order regardless of filesystem.
    paths.sort();

    let mut passages = Vec::new();
    for path in paths {
        passages.extend(parse_book_file(&path)?);
    }
    Ok(passages)
}
