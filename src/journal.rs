//! Append-only dialog journal and citation metrics.
//!
//! Every user message and assistant reply is appended as one JSON line
//! to a daily file (`YYYY-MM-DD.jsonl`). The journal is best-effort
//! observability, so callers ignore append failures rather than failing
//! the request.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::retriever::Citation;

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// RFC 3339 timestamp in UTC.
    pub ts: String,
    /// "user" or "assistant".
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Writes dialog turns to daily JSONL files under one directory.
#[derive(Debug, Clone)]
pub struct DialogJournal {
    dir: PathBuf,
}

impl DialogJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append one turn to today's file, creating the directory and file
    /// as needed.
    pub fn append(&self, role: &str, text: &str, citations: &[Citation]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create journal dir {}", self.dir.display()))?;
        let record = JournalRecord {
            ts: Utc::now().to_rfc3339(),
            role: role.to_string(),
            text: text.to_string(),
            citations: citations.to_vec(),
        };
        let line = serde_json::to_string(&record)?;
        let path = self.dir.join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d")));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal file {}", path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Aggregate citation metrics over journaled assistant replies.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub total_assistant: usize,
    pub with_citation: usize,
    /// `with_citation / total_assistant`, 0 when there are no replies.
    pub ratio: f64,
    /// Per-journal-file breakdown, keyed by file name. Files with no
    /// assistant replies are omitted.
    pub per_file: BTreeMap<String, FileMetrics>,
}

/// Assistant-reply counts for one journal file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMetrics {
    pub assistant: usize,
    pub with_citation: usize,
}

/// Scan journal files in `dir`, optionally restricted to an inclusive
/// `YYYY-MM-DD` date range, and count how often assistant replies carry
/// citations. Malformed lines are skipped.
pub fn citation_metrics(
    dir: &Path,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<MetricsReport> {
    let mut total_assistant = 0usize;
    let mut with_citation = 0usize;
    let mut per_file: BTreeMap<String, FileMetrics> = BTreeMap::new();

    if dir.is_dir() {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read journal dir {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();

        for path in paths {
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) if s.len() >= 10 => &s[..10],
                _ => continue,
            };
            if start.is_some_and(|s| stem < s) || end.is_some_and(|e| stem > e) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read journal file {}", path.display()))?;
            let mut file_assistant = 0usize;
            let mut file_cited = 0usize;
            for line in content.lines() {
                let Ok(record) = serde_json::from_str::<JournalRecord>(line) else {
                    continue;
                };
                if record.role != "assistant" {
                    continue;
                }
                file_assistant += 1;
                if !record.citations.is_empty() {
                    file_cited += 1;
                }
            }
            if file_assistant > 0 {
                total_assistant += file_assistant;
                with_citation += file_cited;
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    per_file.insert(
                        name.to_string(),
                        FileMetrics {
                            assistant: file_assistant,
                            with_citation: file_cited,
                        },
                    );
                }
            }
        }
    }

    let ratio = if total_assistant == 0 {
        0.0
    } else {
        with_citation as f64 / total_assistant as f64
    };
    Ok(MetricsReport {
        total_assistant,
        with_citation,
        ratio,
        per_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn citation(file: &str) -> Citation {
        Citation {
            source_file: file.to_string(),
            anchor: "0000000000".to_string(),
            section_title: "Глава".to_string(),
            quote: "цитата".to_string(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let journal = DialogJournal::new(dir.path());
        journal.append("user", "вопрос", &[]).unwrap();
        journal
            .append("assistant", "ответ", &[citation("book.md")])
            .unwrap();

        let report = citation_metrics(dir.path(), None, None).unwrap();
        assert_eq!(report.total_assistant, 1);
        assert_eq!(report.with_citation, 1);
        let today = format!("{}.jsonl", Utc::now().format("%Y-%m-%d"));
        assert_eq!(
            report.per_file.get(&today),
            Some(&FileMetrics {
                assistant: 1,
                with_citation: 1,
            })
        );
        assert!((report.ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_per_file_breakdown() {
        let dir = tempdir().unwrap();
        let reply =
            "{\"ts\":\"t\",\"role\":\"assistant\",\"text\":\"ок\",\"citations\":[{\"file\":\"book.md\",\"anchor\":\"0000000000\",\"title\":\"Глава\",\"quote\":\"цитата\"}]}\n";
        fs::write(dir.path().join("2026-08-01.jsonl"), reply).unwrap();
        fs::write(dir.path().join("2026-08-02.jsonl"), reply).unwrap();
        fs::write(
            dir.path().join("2026-08-03.jsonl"),
            "{\"ts\":\"t\",\"role\":\"user\",\"text\":\"вопрос\",\"citations\":[]}\n",
        )
        .unwrap();

        let report = citation_metrics(dir.path(), None, None).unwrap();
        assert_eq!(report.total_assistant, 2);
        assert_eq!(report.with_citation, 2);
        let counted = FileMetrics {
            assistant: 1,
            with_citation: 1,
        };
        assert_eq!(report.per_file.get("2026-08-01.jsonl"), Some(&counted));
        assert_eq!(report.per_file.get("2026-08-02.jsonl"), Some(&counted));
        // A file with only user turns does not appear in the breakdown.
        assert!(!report.per_file.contains_key("2026-08-03.jsonl"));
    }

    #[test]
    fn test_metrics_skip_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2026-08-30.jsonl");
        fs::write(
            &path,
            "not json\n{\"ts\":\"2026-08-30T10:00:00Z\",\"role\":\"assistant\",\"text\":\"ок\",\"citations\":[]}\n",
        )
        .unwrap();

        let report = citation_metrics(dir.path(), None, None).unwrap();
        assert_eq!(report.total_assistant, 1);
        assert_eq!(report.with_citation, 0);
        assert!((report.ratio - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_date_range_filter() {
        let dir = tempdir().unwrap();
        let record = |_d: &str| {
            "{\"ts\":\"t\",\"role\":\"assistant\",\"text\":\"x\",\"citations\":[]}\n".to_string()
        };
        fs::write(dir.path().join("2026-08-01.jsonl"), record("2026-08-01")).unwrap();
        fs::write(dir.path().join("2026-08-15.jsonl"), record("2026-08-15")).unwrap();
        fs::write(dir.path().join("2026-08-30.jsonl"), record("2026-08-30")).unwrap();

        let report =
            citation_metrics(dir.path(), Some("2026-08-10"), Some("2026-08-20")).unwrap();
        assert_eq!(report.total_assistant, 1);
    }

    #[test]
    fn test_metrics_missing_dir_is_empty() {
        let report = citation_metrics(Path::new("/nonexistent/journal"), None, None).unwrap();
        assert_eq!(report.total_assistant, 0);
        assert!((report.ratio - 0.0).abs() < 1e-9);
    }
}
