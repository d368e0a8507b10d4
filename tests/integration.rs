//! End-to-end tests over the library API: index a small book from
//! Markdown, then ask questions through the full answer flow with a
//! deterministic embedding provider and an English test vocabulary.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use tempfile::TempDir;

use coreader::answer::{answer, AnswerContext, MSG_BOUNDARY, MSG_EMPTY_INDEX, MSG_FOUND};
use coreader::config::{Config, DataConfig, EmbeddingConfig};
use coreader::guard::{Intent, SpeakerEntry, Vocabulary};
use coreader::pipeline::{load_index, rebuild_index};
use coreader::providers::{EmbeddingProvider, HashProvider};
use coreader::retriever::RankingRules;
use coreader::store::{IndexStore, IndexedPassage};

const DIMS: usize = 32;

fn config_for(dir: &TempDir) -> Config {
    Config {
        data: DataConfig {
            book_dir: dir.path().join("book"),
            context_dir: None,
            index_path: dir.path().join("index.json"),
            journal_dir: dir.path().join("journal"),
        },
        embedding: EmbeddingConfig {
            dims: DIMS,
            ..Default::default()
        },
        generation: Default::default(),
        session: Default::default(),
        server: Default::default(),
    }
}

/// Three speeches in a fixed narrative order. Detection order puts the
/// last speaker first, so a question naming several speakers resolves to
/// the latest one, mirroring how the main vocabulary prefers the most
/// asked-about name.
fn test_vocabulary() -> Vocabulary {
    let pattern = |p: &str| Regex::new(p).unwrap();
    let speaker = |stem: &str, rank: u32| SpeakerEntry {
        stem: stem.to_string(),
        rank: Some(rank),
    };
    Vocabulary {
        intents: vec![
            (pattern(r"started\s+reading"), Intent::StartReading),
            (pattern(r"just\s+finished|finished"), Intent::JustFinished),
            (pattern(r"i\s+am\s+reading|\breading\b"), Intent::CurrentlyReading),
        ],
        speakers: vec![
            speaker("speaker c", 3),
            speaker("speaker b", 2),
            speaker("speaker a", 1),
        ],
    }
}

/// Fifteen passages: sequences 0..=4 belong to Speaker A, 5..=9 to
/// Speaker B, 10..=14 to Speaker C.
fn scenario_snapshot(config: &Config) {
    let mut items = Vec::new();
    for (speaker, topic) in [("Speaker A", "courage"), ("Speaker B", "duality"), ("Speaker C", "wisdom")] {
        for i in 0..5 {
            let seq = items.len() as u64;
            let text = format!("{} argues about {} and love, part {}", speaker, topic, i + 1);
            items.push(IndexedPassage {
                source_file: "book.md".to_string(),
                section_title: speaker.to_string(),
                anchor: format!("{:010}", seq),
                sequence: seq,
                embedding: coreader::providers::hash_vector(&text, DIMS),
                quote: text.to_lowercase(),
            });
        }
    }
    let mut store = IndexStore::new(&config.data.index_path);
    store.set_items(items);
    store.save().unwrap();
}

fn ctx<'a>(
    config: &'a Config,
    session: &'a coreader::config::SessionSettings,
    embeddings: &'a dyn EmbeddingProvider,
    vocabulary: &'a Vocabulary,
    rules: &'a RankingRules,
) -> AnswerContext<'a> {
    AnswerContext {
        config,
        session,
        embeddings,
        generation: None,
        vocabulary,
        rules,
        journal: None,
    }
}

#[tokio::test]
async fn test_index_then_ask_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    fs::create_dir_all(&config.data.book_dir).unwrap();
    fs::write(
        config.data.book_dir.join("01-opening.md"),
        "# Speaker A\n\nspeaker a argues about courage and love\n\nspeaker a praises the oldest god\n",
    )
    .unwrap();
    fs::write(
        config.data.book_dir.join("02-second.md"),
        "# Speaker B\n\nspeaker b argues about the duality of love\n",
    )
    .unwrap();

    let provider = HashProvider::new(DIMS);
    let store = rebuild_index(&config, &provider).await.unwrap();
    assert_eq!(store.all().len(), 3);
    // Sequences are global across files.
    let seqs: Vec<u64> = store.all().iter().map(|it| it.sequence).collect();
    assert_eq!(seqs, vec![0, 1, 2]);

    let reloaded = load_index(&config).unwrap();
    assert_eq!(reloaded.all().len(), 3);

    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let session = config.session.clone();
    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "what does speaker a argue about courage?",
        None,
    )
    .await;
    assert_eq!(outcome.reply, MSG_FOUND);
    assert!(!outcome.citations.is_empty());
    assert!(outcome.citations.iter().all(|c| c.anchor.len() == 10));
}

#[tokio::test]
async fn test_explicit_boundary_blocks_future_speaker() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    scenario_snapshot(&config);
    let provider = HashProvider::new(DIMS);
    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let mut session = config.session.clone();
    session.read_boundary_seq = Some(4);

    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "what does speaker c say about wisdom?",
        None,
    )
    .await;
    assert_eq!(outcome.reply, MSG_BOUNDARY);
    assert!(outcome.citations.is_empty());
}

#[tokio::test]
async fn test_explicit_boundary_allows_read_speaker() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    scenario_snapshot(&config);
    let provider = HashProvider::new(DIMS);
    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let mut session = config.session.clone();
    session.read_boundary_seq = Some(4);

    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "what does speaker a argue about courage?",
        None,
    )
    .await;
    assert_eq!(outcome.reply, MSG_FOUND);
    assert!(!outcome.citations.is_empty());
    // No citation may come from beyond the boundary.
    for c in &outcome.citations {
        assert_eq!(c.section_title, "Speaker A");
    }
}

#[tokio::test]
async fn test_position_statement_blocks_later_speaker() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    scenario_snapshot(&config);
    let provider = HashProvider::new(DIMS);
    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let session = config.session.clone();

    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "I am reading Speaker A now. What does Speaker C say?",
        None,
    )
    .await;
    assert_eq!(outcome.reply, MSG_BOUNDARY);
}

#[tokio::test]
async fn test_just_finished_unlocks_whole_span() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    scenario_snapshot(&config);
    let provider = HashProvider::new(DIMS);
    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let session = config.session.clone();

    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "I just finished Speaker B. What does speaker b argue about duality?",
        None,
    )
    .await;
    assert_eq!(outcome.reply, MSG_FOUND);
    assert!(!outcome.citations.is_empty());
    for c in &outcome.citations {
        assert_ne!(c.section_title, "Speaker C");
    }
}

#[tokio::test]
async fn test_one_off_boundary_override() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    scenario_snapshot(&config);
    let provider = HashProvider::new(DIMS);
    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let session = config.session.clone();

    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "what does speaker b argue about duality?",
        Some(4),
    )
    .await;
    assert_eq!(outcome.reply, MSG_BOUNDARY);
}

#[tokio::test]
async fn test_empty_index_skips_embedding_provider() {
    struct TrackingProvider {
        called: AtomicBool,
    }
    #[async_trait::async_trait]
    impl EmbeddingProvider for TrackingProvider {
        fn model_name(&self) -> &str {
            "tracking"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> coreader::error::Result<Vec<Vec<f32>>> {
            self.called.store(true, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.0; DIMS]).collect())
        }
    }

    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let provider = TrackingProvider {
        called: AtomicBool::new(false),
    };
    let vocabulary = test_vocabulary();
    let rules = RankingRules::default();
    let session = config.session.clone();

    let outcome = answer(
        &ctx(&config, &session, &provider, &vocabulary, &rules),
        "anything",
        None,
    )
    .await;
    assert_eq!(outcome.reply, MSG_EMPTY_INDEX);
    assert!(!provider.called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    fs::create_dir_all(&config.data.book_dir).unwrap();
    fs::write(
        config.data.book_dir.join("book.md"),
        "# One\n\nfirst passage\n\nsecond passage\n",
    )
    .unwrap();

    let provider = HashProvider::new(DIMS);
    let first = rebuild_index(&config, &provider).await.unwrap();
    let second = rebuild_index(&config, &provider).await.unwrap();

    let anchors_first: Vec<String> = first.all().iter().map(|it| it.anchor.clone()).collect();
    let anchors_second: Vec<String> = second.all().iter().map(|it| it.anchor.clone()).collect();
    assert_eq!(anchors_first, anchors_second);
}
