//! Indexing pipeline: collect passages from the configured sources,
//! embed them in batches, and write the snapshot.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::providers::EmbeddingProvider;
use crate::reader::{parse_book_dir, Passage};
use crate::store::IndexStore;

/// Embedding input is truncated to this many characters; the stored
/// quote keeps its own, shorter limit.
const MAX_EMBED_CHARS: usize = 1500;

/// Gather passages from the book directory and the optional companion
/// context directory, then renumber sequences globally so boundary
/// comparisons stay meaningful across files.
pub fn collect_passages(config: &Config) -> Result<Vec<Passage>> {
    let mut passages = parse_book_dir(&config.data.book_dir)
        .with_context(|| format!("failed to read book dir {}", config.data.book_dir.display()))?;
    if let Some(context_dir) = &config.data.context_dir {
        if context_dir.is_dir() {
            let extra = parse_book_dir(context_dir)
                .with_context(|| format!("failed to read context dir {}", context_dir.display()))?;
            passages.extend(extra);
        }
    }
    for (seq, passage) in passages.iter_mut().enumerate() {
        passage.sequence = seq as u64;
    }
    Ok(passages)
}

fn limit_text(text: &str) -> String {
    if text.chars().count() <= MAX_EMBED_CHARS {
        return text.to_string();
    }
    text.chars().take(MAX_EMBED_CHARS).collect()
}

/// Rebuild the snapshot from scratch: collect, embed in batches of
/// `embedding.batch_size`, and atomically replace the index file.
pub async fn rebuild_index(
    config: &Config,
    provider: &dyn EmbeddingProvider,
) -> Result<IndexStore> {
    let passages = collect_passages(config)?;
    println!(
        "Indexing {} passages with '{}' ({} dims)...",
        passages.len(),
        provider.model_name(),
        provider.dims()
    );

    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(passages.len());
    for batch in passages.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| limit_text(&p.text)).collect();
        let batch_embeddings = provider.embed(&texts).await?;
        embeddings.extend(batch_embeddings);
    }

    let mut store = IndexStore::new(&config.data.index_path);
    store.rebuild(&passages, embeddings)?;
    println!("Wrote index snapshot to {}", config.data.index_path.display());
    Ok(store)
}

/// Load the existing snapshot without touching the sources.
pub fn load_index(config: &Config) -> crate::error::Result<IndexStore> {
    let mut store = IndexStore::new(&config.data.index_path);
    store.load()?;
    Ok(store)
}
