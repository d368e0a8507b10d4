//! Error taxonomy for the retrieval core.
//!
//! Only conditions the caller must distinguish programmatically get a
//! variant here. An empty index or a below-threshold retrieval result is
//! a normal reply, not an error. Application plumbing (CLI, server
//! startup) stays on `anyhow::Result`.

use std::path::PathBuf;

/// Errors surfaced by the indexing and retrieval core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied inputs violate a contract, e.g. a passage/embedding
    /// count mismatch on rebuild. Nothing is persisted.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external provider (embeddings or generation) was unreachable or
    /// rejected the request. Converted to a refusal reply at the answer
    /// boundary, never propagated raw to the user.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The persisted index snapshot could not be read or written.
    #[error("index snapshot {}: {message}", path.display())]
    Snapshot { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn snapshot(path: &std::path::Path, message: impl Into<String>) -> Self {
        Error::Snapshot {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}
