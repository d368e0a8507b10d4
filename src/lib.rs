//! # Coreader
//!
//! A local-first reading companion that answers questions strictly from
//! an indexed book, cites every reply, and never reveals parts of the
//! narrative the reader has not reached yet.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Markdown  │──▶│   Pipeline   │──▶│ JSON snapshot │
//! │  book dir  │   │ Chunk+Embed  │   │  index store  │
//! └────────────┘   └──────────────┘   └──────┬────────┘
//!                                            │
//!                    ┌───────────────────────┤
//!                    ▼                       ▼
//!               ┌──────────┐          ┌───────────┐
//!               │   CLI    │          │   HTTP    │
//!               │(coreader)│          │  server   │
//!               └──────────┘          └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! coreader index                # chunk and embed the book
//! coreader ask "о чём речь Федра?"
//! coreader sections             # list sections with sequence spans
//! coreader serve                # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`reader`] | Markdown paragraph chunker with stable anchors |
//! | [`store`] | JSON snapshot index store with atomic rebuild |
//! | [`pipeline`] | Collect, embed, and write the index |
//! | [`retriever`] | Hybrid BM25 + cosine retrieval with re-ranking rules |
//! | [`gate`] | Confidence thresholds over retrieval hits |
//! | [`guard`] | Narrative-position spoiler guard |
//! | [`answer`] | Answer orchestration and refusal messages |
//! | [`providers`] | Embedding and generation providers (hash, OpenAI) |
//! | [`journal`] | Append-only dialog journal and citation metrics |
//! | [`config`] | TOML configuration loading and validation |
//! | [`server`] | Axum HTTP API |
//! | [`error`] | Typed error taxonomy |

pub mod answer;
pub mod config;
pub mod error;
pub mod gate;
pub mod guard;
pub mod journal;
pub mod pipeline;
pub mod providers;
pub mod reader;
pub mod retriever;
pub mod server;
pub mod store;
