//! # docqa
//!
//! A local-first document question-answering pipeline.
//!
//! Documents are parsed into plain text, wrapped in an ingestion envelope,
//! split into overlapping chunks, embedded, and persisted in an on-disk
//! SQLite vector index. Questions are answered by retrieving the top-k
//! chunks, assembling a grounded prompt, and calling a text-generation
//! backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────┐
//! │ parser  │──▶│ envelope │──▶│  chunk  │──▶│ embedding │──▶│  index   │
//! │ pdf/... │   │ trace id │   │ overlap │   │ providers │   │  SQLite  │
//! └─────────┘   └──────────┘   └─────────┘   └───────────┘   └────┬─────┘
//!                                                                 │
//!                 ┌────────────┐   ┌──────────┐   ┌───────────┐   │
//!   answer ◀──────│ generation │◀──│  prompt  │◀──│ retriever │◀──┘
//!                 └────────────┘   └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa index build                 # embed ./data into ./chroma_db
//! docqa query "What is RAG?"        # top-k chunks with scores
//! docqa ask "What is RAG?"          # grounded answer
//! docqa evaluate cases.toml         # keyword accuracy
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Library error type |
//! | [`models`] | Chunk and retrieval result types |
//! | [`parser`] | Multi-format text extraction |
//! | [`envelope`] | Ingestion envelope and batch ingestion |
//! | [`sources`] | Document discovery under the documents root |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | On-disk vector index and its lifecycle |
//! | [`retriever`] | Top-k similarity retrieval |
//! | [`prompt`] | Grounded prompt assembly |
//! | [`generation`] | Text-generation backends |
//! | [`pipeline`] | Startup, retrieval and answering |
//! | [`evaluate`] | Keyword-based evaluation |
//! | [`progress`] | Build progress reporting |
//! | [`commands`] | CLI command runners |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod envelope;
pub mod error;
pub mod evaluate;
pub mod generation;
mod http;
pub mod index;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod retriever;
pub mod sources;
