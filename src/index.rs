//! On-disk vector index.
//!
//! One SQLite database per index directory (`{dir}/index.sqlite`):
//!
//! | Table | Contents |
//! |-------|----------|
//! | `documents` | one row per ingested document, with its envelope trace id |
//! | `chunks` | chunk text and offsets; `rowid` is the insertion order |
//! | `vectors` | one little-endian `f32` blob per chunk |
//! | `manifest` | a single row describing how the index was built |
//!
//! # Lifecycle
//!
//! [`ensure_index`] resolves the on-disk state into an [`IndexState`]:
//!
//! - **Fresh**: directory absent. Everything is chunked and embedded into a
//!   sibling temporary directory, which is renamed into place only once
//!   complete, so a half-built index is never observed.
//! - **Persisted**: directory present and its manifest matches the current
//!   sources. Opened read-only; nothing is re-embedded.
//! - **Stale**: directory present but the manifest's source hash differs.
//!   Reused with a warning unless `rebuild_on_stale` is set.
//!
//! An index that exists but cannot be read is [`RagError::IndexUnavailable`]
//! and is never silently replaced. [`rebuild_index`] replaces it explicitly.
//!
//! Builders are not locked against each other. Two processes building the
//! same directory at once race on the final rename: the first wins, and the
//! second fails with an I/O error and discards its staging directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::chunk;
use crate::config::ChunkingConfig;
use crate::embedding::{self, Embedder};
use crate::envelope::Message;
use crate::error::{RagError, Result};
use crate::models::{Chunk, RetrievedChunk};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};

pub const INDEX_FILE: &str = "index.sqlite";
pub const SCHEMA_VERSION: i64 = 1;

/// How an index was built. Stored as the single row of the `manifest` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub schema_version: i64,
    pub model: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub splitter: String,
    pub source_hash: String,
    pub document_count: i64,
    pub chunk_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Fresh,
    Persisted,
    Stale,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Fresh => "fresh",
            IndexState::Persisted => "persisted",
            IndexState::Stale => "stale",
        }
    }
}

/// Settings that shape an index build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    pub rebuild_on_stale: bool,
}

/// A document as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedDocument {
    pub name: String,
    pub trace_id: String,
    pub chunk_count: i64,
}

/// An opened, read-only index.
#[derive(Debug)]
pub struct VectorIndex {
    dir: PathBuf,
    pool: SqlitePool,
    manifest: Manifest,
}

/// What [`ensure_index`] found and did.
#[derive(Debug)]
pub struct LoadedIndex {
    pub index: VectorIndex,
    /// State of the directory before any build.
    pub state: IndexState,
    /// True when this call embedded the sources.
    pub built: bool,
}

impl VectorIndex {
    /// Open an existing index. Any failure to read the database or its
    /// manifest is [`RagError::IndexUnavailable`].
    pub async fn open(dir: &Path) -> Result<Self> {
        let unavailable = |message: String| RagError::IndexUnavailable {
            dir: dir.to_path_buf(),
            message,
        };

        let db_path = dir.join(INDEX_FILE);
        if !db_path.is_file() {
            return Err(unavailable(format!(
                "{} not found (run `docqa index rebuild` to recreate)",
                INDEX_FILE
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let manifest = match read_manifest(&pool).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                pool.close().await;
                return Err(unavailable("manifest is missing".into()));
            }
            Err(e) => {
                pool.close().await;
                return Err(unavailable(e.to_string()));
            }
        };

        if manifest.schema_version != SCHEMA_VERSION {
            pool.close().await;
            return Err(unavailable(format!(
                "schema version {} is not supported (expected {})",
                manifest.schema_version, SCHEMA_VERSION
            )));
        }

        tracing::debug!(
            dir = %dir.display(),
            model = %manifest.model,
            chunks = manifest.chunk_count,
            "opened index"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            pool,
            manifest,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fail with [`RagError::EmbeddingMismatch`] if `embedder` is not the
    /// model this index was built with.
    pub fn check_embedder(&self, embedder: &dyn Embedder) -> Result<()> {
        if self.manifest.model != embedder.model_name() || self.manifest.dims != embedder.dims() {
            return Err(RagError::EmbeddingMismatch(format!(
                "index at {} was built with {} ({} dims), configured embedder is {} ({} dims)",
                self.dir.display(),
                self.manifest.model,
                self.manifest.dims,
                embedder.model_name(),
                embedder.dims()
            )));
        }
        Ok(())
    }

    /// Exact cosine-similarity scan. Results are sorted by descending score;
    /// equal scores keep insertion order.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.manifest.dims {
            return Err(RagError::EmbeddingMismatch(format!(
                "query vector has {} dims, index has {}",
                query.len(),
                self.manifest.dims
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, d.name AS document, c.chunk_index, c.text, v.embedding
            FROM chunks c
            JOIN vectors v ON v.chunk_rowid = c.rowid
            JOIN documents d ON d.id = c.document_id
            ORDER BY c.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = embedding::blob_to_vec(&blob);
            if vector.len() != self.manifest.dims {
                return Err(RagError::EmbeddingMismatch(format!(
                    "stored vector has {} dims, manifest says {}",
                    vector.len(),
                    self.manifest.dims
                )));
            }
            results.push(RetrievedChunk {
                chunk_id: row.get("chunk_id"),
                document: row.get("document"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score: embedding::cosine_similarity(query, &vector),
            });
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    pub async fn documents(&self) -> Result<Vec<IndexedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT d.name, d.trace_id, COUNT(c.rowid) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IndexedDocument {
                name: row.get("name"),
                trace_id: row.get("trace_id"),
                chunk_count: row.get("chunk_count"),
            })
            .collect())
    }

    /// Trace id of the ingestion event that produced `chunk_id`.
    pub async fn trace_of_chunk(&self, chunk_id: &str) -> Result<Option<String>> {
        let trace: Option<String> = sqlx::query_scalar(
            "SELECT d.trace_id FROM chunks c JOIN documents d ON d.id = c.document_id WHERE c.id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(trace)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn read_manifest(pool: &SqlitePool) -> std::result::Result<Option<Manifest>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT schema_version, model, dims, chunk_size, chunk_overlap, splitter,
               source_hash, document_count, chunk_count, created_at
        FROM manifest WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Manifest {
        schema_version: row.get("schema_version"),
        model: row.get("model"),
        dims: row.get::<i64, _>("dims") as usize,
        chunk_size: row.get::<i64, _>("chunk_size") as usize,
        chunk_overlap: row.get::<i64, _>("chunk_overlap") as usize,
        splitter: row.get("splitter"),
        source_hash: row.get("source_hash"),
        document_count: row.get("document_count"),
        chunk_count: row.get("chunk_count"),
        created_at: row.get("created_at"),
    }))
}

/// Hash of the source set and chunking parameters.
///
/// Order-independent over documents: pairs of (filename, text hash) are
/// sorted before hashing.
pub fn source_hash(messages: &[Message], chunking: &ChunkingConfig) -> String {
    let mut pairs: Vec<(&str, String)> = messages
        .iter()
        .map(|m| (m.payload.filename.as_str(), chunk::hash_text(&m.payload.text)))
        .collect();
    pairs.sort();
    pairs.dedup_by(|a, b| a.0 == b.0);

    let mut hasher = Sha256::new();
    for (name, text_hash) in &pairs {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(text_hash.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(
        format!(
            "chunking:{}:{}:{}",
            chunking.chunk_size,
            chunking.chunk_overlap,
            chunking.splitter.as_str()
        )
        .as_bytes(),
    );
    format!("{:x}", hasher.finalize())
}

/// Classify an index directory against the current source hash.
///
/// `current_hash = None` means the sources could not be read, so staleness
/// cannot be judged and an existing index counts as persisted.
pub fn classify(manifest: Option<&Manifest>, current_hash: Option<&str>) -> IndexState {
    match (manifest, current_hash) {
        (None, _) => IndexState::Fresh,
        (Some(m), Some(hash)) if m.source_hash != hash => IndexState::Stale,
        (Some(_), _) => IndexState::Persisted,
    }
}

/// Load the index at `opts.dir`, building it first if it does not exist.
///
/// `messages` are the current sources; `None` skips the staleness check
/// (and makes a build impossible).
pub async fn ensure_index(
    opts: &BuildOptions,
    messages: Option<&[Message]>,
    embedder: &dyn Embedder,
    progress: &dyn BuildProgressReporter,
) -> Result<LoadedIndex> {
    chunk::validate(opts.chunking.chunk_size, opts.chunking.chunk_overlap)?;

    if !opts.dir.exists() {
        let messages = messages.ok_or_else(|| RagError::IndexUnavailable {
            dir: opts.dir.clone(),
            message: "index does not exist and no documents are available to build it".into(),
        })?;
        tracing::info!(dir = %opts.dir.display(), documents = messages.len(), "building fresh index");
        let index = build_index(opts, messages, embedder, progress).await?;
        return Ok(LoadedIndex {
            index,
            state: IndexState::Fresh,
            built: true,
        });
    }

    let index = VectorIndex::open(&opts.dir).await?;
    index.check_embedder(embedder)?;

    let current_hash = messages.map(|m| source_hash(m, &opts.chunking));
    let state = classify(Some(index.manifest()), current_hash.as_deref());

    match (state, messages) {
        (IndexState::Stale, Some(messages)) if opts.rebuild_on_stale => {
            tracing::info!(dir = %opts.dir.display(), "sources changed, rebuilding index");
            index.close().await;
            let index = rebuild_index(opts, messages, embedder, progress).await?;
            Ok(LoadedIndex {
                index,
                state,
                built: true,
            })
        }
        (IndexState::Stale, _) => {
            tracing::warn!(
                dir = %opts.dir.display(),
                "index is stale: sources or chunking changed since it was built; run `docqa index rebuild` to refresh"
            );
            Ok(LoadedIndex {
                index,
                state,
                built: false,
            })
        }
        _ => {
            tracing::info!(dir = %opts.dir.display(), "reusing persisted index");
            Ok(LoadedIndex {
                index,
                state,
                built: false,
            })
        }
    }
}

/// Build a new index and swap it in for whatever is at `opts.dir`.
///
/// The replacement is built completely before the old directory is removed,
/// so a failed rebuild leaves the previous index untouched.
pub async fn rebuild_index(
    opts: &BuildOptions,
    messages: &[Message],
    embedder: &dyn Embedder,
    progress: &dyn BuildProgressReporter,
) -> Result<VectorIndex> {
    chunk::validate(opts.chunking.chunk_size, opts.chunking.chunk_overlap)?;

    let staging = staging_dir(&opts.dir)?;
    if let Err(e) = write_index(&staging, opts, messages, embedder, progress).await {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    if opts.dir.exists() {
        std::fs::remove_dir_all(&opts.dir)?;
    }
    publish(&staging, &opts.dir)?;
    VectorIndex::open(&opts.dir).await
}

async fn build_index(
    opts: &BuildOptions,
    messages: &[Message],
    embedder: &dyn Embedder,
    progress: &dyn BuildProgressReporter,
) -> Result<VectorIndex> {
    let staging = staging_dir(&opts.dir)?;
    if let Err(e) = write_index(&staging, opts, messages, embedder, progress).await {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }
    publish(&staging, &opts.dir)?;
    VectorIndex::open(&opts.dir).await
}

fn staging_dir(dir: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| RagError::Config(format!("invalid index directory: {}", dir.display())))?;
    let parent = dir.parent().unwrap_or_else(|| Path::new(""));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = parent.join(format!(".{}.building-{}", name, uuid::Uuid::new_v4().simple()));
    std::fs::create_dir(&staging)?;
    Ok(staging)
}

fn publish(staging: &Path, dir: &Path) -> Result<()> {
    if let Err(e) = std::fs::rename(staging, dir) {
        let _ = std::fs::remove_dir_all(staging);
        return Err(RagError::Io(e));
    }
    Ok(())
}

async fn write_index(
    target: &Path,
    opts: &BuildOptions,
    messages: &[Message],
    embedder: &dyn Embedder,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    let options = SqliteConnectOptions::new()
        .filename(target.join(INDEX_FILE))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let result = populate(&pool, opts, messages, embedder, progress).await;
    pool.close().await;
    result
}

async fn populate(
    pool: &SqlitePool,
    opts: &BuildOptions,
    messages: &[Message],
    embedder: &dyn Embedder,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    create_schema(pool).await?;

    // Chunk every document first so a bad chunk config fails before any embedding.
    let mut seen = HashSet::new();
    let mut documents: Vec<(&Message, Vec<Chunk>)> = Vec::new();
    let total_docs = messages.len() as u64;
    for (i, message) in messages.iter().enumerate() {
        if !seen.insert(message.payload.filename.as_str()) {
            tracing::warn!(filename = %message.payload.filename, "duplicate document skipped");
            continue;
        }
        let chunks = chunk::chunk_document(
            &message.payload.filename,
            &message.payload.text,
            &opts.chunking,
        )?;
        documents.push((message, chunks));
        progress.report(BuildProgressEvent::Parsing {
            n: i as u64 + 1,
            total: total_docs,
        });
    }

    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now().to_rfc3339();
    let mut pending: Vec<(i64, String)> = Vec::new();

    for (message, chunks) in &documents {
        let document_id = sqlx::query(
            "INSERT INTO documents (name, trace_id, text_hash, char_count, ingested_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.payload.filename)
        .bind(&message.trace_id)
        .bind(chunk::hash_text(&message.payload.text))
        .bind(message.payload.text.chars().count() as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for c in chunks {
            let rowid = sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, start_char, end_char, text, hash) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&c.id)
            .bind(document_id)
            .bind(c.chunk_index)
            .bind(c.start as i64)
            .bind(c.end as i64)
            .bind(&c.text)
            .bind(&c.hash)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            pending.push((rowid, c.text.clone()));
        }
    }

    let total = pending.len() as u64;
    let mut embedded = 0u64;
    for batch in pending.chunks(opts.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embedding::embed_checked(embedder, &texts).await?;
        for ((rowid, _), vector) in batch.iter().zip(vectors.iter()) {
            sqlx::query("INSERT INTO vectors (chunk_rowid, embedding) VALUES (?, ?)")
                .bind(rowid)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }
        embedded += batch.len() as u64;
        progress.report(BuildProgressEvent::Embedding { n: embedded, total });
    }

    sqlx::query(
        r#"
        INSERT INTO manifest (id, schema_version, model, dims, chunk_size, chunk_overlap,
                              splitter, source_hash, document_count, chunk_count, created_at)
        VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(SCHEMA_VERSION)
    .bind(embedder.model_name())
    .bind(embedder.dims() as i64)
    .bind(opts.chunking.chunk_size as i64)
    .bind(opts.chunking.chunk_overlap as i64)
    .bind(opts.chunking.splitter.as_str())
    .bind(source_hash(messages, &opts.chunking))
    .bind(documents.len() as i64)
    .bind(total as i64)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(
        documents = documents.len(),
        chunks = total,
        model = embedder.model_name(),
        "index built"
    );
    Ok(())
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE documents (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            trace_id TEXT NOT NULL,
            text_hash TEXT NOT NULL,
            char_count INTEGER NOT NULL,
            ingested_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE chunks (
            rowid INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            document_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE vectors (
            chunk_rowid INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_rowid) REFERENCES chunks(rowid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE manifest (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            splitter TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            document_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    Ok(())
}
