//! Core data models shared by the ingestion and query paths.

use serde::Serialize;

/// A contiguous slice of a document's parsed text.
///
/// `start` and `end` are character offsets (end exclusive) into the text
/// the chunk was cut from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document: String,
    pub chunk_index: i64,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from the index for a query, with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}
