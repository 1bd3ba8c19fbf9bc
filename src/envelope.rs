//! Ingestion envelope: the hand-off between parsing and the index builder.
//!
//! [`ingest`] parses one file and wraps its text in a [`Message`] carrying a
//! fresh trace id. The index build consumes these messages and records each
//! document's trace id, so every chunk can be traced back to the ingestion
//! event that produced it.
//!
//! ```json
//! {
//!   "sender": "IngestionAgent",
//!   "receiver": "RetrievalAgent",
//!   "type": "DOC_INGESTED",
//!   "trace_id": "6f1c…",
//!   "payload": { "text": "…", "filename": "data/guide.txt" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::parser;

pub const INGESTION_SENDER: &str = "IngestionAgent";
pub const RETRIEVAL_RECEIVER: &str = "RetrievalAgent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "DOC_INGESTED")]
    DocIngested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub text: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub receiver: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub trace_id: String,
    pub payload: Payload,
}

impl Message {
    /// Wrap already-parsed text in a `DOC_INGESTED` envelope.
    pub fn doc_ingested(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Message {
            sender: INGESTION_SENDER.to_string(),
            receiver: RETRIEVAL_RECEIVER.to_string(),
            message_type: MessageType::DocIngested,
            trace_id: Uuid::new_v4().to_string(),
            payload: Payload {
                text: text.into(),
                filename: filename.into(),
            },
        }
    }
}

/// Parse `path` and wrap the text in an envelope.
pub fn ingest(path: &Path) -> Result<Message> {
    ingest_bounded(path, parser::DEFAULT_MAX_FILE_BYTES)
}

/// Like [`ingest`], rejecting files larger than `max_bytes`.
pub fn ingest_bounded(path: &Path, max_bytes: u64) -> Result<Message> {
    let text = parser::parse_file_bounded(path, max_bytes)?;
    let message = Message::doc_ingested(path.display().to_string(), text);
    tracing::info!(
        trace_id = %message.trace_id,
        filename = %message.payload.filename,
        "document ingested"
    );
    Ok(message)
}

/// Outcome for one file in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Ingested { trace_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
}

/// Result of a batch ingestion: the envelopes that succeeded plus a status
/// line for every input file, in input order.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub messages: Vec<Message>,
    pub files: Vec<FileOutcome>,
}

impl IngestReport {
    pub fn ingested_count(&self) -> usize {
        self.messages.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failed { .. }))
    }

    /// True when there was at least one input and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.files.is_empty() && self.messages.is_empty()
    }
}

/// Ingest each file independently. A failing file is recorded and skipped;
/// it never aborts the batch.
pub fn ingest_many<P: AsRef<Path>>(paths: &[P], max_bytes: u64) -> IngestReport {
    let mut report = IngestReport::default();
    for path in paths {
        let path = path.as_ref();
        match ingest_bounded(path, max_bytes) {
            Ok(message) => {
                report.files.push(FileOutcome {
                    path: path.to_path_buf(),
                    status: FileStatus::Ingested {
                        trace_id: message.trace_id.clone(),
                    },
                });
                report.messages.push(message);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping document");
                report.files.push(FileOutcome {
                    path: path.to_path_buf(),
                    status: FileStatus::Failed {
                        error: e.to_string(),
                    },
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_fields_and_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.txt");
        std::fs::write(&path, "Rust has ownership.").unwrap();

        let message = ingest(&path).unwrap();
        assert_eq!(message.sender, "IngestionAgent");
        assert_eq!(message.receiver, "RetrievalAgent");
        assert_eq!(message.message_type, MessageType::DocIngested);
        assert_eq!(message.payload.text, "Rust has ownership.");
        assert_eq!(message.payload.filename, path.display().to_string());
        assert!(Uuid::parse_str(&message.trace_id).is_ok());

        let json: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "DOC_INGESTED");
        assert_eq!(json["payload"]["text"], "Rust has ownership.");
    }

    #[test]
    fn trace_ids_are_unique_per_ingestion() {
        let a = Message::doc_ingested("a.txt", "x");
        let b = Message::doc_ingested("a.txt", "x");
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn batch_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        let bad = dir.path().join("bad.xyz");
        let empty = dir.path().join("empty.txt");
        std::fs::write(&good, "useful text").unwrap();
        std::fs::write(&bad, "???").unwrap();
        std::fs::write(&empty, "").unwrap();

        let report = ingest_many(&[&bad, &good, &empty], parser::DEFAULT_MAX_FILE_BYTES);
        assert_eq!(report.ingested_count(), 1);
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.failures().count(), 2);
        assert!(!report.all_failed());
        assert!(matches!(report.files[0].status, FileStatus::Failed { .. }));
        assert!(matches!(report.files[1].status, FileStatus::Ingested { .. }));
    }

    #[test]
    fn all_failed_requires_inputs() {
        assert!(!IngestReport::default().all_failed());
        let report = ingest_many(&[PathBuf::from("missing.txt")], 1024);
        assert!(report.all_failed());
    }
}
