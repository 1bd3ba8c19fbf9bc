//! Index build progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event during an index build.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildProgressEvent {
    /// Documents are being parsed and chunked: n files out of total.
    Parsing { n: u64, total: u64 },
    /// Chunks are being embedded: n chunks out of total.
    Embedding { n: u64, total: u64 },
}

impl BuildProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            BuildProgressEvent::Parsing { .. } => "parsing",
            BuildProgressEvent::Embedding { .. } => "embedding",
        }
    }

    fn counts(&self) -> (u64, u64) {
        match self {
            BuildProgressEvent::Parsing { n, total } | BuildProgressEvent::Embedding { n, total } => {
                (*n, *total)
            }
        }
    }
}

/// Receives build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress: "index  embedding  1,234 / 5,000".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let (n, total) = event.counts();
        let line = format!(
            "index  {}  {} / {}\n",
            event.phase(),
            format_number(n),
            format_number(total)
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let (n, total) = event.counts();
        let obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase(),
            "n": n,
            "total": total
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn events_expose_phase_and_counts() {
        let e = BuildProgressEvent::Embedding { n: 3, total: 10 };
        assert_eq!(e.phase(), "embedding");
        assert_eq!(e.counts(), (3, 10));
    }
}
