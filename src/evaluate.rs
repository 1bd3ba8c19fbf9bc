//! Keyword-based answer evaluation.
//!
//! Cases live in a TOML file:
//!
//! ```toml
//! [[case]]
//! question = "What is RAG?"
//! expected_keywords = ["retrieval", "augmented", "generation"]
//! ```
//!
//! A case passes when the generated answer contains at least one expected
//! keyword, compared case-insensitively. An `InsufficientContext` outcome
//! always fails.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::pipeline::{AnswerOutcome, PipelineContext};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EvalCase {
    pub question: String,
    pub expected_keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CaseFile {
    #[serde(default, rename = "case")]
    cases: Vec<EvalCase>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub question: String,
    pub answer: String,
    pub matched: Vec<String>,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalSummary {
    pub results: Vec<CaseResult>,
    pub passed: usize,
    pub total: usize,
}

impl EvalSummary {
    /// Pass rate as a percentage; `0.0` for an empty run.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64 * 100.0
    }
}

pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let content = std::fs::read_to_string(path)?;
    parse_cases(&content)
        .map_err(|e| RagError::Config(format!("invalid cases file {}: {}", path.display(), e)))
}

fn parse_cases(content: &str) -> std::result::Result<Vec<EvalCase>, String> {
    let file: CaseFile = toml::from_str(content).map_err(|e| e.to_string())?;
    if let Some(case) = file.cases.iter().find(|c| c.expected_keywords.is_empty()) {
        return Err(format!("case '{}' has no expected_keywords", case.question));
    }
    Ok(file.cases)
}

/// Expected keywords found in `answer`, in the order they were listed.
pub fn matched_keywords(answer: &str, expected: &[String]) -> Vec<String> {
    let haystack = answer.to_lowercase();
    expected
        .iter()
        .filter(|kw| haystack.contains(&kw.to_lowercase()))
        .cloned()
        .collect()
}

/// Ask every case through `ctx`. Generation errors abort the run.
pub async fn evaluate(ctx: &PipelineContext, cases: &[EvalCase]) -> Result<EvalSummary> {
    let mut summary = EvalSummary {
        total: cases.len(),
        ..Default::default()
    };

    for case in cases {
        let answer = ctx.ask(&case.question, None).await?;
        let matched = match &answer.outcome {
            AnswerOutcome::Generated(text) => matched_keywords(text, &case.expected_keywords),
            AnswerOutcome::InsufficientContext => Vec::new(),
        };
        let passed = !matched.is_empty();
        if passed {
            summary.passed += 1;
        }
        tracing::debug!(question = %case.question, passed, "evaluated case");
        summary.results.push(CaseResult {
            question: case.question.clone(),
            answer: answer.text().to_string(),
            matched,
            passed,
        });
    }

    Ok(summary)
}
