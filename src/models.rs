//! Core data models used throughout QA Harness.
//!
//! These types represent the documents, chunks, retrieval hits, and
//! generation requests/results that flow through the build and generation
//! pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Format of a loaded document, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Text,
    Markdown,
    StructuredData,
    Markup,
}

impl DocumentFormat {
    /// Map a file extension (without the dot, any case) to a format.
    ///
    /// Returns `None` for extensions the loader does not handle.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "json" => Some(Self::StructuredData),
            "html" | "htm" => Some(Self::Markup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::StructuredData => "structured_data",
            Self::Markup => "markup",
        }
    }
}

/// Normalized document produced by the loader, one per input file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub raw_text: String,
    /// Base name of the input file; the attribution key for every chunk.
    pub source_name: String,
    pub format: DocumentFormat,
}

/// A bounded window of a document's text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_name: String,
    pub sequence_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by a similarity search, with its rank and score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
}

/// Which artifact a generation call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TestCaseGeneration,
    ScriptGeneration,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::TestCaseGeneration => write!(f, "test_case_generation"),
            TaskKind::ScriptGeneration => write!(f, "script_generation"),
        }
    }
}

/// A single user action asking for an artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub task_kind: TaskKind,
    /// Requirement text for test cases, or the test case for scripts.
    #[serde(alias = "text_input")]
    pub free_text_input: String,
    /// Reference markup for script generation. Supplied by the caller, never retrieved.
    #[serde(default, alias = "markup")]
    pub optional_reference_markup: Option<String>,
}

impl GenerationRequest {
    pub fn test_cases(requirement: impl Into<String>) -> Self {
        Self {
            task_kind: TaskKind::TestCaseGeneration,
            free_text_input: requirement.into(),
            optional_reference_markup: None,
        }
    }

    pub fn script(test_case: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            task_kind: TaskKind::ScriptGeneration,
            free_text_input: test_case.into(),
            optional_reference_markup: Some(markup.into()),
        }
    }
}

/// One structured test case as emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "Test_ID", alias = "test_id", default)]
    pub test_id: String,
    #[serde(rename = "Feature", alias = "feature", default)]
    pub feature: String,
    #[serde(rename = "Test_Scenario", alias = "test_scenario", default)]
    pub test_scenario: String,
    #[serde(
        rename = "Preconditions",
        alias = "preconditions",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub preconditions: Vec<String>,
    #[serde(rename = "Expected_Result", alias = "expected_result", default)]
    pub expected_result: String,
    #[serde(
        rename = "Grounded_In",
        alias = "grounded_in",
        default,
        deserialize_with = "comma_separated_or_many"
    )]
    pub grounded_in: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s.trim().to_string()],
        Some(OneOrMany::Many(v)) => v.into_iter().map(|s| s.trim().to_string()).collect(),
        None => Vec::new(),
    })
}

fn comma_separated_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => s.split(',').map(str::to_string).collect(),
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    };
    Ok(values
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Output of one generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub task_kind: TaskKind,
    pub raw_model_output: String,
    /// Model output with formatting fences removed.
    pub cleaned_artifact: String,
    /// Distinct source names of the retrieved chunks, in rank order.
    pub retrieved_sources: Vec<String>,
    /// Parsed test cases; empty for script generation.
    pub test_cases: Vec<TestCase>,
    /// Cited sources that were not among the retrieved sources.
    pub ungrounded_sources: Vec<String>,
    /// The exact prompt sent to the model.
    pub prompt: String,
}
