//! Prompt orchestration: retrieve → format → fill → complete → post-process.
//!
//! A [`Generator`] is built from an embedder and a language model supplied at
//! construction, plus [`GenerationSettings`] taken from config. Both task
//! kinds follow the same shape:
//!
//! | Task | Query | k | Template inputs | Post-processing |
//! |------|-------|---|-----------------|-----------------|
//! | `test_case_generation` | requirement | `test_case_k` | context, requirement | fence strip, JSON parse, grounding check |
//! | `script_generation` | test case | `script_k` | context, test case, setup steps, markup | fence strip |
//!
//! Any failure is returned once as a [`GenerationError`] tagged with the
//! task kind. The model is never called twice for one request.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{GenerationError, GenerationFailure};
use crate::index::VectorIndex;
use crate::knowledge::KnowledgeBase;
use crate::model::{complete_with_timeout, create_model, LanguageModel};
use crate::models::{GenerationRequest, GenerationResult, TaskKind, TestCase};
use crate::prompt::{parse_test_cases, script_prompt, strip_code_fences, test_case_prompt};
use crate::retrieve::retrieve;

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub test_case_k: usize,
    pub script_k: usize,
    pub enforce_grounding: bool,
    pub model_timeout: Duration,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            test_case_k: config.retrieval.test_case_k,
            script_k: config.retrieval.script_k,
            enforce_grounding: config.generation.enforce_grounding,
            model_timeout: config.model.timeout(),
        }
    }
}

pub struct Generator {
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    settings: GenerationSettings,
}

impl Generator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            embedder,
            model,
            settings,
        }
    }

    /// Build a generator from the providers named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            create_embedder(&config.embedding)?,
            create_model(&config.model)?,
            GenerationSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// The embedder used for retrieval; builds must use the same one.
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Run one generation request against `index`.
    pub async fn generate(
        &self,
        index: &VectorIndex,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let kind = request.task_kind;
        let fail = |cause: GenerationFailure| GenerationError::new(kind, cause);

        let markup = match kind {
            TaskKind::TestCaseGeneration => None,
            TaskKind::ScriptGeneration => match request.optional_reference_markup.as_deref() {
                Some(m) if !m.trim().is_empty() => Some(m),
                _ => return Err(fail(GenerationFailure::MissingMarkup)),
            },
        };

        let k = match kind {
            TaskKind::TestCaseGeneration => self.settings.test_case_k,
            TaskKind::ScriptGeneration => self.settings.script_k,
        };
        let retrieval = retrieve(index, self.embedder.as_ref(), &request.free_text_input, k)
            .await
            .map_err(|e| fail(e.into()))?;
        let retrieved_sources = retrieval.sources();
        let context = retrieval.context_block();

        let prompt = match markup {
            None => test_case_prompt(&context, &request.free_text_input),
            Some(markup) => script_prompt(&context, &request.free_text_input, markup),
        };

        tracing::info!(
            task = %kind,
            model = self.model.model_name(),
            sources = ?retrieved_sources,
            prompt_chars = prompt.len(),
            "invoking model"
        );
        let raw_model_output =
            complete_with_timeout(self.model.as_ref(), &prompt, self.settings.model_timeout)
                .await
                .map_err(|e| fail(e.into()))?;
        let cleaned_artifact = strip_code_fences(&raw_model_output);

        let mut test_cases = Vec::new();
        let mut ungrounded_sources = Vec::new();
        if kind == TaskKind::TestCaseGeneration {
            test_cases = parse_test_cases(&cleaned_artifact).map_err(|reason| {
                fail(GenerationFailure::MalformedOutput {
                    reason,
                    raw_output: raw_model_output.clone(),
                })
            })?;
            ungrounded_sources = unknown_citations(&test_cases, &retrieved_sources);

            if !ungrounded_sources.is_empty() {
                if self.settings.enforce_grounding {
                    return Err(fail(GenerationFailure::Ungrounded {
                        unknown_sources: ungrounded_sources,
                        raw_output: raw_model_output,
                    }));
                }
                tracing::warn!(
                    unknown = ?ungrounded_sources,
                    "test cases cite sources that were not retrieved"
                );
            }
            for tc in test_cases.iter().filter(|tc| tc.grounded_in.is_empty()) {
                tracing::warn!(test_id = %tc.test_id, "test case names no source");
            }
        }

        Ok(GenerationResult {
            task_kind: kind,
            raw_model_output,
            cleaned_artifact,
            retrieved_sources,
            test_cases,
            ungrounded_sources,
            prompt,
        })
    }
}

/// Cited sources absent from `retrieved`, deduplicated in citation order.
fn unknown_citations(test_cases: &[TestCase], retrieved: &[String]) -> Vec<String> {
    let mut unknown: Vec<String> = Vec::new();
    for source in test_cases.iter().flat_map(|tc| tc.grounded_in.iter()) {
        if !retrieved.contains(source) && !unknown.contains(source) {
            unknown.push(source.clone());
        }
    }
    unknown
}

// ============ CLI ============

async fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let kb = KnowledgeBase::open(&config.index.path).await?;
    match kb.current() {
        Some(index) => Ok(index),
        None => bail!(
            "No knowledge base at {}. Run `qah build <paths>` first.",
            config.index.path.display()
        ),
    }
}

fn print_result(result: &GenerationResult) {
    println!("{}", result.cleaned_artifact);
    eprintln!("grounded in: {}", result.retrieved_sources.join(", "));
}

/// `qah generate cases`: print a JSON list of grounded test cases.
pub async fn run_generate_cases(config: &Config, requirement: &str) -> Result<()> {
    if requirement.trim().is_empty() {
        bail!("Requirement must not be empty");
    }
    let index = open_index(config).await?;
    let generator = Generator::from_config(config)?;
    let result = generator
        .generate(&index, &GenerationRequest::test_cases(requirement))
        .await?;
    print_result(&result);
    Ok(())
}

/// `qah generate script`: print a standalone browser-automation script.
///
/// `test_case` is read from disk when it names an existing file, otherwise
/// it is used as the test case text.
pub async fn run_generate_script(config: &Config, test_case: &str, markup_path: &Path) -> Result<()> {
    let test_case_text = if Path::new(test_case).is_file() {
        std::fs::read_to_string(test_case)
            .with_context(|| format!("Failed to read test case: {}", test_case))?
    } else {
        test_case.to_string()
    };
    let markup = std::fs::read_to_string(markup_path)
        .with_context(|| format!("Failed to read markup: {}", markup_path.display()))?;

    let index = open_index(config).await?;
    let generator = Generator::from_config(config)?;
    let result = generator
        .generate(&index, &GenerationRequest::script(test_case_text, markup))
        .await?;
    print_result(&result);
    Ok(())
}
