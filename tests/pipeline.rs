//! End-to-end tests of the build and generation pipelines through the
//! library API, with the offline hash embedder and a scripted model.

use async_trait::async_trait;
use qa_harness::config::Config;
use qa_harness::embedding::{Embedder, HashEmbedder};
use qa_harness::error::{GenerationFailure, IndexError, ModelError};
use qa_harness::generate::{GenerationSettings, Generator};
use qa_harness::ingest::build_knowledge_base;
use qa_harness::knowledge::KnowledgeBase;
use qa_harness::model::LanguageModel;
use qa_harness::models::{GenerationRequest, TaskKind};
use qa_harness::retrieve::retrieve;
use qa_harness::store::IndexStore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Test Model ─────────────────────────────────────────────────────

/// Returns a canned response and records every prompt it receives.
struct ScriptedModel {
    response: String,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn stalled() -> Self {
        Self {
            delay: Some(Duration::from_secs(10)),
            ..Self::new("too late")
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

const GROUNDED_CASES: &str = "```json
[
  {
    \"Test_ID\": \"TC-001\",
    \"Feature\": \"Discount code\",
    \"Test_Scenario\": \"Apply SAVE20 at checkout\",
    \"Preconditions\": [\"Add an item to the cart\"],
    \"Expected_Result\": \"Order total is reduced by 20%\",
    \"Grounded_In\": \"policy.md\"
  }
]
```";

struct Fixture {
    _docs: TempDir,
    index_dir: TempDir,
    config: Config,
    kb: KnowledgeBase,
    embedder: Arc<HashEmbedder>,
}

fn test_config(index_dir: &TempDir) -> Config {
    let toml_src = format!(
        r#"[index]
path = "{}"

[chunking]
max_chars = 100
overlap_chars = 20

[retrieval]
test_case_k = 2
script_k = 1

[embedding]
provider = "hash"
dims = 256
"#,
        index_dir.path().display()
    );
    let config: Config = toml::from_str(&toml_src).unwrap();
    config.validate().unwrap();
    config
}

async fn built_fixture() -> Fixture {
    let docs = TempDir::new().unwrap();
    std::fs::write(
        docs.path().join("policy.md"),
        "Discount code SAVE20 grants 20% off",
    )
    .unwrap();
    std::fs::write(docs.path().join("ui.txt"), "Apply button is labeled 'Apply'").unwrap();

    let index_dir = TempDir::new().unwrap();
    let config = test_config(&index_dir);
    let embedder = Arc::new(HashEmbedder::new(256));
    let kb = KnowledgeBase::open(&config.index.path).await.unwrap();

    let outcome = build_knowledge_base(
        &kb,
        &config,
        embedder.as_ref(),
        &[docs.path().to_path_buf()],
    )
    .await
    .unwrap();
    assert_eq!(outcome.load.documents.len(), 2);
    assert_eq!(outcome.chunks, 2);

    Fixture {
        _docs: docs,
        index_dir,
        config,
        kb,
        embedder,
    }
}

fn generator(fx: &Fixture, model: Arc<ScriptedModel>) -> Generator {
    Generator::new(
        fx.embedder.clone(),
        model,
        GenerationSettings::from_config(&fx.config),
    )
}

// ─── Build & retrieval ──────────────────────────────────────────────

#[tokio::test]
async fn test_example_scenario_retrieves_both_sources_ranked() {
    let fx = built_fixture().await;
    let index = fx.kb.current().unwrap();

    let retrieval = retrieve(&index, fx.embedder.as_ref(), "discount code behavior", 2)
        .await
        .unwrap();

    assert_eq!(retrieval.chunks.len(), 2);
    assert_eq!(retrieval.chunks[0].chunk.source_name, "policy.md");
    assert_eq!(retrieval.chunks[1].chunk.source_name, "ui.txt");
    assert!(retrieval.chunks[0].score >= retrieval.chunks[1].score);
    assert_eq!(retrieval.sources(), vec!["policy.md", "ui.txt"]);
}

#[tokio::test]
async fn test_reload_returns_same_ranking() {
    let fx = built_fixture().await;
    let before = retrieve(
        &fx.kb.current().unwrap(),
        fx.embedder.as_ref(),
        "Apply button label",
        2,
    )
    .await
    .unwrap();

    let reopened = KnowledgeBase::open(fx.index_dir.path()).await.unwrap();
    let after = retrieve(
        &reopened.current().unwrap(),
        fx.embedder.as_ref(),
        "Apply button label",
        2,
    )
    .await
    .unwrap();

    let ids = |r: &qa_harness::retrieve::Retrieval| {
        r.chunks.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before), ids(&after));
    assert_eq!(after.chunks[0].chunk.source_name, "ui.txt");
}

#[tokio::test]
async fn test_absent_index_is_not_an_error() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path().join("kb"));
    assert!(store.load().await.unwrap().is_none());

    let kb = KnowledgeBase::open(&tmp.path().join("kb")).await.unwrap();
    assert!(kb.current().is_none());
    assert!(!kb.status().built);
}

#[tokio::test]
async fn test_rebuild_is_deterministic() {
    let fx = built_fixture().await;
    let first = fx.kb.current().unwrap();

    let docs = TempDir::new().unwrap();
    std::fs::write(
        docs.path().join("policy.md"),
        "Discount code SAVE20 grants 20% off",
    )
    .unwrap();
    std::fs::write(docs.path().join("ui.txt"), "Apply button is labeled 'Apply'").unwrap();
    build_knowledge_base(
        &fx.kb,
        &fx.config,
        fx.embedder.as_ref(),
        &[docs.path().to_path_buf()],
    )
    .await
    .unwrap();
    let second = fx.kb.current().unwrap();

    assert_eq!(first.entries(), second.entries());
}

#[tokio::test]
async fn test_build_with_mixed_paths_is_best_effort() {
    let docs = TempDir::new().unwrap();
    std::fs::write(
        docs.path().join("checkout.html"),
        "<html><head><title>x</title></head><body><p>Discount code</p><script>var a;</script></body></html>",
    )
    .unwrap();
    let index_dir = TempDir::new().unwrap();
    let config = test_config(&index_dir);
    let kb = KnowledgeBase::open(&config.index.path).await.unwrap();

    let outcome = build_knowledge_base(
        &kb,
        &config,
        &HashEmbedder::new(256),
        &[
            docs.path().join("checkout.html"),
            PathBuf::from("/definitely/not/here.md"),
        ],
    )
    .await
    .unwrap();

    assert_eq!(outcome.load.documents.len(), 1);
    assert_eq!(outcome.load.failures.len(), 1);
    assert_eq!(outcome.load.failures[0].source_name, "here.md");
    let snapshot = kb.current().unwrap();
    let text = &snapshot.entries()[0].chunk.text;
    assert!(text.contains("Discount code"));
    assert!(!text.contains("var a"));
}

// ─── Generation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_generates_grounded_test_cases() {
    let fx = built_fixture().await;
    let model = Arc::new(ScriptedModel::new(GROUNDED_CASES));
    let generator = generator(&fx, model.clone());

    let result = generator
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::test_cases("discount code behavior"),
        )
        .await
        .unwrap();

    assert_eq!(result.task_kind, TaskKind::TestCaseGeneration);
    assert!(result
        .test_cases
        .iter()
        .any(|tc| tc.grounded_in == vec!["policy.md".to_string()]));
    assert!(result.ungrounded_sources.is_empty());
    assert!(result.cleaned_artifact.starts_with('['));
    assert!(!result.cleaned_artifact.contains("```"));
    assert_eq!(result.retrieved_sources, vec!["policy.md", "ui.txt"]);
    assert!(result.prompt.contains("(Source: policy.md)"));
    assert!(result.prompt.contains("Requirement: discount code behavior"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_ungrounded_citation_is_rejected() {
    let fx = built_fixture().await;
    let model = Arc::new(ScriptedModel::new(
        r#"[{"Test_ID":"TC-1","Grounded_In":"policy.md"},{"Test_ID":"TC-2","Grounded_In":"pricing.md"}]"#,
    ));
    let err = generator(&fx, model)
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::test_cases("discount code behavior"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.task_kind, TaskKind::TestCaseGeneration);
    match err.cause {
        GenerationFailure::Ungrounded {
            unknown_sources, ..
        } => assert_eq!(unknown_sources, vec!["pricing.md"]),
        other => panic!("expected Ungrounded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ungrounded_citation_reported_when_not_enforced() {
    let mut fx = built_fixture().await;
    fx.config.generation.enforce_grounding = false;
    let model = Arc::new(ScriptedModel::new(
        r#"[{"Test_ID":"TC-2","Grounded_In":"pricing.md"}]"#,
    ));
    let result = generator(&fx, model)
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::test_cases("discount code behavior"),
        )
        .await
        .unwrap();
    assert_eq!(result.ungrounded_sources, vec!["pricing.md"]);
}

#[tokio::test]
async fn test_malformed_output_is_typed() {
    let fx = built_fixture().await;
    let model = Arc::new(ScriptedModel::new("I could not find any test cases."));
    let err = generator(&fx, model)
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::test_cases("discount code behavior"),
        )
        .await
        .unwrap_err();
    match err.cause {
        GenerationFailure::MalformedOutput { raw_output, .. } => {
            assert_eq!(raw_output, "I could not find any test cases.")
        }
        other => panic!("expected MalformedOutput, got {:?}", other),
    }
}

#[tokio::test]
async fn test_model_timeout_is_typed_and_not_retried() {
    let fx = built_fixture().await;
    let model = Arc::new(ScriptedModel::stalled());
    let mut settings = GenerationSettings::from_config(&fx.config);
    settings.model_timeout = Duration::from_millis(50);
    let generator = Generator::new(fx.embedder.clone(), model.clone(), settings);

    let err = generator
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::script("Apply SAVE20", "<button id='apply'>Apply</button>"),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.task_kind, TaskKind::ScriptGeneration);
    assert!(err.to_string().starts_with("script_generation failed"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_script_generation_strips_fences_and_orders_setup() {
    let fx = built_fixture().await;
    let model = Arc::new(ScriptedModel::new(
        "```python\nfrom selenium import webdriver\n\nif __name__ == \"__main__\":\n    pass\n```",
    ));
    let generator = generator(&fx, model);
    let test_case = r#"{"Test_ID":"TC-001","Test_Scenario":"Apply SAVE20 at checkout",
        "Preconditions":["Register an account","Add an item to the cart"],
        "Grounded_In":"policy.md"}"#;
    let markup = "<form><input id=\"code\"><button id=\"apply\">Apply</button></form>";

    let result = generator
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::script(test_case, markup),
        )
        .await
        .unwrap();

    assert!(result.cleaned_artifact.starts_with("from selenium import webdriver"));
    assert!(!result.cleaned_artifact.contains("```"));
    assert!(result.test_cases.is_empty());
    assert_eq!(result.retrieved_sources.len(), 1);
    assert!(result.prompt.contains(markup));
    let register = result.prompt.find("1. Register an account").unwrap();
    let cart = result.prompt.find("2. Add an item to the cart").unwrap();
    let html = result.prompt.find("Target HTML Content").unwrap();
    assert!(register < cart && cart < html);
}

#[tokio::test]
async fn test_script_generation_requires_markup() {
    let fx = built_fixture().await;
    let model = Arc::new(ScriptedModel::new("print('hi')"));
    let request = GenerationRequest {
        task_kind: TaskKind::ScriptGeneration,
        free_text_input: "Apply SAVE20".into(),
        optional_reference_markup: None,
    };
    let err = generator(&fx, model.clone())
        .generate(&fx.kb.current().unwrap(), &request)
        .await
        .unwrap_err();
    assert!(matches!(err.cause, GenerationFailure::MissingMarkup));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_embedder_dimension_mismatch_is_fatal() {
    let fx = built_fixture().await;
    let narrow: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128));
    let model = Arc::new(ScriptedModel::new(GROUNDED_CASES));
    let generator = Generator::new(
        narrow,
        model.clone(),
        GenerationSettings::from_config(&fx.config),
    );

    let err = generator
        .generate(
            &fx.kb.current().unwrap(),
            &GenerationRequest::test_cases("discount"),
        )
        .await
        .unwrap_err();

    match err.cause {
        GenerationFailure::Retrieval(e @ IndexError::DimensionMismatch { .. }) => {
            assert!(e.is_fatal())
        }
        other => panic!("expected DimensionMismatch, got {:?}", other),
    }
    assert_eq!(model.calls(), 0);
}
