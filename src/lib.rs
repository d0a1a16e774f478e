//! # QA Harness
//!
//! Retrieval-grounded generation of test cases and browser-automation
//! scripts from project documentation.
//!
//! ## Architecture
//!
//! ```text
//!  build phase (once per knowledge base)
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│ VectorIndex  │──▶ index.sqlite
//! │ txt/md/  │   │ overlap │   │ (trait)  │   │ cosine, k-NN │
//! │ json/html│   └─────────┘   └──────────┘   └──────┬───────┘
//! └──────────┘                                       │
//!  generation phase (once per request)               ▼
//!                    ┌───────────┐   ┌──────────┐   ┌──────────────┐
//!      query ───────▶│ Retriever │──▶│  Prompt  │──▶│ LanguageModel│──▶ artifact
//!                    │  top-k    │   │ template │   │   (trait)    │
//!                    └───────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! qah build ./docs                              # load, chunk, embed, persist
//! qah generate cases "Discount codes"           # grounded JSON test cases
//! qah generate script --test-case tc.json --markup page.html
//! qah serve                                     # JSON HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors for each pipeline seam |
//! | [`loader`] | Mixed-format document loading |
//! | [`chunk`] | Boundary-aware overlapping chunker |
//! | [`embedding`] | Embedding capability and providers |
//! | [`index`] | In-memory vector index and search |
//! | [`store`] | SQLite persistence with copy-on-write replacement |
//! | [`knowledge`] | Process-wide active index |
//! | [`retrieve`] | Top-k retrieval and context formatting |
//! | [`model`] | Language-model capability and providers |
//! | [`prompt`] | Templates and deterministic assembly |
//! | [`generate`] | Generation orchestration and grounding checks |
//! | [`ingest`] | Build pipeline and status |
//! | [`server`] | JSON HTTP API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod knowledge;
pub mod loader;
pub mod model;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod server;
pub mod store;
