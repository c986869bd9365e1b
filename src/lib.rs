//! hydrag - retrieval-augmented answering over document collections.
//!
//! Documents are split into overlapping chunks, embedded and stored in named
//! collections backed by [redb](https://github.com/cberner/redb). At query
//! time the pipeline optionally writes a hypothetical answer first (HyDE),
//! retrieves with it, asks a chat model to answer from the retrieved
//! context, and splices the model's citations back into the answer.
//!
//! # Quick start
//!
//! ```no_run
//! use hydrag::{DataDir, RagConfig, RagContext};
//! use hydrag::citations::reconcile_generation;
//! use hydrag::hyde::RetrievalMode;
//! use hydrag::preamble::Language;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config = RagConfig::load(&data_dir.config_file()).unwrap();
//! let ctx = RagContext::init(config, data_dir).unwrap();
//!
//! let pipeline = ctx.pipeline("MY_BOOKS").unwrap();
//! let outcome = pipeline
//!     .answer("What is an embedded database?", RetrievalMode::Hyde, Language::En)
//!     .unwrap();
//!
//! if let Some(answer) =
//!     reconcile_generation(outcome.generation.as_ref(), &outcome.references)
//! {
//!     println!("{}", answer.annotated_text);
//! }
//! ```

pub mod chat_backend;
pub mod chunking;
pub mod citations;
pub mod collection_store;
pub mod config;
pub mod context;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod http;
pub mod hyde;
pub mod ingestion;
pub mod model_manager;
pub mod preamble;
pub mod report;
pub mod reranker;
pub mod retriever;
pub mod walker;

pub use collection_store::CollectionStore;
pub use config::RagConfig;
pub use context::RagContext;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use generator::{Generation, GenerationRequest, Generator};
pub use hyde::{RagPipeline, RetrievalMode};
pub use model_manager::ModelManager;
