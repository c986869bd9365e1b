use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    chunking::{Chunk, ChunkingConfig, split_text},
    collection_store::CollectionStore,
    embedding::Embedder,
    error::{Error, Result},
    walker::DiscoveredFile,
};

/// The identity a document is stored, listed and deleted under: its file
/// name, without any directory part.
///
/// ```
/// use std::path::Path;
/// use hydrag::ingestion::source_id;
///
/// assert_eq!(source_id(Path::new("/srv/books/A.pdf")), "A.pdf");
/// assert_eq!(source_id(Path::new("A.pdf")), "A.pdf");
/// ```
pub fn source_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Text of one page. Numbers are 1-based; text files are a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// Extract per-page text from a PDF, markdown or text file.
///
/// A document that cannot be read or parsed yields no pages and a warning.
pub fn load_pages(path: &Path) -> Vec<Page> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let loaded = if is_pdf {
        load_pdf(path)
    } else {
        std::fs::read_to_string(path)
            .map(|text| vec![Page { number: 1, text }])
            .map_err(Error::from)
    };

    match loaded {
        Ok(pages) => pages,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read document");
            Vec::new()
        }
    }
}

fn load_pdf(path: &Path) -> Result<Vec<Page>> {
    let doc = lopdf::Document::load(path)?;
    let numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    debug!(path = %path.display(), pages = numbers.len(), "extracting pdf text");

    let mut pages = Vec::with_capacity(numbers.len());
    for number in numbers {
        match doc.extract_text(&[number]) {
            Ok(text) => pages.push(Page { number, text }),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    page = number,
                    error = %e,
                    "skipping page without extractable text"
                );
            }
        }
    }
    Ok(pages)
}

/// Load a document and split it into chunks tagged with its source, page
/// and position. Unreadable or empty documents give no chunks.
pub fn split_document(path: &Path, config: &ChunkingConfig) -> Vec<Chunk> {
    let source = source_id(path);
    let mut chunks = Vec::new();

    for page in load_pages(path) {
        for segment in split_text(&page.text, config) {
            chunks.push(Chunk {
                text: segment.text,
                source: source.clone(),
                page: page.number,
                sequence_index: chunks.len() as u32,
            });
        }
    }

    if chunks.is_empty() {
        warn!(path = %path.display(), "no text to load");
    } else {
        debug!(source, chunks = chunks.len(), "split document");
    }
    chunks
}

/// What to do when the target collection already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    /// Refuse to touch an existing collection.
    NewOnly,
    /// Create the collection if needed, otherwise add unseen documents.
    #[default]
    AppendOrCreate,
}

/// One document's chunks, ready to store.
#[derive(Debug, Clone)]
pub struct SplitDocument {
    pub source: String,
    pub chunks: Vec<Chunk>,
}

/// Per-document outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub collection: String,
    /// Whether this run created the collection.
    pub created: bool,
    pub chunks: usize,
    pub loaded: Vec<String>,
    /// Already in the collection; left untouched.
    pub skipped: Vec<String>,
    /// Nothing to load.
    pub empty: Vec<String>,
    /// Source and error message.
    pub failed: Vec<(String, String)>,
}

/// Store split documents in `name`, one document at a time.
///
/// Only the policy check can fail the run. A document that fails to embed
/// or store is recorded in [`IngestReport::failed`] and the run moves on.
pub fn ingest_documents(
    store: &CollectionStore,
    embedder: &dyn Embedder,
    name: &str,
    documents: Vec<SplitDocument>,
    policy: IngestPolicy,
) -> Result<IngestReport> {
    let mut exists = store.exists(name)?;
    if exists && policy == IngestPolicy::NewOnly {
        return Err(Error::DuplicateCollection(name.to_string()));
    }

    let mut report = IngestReport {
        collection: name.to_string(),
        ..Default::default()
    };

    for doc in documents {
        if doc.chunks.is_empty() {
            report.empty.push(doc.source);
            continue;
        }

        let stored = if exists {
            store
                .append(&doc.chunks, embedder, name)
                .map(|outcome| outcome.added_chunks)
        } else {
            store.create_and_populate(&doc.chunks, embedder, name)
        };

        match stored {
            Ok(0) => {
                info!(source = %doc.source, collection = name, "already loaded");
                report.skipped.push(doc.source);
            }
            Ok(count) => {
                if !exists {
                    exists = true;
                    report.created = true;
                }
                info!(
                    source = %doc.source,
                    collection = name,
                    chunks = count,
                    "document loaded"
                );
                report.chunks += count;
                report.loaded.push(doc.source);
            }
            Err(e) => {
                error!(
                    source = %doc.source,
                    collection = name,
                    error = %e,
                    "document not loaded"
                );
                report.failed.push((doc.source, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Load and split `files` in parallel, then store them in order.
pub fn ingest_files(
    store: &CollectionStore,
    embedder: &dyn Embedder,
    name: &str,
    files: &[DiscoveredFile],
    config: &ChunkingConfig,
    policy: IngestPolicy,
) -> Result<IngestReport> {
    if policy == IngestPolicy::NewOnly && store.exists(name)? {
        return Err(Error::DuplicateCollection(name.to_string()));
    }

    let documents: Vec<SplitDocument> = files
        .par_iter()
        .map(|file| SplitDocument {
            source: source_id(&file.absolute_path),
            chunks: split_document(&file.absolute_path, config),
        })
        .collect();

    ingest_documents(store, embedder, name, documents, policy)
}
