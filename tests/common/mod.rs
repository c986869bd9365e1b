#![allow(dead_code)]

use std::{path::Path, sync::Mutex};

use hydrag::{
    CollectionStore,
    Result,
    chunking::Chunk,
    embedding::Embedder,
    generator::{Citation, Generation, GenerationRequest, Generator},
    retriever::Retrieve,
};
use lopdf::{
    Document,
    Object,
    Stream,
    content::{Content, Operation},
    dictionary,
};

/// Counts a handful of keywords; similar texts get similar vectors.
pub struct KeywordEmbedder;

const VOCABULARY: [&str; 6] = ["cat", "dog", "redb", "rust", "store", "sat"];

fn keywords(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    // Keep every vector non-zero so cosine similarity is defined.
    vector.push(0.1);
    vector
}

impl Embedder for KeywordEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keywords(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(keywords(text))
    }
}

/// What a generator was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    pub query: String,
    pub document_ids: Vec<String>,
    pub preamble: Option<String>,
}

/// Replies from a script, in order, and records each request.
pub struct ScriptedGenerator {
    replies: Mutex<Vec<Option<Generation>>>,
    pub seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Option<Generation>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().rev().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Option<Generation> {
        self.seen.lock().unwrap().push(SeenRequest {
            query: request.query.to_string(),
            document_ids: request
                .documents
                .iter()
                .map(|d| d.id.clone())
                .collect(),
            preamble: request.preamble.map(String::from),
        });
        self.replies.lock().unwrap().pop().flatten()
    }

    fn supports_citations(&self) -> bool {
        true
    }
}

pub fn plain(text: &str) -> Option<Generation> {
    Some(Generation {
        text: text.to_string(),
        citations: None,
    })
}

pub fn cited(text: &str, citations: Vec<Citation>) -> Option<Generation> {
    Some(Generation {
        text: text.to_string(),
        citations: Some(citations),
    })
}

/// Wraps another retriever and records every query it receives.
pub struct RecordingRetriever<R> {
    inner: R,
    pub queries: Mutex<Vec<String>>,
}

impl<R> RecordingRetriever<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl<R: Retrieve> Retrieve for RecordingRetriever<R> {
    fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        self.queries.lock().unwrap().push(query.to_string());
        self.inner.retrieve(query)
    }
}

pub fn test_store() -> (tempfile::TempDir, CollectionStore) {
    let tmp = tempfile::tempdir().unwrap();
    let store =
        CollectionStore::open(&tmp.path().join("collections.redb")).unwrap();
    (tmp, store)
}

/// Write a PDF with one page per entry of `pages`.
pub fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let media_box: Vec<Object> =
        vec![0.into(), 0.into(), 595.into(), 842.into()];
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => media_box,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}
