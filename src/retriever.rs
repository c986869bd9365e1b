use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    chunking::Chunk,
    collection_store::{CollectionStore, ScoredChunk},
    embedding::Embedder,
    error::{Error, Result},
    reranker::Rerank,
};

/// Anything that can turn a query into ranked context chunks.
pub trait Retrieve: Send + Sync {
    fn retrieve(&self, query: &str) -> Result<Vec<Chunk>>;
}

struct RerankStage {
    reranker: Arc<dyn Rerank>,
    top_n: usize,
}

/// Nearest-neighbour search over one collection, with optional reranking.
pub struct Retriever {
    store: Arc<CollectionStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    top_k: usize,
    rerank: Option<RerankStage>,
}

impl Retriever {
    pub fn new(
        store: Arc<CollectionStore>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            top_k,
            rerank: None,
        }
    }

    /// Rescore the `top_k` candidates and keep the best `top_n`.
    pub fn with_reranker(
        mut self,
        reranker: Arc<dyn Rerank>,
        top_n: usize,
    ) -> Result<Self> {
        if top_n == 0 || top_n > self.top_k {
            return Err(Error::Config(format!(
                "top_n ({top_n}) must be between 1 and top_k ({})",
                self.top_k
            )));
        }
        self.rerank = Some(RerankStage { reranker, top_n });
        Ok(self)
    }

    /// Up to `top_k` chunks by decreasing similarity, narrowed by the
    /// reranker when one is configured.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed_query(query)?;
        let hits = self.store.nearest(&self.collection, &vector, top_k)?;
        debug!(
            collection = %self.collection,
            hits = hits.len(),
            "similarity search"
        );

        match &self.rerank {
            Some(stage) => {
                apply_rerank(stage.reranker.as_ref(), stage.top_n, query, hits)
            }
            None => Ok(hits),
        }
    }
}

impl Retrieve for Retriever {
    fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .search(query, self.top_k)?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .field("top_n", &self.rerank.as_ref().map(|r| r.top_n))
            .finish_non_exhaustive()
    }
}

/// Reorder `hits` by reranker score and keep at most `top_n`. Only chunks
/// present in `hits` can come out; bogus or repeated indices are dropped.
fn apply_rerank(
    reranker: &dyn Rerank,
    top_n: usize,
    query: &str,
    hits: Vec<ScoredChunk>,
) -> Result<Vec<ScoredChunk>> {
    if hits.is_empty() {
        return Ok(hits);
    }

    let passages: Vec<&str> =
        hits.iter().map(|hit| hit.chunk.text.as_str()).collect();
    let ranked = reranker.rerank(query, &passages)?;

    let mut slots: Vec<Option<ScoredChunk>> =
        hits.into_iter().map(Some).collect();
    let mut kept = Vec::with_capacity(top_n);
    for passage in ranked {
        if kept.len() == top_n {
            break;
        }
        match slots.get_mut(passage.index).and_then(Option::take) {
            Some(mut hit) => {
                hit.score = passage.score;
                kept.push(hit);
            }
            None => warn!(
                index = passage.index,
                "reranker returned an unknown or repeated passage index"
            ),
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reranker::RankedPassage;

    /// One dimension per letter a..e, counting occurrences.
    struct LetterEmbedder;

    impl Embedder for LetterEmbedder {
        fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| letters(t)).collect())
        }

        fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(letters(text))
        }
    }

    fn letters(text: &str) -> Vec<f32> {
        ('a'..='e')
            .map(|c| text.chars().filter(|x| *x == c).count() as f32)
            .collect()
    }

    /// Prefers shorter passages, and can be told to misbehave.
    struct ShortestFirst {
        bogus: Vec<RankedPassage>,
    }

    impl Rerank for ShortestFirst {
        fn rerank(
            &self,
            _query: &str,
            passages: &[&str],
        ) -> Result<Vec<RankedPassage>> {
            let mut ranked = self.bogus.clone();
            let mut by_len: Vec<RankedPassage> = passages
                .iter()
                .enumerate()
                .map(|(index, p)| RankedPassage {
                    index,
                    score: 1.0 / p.len() as f32,
                })
                .collect();
            by_len.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            ranked.extend(by_len);
            Ok(ranked)
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<CollectionStore>) {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            Arc::new(CollectionStore::open(&tmp.path().join("s.redb")).unwrap());
        let chunks: Vec<Chunk> = ["aaaa", "aaab", "aab long text", "ccc", "ddd"]
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                text: text.to_string(),
                source: "doc.txt".into(),
                page: 1,
                sequence_index: i as u32,
            })
            .collect();
        store
            .create_and_populate(&chunks, &LetterEmbedder, "KB1")
            .unwrap();
        (tmp, store)
    }

    #[test]
    fn returns_top_k_by_similarity() {
        let (_tmp, store) = setup();
        let retriever =
            Retriever::new(store, Arc::new(LetterEmbedder), "KB1", 3);

        let chunks = retriever.retrieve("a").unwrap();
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aaaa", "aaab", "aab long text"]);
    }

    #[test]
    fn reranking_reorders_and_truncates_without_adding() {
        let (_tmp, store) = setup();
        let reranker = Arc::new(ShortestFirst {
            bogus: vec![
                RankedPassage {
                    index: 99,
                    score: 10.0,
                },
                RankedPassage {
                    index: 2,
                    score: 9.0,
                },
                RankedPassage {
                    index: 2,
                    score: 8.0,
                },
            ],
        });
        let retriever =
            Retriever::new(store, Arc::new(LetterEmbedder), "KB1", 3)
                .with_reranker(reranker, 2)
                .unwrap();

        let base: Vec<String> = ["aaaa", "aaab", "aab long text"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let hits = retriever.search("a", 3).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "aab long text");
        assert!(hits.iter().all(|h| base.contains(&h.chunk.text)));
    }

    #[test]
    fn top_n_must_not_exceed_top_k() {
        let (_tmp, store) = setup();
        let reranker = Arc::new(ShortestFirst { bogus: Vec::new() });
        let err = Retriever::new(store, Arc::new(LetterEmbedder), "KB1", 3)
            .with_reranker(reranker, 4)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_collection_is_an_error() {
        let (_tmp, store) = setup();
        let retriever =
            Retriever::new(store, Arc::new(LetterEmbedder), "nope", 3);
        assert!(matches!(
            retriever.retrieve("a"),
            Err(Error::NotFound { .. })
        ));
    }
}
