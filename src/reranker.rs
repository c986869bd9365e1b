use std::sync::Mutex;

use candle_core::Tensor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    http::ServiceClient,
    model_manager::ModelManager,
};

/// A passage position in the reranker input with its relevance score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPassage {
    pub index: usize,
    pub score: f32,
}

/// Second-pass relevance scoring of (query, passage) pairs.
pub trait Rerank: Send + Sync {
    /// Score `passages` against `query`, best first. Indices refer to
    /// positions in `passages`.
    fn rerank(&self, query: &str, passages: &[&str]) -> Result<Vec<RankedPassage>>;
}

/// Rerank with a local ColBERT model using MaxSim late interaction.
///
/// The model is loaded on first use.
pub struct ColbertReranker {
    model: Mutex<ModelManager>,
}

impl ColbertReranker {
    pub fn new(model: ModelManager) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }
}

impl std::fmt::Debug for ColbertReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColbertReranker").finish_non_exhaustive()
    }
}

impl Rerank for ColbertReranker {
    /// Query and passages are encoded in one model session, then every
    /// retrieved chunk is scored against the query on the rayon pool.
    fn rerank(&self, query: &str, passages: &[&str]) -> Result<Vec<RankedPassage>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let (query_embedding, passage_embeddings) = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| Error::Model("model lock poisoned".into()))?;
            let texts: Vec<String> =
                passages.iter().map(|p| p.to_string()).collect();
            (model.encode_query(query)?, model.encode_documents(&texts)?)
        };

        // Score passages in parallel; [B, T, D] -> one [T, D] per passage.
        let mut ranked: Vec<RankedPassage> = (0..passages.len())
            .into_par_iter()
            .map(|index| -> Result<RankedPassage> {
                let passage =
                    passage_embeddings.get(index).map_err(map_candle_err)?;
                let score = maxsim(&query_embedding, &passage)?;
                Ok(RankedPassage { index, score })
            })
            .collect::<Result<_>>()?;

        sort_by_score(&mut ranked);
        Ok(ranked)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Rerank through a remote rerank service.
#[derive(Debug, Clone)]
pub struct HttpReranker {
    service: ServiceClient,
    model: String,
}

impl HttpReranker {
    pub fn new(service: ServiceClient, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
        }
    }
}

impl Rerank for HttpReranker {
    fn rerank(&self, query: &str, passages: &[&str]) -> Result<Vec<RankedPassage>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            model: &self.model,
            query,
            documents: passages,
        };
        let response: RerankResponse =
            self.service.post_json("v1/rerank", &request)?;

        let mut ranked: Vec<RankedPassage> = response
            .results
            .into_iter()
            .map(|r| RankedPassage {
                index: r.index,
                score: r.relevance_score,
            })
            .collect();
        sort_by_score(&mut ranked);
        Ok(ranked)
    }
}

fn sort_by_score(ranked: &mut [RankedPassage]) {
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
}

/// Late-interaction relevance of a chunk to a query: each query token
/// (rows of `query`, `[Q, D]`) takes its best dot product over the chunk
/// tokens (rows of `chunk`, `[T, D]`), and the best matches are summed.
fn maxsim(query: &Tensor, chunk: &Tensor) -> Result<f32> {
    let chunk_t = chunk.t().map_err(map_candle_err)?;
    query
        .matmul(&chunk_t)
        .and_then(|scores| scores.max(1))
        .and_then(|best| best.sum_all())
        .and_then(|total| total.to_scalar::<f32>())
        .map_err(map_candle_err)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::Model(format!("tensor computation error: {e}"))
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    fn tokens(rows: &[&[f32]]) -> Tensor {
        let width = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (rows.len(), width), &Device::Cpu).unwrap()
    }

    #[test]
    fn chunk_repeating_the_query_scores_highest() {
        let query = tokens(&[&[0.6, 0.8], &[1.0, 0.0]]);
        let same = tokens(&[&[1.0, 0.0], &[0.6, 0.8]]);
        let other = tokens(&[&[0.0, 1.0]]);

        let exact = maxsim(&query, &same).unwrap();
        let partial = maxsim(&query, &other).unwrap();
        assert!((exact - 2.0).abs() < 1e-6);
        assert!((partial - 0.8).abs() < 1e-6);
    }

    #[test]
    fn every_query_token_picks_its_own_best_chunk_token() {
        let query = tokens(&[&[1.0, 0.0, 0.0], &[0.0, 0.0, 1.0]]);
        let chunk = tokens(&[
            &[0.0, 0.0, 0.5],
            &[0.9, 0.0, 0.0],
            &[0.0, 1.0, 0.0],
        ]);
        let score = maxsim(&query, &chunk).unwrap();
        assert!((score - 1.4).abs() < 1e-6);
    }

    #[test]
    fn sort_is_descending_with_stable_ties() {
        let mut ranked = vec![
            RankedPassage {
                index: 0,
                score: 0.2,
            },
            RankedPassage {
                index: 1,
                score: 0.9,
            },
            RankedPassage {
                index: 2,
                score: 0.2,
            },
        ];
        sort_by_score(&mut ranked);
        let order: Vec<_> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn rerank_request_shape() {
        let docs = ["one", "two"];
        let request = RerankRequest {
            model: "rerank-v3",
            query: "q",
            documents: &docs,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["documents"][1], "two");
        assert_eq!(json["model"], "rerank-v3");
    }

    #[test]
    fn colbert_reranker_with_no_passages_skips_model() {
        let reranker =
            ColbertReranker::new(ModelManager::new("custom/model".into()));
        assert!(reranker.rerank("query", &[]).unwrap().is_empty());
    }
}
