use std::sync::Arc;

use reqwest::blocking::Client;
use tracing::debug;

use crate::{
    chat_backend::build_generator,
    collection_store::CollectionStore,
    config::{RagConfig, RerankBackend},
    data_dir::DataDir,
    embedding::{Embedder, HttpEmbedder},
    error::{Error, Result},
    evaluator::AnswerJudge,
    generator::Generator,
    http::{ServiceClient, build_client},
    hyde::RagPipeline,
    model_manager::ModelManager,
    reranker::{ColbertReranker, HttpReranker, Rerank},
    retriever::{Retrieve, Retriever},
};

/// Everything built from one validated configuration: the shared HTTP
/// client, the store and the selected backends.
pub struct RagContext {
    config: RagConfig,
    data_dir: DataDir,
    store: Arc<CollectionStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    reranker: Option<Arc<dyn Rerank>>,
}

impl RagContext {
    pub fn init(config: RagConfig, data_dir: DataDir) -> Result<Self> {
        config.validate()?;

        let client = build_client(&config.http)?;
        let store = Arc::new(CollectionStore::open(&data_dir.store_db())?);

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            ServiceClient::new(
                client.clone(),
                config.embedding.endpoint.clone(),
                config.api_key.clone(),
            ),
            &config.embedding,
            config.compartment_id.clone(),
        ));
        let generator = build_generator(&config, client.clone());
        let reranker = config
            .retrieval
            .rerank
            .then(|| build_reranker(&config, client));

        debug!(
            data_dir = %data_dir.root().display(),
            family = ?config.generator.family,
            citations = generator.supports_citations(),
            rerank = reranker.is_some(),
            "context ready"
        );

        Ok(Self {
            config,
            data_dir,
            store,
            embedder,
            generator,
            reranker,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// A retriever over `collection` with the configured `top_k`. Fails if
    /// the collection is missing.
    pub fn retriever(&self, collection: &str) -> Result<Arc<dyn Retrieve>> {
        let top_k = self.config.retrieval.top_k;
        Ok(Arc::new(self.retriever_with_top_k(collection, top_k)?))
    }

    /// A retriever returning up to `top_k` chunks. When reranking is on,
    /// at most `min(top_n, top_k)` survive it.
    pub fn retriever_with_top_k(
        &self,
        collection: &str,
        top_k: usize,
    ) -> Result<Retriever> {
        if !self.store.exists(collection)? {
            return Err(Error::NotFound {
                kind: "collection",
                name: collection.to_string(),
            });
        }

        let retriever = Retriever::new(
            self.store.clone(),
            self.embedder.clone(),
            collection,
            top_k,
        );
        match &self.reranker {
            Some(reranker) => retriever.with_reranker(
                reranker.clone(),
                self.config.retrieval.top_n.min(top_k),
            ),
            None => Ok(retriever),
        }
    }

    pub fn pipeline(&self, collection: &str) -> Result<RagPipeline> {
        Ok(RagPipeline::new(
            self.generator.clone(),
            self.retriever(collection)?,
            self.config.decoding,
        ))
    }

    pub fn judge(&self, collection: &str) -> Result<AnswerJudge> {
        Ok(AnswerJudge::new(
            self.generator.clone(),
            self.retriever(collection)?,
            self.config.decoding,
        ))
    }
}

fn build_reranker(config: &RagConfig, client: Client) -> Arc<dyn Rerank> {
    match &config.retrieval.reranker {
        RerankBackend::Colbert { model } => {
            Arc::new(ColbertReranker::new(ModelManager::new(model.clone())))
        }
        RerankBackend::Http { endpoint, model } => Arc::new(HttpReranker::new(
            ServiceClient::new(client, endpoint.clone(), config.api_key.clone()),
            model.clone(),
        )),
    }
}

impl std::fmt::Debug for RagContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagContext")
            .field("data_dir", &self.data_dir)
            .field("rerank", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}
