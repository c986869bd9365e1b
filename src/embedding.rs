use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::EmbeddingConfig,
    error::{Error, Result},
    http::ServiceClient,
};

/// Turns text into dense vectors.
///
/// Documents and queries may be embedded differently (asymmetric models),
/// hence the two entry points.
pub trait Embedder: Send + Sync {
    /// Embed passages for storage. Returns one vector per input, in order.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum InputType {
    SearchDocument,
    SearchQuery,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    serving_mode: ServingMode<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compartment_id: Option<&'a str>,
    input_type: InputType,
    truncate: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServingMode<'a> {
    pub serving_type: &'static str,
    pub model_id: &'a str,
}

impl<'a> ServingMode<'a> {
    pub(crate) fn on_demand(model_id: &'a str) -> Self {
        Self {
            serving_type: "ON_DEMAND",
            model_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding service client. Inputs are sent in batches of
/// `config.batch_size`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    service: ServiceClient,
    model: String,
    compartment_id: Option<String>,
    batch_size: usize,
}

impl HttpEmbedder {
    pub fn new(
        service: ServiceClient,
        config: &EmbeddingConfig,
        compartment_id: Option<String>,
    ) -> Self {
        Self {
            service,
            model: config.model.clone(),
            compartment_id,
            batch_size: config.batch_size.max(1),
        }
    }

    fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), ?input_type, "embedding batch");
            let request = EmbedRequest {
                inputs: batch,
                serving_mode: ServingMode::on_demand(&self.model),
                compartment_id: self.compartment_id.as_deref(),
                input_type,
                truncate: "END",
            };
            let response: EmbedResponse =
                self.service.post_json("20231130/actions/embedText", &request)?;
            if response.embeddings.len() != batch.len() {
                return Err(Error::Model(format!(
                    "embedding service returned {} vectors for {} inputs",
                    response.embeddings.len(),
                    batch.len()
                )));
            }
            vectors.extend(response.embeddings);
        }
        Ok(vectors)
    }
}

impl Embedder for HttpEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, InputType::SearchDocument)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors =
            self.embed(&[text.to_string()], InputType::SearchQuery)?;
        vectors
            .pop()
            .ok_or_else(|| Error::Model("empty query embedding".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_service_field_names() {
        let inputs = vec!["hello".to_string()];
        let request = EmbedRequest {
            inputs: &inputs,
            serving_mode: ServingMode::on_demand("embed-model"),
            compartment_id: None,
            input_type: InputType::SearchQuery,
            truncate: "END",
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["inputType"], "SEARCH_QUERY");
        assert_eq!(json["servingMode"]["modelId"], "embed-model");
        assert_eq!(json["servingMode"]["servingType"], "ON_DEMAND");
        assert!(json.get("compartmentId").is_none());
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let config = EmbeddingConfig {
            batch_size: 0,
            ..EmbeddingConfig::default()
        };
        let service = ServiceClient::new(
            reqwest::blocking::Client::new(),
            "http://localhost",
            None,
        );
        let embedder = HttpEmbedder::new(service, &config, None);
        assert_eq!(embedder.batch_size, 1);
    }
}
