//! The chat-completion contract.
//!
//! A [`Generator`] turns one [`GenerationRequest`] into one [`Generation`].
//! Every request carries its own preamble and decoding parameters, so a
//! generator is shared freely between stages and threads without any
//! per-call mutation.

use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodingParams {
    /// In `[0, 1]`.
    pub temperature: f32,
    pub top_k: u32,
    /// In `(0, 1]`.
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub streaming: bool,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_k: 1,
            top_p: 0.1,
            max_output_tokens: 2048,
            streaming: false,
        }
    }
}

impl DecodingParams {
    /// Greedy decoding: the same request always yields the same answer.
    ///
    /// # Examples
    ///
    /// ```
    /// use hydrag::generator::DecodingParams;
    ///
    /// let params = DecodingParams::default().deterministic();
    /// assert_eq!(params.temperature, 0.0);
    /// assert_eq!(params.top_k, 1);
    /// assert_eq!(params.top_p, 1.0);
    /// assert!(params.validate().is_ok());
    /// ```
    pub fn deterministic(self) -> Self {
        Self {
            temperature: 0.0,
            top_k: 1,
            top_p: 1.0,
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature must be in [0, 1], got {}",
                self.temperature
            )));
        }
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".into()));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(Error::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.max_output_tokens == 0 {
            return Err(Error::Config(
                "max_output_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Chatbot,
}

/// One prior exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub message: String,
}

/// A retrieved chunk as presented to the model.
///
/// Ids are the 1-based position in the retrieval result, rendered as
/// strings, and are only meaningful within one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    pub id: String,
    pub snippet: String,
    pub source: String,
    pub page: String,
}

impl ReferenceDocument {
    /// Number retrieved chunks in order, starting from 1.
    ///
    /// # Examples
    ///
    /// ```
    /// use hydrag::chunking::Chunk;
    /// use hydrag::generator::ReferenceDocument;
    ///
    /// let chunk = Chunk {
    ///     text: "Redb is an embedded database.".into(),
    ///     source: "redb.pdf".into(),
    ///     page: 3,
    ///     sequence_index: 0,
    /// };
    /// let docs = ReferenceDocument::from_chunks(&[chunk]);
    /// assert_eq!(docs[0].id, "1");
    /// assert_eq!(docs[0].page, "3");
    /// ```
    pub fn from_chunks(chunks: &[Chunk]) -> Vec<Self> {
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| Self {
                id: (i + 1).to_string(),
                snippet: chunk.text.clone(),
                source: chunk.source.clone(),
                page: chunk.page.to_string(),
            })
            .collect()
    }
}

/// Half-open character interval `[start, end)` in an answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A span of the answer that the model attributes to reference documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub interval: Span,
    pub text: String,
    pub document_ids: Vec<String>,
}

/// The model's answer. `citations` is `Some` only for backends that ground
/// their answers in the supplied documents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub citations: Option<Vec<Citation>>,
}

/// Everything a single generation call needs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub chat_history: &'a [ChatTurn],
    pub documents: &'a [ReferenceDocument],
    pub preamble: Option<&'a str>,
    pub params: &'a DecodingParams,
}

impl<'a> GenerationRequest<'a> {
    /// A bare request: no history, no documents, no preamble.
    pub fn new(query: &'a str, params: &'a DecodingParams) -> Self {
        Self {
            query,
            chat_history: &[],
            documents: &[],
            preamble: None,
            params,
        }
    }

    pub fn with_documents(self, documents: &'a [ReferenceDocument]) -> Self {
        Self { documents, ..self }
    }

    pub fn with_preamble(self, preamble: &'a str) -> Self {
        Self {
            preamble: Some(preamble),
            ..self
        }
    }

    pub fn with_history(self, chat_history: &'a [ChatTurn]) -> Self {
        Self {
            chat_history,
            ..self
        }
    }

    /// Characters sent to the model: preamble, query and snippets.
    pub fn prompt_chars(&self) -> usize {
        self.preamble.map_or(0, |p| p.chars().count())
            + self.query.chars().count()
            + self
                .documents
                .iter()
                .map(|d| d.snippet.chars().count())
                .sum::<usize>()
    }
}

/// A chat-completion backend.
///
/// Implementations never fail loudly: transport or decoding problems are
/// logged and reported as `None`.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest<'_>) -> Option<Generation>;

    /// Whether answers come back with citation spans.
    fn supports_citations(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(DecodingParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_params() {
        let base = DecodingParams::default();

        let hot = DecodingParams {
            temperature: 1.5,
            ..base
        };
        assert!(matches!(hot.validate(), Err(Error::Config(_))));

        let zero_k = DecodingParams { top_k: 0, ..base };
        assert!(zero_k.validate().is_err());

        let zero_p = DecodingParams { top_p: 0.0, ..base };
        assert!(zero_p.validate().is_err());

        let no_tokens = DecodingParams {
            max_output_tokens: 0,
            ..base
        };
        assert!(no_tokens.validate().is_err());
    }

    #[test]
    fn deterministic_keeps_length_and_streaming() {
        let params = DecodingParams {
            max_output_tokens: 512,
            streaming: true,
            ..DecodingParams::default()
        }
        .deterministic();

        assert_eq!(params.max_output_tokens, 512);
        assert!(params.streaming);
        assert_eq!(params.temperature, 0.0);
    }

    #[test]
    fn reference_ids_are_one_based_and_ordered() {
        let chunks: Vec<Chunk> = (0..3)
            .map(|i| Chunk {
                text: format!("chunk {i}"),
                source: "a.pdf".into(),
                page: i + 1,
                sequence_index: i,
            })
            .collect();

        let docs = ReferenceDocument::from_chunks(&chunks);
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(docs[2].snippet, "chunk 2");
        assert_eq!(docs[2].page, "3");
    }

    #[test]
    fn request_builders_do_not_share_state() {
        let params = DecodingParams::default();
        let docs = vec![ReferenceDocument {
            id: "1".into(),
            snippet: "abc".into(),
            source: "s".into(),
            page: "1".into(),
        }];

        let bare = GenerationRequest::new("hello", &params);
        let grounded = bare.with_documents(&docs).with_preamble("pre");

        assert!(bare.preamble.is_none());
        assert!(bare.documents.is_empty());
        assert_eq!(grounded.preamble, Some("pre"));
        assert_eq!(grounded.prompt_chars(), 3 + 5 + 3);
    }
}
