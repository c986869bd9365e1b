//! The query-time pipeline: optional hypothetical-document expansion,
//! retrieval, then grounded generation.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    generator::{
        ChatTurn,
        DecodingParams,
        Generation,
        GenerationRequest,
        Generator,
        ReferenceDocument,
        Role,
    },
    preamble::{Language, hyde_task},
    retriever::Retrieve,
};

/// What text the retriever searches with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Search with the user's query as typed.
    Classic,
    /// Search with a generated passage that would answer the query.
    #[default]
    Hyde,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalMode::Classic => "classic",
            RetrievalMode::Hyde => "hyde",
        })
    }
}

impl FromStr for RetrievalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(RetrievalMode::Classic),
            "hyde" => Ok(RetrievalMode::Hyde),
            other => Err(Error::Config(format!(
                "unknown retrieval mode '{other}' (expected classic or hyde)"
            ))),
        }
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub mode: RetrievalMode,
    /// The stage-1 passage. Internal; not meant for the end user.
    pub hypothetical: Option<String>,
    pub references: Vec<ReferenceDocument>,
    /// `None` when the generator produced nothing usable.
    pub generation: Option<Generation>,
}

/// Generator and retriever wired together. Holds no per-request state, so
/// one pipeline can serve any number of queries.
pub struct RagPipeline {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retrieve>,
    params: DecodingParams,
}

impl RagPipeline {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retrieve>,
        params: DecodingParams,
    ) -> Self {
        Self {
            generator,
            retriever,
            params,
        }
    }

    /// Answer `query` in `language`.
    ///
    /// In [`RetrievalMode::Hyde`] a failed hypothesis ends the run early:
    /// the outcome has no generation and no retrieval is issued.
    pub fn answer(
        &self,
        query: &str,
        mode: RetrievalMode,
        language: Language,
    ) -> Result<PipelineOutcome> {
        self.converse(query, &[], mode, language)
    }

    /// Like [`answer`](Self::answer), but the grounded call also sees the
    /// earlier turns of a conversation. The hypothesis is always written
    /// from `query` alone.
    pub fn converse(
        &self,
        query: &str,
        history: &[ChatTurn],
        mode: RetrievalMode,
        language: Language,
    ) -> Result<PipelineOutcome> {
        let hypothetical = match mode {
            RetrievalMode::Classic => None,
            RetrievalMode::Hyde => match self.hypothesize(query) {
                Some(passage) => Some(passage),
                None => {
                    warn!("no hypothetical passage, skipping retrieval");
                    return Ok(PipelineOutcome {
                        mode,
                        hypothetical: None,
                        references: Vec::new(),
                        generation: None,
                    });
                }
            },
        };

        let search_text = hypothetical.as_deref().unwrap_or(query);
        let chunks = self.retriever.retrieve(search_text)?;
        let references = ReferenceDocument::from_chunks(&chunks);
        debug!(%mode, references = references.len(), "retrieved context");

        let request = GenerationRequest::new(query, &self.params)
            .with_documents(&references)
            .with_preamble(language.preamble())
            .with_history(history);
        let generation = self.generator.generate(&request);

        let answer_chars = generation
            .as_ref()
            .map_or(0, |g| g.text.chars().count());
        info!(
            %mode,
            %language,
            total_chars = request.prompt_chars() + answer_chars,
            "answer generated"
        );

        Ok(PipelineOutcome {
            mode,
            hypothetical,
            references,
            generation,
        })
    }

    /// Stage 1: a passage shaped like the documents that would answer
    /// `query`. Sent without documents or preamble.
    pub fn hypothesize(&self, query: &str) -> Option<String> {
        let task = hyde_task(query);
        let request = GenerationRequest::new(&task, &self.params);
        let generation = self.generator.generate(&request)?;
        info!(
            total_chars = request.prompt_chars()
                + generation.text.chars().count(),
            "hypothetical passage generated"
        );
        Some(generation.text)
    }
}

/// Chat history for [`RagPipeline::converse`], keeping at most the last
/// `max_turns` turns (0 keeps everything).
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
    max_turns: usize,
}

impl Conversation {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Record one exchange and drop the oldest turns past the cap.
    pub fn record(&mut self, question: &str, answer: &str) {
        self.turns.push(ChatTurn {
            role: Role::User,
            message: question.to_string(),
        });
        self.turns.push(ChatTurn {
            role: Role::Chatbot,
            message: answer.to_string(),
        });
        if self.max_turns > 0 && self.turns.len() > self.max_turns {
            // Whole exchanges only, so history never opens on a reply.
            let excess = (self.turns.len() - self.max_turns).next_multiple_of(2);
            self.turns.drain(..excess);
        }
    }
}

impl fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagPipeline")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
