//! HTTP chat backends.
//!
//! Two request families are supported. The grounded family passes the
//! reference documents as structured input and gets citation spans back.
//! The messages family only understands role-tagged messages, so the
//! documents are inlined into a system message and no citations exist.
//! The family is picked once, from configuration, by [`build_generator`].

use std::sync::Arc;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    config::{GeneratorFamily, RagConfig},
    embedding::ServingMode,
    error::{Error, Result},
    generator::{
        ChatTurn,
        Citation,
        DecodingParams,
        Generation,
        GenerationRequest,
        Generator,
        ReferenceDocument,
        Role,
        Span,
    },
    http::ServiceClient,
};

const CHAT_PATH: &str = "20231130/actions/chat";

/// Build the generator selected by `config.generator.family`.
pub fn build_generator(config: &RagConfig, client: Client) -> Arc<dyn Generator> {
    let service = ServiceClient::new(
        client,
        config.generator.endpoint.clone(),
        config.api_key.clone(),
    );
    let model = config.generator.model.clone();
    let compartment_id = config.compartment_id.clone();

    match config.generator.family {
        GeneratorFamily::Grounded => {
            Arc::new(GroundedChatClient::new(service, model, compartment_id))
        }
        GeneratorFamily::Messages => {
            Arc::new(MessagesChatClient::new(service, model, compartment_id))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatEnvelope<'a, R> {
    #[serde(skip_serializing_if = "Option::is_none")]
    compartment_id: Option<&'a str>,
    serving_mode: ServingMode<'a>,
    chat_request: R,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Sampling {
    max_tokens: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    is_stream: bool,
}

impl From<&DecodingParams> for Sampling {
    fn from(params: &DecodingParams) -> Self {
        Self {
            max_tokens: params.max_output_tokens,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            is_stream: params.streaming,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatEnvelopeResponse<R> {
    chat_response: R,
}

// -- Grounded --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroundedRequest<'a> {
    api_format: &'static str,
    message: &'a str,
    chat_history: Vec<GroundedTurn<'a>>,
    documents: &'a [ReferenceDocument],
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble_override: Option<&'a str>,
    #[serde(flatten)]
    sampling: Sampling,
}

#[derive(Debug, Serialize)]
struct GroundedTurn<'a> {
    role: &'static str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCitation {
    start: usize,
    end: usize,
    text: String,
    document_ids: Vec<String>,
}

impl From<WireCitation> for Citation {
    fn from(wire: WireCitation) -> Self {
        Citation {
            interval: Span {
                start: wire.start,
                end: wire.end,
            },
            text: wire.text,
            document_ids: wire.document_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroundedResponse {
    text: String,
    #[serde(default)]
    citations: Option<Vec<WireCitation>>,
}

impl From<GroundedResponse> for Generation {
    fn from(response: GroundedResponse) -> Self {
        Generation {
            text: response.text,
            citations: Some(
                response
                    .citations
                    .unwrap_or_default()
                    .into_iter()
                    .map(Citation::from)
                    .collect(),
            ),
        }
    }
}

/// Accumulates a streamed grounded answer. Text deltas are concatenated;
/// the closing event (the one with a `finishReason`) repeats the full text
/// and may carry the citations.
#[derive(Debug, Default)]
struct GroundedStream {
    text: String,
    citations: Vec<Citation>,
}

impl GroundedStream {
    fn push(&mut self, event: serde_json::Value) {
        if event.get("finishReason").is_some() {
            if let Some(raw) = event.get("citations")
                && let Ok(wire) =
                    serde_json::from_value::<Vec<WireCitation>>(raw.clone())
            {
                self.citations = wire.into_iter().map(Citation::from).collect();
            }
            return;
        }
        if let Some(delta) = event.get("text").and_then(|t| t.as_str()) {
            self.text.push_str(delta);
        }
    }

    fn finish(self) -> Generation {
        Generation {
            text: self.text,
            citations: Some(self.citations),
        }
    }
}

/// Chat backend for models that take documents natively and cite them.
#[derive(Debug, Clone)]
pub struct GroundedChatClient {
    service: ServiceClient,
    model: String,
    compartment_id: Option<String>,
}

impl GroundedChatClient {
    pub fn new(
        service: ServiceClient,
        model: String,
        compartment_id: Option<String>,
    ) -> Self {
        Self {
            service,
            model,
            compartment_id,
        }
    }

    fn envelope<'a>(
        &'a self,
        request: &GenerationRequest<'a>,
    ) -> ChatEnvelope<'a, GroundedRequest<'a>> {
        ChatEnvelope {
            compartment_id: self.compartment_id.as_deref(),
            serving_mode: ServingMode::on_demand(&self.model),
            chat_request: GroundedRequest {
                api_format: "COHERE",
                message: request.query,
                chat_history: request
                    .chat_history
                    .iter()
                    .map(|turn| GroundedTurn {
                        role: match turn.role {
                            Role::User => "USER",
                            Role::Chatbot => "CHATBOT",
                        },
                        message: &turn.message,
                    })
                    .collect(),
                documents: request.documents,
                preamble_override: request.preamble,
                sampling: Sampling::from(request.params),
            },
        }
    }

    fn try_generate(&self, request: &GenerationRequest<'_>) -> Result<Generation> {
        let body = self.envelope(request);
        if request.params.streaming {
            let mut stream = GroundedStream::default();
            self.service
                .post_events(CHAT_PATH, &body, |event| stream.push(event))?;
            Ok(stream.finish())
        } else {
            let response: ChatEnvelopeResponse<GroundedResponse> =
                self.service.post_json(CHAT_PATH, &body)?;
            Ok(response.chat_response.into())
        }
    }
}

impl Generator for GroundedChatClient {
    fn generate(&self, request: &GenerationRequest<'_>) -> Option<Generation> {
        debug!(
            model = %self.model,
            documents = request.documents.len(),
            streaming = request.params.streaming,
            "grounded chat request"
        );
        match self.try_generate(request) {
            Ok(generation) => Some(generation),
            Err(e) => {
                error!(model = %self.model, error = %e, "generation failed");
                None
            }
        }
    }

    fn supports_citations(&self) -> bool {
        true
    }
}

// -- Messages --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesRequest {
    api_format: &'static str,
    messages: Vec<Message>,
    #[serde(flatten)]
    sampling: Sampling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Message {
    role: String,
    content: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Content {
    #[serde(rename = "type", default = "text_type")]
    kind: String,
    text: String,
}

fn text_type() -> String {
    "TEXT".to_string()
}

impl Message {
    fn new(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: vec![Content {
                kind: text_type(),
                text,
            }],
        }
    }

    fn text(&self) -> String {
        self.content.iter().map(|c| c.text.as_str()).collect()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Render a request as role-tagged messages: the preamble, the retrieved
/// context, prior turns, then the query.
fn render_messages(request: &GenerationRequest<'_>) -> Vec<Message> {
    let mut messages = Vec::new();
    if let Some(preamble) = request.preamble {
        messages.push(Message::new("SYSTEM", preamble.to_string()));
    }
    if !request.documents.is_empty() {
        let context: Vec<&str> =
            request.documents.iter().map(|d| d.snippet.as_str()).collect();
        messages.push(Message::new(
            "SYSTEM",
            format!("Use the following context: \n{}\n", context.join("\n")),
        ));
    }
    for ChatTurn { role, message } in request.chat_history {
        let role = match role {
            Role::User => "USER",
            Role::Chatbot => "ASSISTANT",
        };
        messages.push(Message::new(role, message.clone()));
    }
    messages.push(Message::new("USER", request.query.to_string()));
    messages
}

/// Chat backend for models that only accept plain messages.
#[derive(Debug, Clone)]
pub struct MessagesChatClient {
    service: ServiceClient,
    model: String,
    compartment_id: Option<String>,
}

impl MessagesChatClient {
    pub fn new(
        service: ServiceClient,
        model: String,
        compartment_id: Option<String>,
    ) -> Self {
        Self {
            service,
            model,
            compartment_id,
        }
    }

    fn try_generate(&self, request: &GenerationRequest<'_>) -> Result<Generation> {
        let body = ChatEnvelope {
            compartment_id: self.compartment_id.as_deref(),
            serving_mode: ServingMode::on_demand(&self.model),
            chat_request: MessagesRequest {
                api_format: "GENERIC",
                messages: render_messages(request),
                sampling: Sampling::from(request.params),
            },
        };

        let text = if request.params.streaming {
            let mut text = String::new();
            self.service.post_events(CHAT_PATH, &body, |event| {
                if let Some(delta) =
                    event.pointer("/message/content/0/text").and_then(|t| t.as_str())
                {
                    text.push_str(delta);
                }
            })?;
            text
        } else {
            let response: ChatEnvelopeResponse<MessagesResponse> =
                self.service.post_json(CHAT_PATH, &body)?;
            response
                .chat_response
                .choices
                .first()
                .map(|choice| choice.message.text())
                .ok_or_else(|| Error::Model("response has no choices".into()))?
        };

        Ok(Generation {
            text,
            citations: None,
        })
    }
}

impl Generator for MessagesChatClient {
    fn generate(&self, request: &GenerationRequest<'_>) -> Option<Generation> {
        debug!(
            model = %self.model,
            documents = request.documents.len(),
            streaming = request.params.streaming,
            "messages chat request"
        );
        match self.try_generate(request) {
            Ok(generation) => Some(generation),
            Err(e) => {
                error!(model = %self.model, error = %e, "generation failed");
                None
            }
        }
    }
}
