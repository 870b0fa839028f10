//! # API Module
//!
//! Outbound service seams and their OpenAI compatible adapters.
//!
//! The pipeline talks to its three collaborators through traits so the
//! orchestration can be exercised against stubs:
//!
//! - [`EmbeddingService`]: text → fixed-dimension vector.
//! - [`CompletionService`]: role-tagged messages → generated answer.
//! - The vector index seam lives in [`crate::vector_store::VectorIndex`].
//!
//! [`OpenAiEmbeddings`] and [`OpenAiChat`] implement the first two against an
//! OpenAI compatible endpoint via `async-openai`. No retries happen here; a
//! failed call surfaces to the pipeline, which classifies it by stage.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        chat::{
            ChatCompletionRequestAssistantMessageContent,
            ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
            ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
            ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
        },
        embeddings::CreateEmbeddingRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

use crate::config::DocentConfig;
use crate::error::ServiceError;

/// Converts arbitrary text into a fixed-dimension numeric vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed `text`. The returned vector's length is fixed per deployment.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

/// Generates an answer from a structured list of role-tagged messages.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run a chat completion capped at `max_tokens` output tokens.
    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: u32,
    ) -> Result<String, ServiceError>;
}

/// Creates a new OpenAI API client from configuration.
fn create_client(config: &DocentConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created with config: {:?}", openai_config);
    Client::with_config(openai_config)
}

/// Build a system message from plain text.
pub fn system_message(content: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
        content: ChatCompletionRequestSystemMessageContent::Text(content.into()),
        name: None,
    })
}

/// Build a user message from plain text.
pub fn user_message(content: impl Into<String>) -> ChatCompletionRequestMessage {
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Text(content.into()),
        name: None,
    })
}

/// Extract the text content of a user or system message, if any.
///
/// Used by tests and logging; assistant/tool messages yield `None`.
pub fn message_text(message: &ChatCompletionRequestMessage) -> Option<&str> {
    match message {
        ChatCompletionRequestMessage::System(system_message) => {
            if let ChatCompletionRequestSystemMessageContent::Text(text) = &system_message.content {
                Some(text)
            } else {
                None
            }
        }
        ChatCompletionRequestMessage::User(user_message) => {
            if let ChatCompletionRequestUserMessageContent::Text(text) = &user_message.content {
                Some(text)
            } else {
                None
            }
        }
        ChatCompletionRequestMessage::Assistant(assistant_message) => {
            if let Some(ChatCompletionRequestAssistantMessageContent::Text(text)) =
                &assistant_message.content
            {
                Some(text)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Embedding adapter backed by an OpenAI compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddings {
    /// Create an adapter using `config.embedding_model` and
    /// `config.embedding_dimension`.
    pub fn new(config: &DocentConfig) -> Self {
        Self {
            client: create_client(config),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(text)
            .build()?;

        debug!("Sending embedding request for {} chars", text.len());
        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or("embedding response contained no data")?;

        if embedding.len() != self.dimension {
            return Err(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )
            .into());
        }

        Ok(embedding)
    }
}

/// Chat completion adapter backed by an OpenAI compatible `/chat/completions`
/// endpoint. One instance per model: the pipeline uses one for answers and
/// the memory store another for summarization.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChat {
    /// Create an adapter for the given model name.
    pub fn new(config: &DocentConfig, model: String) -> Self {
        Self {
            client: create_client(config),
            model,
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiChat {
    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: u32,
    ) -> Result<String, ServiceError> {
        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(max_tokens)
            .model(self.model.clone())
            .messages(messages)
            .build()?;

        debug!("Sending request: {:?}", request);

        let response = self.client.chat().create(request).await?;

        let mut response_string = String::new();
        response.choices.iter().for_each(|chat_choice| {
            if let Some(message_text) = chat_choice.message.content.clone() {
                response_string.push_str(&message_text);
            }
        });

        if response_string.is_empty() {
            return Err("completion response contained no content".into());
        }

        Ok(response_string)
    }
}
