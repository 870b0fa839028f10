//! # Template loading and structure
//!
//! Utilities for defining and loading the **grounding template** used by Docent.
//!
//! A template is a small YAML document that specifies:
//! - a `system_prompt` stating the grounding policy (answer only from the
//!   supplied context, never reveal that a document is being used, ask for
//!   clarification when the question is ambiguous),
//! - the header strings used to lay out the single user message that carries
//!   the prior conversation summary, the retrieved context block and the
//!   literal question.
//!
//! Templates are stored per-user under the application's configuration
//! directory, inside a `templates/` subfolder. The loader resolves templates at:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! where `<config_dir>` is provided by [`crate::config_dir()`] and is
//! platform-specific.
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "Answer strictly from the context below."
//! history_header: "Conversation history:"
//! context_header: "Context:"
//! question_header: "Question:"
//! ```

use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::Path};

/// The grounding policy shipped as the built-in default system prompt.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable consultant. Answer the user's \
question strictly from the context provided below. Never mention that you are using a document \
or any supplied context. If you are not sure what the question means, ask the user to be more \
precise and suggest a topic.";

/// The prompt layout used to assemble each completion request.
///
/// Instances are typically created by deserializing YAML files with
/// [`load_template`], or via [`ChatTemplate::default`] when no template file
/// is installed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatTemplate {
    /// Global instruction used as the request's system message.
    pub system_prompt: String,

    /// Header preceding the rolling conversation summary.
    #[serde(default = "default_history_header")]
    pub history_header: String,

    /// Header preceding the retrieved context block.
    #[serde(default = "default_context_header")]
    pub context_header: String,

    /// Header preceding the literal user question.
    #[serde(default = "default_question_header")]
    pub question_header: String,
}

fn default_history_header() -> String {
    "Conversation history:".to_string()
}

fn default_context_header() -> String {
    "Context:".to_string()
}

fn default_question_header() -> String {
    "Question:".to_string()
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_header: default_history_header(),
            context_header: default_context_header(),
            question_header: default_question_header(),
        }
    }
}

impl ChatTemplate {
    /// Lay out the single user message sent to the completion service.
    ///
    /// The summary and context sections keep their relative order (history
    /// first, then context, then the question) so the model reads prior
    /// conversation before the retrieved passages. Empty sections are
    /// rendered with their header and an empty body rather than omitted,
    /// keeping the prompt shape stable across turns.
    pub fn render_user_message(&self, summary: &str, context: &str, question: &str) -> String {
        format!(
            "{}\n{}\n\n{}\n{}\n\n{} {}",
            self.history_header, summary, self.context_header, context, self.question_header, question
        )
    }
}

/// Load a chat template by name from the user's config directory.
///
/// Resolves `<config_dir>/templates/<name>.yaml`, reads the file, and
/// deserializes into a [`ChatTemplate`].
///
/// ### Errors
/// Returns an error if:
/// - the config directory cannot be determined,
/// - the template file does not exist or cannot be read,
/// - the YAML content cannot be deserialized into a `ChatTemplate`.
pub fn load_template(name: &str) -> Result<ChatTemplate, Box<dyn Error>> {
    let path = format!("templates/{}.yaml", name);
    let config_path = crate::config_dir()?.join(&path);

    tracing::info!("Loading template: {}", config_path.display());

    load_template_from(&config_path)
}

/// Load a chat template from an explicit file path.
pub fn load_template_from(path: &Path) -> Result<ChatTemplate, Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let template: ChatTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}
