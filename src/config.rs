//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `DocentConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use docent::config::{DocentConfig, load_config};
//!
//! let config: DocentConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{error::Error, fs};

/// Represents the application's configuration.
///
/// Holds the credentials for the OpenAI compatible endpoint, the model names
/// used for answering, embedding and summarizing, and the knobs that bound
/// the pipeline: retrieval fan-out, answer length, summary budget, session
/// table size and per-call timeouts. Constructed by loading a YAML file with
/// [`load_config`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct DocentConfig {
    /// The API key used to authenticate requests to the API.
    pub api_key: String,

    /// The base URL of the API.
    pub api_base: String,

    /// Model used to generate answers.
    pub chat_model: String,

    /// Model used to embed queries.
    pub embedding_model: String,

    /// Dimensionality the embedding model produces (1536 for ada-002).
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Model used to condense conversation summaries.
    pub summarizer_model: String,

    /// Number of nearest passages retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Output-token cap applied to every answer completion.
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,

    /// Token ceiling for a session's rolling summary.
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,

    /// Maximum number of live sessions before least-recently-used eviction.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Timeout applied to each external-service call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Path to the vector store metadata written by the ingestion job.
    pub vector_store_path: String,
}

fn default_embedding_dimension() -> usize {
    1536
}

fn default_top_k() -> usize {
    5
}

fn default_max_answer_tokens() -> u32 {
    500
}

fn default_summary_max_tokens() -> usize {
    1000
}

fn default_max_sessions() -> usize {
    256
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for DocentConfig {
    fn default() -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_dimension: default_embedding_dimension(),
            summarizer_model: "gpt-3.5-turbo".to_string(),
            top_k: default_top_k(),
            max_answer_tokens: default_max_answer_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            max_sessions: default_max_sessions(),
            request_timeout_secs: default_request_timeout_secs(),
            vector_store_path: "vector_store.yaml".to_string(),
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// This function reads the file at the given path, parses it as YAML, and
/// constructs a `DocentConfig` struct from it. Fields with defaults
/// (`top_k`, `max_answer_tokens`, ...) may be omitted from the file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(DocentConfig)`: The loaded configuration.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
///
/// # Examples
///
/// ```no_run
/// use docent::config::load_config;
///
/// match load_config("/path/to/config.yaml") {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &str) -> Result<DocentConfig, Box<dyn Error>> {
    tracing::debug!("loading config from {file}");
    let content = fs::read_to_string(file)?;
    let config: DocentConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com/v1"
chat_model: "gpt-3.5-turbo"
embedding_model: "text-embedding-ada-002"
summarizer_model: "gpt-3.5-turbo"
top_k: 3
vector_store_path: "store.yaml"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com/v1");
        assert_eq!(config.chat_model, "gpt-3.5-turbo");
        assert_eq!(config.top_k, 3);
        // Omitted fields fall back to defaults.
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.max_answer_tokens, 500);
        assert_eq!(config.summary_max_tokens, 1000);
        assert_eq!(config.max_sessions, 256);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(config.is_err());
    }
}
