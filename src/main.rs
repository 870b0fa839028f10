//! Main module for the Docent CLI application.
//!
//! Handles command parsing, configuration loading and wiring of the
//! retrieval-augmented pipeline, then dispatches to the requested command.
//!
//! # Examples
//!
//! Asking a question against the indexed passages:
//!
//! ```sh
//! docent ask "What is the cancellation policy?" -s support-42
//! ```
//!
//! Initializing the application's configuration and templates:
//!
//! ```sh
//! docent init
//! ```

use std::{
    env,
    error::Error,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use docent::api::{CompletionService, EmbeddingService, OpenAiChat, OpenAiEmbeddings};
use docent::commands::{Cli, Commands};
use docent::config::{DocentConfig, load_config};
use docent::memory::SessionMemoryStore;
use docent::pipeline::{Pipeline, QueryRequest};
use docent::template::{ChatTemplate, load_template};
use docent::vector_store::{VectorIndex, VectorStore};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Resolve the configuration file path: the `DOCENT_CONFIG` environment
/// variable when set, otherwise `config.yaml` in the per-platform config
/// directory.
fn config_path() -> Result<PathBuf, Box<dyn Error>> {
    match env::var("DOCENT_CONFIG") {
        Ok(path) => Ok(PathBuf::from(path)),
        Err(_) => Ok(docent::config_dir()?.join("config.yaml")),
    }
}

/// Main asynchronous function of the Docent CLI application.
///
/// Parses command-line arguments, loads configuration and executes the
/// requested command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the vector store
/// cannot be opened, or the query pipeline fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            question,
            template,
            session,
        } => {
            let config_path = config_path()?;
            debug!("Loading config from: {}", config_path.display());
            let config = load_config(config_path.to_str().ok_or("non-utf8 config path")?)?;

            let template = match template {
                Some(name) => load_template(&name)?,
                None => ChatTemplate::default(),
            };

            let answer = ask(&config, template, session, question).await?;
            println!("{answer}");
        }
        Commands::Init => {
            debug!("Initializing configuration");
            init()?;
        }
    }

    Ok(())
}

/// Wire the pipeline from configuration and answer one question.
async fn ask(
    config: &DocentConfig,
    template: ChatTemplate,
    session: Option<String>,
    question: String,
) -> Result<String, Box<dyn Error>> {
    let store = VectorStore::load(Path::new(&config.vector_store_path))?;
    info!("Vector store loaded with {} passages", store.len());

    let embeddings: Arc<dyn EmbeddingService> = Arc::new(OpenAiEmbeddings::new(config));
    let completions: Arc<dyn CompletionService> =
        Arc::new(OpenAiChat::new(config, config.chat_model.clone()));
    let summarizer: Arc<dyn CompletionService> =
        Arc::new(OpenAiChat::new(config, config.summarizer_model.clone()));

    let memory = Arc::new(SessionMemoryStore::new(summarizer, config));
    let index: Arc<dyn VectorIndex> = Arc::new(store);

    let pipeline = Pipeline::new(embeddings, index, completions, memory, template, config);
    let result = pipeline.answer(QueryRequest::new(session, question)).await?;
    Ok(result.answer)
}

/// Initializes the application's configuration and templates.
///
/// Creates the config directory, a default `config.yaml` and the built-in
/// grounding template under `templates/grounded_answer.yaml`, all in YAML.
///
/// # Errors
///
/// Returns an error if the directories or files cannot be created, or the
/// defaults cannot be serialized.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = docent::config_dir()?;
    let templates_dir = config_dir.join("templates");
    info!("Creating template config directory: {}", templates_dir.display());
    fs::create_dir_all(&templates_dir)?;

    let template_path = templates_dir.join("grounded_answer.yaml");
    info!("Creating template file: {}", template_path.display());
    let template_yaml = serde_yaml::to_string(&ChatTemplate::default())?;
    fs::write(template_path, template_yaml)?;

    let config_path = config_dir.join("config.yaml");
    info!("Creating config file: {}", config_path.display());
    let config_yaml = serde_yaml::to_string(&DocentConfig::default())?;
    fs::write(config_path, config_yaml)?;

    Ok(())
}
