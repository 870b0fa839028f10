//! Command-line interface for the `docent` binary, defined with `clap`.
//!
//! Two subcommands exist: `ask`, which runs one retrieval-augmented query
//! against the loaded passage index, and `init`, which writes a starter
//! configuration and template into the per-platform config directory.
//!
//! # Examples
//!
//! ```sh
//! docent ask "What is the cancellation policy?" -s support-42
//! docent init
//! ```

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Ask one question against the indexed passages.
    ///
    /// Without `--session`, the turn lands in the shared default session;
    /// pass a session id to keep conversations isolated.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// The question to ask.
        question: String,

        /// Prompt template name, resolved under `<config_dir>/templates/`.
        #[arg(name = "template", short = 't')]
        template: Option<String>,

        /// Session id for conversation memory.
        #[arg(name = "session", short = 's')]
        session: Option<String>,
    },

    /// Write a default `config.yaml` and grounding template into the
    /// per-platform config directory.
    Init,
}
