//! # Docent (library root)
//!
//! Session-scoped, retrieval-augmented question answering over a local
//! passage index:
//! - Outbound service seams and OpenAI compatible adapters (`api`).
//! - Conversation memory with rolling summaries (`memory`).
//! - Nearest-neighbor passage search (`vector_store`).
//! - The per-query orchestration (`pipeline`).
//! - CLI parsing (`commands`), configuration (`config`) and prompt layout
//!   (`template`).
//!
//! Each query flows through [`pipeline::Pipeline::answer`]: the query is
//! embedded, the closest passages are retrieved, a grounded prompt carrying
//! the session's conversation summary is assembled, and the completion
//! service produces the answer. The session summary is updated afterwards,
//! off the response path.
//!
//! ## Modules
//! - [`api`], [`commands`], [`config`], [`error`], [`memory`], [`pipeline`],
//!   [`template`], [`vector_store`]

use directories::ProjectDirs;
use std::error::Error;

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod template;
pub mod vector_store;

/// Return the per-platform configuration directory used by Docent.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "docent", "docent")`, so you get the right place on each OS
/// (e.g., `~/.config/docent` on Linux under XDG).
///
/// The directory is **not** created by this function; callers that need it
/// should create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be
/// determined (rare, but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "docent", "docent")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
