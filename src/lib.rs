//! # Vestra (library root)
//!
//! Retrieval-and-constraint-filtering core of a conversational shopping
//! assistant. A free-text request goes in; a ranked, policy-compliant list of
//! catalog products (and optionally a composed lookbook) comes out.
//!
//! Pipeline:
//!
//! ```text
//! query ─► embedding ─► vector index (over-fetch) ─► id → product
//!       ─► filter chain (gender, budget) ─► truncate to k ─► [repeat gate]
//!       ─► composer (or local fallback) ─► lookbook
//! ```
//!
//! ## Modules
//! - [`product`], [`catalog`], [`models`], [`schema`]: catalog records and
//!   their versioned SQLite store.
//! - [`embedding`], [`vector_index`]: embedding providers and the cosine index.
//! - [`filter`], [`dedup`]: hard constraints applied to candidates.
//! - [`retriever`]: the orchestrator.
//! - [`compose`], [`history`], [`template`]: lookbook composition.
//! - [`assistant`], [`query`]: caller-facing helpers.
//! - [`commands`], [`config`], [`error`]: CLI, configuration and errors.
//!
//! Configuration lives under the per-platform directory returned by
//! [`config_dir`], e.g. `~/.config/vestra/config.yaml` on Linux.

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod assistant;
pub mod catalog;
pub mod commands;
pub mod compose;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod history;
pub mod models;
pub mod product;
pub mod query;
pub mod retriever;
pub mod schema;
pub mod template;
pub mod vector_index;

use crate::error::{Error, Result};

/// Return the per-platform configuration directory.
///
/// Uses [`directories::ProjectDirs`] with `("com", "vestra", "vestra")`. The
/// directory is not created here.
///
/// # Examples
/// ```rust
/// let cfg = vestra::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "vestra", "vestra")
        .ok_or_else(|| Error::Config("Unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
