//! # Lore Harness Core
//!
//! Shared, runtime-free logic for Lore Harness: data models, the error
//! taxonomy, chunking, the embedding and LLM gateway traits, the vector
//! index and ingestion registry abstractions, ranking, conversation
//! memory, and tool planning.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Anything
//! that talks to the outside world lives in the `lore-harness` app crate
//! and plugs in through the traits defined here.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod search;
pub mod store;
pub mod tools;

pub use error::{HarnessError, Result};
