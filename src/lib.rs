//! # Lore Harness
//!
//! A local-first retrieval-augmented agent over a multi-volume novel corpus.
//!
//! Volumes are chunked, embedded and stored in a SQLite vector index. A
//! conversational agent answers questions about the story by routing each
//! question to retrieval tools, then asking a chat model to answer from the
//! retrieved passages only.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Loader    │──▶│   Pipeline   │──▶│    SQLite    │
//! │ PDF/TXT/MD  │   │ Chunk+Embed  │   │ index + reg. │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                             ▼
//!                   ┌──────────────┐   ┌──────────────┐
//!                   │    Agent     │──▶│  Retriever   │
//!                   │ memory + LLM │   │ (via router) │
//!                   └──────┬───────┘   └──────────────┘
//!                          ▼
//!                   ┌──────────────┐
//!                   │     CLI      │
//!                   │   (lore)     │
//!                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lore init                                   # create database
//! lore ingest                                 # ingest ./data/novels
//! lore search "the burning of the harbor" --k 3
//! lore ask "Which volume does Mira first appear in?"
//! lore chat --session evening                 # interactive
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector index and registry |
//! | [`loader`] | Corpus scanning and text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat model providers |
//! | [`retry`] | Timeout and backoff for remote calls |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Query-time retrieval |
//! | [`router`] | Tool routing |
//! | [`prompt`] | Prompt assembly |
//! | [`agent`] | Agent loop, sessions, streaming |
//! | [`app`] | Component wiring |
//! | [`search`], [`status`], [`chat`] | CLI commands |
//!
//! Storage-independent pieces (data model, chunker, ranking, memory, tool
//! planner) live in the `lore-harness-core` crate.

pub mod agent;
pub mod app;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod prompt;
pub mod retrieve;
pub mod retry;
pub mod router;
pub mod search;
pub mod sqlite_store;
pub mod status;

pub use lore_harness_core::{HarnessError, Result};
