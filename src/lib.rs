//! ideaflow - IdeaFlow state machine and timeline library
//!
//! This library records how a developer's work on a task moves between flow
//! states and derives timelines from that record for the `ifm` CLI.
//!
//! # Core Concepts
//!
//! - **Tasks**: Named units of work that own states and events
//! - **Scopes**: Independent state tracks per task (primary, subtask, nested)
//! - **States**: PROGRESS, CONFLICT, LEARNING and REWORK spans, one open per scope
//! - **Events**: Append-only notes, subtask markers and activity reports
//! - **Timelines**: Band and tree views rebuilt from states and events on read
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.ideaflow.toml`
//! - `error`: Error types and result aliases
//! - `state_machine`: Transition engine over one task's open slots
//! - `timeline`: Band and tree timeline derivation
//! - `service`: Ingestion and query facade
//! - `persistence`: Store contract with memory and file backends
//! - `storage`: File storage and directory layout
//! - `lock`: File locking, per-task exclusion and atomic writes

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod file_store;
pub mod lock;
pub mod memory_store;
pub mod output;
pub mod persistence;
pub mod service;
pub mod state;
pub mod state_machine;
pub mod storage;
pub mod task;
pub mod timeline;

pub use error::{Error, Result};
pub use service::IdeaFlowService;
