//! AI-Shell core runtime.
//!
//! An interactive terminal that augments database administration with a
//! local language model: an asynchronous event bus and module registry, a
//! typing-driven panel orchestrator, an intent-analysis + context-enrichment
//! pipeline that runs concurrently with keystrokes, a semantic vector store
//! over database catalogs, a risk-gated SQL execution path, an encrypted
//! credential vault with auto-redaction, and pooled database clients with
//! validation-on-acquire.

pub mod bootstrap;
pub mod cli;
pub mod completer;
pub mod config;
pub mod core;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod gate;
pub mod history;
pub mod llm;
pub mod output;
pub mod panels;
pub mod repl;
pub mod risk;
pub mod vault;
pub mod vector;

pub use crate::core::CoreOrchestrator;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::risk::{RiskAnalyzer, RiskAssessment, RiskLevel};
