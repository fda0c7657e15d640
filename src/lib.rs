//! bench_forge: Resumable benchmark harness for agentic coding evaluation.
//!
//! This library runs a benchmark suite end to end: sequential agentic
//! inference in Docker sandboxes, parallel sandboxed evaluation against gold
//! fixtures, and crash-safe JSONL ledgers that make every run resumable.

// Core modules
pub mod attempt;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod resume;
pub mod sandbox;
pub mod scheduler;
pub mod select;
pub mod suite;
pub mod workspace;

// Re-export commonly used error types
pub use error::{ConfigError, LedgerError, SelectionError};
pub use sandbox::SandboxError;
pub use workspace::WorkspaceError;
