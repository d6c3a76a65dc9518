//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Command execution with error handling
//! - `io` - File I/O with consistent error handling
//! - `repo_path` - Repository-relative path normalization and matching
//! - `template` - String template rendering
//! - `validation` - Input validation helpers

pub mod command;
pub mod io;
pub mod repo_path;
pub mod template;
pub mod validation;
