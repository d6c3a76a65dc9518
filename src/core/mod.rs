// Public modules
pub mod aggregate;
pub mod changes;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod provenance;
pub mod run;
pub mod secrets;
pub mod target;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
