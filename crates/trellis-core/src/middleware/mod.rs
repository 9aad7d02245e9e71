//! Middleware implementations
//!
//! Every middleware implements [`Middleware`] and is composed with
//! [`crate::handler::Builder`].

pub mod chunked;
pub mod common_logger;
pub mod conditional_get;
pub mod content_length;
pub mod head;
pub mod lint;
pub mod method_override;
pub mod recover;
pub mod recursive;
pub mod tempfile_reaper;

// Re-exports for convenience
pub use chunked::Chunked;
pub use common_logger::{CommonLogger, ACCESS_TARGET};
pub use conditional_get::{ConditionalGet, Validators};
pub use content_length::ContentLength;
pub use head::Head;
pub use lint::Lint;
pub use method_override::MethodOverride;
pub use recover::Recover;
pub use recursive::{include, Outcome, Recursive, RecursiveApp};
pub use tempfile_reaper::TempfileReaper;

pub use crate::handler::Middleware;
