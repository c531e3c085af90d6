pub mod error;

pub use error::{DocsiftError, ErrorCategory, ErrorClassifier, LlmError, Result};
