//! Content variation - optional per-recipient rewrite of composed content

mod openai;

pub use openai::OpenAiVariation;

use async_trait::async_trait;
use thiserror::Error;

/// Content variation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariationError {
    #[error("Variation request failed: {0}")]
    Request(String),

    #[error("Variation service returned an unusable reply: {0}")]
    InvalidResponse(String),

    #[error("Variation timed out after {0} ms")]
    Timeout(u64),
}

/// Content variation service trait
#[async_trait]
pub trait ContentVariation: Send + Sync {
    /// Rewrite `base` into a unique paraphrase with the same intent
    async fn rewrite(&self, base: &str, hints: Option<&str>) -> Result<String, VariationError>;
}
