//! AI backend implementations.

mod gemini;
mod traits;

pub use gemini::GeminiClient;
pub use traits::{AiClient, AiError, ClassifyOutcome, ClassifyRequest, Result, SummarizeRequest};

#[cfg(test)]
pub use traits::MockAiClient;
