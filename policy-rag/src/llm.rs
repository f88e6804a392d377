//! Language model trait used by the answer composer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A text-in, text-out language model.
///
/// Providers make no promise about the shape of the returned text; the
/// [`extract_answer`](crate::extract_answer) chain turns it into a
/// [`StructuredAnswer`](crate::StructuredAnswer).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name, used in logs.
    fn name(&self) -> &str;

    /// Generate a completion for a single prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt).await
    }
}
