use crate::types::activation::TokenCountError;

/// Injected token-counting capability. Implementations may block (native or
/// remote tokenizers); failures abort the call instead of admitting uncounted
/// content.
pub trait TokenCounter {
    fn count_tokens(&self, content: &str) -> Result<usize, TokenCountError>;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> Result<usize, TokenCountError>,
{
    fn count_tokens(&self, content: &str) -> Result<usize, TokenCountError> {
        self(content)
    }
}

/// Approximate GPT-style tokenization
/// tokens(content) := ceil(len(content) / 4)
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count_tokens(&self, content: &str) -> Result<usize, TokenCountError> {
        // Integer division ceil(len / 4) equivalent to (len + 4 - 1) / 4
        Ok((content.len() + 3) / 4)
    }
}
