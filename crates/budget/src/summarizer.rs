//! Content summarization used by the `summarize` adaptation strategy.
//!
//! The engine is synchronous, so summarizers are too. Any
//! `Fn(&str, usize) -> Result<String, SummarizeError>` closure is a
//! summarizer; [`ExtractiveSummarizer`] is the built-in one.

use crate::estimator::TokenEstimator;

/// Produces a shorter rendition of a memory's content.
pub trait Summarizer: Send + Sync {
    /// Summarize `content` into at most roughly `max_tokens` tokens.
    fn summarize(&self, content: &str, max_tokens: usize) -> Result<String, SummarizeError>;
}

impl<F> Summarizer for F
where
    F: Fn(&str, usize) -> Result<String, SummarizeError> + Send + Sync,
{
    fn summarize(&self, content: &str, max_tokens: usize) -> Result<String, SummarizeError> {
        self(content, max_tokens)
    }
}

/// Keeps leading sentences while they fit the target. If even the first
/// sentence is too long it is cut at a character boundary and marked with
/// an ellipsis.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer {
    estimator: TokenEstimator,
}

impl ExtractiveSummarizer {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }
}

impl Summarizer for ExtractiveSummarizer {
    fn summarize(&self, content: &str, max_tokens: usize) -> Result<String, SummarizeError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SummarizeError::EmptyInput);
        }
        if max_tokens == 0 {
            return Err(SummarizeError::Failed("target of zero tokens".into()));
        }

        let mut summary = String::new();
        for sentence in sentences(content) {
            let candidate = if summary.is_empty() {
                sentence.to_string()
            } else {
                format!("{summary} {sentence}")
            };
            if self.estimator.estimate(&candidate) > max_tokens {
                break;
            }
            summary = candidate;
        }

        if summary.is_empty() {
            let budget = self.estimator.chars_for(max_tokens);
            summary = if budget > 3 {
                let cut: String = content.chars().take(budget - 3).collect();
                format!("{}...", cut.trim_end())
            } else {
                content.chars().take(budget.max(1)).collect()
            };
        }

        Ok(summary)
    }
}

/// Split after `.`, `!` or `?` followed by whitespace.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next, n)) = chars.peek() {
            if n.is_whitespace() {
                out.push(text[start..next].trim());
                start = next;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out.retain(|s| !s.is_empty());
    out
}

/// Summarization errors. The adaptation strategy logs them and leaves the
/// memory unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SummarizeError {
    #[error("Nothing to summarize")]
    EmptyInput,

    #[error("Summarization failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sentences() {
        assert_eq!(
            sentences("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        assert_eq!(sentences("version 1.2 is out."), vec!["version 1.2 is out."]);
    }

    #[test]
    fn keeps_leading_sentences_within_target() {
        let summarizer = ExtractiveSummarizer::default();
        let text = "The deploy failed on Monday. Rollback took an hour. \
                    Root cause was a missing migration. Owners were notified.";
        let summary = summarizer.summarize(text, 15).unwrap();
        assert!(summary.starts_with("The deploy failed on Monday."));
        assert!(TokenEstimator::default().estimate(&summary) <= 15);
        assert!(summary.len() < text.len());
    }

    #[test]
    fn truncates_long_first_sentence() {
        let summarizer = ExtractiveSummarizer::default();
        let text = "a".repeat(400);
        let summary = summarizer.summarize(&text, 10).unwrap();
        assert!(summary.ends_with("..."));
        assert!(TokenEstimator::default().estimate(&summary) <= 10);
    }

    #[test]
    fn empty_input_is_an_error() {
        let summarizer = ExtractiveSummarizer::default();
        assert_eq!(summarizer.summarize("   ", 10), Err(SummarizeError::EmptyInput));
    }

    #[test]
    fn closures_are_summarizers() {
        let upper = |content: &str, _max: usize| -> Result<String, SummarizeError> {
            Ok(content.to_uppercase())
        };
        assert_eq!(Summarizer::summarize(&upper, "hi", 1).unwrap(), "HI");
    }
}
