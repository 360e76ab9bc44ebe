// Configuration errors: invalid parameter combinations and unknown choices.
// Raised at construction time, never retried.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("doc_size must be positive")]
    ZeroDocSize,

    #[error("doc_size must be even (each step emits an x/y pair), got {0}")]
    OddDocSize(usize),

    #[error("num_xws must be at least 2 to form a pair for scoring, got {0}")]
    TooFewXws(usize),

    #[error("num_xws ({num_xws}) must be smaller than num_types ({num_types})")]
    TooManyXws { num_xws: usize, num_types: usize },

    #[error("num_fragments must be at least 1")]
    ZeroFragments,

    #[error("num_fragments ({num_fragments}) exceeds the number of y-words ({num_yws})")]
    TooManyFragments { num_fragments: usize, num_yws: usize },

    #[error("num_fragments ({num_fragments}) does not divide the number of y-words ({num_yws}) evenly")]
    UnevenFragments { num_fragments: usize, num_yws: usize },

    #[error("period_probability must lie in [0, 1], got {0}")]
    PeriodProbability(f64),

    #[error("alpha must be positive and finite, got {0}")]
    Alpha(f64),

    #[error("{0} must be positive")]
    ZeroParam(&'static str),

    #[error("invalid {param} '{value}' (expected one of: {allowed})")]
    UnknownChoice {
        param: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("document has {found} types but the vocabulary is limited to {limit}")]
    VocabOverflow { found: usize, limit: usize },

    #[error("token '{0}' is not in the vocabulary")]
    UnknownToken(String),
}
