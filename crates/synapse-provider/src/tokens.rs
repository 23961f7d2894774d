//! Context-size estimation.
//!
//! The budget check runs before every workflow turn, so it has to be cheap:
//! the usual ~4 chars/token heuristic is close enough for an 80k threshold.

/// Estimated token count of a text.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
