//! Length-based token estimation.
//!
//! Exact tokenization is not needed for budgeting: a cheap, deterministic
//! proxy that grows with text length is enough to decide what fits.

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 2;

/// Estimate the cost of `text` as `ceil(chars / CHARS_PER_TOKEN)`, never
/// less than 1.
///
/// Counts Unicode scalar values, not bytes, so multi-byte scripts are not
/// over-charged.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}
