//! Engine tunables.
//!
//! The engine is embedded, not configured from a file, but the handful of
//! knobs it exposes are kept in one `serde`-deserializable struct rather than
//! scattered constants, the way the applications in this pack keep their
//! tunables.

use serde::Deserialize;

/// The default fractional-index alphabet: 64 printable, non-whitespace
/// characters (`spec.md` §9 "Fractional-index alphabet").
pub const DEFAULT_ALPHABET: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Alphabet used to mint fractional indexes. Must be sorted and contain
    /// no duplicate characters; see [`crate::fractional_index`].
    pub fractional_index_alphabet: String,

    /// Gap length (in characters) between two neighboring indexes that
    /// triggers a rebalance pass (`spec.md` §9: "reserve a rebalance
    /// threshold (e.g. when any gap requires > 16 chars)").
    pub fractional_index_rebalance_threshold: usize,

    /// `δ` from `spec.md` §5 "Resource bounds": how many rows beyond
    /// `offset+limit` the top-K buffer may hold before a refill is needed,
    /// tolerating evictions without round-tripping to the source index on
    /// every single retraction.
    pub top_k_overprovision: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fractional_index_alphabet: DEFAULT_ALPHABET.to_string(),
            fractional_index_rebalance_threshold: 16,
            top_k_overprovision: 0,
        }
    }
}
