//! rollcall-core — In-memory face identification for attendance marking.
//!
//! Matches pre-normalized face embeddings against the enrolled roster of the
//! active class and gates matches behind a consecutive-hit counter with a
//! per-identity cooldown.

pub mod confirmation;
pub mod matcher;
pub mod types;

pub use confirmation::{
    ConfirmationPolicy, Gate, DEFAULT_COOLDOWN, DEFAULT_REQUIRED_CONFIRMATIONS,
};
pub use matcher::EmbeddingMatcher;
pub use types::{Embedding, EmbeddingError, MatchResult, DEFAULT_SIMILARITY_THRESHOLD};
