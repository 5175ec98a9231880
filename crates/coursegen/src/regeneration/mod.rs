//! Scoped regeneration: instruction tiers, lesson section parsing/merging and
//! location hints.

pub mod document;
pub mod location;
pub mod tier;

pub use document::{check_lesson_size, estimate_tokens, parse_document, ParsedDocument, Section};
pub use location::location_to_section_id;
pub use tier::{token_budget, ContextTier, TierClassifier, TokenBudget};
