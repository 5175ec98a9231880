//! External capabilities the pipeline consumes: document conversion,
//! classification and text generation.
//!
//! The engine only sees these traits. Implementations live with the caller
//! (the CLI wires an external command as the generator).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regeneration::TokenBudget;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Document conversion failed for '{name}': {reason}")]
    Conversion { name: String, reason: String },

    #[error("Classification failed: {0}")]
    Classification(String),
}

/// Text produced by a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub tokens_used: u32,
}

pub trait ContentGenerator: Send + Sync {
    fn generate(&self, prompt: &str, budget: TokenBudget) -> Result<Generated, CapabilityError>;
}

pub trait DocumentConverter: Send + Sync {
    /// Turns an uploaded document into structured text.
    fn convert(&self, name: &str, raw: &str) -> Result<String, CapabilityError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f32,
}

pub trait DocumentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<Classification, CapabilityError>;
}

/// Normalizes line endings and trims; documents are already text.
pub struct PassthroughConverter;

impl DocumentConverter for PassthroughConverter {
    fn convert(&self, _name: &str, raw: &str) -> Result<String, CapabilityError> {
        Ok(raw.replace("\r\n", "\n").trim().to_string())
    }
}

/// Picks the category whose keywords occur most often.
pub struct KeywordClassifier {
    categories: Vec<(String, Vec<String>)>,
}

impl KeywordClassifier {
    pub fn new(categories: Vec<(String, Vec<String>)>) -> Self {
        Self { categories }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let table: [(&str, &[&str]); 4] = [
            (
                "technical",
                &["function", "code", "algorithm", "api", "software", "data"],
            ),
            (
                "business",
                &["market", "customer", "revenue", "strategy", "sales", "management"],
            ),
            (
                "science",
                &["experiment", "hypothesis", "theory", "energy", "cell", "research"],
            ),
            (
                "humanities",
                &["history", "culture", "language", "philosophy", "art", "society"],
            ),
        ];
        Self::new(
            table
                .iter()
                .map(|(name, words)| {
                    (
                        name.to_string(),
                        words.iter().map(|w| w.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

impl DocumentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Result<Classification, CapabilityError> {
        let lower = text.to_lowercase();
        let scores: Vec<(&str, usize)> = self
            .categories
            .iter()
            .map(|(name, words)| {
                let hits = words.iter().map(|w| lower.matches(w.as_str()).count()).sum();
                (name.as_str(), hits)
            })
            .collect();

        let total: usize = scores.iter().map(|(_, hits)| hits).sum();
        let best = scores
            .iter()
            .filter(|(_, hits)| *hits > 0)
            .max_by_key(|(_, hits)| *hits);

        Ok(match best {
            Some((name, hits)) => Classification {
                category: name.to_string(),
                confidence: *hits as f32 / total as f32,
            },
            None => Classification {
                category: "general".to_string(),
                confidence: 0.0,
            },
        })
    }
}

/// The capability set handed to stage handlers.
#[derive(Clone)]
pub struct Capabilities {
    pub generator: Arc<dyn ContentGenerator>,
    pub converter: Arc<dyn DocumentConverter>,
    pub classifier: Arc<dyn DocumentClassifier>,
}

impl Capabilities {
    /// Uses `generator` with the built-in converter and classifier.
    pub fn with_generator(generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            generator,
            converter: Arc::new(PassthroughConverter),
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }
}
