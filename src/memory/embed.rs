//! Text embedding for semantic recall.
//!
//! The default [`LexicalEmbedder`] is a deterministic, dependency-free
//! stand-in for a sentence model:
//!
//! ```text
//! text → lowercase tokens → { token buckets (SHA-256) , concept buckets } → L2-normalize
//! ```
//!
//! The first `CONCEPTS.len()` dimensions are reserved for concept buckets, so
//! related words ("milk", "grocery", "shopping") land on a shared axis while
//! unrelated concepts never collide.  Token buckets hash into the remaining
//! dimensions.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MemoryError;

/// Default output width.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Smallest width the lexical embedder accepts: one past the concept axes.
pub const MIN_DIMENSIONS: usize = CONCEPTS.len() + 1;

const TOKEN_WEIGHT: f32 = 1.0;
const CONCEPT_WEIGHT: f32 = 2.0;

/// Concept name → member words.
const CONCEPTS: &[(&str, &[&str])] = &[
    (
        "groceries",
        &[
            "buy", "milk", "grocery", "groceries", "shopping", "shop", "store", "bread", "eggs",
            "food", "supermarket", "vegetables", "fruit",
        ],
    ),
    (
        "finance",
        &["pay", "rent", "bill", "bills", "bank", "money", "budget", "invoice", "tax", "taxes"],
    ),
    (
        "health",
        &[
            "doctor", "dentist", "gym", "exercise", "workout", "run", "medicine", "sleep",
            "appointment",
        ],
    ),
    (
        "work",
        &["meeting", "email", "report", "deadline", "project", "review", "standup", "presentation"],
    ),
    (
        "home",
        &["clean", "laundry", "dishes", "repair", "fix", "garden", "vacuum", "trash"],
    ),
    (
        "social",
        &["call", "friend", "family", "mom", "dad", "birthday", "party", "dinner", "visit"],
    ),
    (
        "travel",
        &["flight", "hotel", "trip", "train", "pack", "passport", "travel", "booking"],
    ),
    (
        "planning",
        &["plan", "checkin", "morning", "today", "week", "schedule", "priorities", "goals"],
    ),
];

/// Turns text into a fixed-width vector.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Feature-hashing embedder with a built-in concept lexicon.
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dims: usize,
}

impl LexicalEmbedder {
    pub fn new(dims: usize) -> Result<Self, MemoryError> {
        if dims < MIN_DIMENSIONS {
            return Err(MemoryError::Embedding(format!(
                "lexical embedder needs more than {} dimensions, got {dims}",
                CONCEPTS.len()
            )));
        }
        Ok(Self { dims })
    }

    fn token_bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let span = (self.dims - CONCEPTS.len()) as u64;
        CONCEPTS.len() + (u64::from_le_bytes(head) % span) as usize
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self {
            dims: DEFAULT_DIMENSIONS,
        }
    }
}

impl Embedder for LexicalEmbedder {
    fn dimensions(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut v = vec![0.0f32; self.dims];
        let mut tokens = 0usize;

        for token in tokenize(text) {
            tokens += 1;
            v[self.token_bucket(&token)] += TOKEN_WEIGHT;
            for (axis, (_, words)) in CONCEPTS.iter().enumerate() {
                if words.contains(&token.as_str()) {
                    v[axis] += CONCEPT_WEIGHT;
                }
            }
        }

        if tokens == 0 {
            return Err(MemoryError::Embedding(
                "text has no indexable tokens".to_string(),
            ));
        }
        Ok(l2_normalize(&v))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Scale `v` to unit length.  A zero vector is returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity in `[-1, 1]`; 0 when either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Distance used by an index.  Fixed for the lifetime of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cos(a, b)`.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
            Metric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(format!("unknown metric '{other}' (expected cosine or l2)")),
        }
    }
}
