//! Shared sync codes
//!
//! A sync code is the only secret a group of devices shares. It is chosen by a
//! person (or proposed by [`SharedCode::generate`]) in the form
//! `adjective-noun-number`, e.g. `happy-cat-482`.

use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ADJECTIVES: &[&str] = &[
    "happy", "sunny", "brave", "calm", "cool", "kind", "wise", "fast", "neat", "blue", "red",
    "gold", "swift", "bold", "safe", "glad", "epic", "free",
];

const NOUNS: &[&str] = &[
    "cat", "dog", "bird", "lion", "wolf", "moon", "star", "tree", "wave", "leaf", "wind", "fire",
    "snow", "rain", "ship", "code", "data", "byte",
];

/// Errors for user-supplied codes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("Sync code must not be empty")]
    Empty,
}

/// Human-memorable group secret.
///
/// Surrounding whitespace is trimmed; the remaining text is used verbatim
/// for derivation, so `Happy-Cat-482` and `happy-cat-482` are different groups.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SharedCode(String);

impl SharedCode {
    pub fn new(code: &str) -> Result<Self, CodeError> {
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(CodeError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Propose a fresh code using the thread-local RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Propose a fresh code from the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // Both word lists are non-empty constants.
        let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("happy");
        let noun = NOUNS.choose(rng).copied().unwrap_or("cat");
        let number: u16 = rng.gen_range(100..=999);
        Self(format!("{}-{}-{}", adjective, noun, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SharedCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for SharedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// The code is a secret; keep it out of debug output.
impl fmt::Debug for SharedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedCode(<redacted>)")
    }
}
