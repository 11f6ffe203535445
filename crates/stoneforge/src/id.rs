//! Element identifiers and hash-based id generation.
//!
//! Every persisted entity is addressed by an [`ElementId`] matching the
//! grammar `el-[0-9a-z]{3,8}` (lowercase base36 after the fixed `el-`
//! prefix). Branded wrappers ([`TaskId`], [`DocumentId`], ...) share the
//! grammar and exist so the type layer can track which kind of element an
//! id is expected to resolve to.
//!
//! Ids are content-derived: SHA-256 over the creating content plus a
//! timestamp and nonce, base36-encoded and truncated. Hash length adapts
//! to store size so short ids stay short while collisions stay rare.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

const ID_PREFIX: &str = "el-";
const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MIN_HASH_LEN: usize = 3;
const MAX_HASH_LEN: usize = 8;
const MAX_NONCE: u32 = 100;

/// Unique identifier for an element.
///
/// Wraps the id string in a newtype for type safety. The inner field is
/// private; construction goes through [`ElementId::parse`] (validating) or
/// [`IdGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Parses and validates an id against the `el-[0-9a-z]{3,8}` grammar.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidId`] if the string does not match.
    pub fn parse(s: impl Into<String>) -> crate::Result<Self> {
        let s = s.into();
        let Some(hash) = s.strip_prefix(ID_PREFIX) else {
            return Err(crate::Error::InvalidId(s));
        };
        let len_ok = (MIN_HASH_LEN..=MAX_HASH_LEN).contains(&hash.len());
        let chars_ok = hash
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        if !len_ok || !chars_ok {
            return Err(crate::Error::InvalidId(s));
        }
        Ok(Self(s))
    }

    /// Constructs an id without validation.
    ///
    /// For ids that are already known to be well-formed (loaded from a
    /// store this process wrote, or produced by [`IdGenerator`]).
    #[must_use]
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

macro_rules! branded_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub ElementId);

        impl $name {
            /// The underlying element id.
            #[must_use]
            pub fn as_element_id(&self) -> &ElementId {
                &self.0
            }

            /// The id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<ElementId> for $name {
            fn from(id: ElementId) -> Self {
                Self(id)
            }
        }

        impl From<$name> for ElementId {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = ElementId;

            fn deref(&self) -> &ElementId {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

branded_id!(
    /// Id of a task element.
    TaskId
);
branded_id!(
    /// Id of a document element.
    DocumentId
);
branded_id!(
    /// Id of a channel element.
    ChannelId
);
branded_id!(
    /// Id of a message element.
    MessageId
);
branded_id!(
    /// Id of a workflow element.
    WorkflowId
);
branded_id!(
    /// Id of a playbook element.
    PlaybookId
);
branded_id!(
    /// Id of an entity (actor) element.
    EntityId
);

/// Hash-based id generator with collision detection.
///
/// Hash length adapts to the registered population: small stores get
/// 3-character hashes, growing one character per size threshold up to 8.
/// Collisions retry with an incrementing nonce, then with a longer hash.
pub struct IdGenerator {
    existing: HashSet<String>,
    population: usize,
}

impl IdGenerator {
    /// Creates a generator that assumes `population` existing ids.
    #[must_use]
    pub fn new(population: usize) -> Self {
        Self {
            existing: HashSet::new(),
            population,
        }
    }

    /// Registers an existing id so it can never be produced again.
    pub fn register(&mut self, id: &ElementId) {
        self.existing.insert(id.as_str().to_string());
        self.population = self.population.max(self.existing.len());
    }

    /// Current assumed population (drives adaptive hash length).
    #[must_use]
    pub fn population(&self) -> usize {
        self.population
    }

    /// Generates a new unique id derived from the given content seed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Constraint`] if no unique id could be
    /// produced after exhausting nonces at the maximum hash length.
    pub fn generate(&mut self, seed: &str) -> crate::Result<ElementId> {
        let len = self.adaptive_len();

        for nonce in 0..MAX_NONCE {
            let candidate = Self::hash_id(seed, nonce, len);
            if !self.existing.contains(&candidate) {
                self.existing.insert(candidate.clone());
                self.population += 1;
                return Ok(ElementId::new_unchecked(candidate));
            }
        }

        // Every nonce collided at this length; widen the hash.
        for extra_len in (len + 1)..=MAX_HASH_LEN {
            let candidate = Self::hash_id(seed, 0, extra_len);
            if !self.existing.contains(&candidate) {
                self.existing.insert(candidate.clone());
                self.population += 1;
                return Ok(ElementId::new_unchecked(candidate));
            }
        }

        Err(crate::Error::Constraint(format!(
            "unable to generate unique id after {MAX_NONCE} attempts"
        )))
    }

    /// Hash length for the current population.
    ///
    /// Thresholds mirror the birthday bound for base36: 3 chars are safe
    /// under ~200 ids, 4 under ~1000, 5 under ~8000.
    fn adaptive_len(&self) -> usize {
        match self.population {
            0..=200 => MIN_HASH_LEN,
            201..=1000 => 4,
            1001..=8000 => 5,
            _ => 6,
        }
    }

    fn hash_id(seed: &str, nonce: u32, len: usize) -> String {
        let timestamp = Utc::now().timestamp_micros();
        let content = format!("{seed}|{timestamp}|{nonce}");

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();

        let mut hash = String::with_capacity(len);
        for byte in digest.iter().take(len) {
            hash.push(BASE36_CHARS[(*byte as usize) % 36] as char);
        }

        format!("{ID_PREFIX}{hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_valid_ids() {
        for valid in ["el-abc", "el-0z9", "el-a3f8", "el-abcdefgh"] {
            assert!(ElementId::parse(valid).is_ok(), "{valid} should parse");
        }
    }

    #[test]
    fn parse_rejects_bad_grammar() {
        for invalid in [
            "abc",          // no prefix
            "el-",          // empty hash
            "el-ab",        // too short
            "el-abcdefghi", // too long
            "el-ABC",       // uppercase
            "el-a_b",       // bad char
            "task-a3f8",    // wrong prefix
        ] {
            assert!(
                ElementId::parse(invalid).is_err(),
                "{invalid} should be rejected"
            );
        }
    }

    #[test]
    fn generated_ids_parse_and_are_unique() {
        let mut generator = IdGenerator::new(0);
        let mut seen = HashSet::new();
        for i in 0..500 {
            let id = generator.generate(&format!("seed-{i}")).unwrap();
            assert!(ElementId::parse(id.as_str()).is_ok());
            assert!(seen.insert(id), "duplicate id generated");
        }
    }

    #[test]
    fn hash_length_grows_with_population() {
        let small = IdGenerator::new(10);
        let medium = IdGenerator::new(500);
        let large = IdGenerator::new(5000);
        assert_eq!(small.adaptive_len(), 3);
        assert_eq!(medium.adaptive_len(), 4);
        assert_eq!(large.adaptive_len(), 5);
    }

    #[test]
    fn register_prevents_reuse() {
        let mut generator = IdGenerator::new(0);
        let id = generator.generate("seed").unwrap();

        let mut fresh = IdGenerator::new(0);
        fresh.register(&id);
        // A fresh generator cannot hand the registered id back out.
        for i in 0..100 {
            let next = fresh.generate(&format!("other-{i}")).unwrap();
            assert_ne!(next, id);
        }
    }

    #[test]
    fn branded_ids_deref_to_element_id() {
        let raw = ElementId::parse("el-a3f8").unwrap();
        let task_id = TaskId::from(raw.clone());
        assert_eq!(task_id.as_str(), "el-a3f8");
        assert_eq!(task_id.as_element_id(), &raw);
    }
}
