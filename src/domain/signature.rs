//! Content signature computation for deduplication.
//!
//! A signature identifies a class of events based on the values of a
//! configured field subset. Events with identical signatures within the
//! dedup window are considered duplicates. Correctness depends only on the
//! hash being deterministic, not on which algorithm produced it.

use crate::domain::event::Event;
use ahash::AHasher;
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Hash algorithm used to compute event signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// Fast non-cryptographic hashing (ahash). The default.
    #[default]
    Fast,
    /// SHA-256, truncated to 64 bits. For deployments that require a
    /// collision-resistant digest over attacker-influenced field values.
    Sha256,
}

/// A signature identifying a class of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventSignature(u64);

impl EventSignature {
    /// Compute the signature of an event over a field subset.
    ///
    /// Fields are hashed in name order (the event stores them sorted), so
    /// the configured field list's own order does not affect the result. An
    /// empty field list hashes every field of the event.
    ///
    /// Values are rendered through their compact JSON form before hashing,
    /// which is deterministic for identical values.
    pub fn of_event(event: &Event, fields: &[String], algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Fast => Self::fast_digest(event, fields),
            HashAlgorithm::Sha256 => Self::sha256_digest(event, fields),
        }
    }

    fn selected<'e>(
        event: &'e Event,
        fields: &'e [String],
    ) -> impl Iterator<Item = (&'e str, &'e serde_json::Value)> {
        event
            .fields()
            .filter(move |(name, _)| fields.is_empty() || fields.iter().any(|f| f == name))
    }

    fn fast_digest(event: &Event, fields: &[String]) -> Self {
        let mut hasher = AHasher::default();
        for (name, value) in Self::selected(event, fields) {
            name.hash(&mut hasher);
            value.to_string().hash(&mut hasher);
        }
        EventSignature(hasher.finish())
    }

    fn sha256_digest(event: &Event, fields: &[String]) -> Self {
        let mut hasher = Sha256::new();
        for (name, value) in Self::selected(event, fields) {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        EventSignature(u64::from_be_bytes(word))
    }

    /// Get the raw hash value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
