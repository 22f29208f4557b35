//! Identity allocation: collision-free entity names.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore as _, SeedableRng as _};

use std::collections::BTreeSet;

pub const SUFFIX_LEN: usize = 10;

/// Source of high-entropy name suffixes.
pub trait NameSource: Send {
    fn next_suffix(&mut self) -> String;
}

/// First ten hex digits of a random UUIDv4.
#[derive(Debug, Default)]
pub struct UuidNames;

impl NameSource for UuidNames {
    fn next_suffix(&mut self) -> String {
        let mut hex = uuid::Uuid::new_v4().simple().to_string();
        hex.truncate(SUFFIX_LEN);
        hex
    }
}

/// Reproducible suffixes from a ChaCha20 stream keyed by `blake3(seed)`.
#[derive(Debug)]
pub struct SeededNames {
    rng: ChaCha20Rng,
}

impl SeededNames {
    pub fn new(seed: u64) -> Self {
        let seed32: [u8; 32] = *blake3::hash(&seed.to_le_bytes()).as_bytes();
        Self {
            rng: ChaCha20Rng::from_seed(seed32),
        }
    }
}

impl NameSource for SeededNames {
    fn next_suffix(&mut self) -> String {
        let mut bytes = [0u8; SUFFIX_LEN / 2];
        self.rng.fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

pub fn name_source_for(seed: Option<u64>) -> Box<dyn NameSource> {
    match seed {
        Some(seed) => Box::new(SeededNames::new(seed)),
        None => Box::new(UuidNames),
    }
}

pub struct NameAllocator {
    prefix: String,
    source: Box<dyn NameSource>,
}

impl std::fmt::Debug for NameAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameAllocator").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>, source: Box<dyn NameSource>) -> Self {
        Self {
            prefix: prefix.into(),
            source,
        }
    }

    /// Re-rolls until the candidate is not in `taken`.
    pub fn allocate(&mut self, taken: &BTreeSet<String>) -> String {
        loop {
            let candidate = format!("{}{}", self.prefix, self.source.next_suffix());
            if !taken.contains(&candidate) {
                return candidate;
            }
            tracing::debug!(candidate = %candidate, "generated name already taken; re-rolling");
        }
    }
}
