//! Workload naming
//!
//! Names must be deterministic per identity (so create/update address the
//! same object), legal for the API server (lowercase alphanumerics and `-`),
//! and must not collide between identities whose readable prefixes happen
//! to coincide. The readable part comes from `{app}-{space}`; uniqueness
//! comes from a hash of `{guid}-{version}`.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use lrp_common::{Lrp, Result};

/// Longest readable prefix kept before the hash suffix
const MAX_PREFIX_LEN: usize = 40;

/// Hex characters of the digest kept as suffix
const HASH_SUFFIX_LEN: usize = 10;

/// Capability turning an identity string into a name suffix
#[cfg_attr(test, mockall::automock)]
pub trait Hasher: Send + Sync {
    /// Hash `input` into a short, name-legal string
    fn hash(&self, input: &str) -> Result<String>;
}

/// SHA-256, hex encoded and truncated
#[derive(Clone, Copy, Debug, Default)]
pub struct TruncatedSha256Hasher;

impl Hasher for TruncatedSha256Hasher {
    fn hash(&self, input: &str) -> Result<String> {
        let digest = Sha256::digest(input.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(HASH_SUFFIX_LEN);
        Ok(encoded)
    }
}

/// Derives the workload name for an LRP
#[derive(Clone)]
pub struct NameStrategy {
    hasher: Arc<dyn Hasher>,
}

impl NameStrategy {
    /// Create a strategy backed by the given hasher
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self { hasher }
    }

    /// Workload name for `lrp`
    ///
    /// `{app}-{space}` lowercased and truncated, or the sanitized GUID when
    /// that prefix contains anything outside `[a-z0-9-]`, followed by the
    /// hash suffix.
    pub fn name(&self, lrp: &Lrp) -> Result<String> {
        let id = lrp.id();
        let suffix = self.hasher.hash(&format!("{}-{}", id.guid, id.version))?;

        let readable = format!("{}-{}", lrp.app_name, lrp.space_name).to_lowercase();
        let prefix = if is_name_legal(&readable) {
            truncate(&readable)
        } else {
            let guid = sanitize(&id.guid);
            if guid.is_empty() {
                "lrp".to_string()
            } else {
                truncate(&guid)
            }
        };

        Ok(format!("{}-{}", prefix, sanitize(&suffix)))
    }
}

fn is_name_legal(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
}

/// Lowercase and replace every illegal character with `-`, collapsing runs
/// and trimming hyphens at the edges.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase) {
        let legal = c.is_ascii_lowercase() || c.is_ascii_digit();
        if legal {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn truncate(s: &str) -> String {
    // Only ASCII reaches here, so byte slicing is safe
    let cut = &s[..s.len().min(MAX_PREFIX_LEN)];
    cut.trim_end_matches('-').to_string()
}
