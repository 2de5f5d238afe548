//! Content-addressed cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Identifies a rendered document in the external store.
///
/// The key is `<namespace>:<hex sha-256>`, where the digest covers the HTML
/// document and a canonical encoding of its render options. Identical input
/// always derives the identical key; keys are fixed-length and safe to log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey(String);

impl ContentKey {
    /// Derive the key for a document under the given namespace.
    ///
    /// `options_fingerprint` is a canonical string for the render options
    /// (see `PdfOptions::fingerprint`), separated from the document bytes by a
    /// zero byte so the two fields can never alias each other.
    pub fn derive(namespace: &str, content: &str, options_fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
        hasher.update(options_fingerprint.as_bytes());
        Self(format!("{namespace}:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<html><body>A</body></html>";

    #[test]
    fn derivation_is_deterministic() {
        let first = ContentKey::derive("pdf", DOC, "A4|0.5in");
        let second = ContentKey::derive("pdf", DOC, "A4|0.5in");
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_documents_derive_distinct_keys() {
        let first = ContentKey::derive("pdf", DOC, "A4|0.5in");
        let second = ContentKey::derive("pdf", "<html><body>B</body></html>", "A4|0.5in");
        assert_ne!(first, second);
    }

    #[test]
    fn distinct_options_derive_distinct_keys() {
        let portrait = ContentKey::derive("pdf", DOC, "A4|0.5in");
        let letter = ContentKey::derive("pdf", DOC, "Letter|0.5in");
        assert_ne!(portrait, letter);
    }

    #[test]
    fn fields_cannot_alias_across_the_separator() {
        let first = ContentKey::derive("pdf", "abc", "def");
        let second = ContentKey::derive("pdf", "abcd", "ef");
        assert_ne!(first, second);
    }

    #[test]
    fn key_is_namespaced_fixed_length_hex() {
        let key = ContentKey::derive("pdf", DOC, "A4|0.5in");
        let (namespace, digest) = key.as_str().split_once(':').expect("namespaced key");
        assert_eq!(namespace, "pdf");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn no_collisions_across_bounded_fuzz_inputs() {
        use std::collections::HashSet;

        let mut inputs = HashSet::new();
        inputs.insert(String::new());
        for len in 1..64usize {
            for seed in 0..16u8 {
                let content: String = (0..len)
                    .map(|i| char::from(b'a' + ((i as u8 + seed) % 26)))
                    .collect();
                inputs.insert(content);
            }
        }

        let keys: HashSet<ContentKey> = inputs
            .iter()
            .map(|content| ContentKey::derive("pdf", content, "A4|0.5in"))
            .collect();
        assert_eq!(keys.len(), inputs.len());
    }
}
