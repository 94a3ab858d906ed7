use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-addressable key for embeddings and vector points.
///
/// A cryptographic hash of `(provider, model, normalized(message))`. Two
/// semantically identical prompts on the same model yield the same
/// fingerprint, which is the basis for the embedding cache in
/// `castellan-embedder` and the vector point id in `castellan-vectorstore`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `provider`/`model`/`text`.
    ///
    /// `text` is normalized (trimmed, internal whitespace collapsed, cased
    /// to lowercase) before hashing so that trivially different renderings
    /// of the same prompt collide.
    pub fn new(provider: &str, model: &str, text: &str) -> Self {
        let normalized = normalize(text);
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update(b"\0");
        hasher.update(model.as_bytes());
        hasher.update(b"\0");
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Borrow the hex-encoded digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_prompts_collide() {
        let a = Fingerprint::new("local-model-server", "llama3", "  Hello   World  ");
        let b = Fingerprint::new("local-model-server", "llama3", "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_models_diverge() {
        let a = Fingerprint::new("local-model-server", "llama3", "hello world");
        let b = Fingerprint::new("remote-chat-api", "llama3", "hello world");
        assert_ne!(a, b);
    }

    #[test]
    fn stable_across_calls() {
        let a = Fingerprint::new("p", "m", "text");
        let b = Fingerprint::new("p", "m", "text");
        assert_eq!(a.as_str(), b.as_str());
    }

    proptest::proptest! {
        /// Same inputs always hash to the same fingerprint, regardless of
        /// what the inputs actually are.
        #[test]
        fn deterministic(provider in ".*", model in ".*", text in ".*") {
            let a = Fingerprint::new(&provider, &model, &text);
            let b = Fingerprint::new(&provider, &model, &text);
            proptest::prop_assert_eq!(a, b);
        }

        /// Leading/trailing whitespace and case never change the fingerprint.
        #[test]
        fn whitespace_and_case_insensitive(text in "[a-zA-Z ]{1,40}") {
            let padded = format!("  {}  ", text.to_uppercase());
            let a = Fingerprint::new("p", "m", &text.to_lowercase());
            let b = Fingerprint::new("p", "m", &padded);
            proptest::prop_assert_eq!(a, b);
        }
    }
}
