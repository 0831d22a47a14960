use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::GenerationRequest;

/// Deterministic digest identifying a unique generation request
///
/// Two requests with the same fingerprint are the same unit of work: they
/// share one provider call and one cache entry. The digest covers provider,
/// model, prompt, dimensions, seed, extra parameters (sorted by key), and
/// the template content hash. Parameter insertion order never matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(#[serde(with = "hex_bytes")] [u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a request
    pub fn of(request: &GenerationRequest) -> Self {
        let mut hasher = Sha256::new();

        put(&mut hasher, b'p', request.provider.as_bytes());
        put(&mut hasher, b'm', request.model.as_bytes());
        put(&mut hasher, b't', request.prompt.as_bytes());
        hasher.update(request.width.to_be_bytes());
        hasher.update(request.height.to_be_bytes());

        match request.seed {
            Some(seed) => {
                hasher.update([1u8]);
                hasher.update(seed.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }

        // Sort parameters so insertion order is irrelevant. Values hash via
        // their canonical JSON encoding.
        let sorted: BTreeMap<&str, &serde_json::Value> =
            request.params.iter().map(|(k, v)| (k.as_str(), v)).collect();
        for (key, value) in sorted {
            put(&mut hasher, b'k', key.as_bytes());
            let encoded = serde_json::to_vec(value).unwrap_or_default();
            put(&mut hasher, b'v', &encoded);
        }

        match &request.template {
            Some(template) => put(&mut hasher, b'T', template.sha256.as_bytes()),
            None => hasher.update([0u8]),
        }

        Self(hasher.finalize().into())
    }

    /// Raw digest bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Length-prefixed field write, so adjacent fields can never collide
fn put(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(64);
        for byte in bytes {
            out.push_str(&format!("{byte:02x}"));
        }
        serializer.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.len() != 64 {
            return Err(serde::de::Error::custom("fingerprint must be 64 hex characters"));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(serde::de::Error::custom)?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(serde::de::Error::custom)?;
        }
        Ok(bytes)
    }
}
