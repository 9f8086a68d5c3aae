use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash of the code and constructor arguments of a component.
///
/// Two deployments with the same fingerprint are interchangeable, so a recorded
/// fingerprint equal to the current one means the component does not need to be
/// deployed again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of linked creation code and ABI-encoded constructor arguments.
    ///
    /// Both parts are length-prefixed so that moving bytes between the code and the
    /// arguments always changes the hash.
    pub fn compute(code: &[u8], encoded_args: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((code.len() as u64).to_be_bytes());
        hasher.update(code);
        hasher.update((encoded_args.len() as u64).to_be_bytes());
        hasher.update(encoded_args);
        let result = hasher.finalize();

        Self(hex::encode(result))
    }

    /// Fingerprint of code deployed without constructor arguments.
    pub fn of_code(code: &[u8]) -> Self {
        Self::compute(code, &[])
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52, 0x34, 0x80, 0x15];

    #[test]
    fn test_fingerprint_determinism() {
        let args = [0u8; 32];

        let hash1 = Fingerprint::compute(CODE, &args);
        let hash2 = Fingerprint::compute(CODE, &args);

        assert_eq!(hash1, hash2, "Fingerprint should be deterministic");
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_fingerprint_changes_with_code() {
        let mut other = CODE.to_vec();
        other.push(0x00);

        assert_ne!(
            Fingerprint::of_code(CODE),
            Fingerprint::of_code(&other),
            "Fingerprint should change when the code changes"
        );
    }

    #[test]
    fn test_fingerprint_changes_with_args() {
        let mut args = [0u8; 32];
        let before = Fingerprint::compute(CODE, &args);
        args[31] = 6;

        assert_ne!(
            before,
            Fingerprint::compute(CODE, &args),
            "Fingerprint should change when constructor arguments change"
        );
    }

    #[test]
    fn test_fingerprint_separates_code_and_args() {
        // Same concatenated bytes, different split.
        let a = Fingerprint::compute(&CODE[..4], &CODE[4..]);
        let b = Fingerprint::compute(&CODE[..5], &CODE[5..]);

        assert_ne!(a, b);
    }

    #[test]
    fn test_short_prefix() {
        let fingerprint = Fingerprint::of_code(CODE);
        assert_eq!(fingerprint.short().len(), 8);
        assert!(fingerprint.starts_with(fingerprint.short()));
    }
}
