//! Digests over values overlays and applied manifest sets.

use sha2::{Digest, Sha256};

/// Digest of a values overlay. `serde_json::Value` objects serialize
/// with sorted keys, so equal overlays always digest equally.
pub fn values_digest(values: Option<&serde_json::Value>) -> String {
    let canonical = values
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string());
    hex_digest(canonical.as_bytes())
}

/// Hex-encoded sha256 of arbitrary bytes.
pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    out.iter().map(|b| format!("{b:02x}")).collect()
}
