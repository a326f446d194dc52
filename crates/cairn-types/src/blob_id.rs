use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte blob identifier computed as BLAKE2b-256 of the blob contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(pub [u8; 32]);

impl BlobId {
    /// Compute the content address of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlobId(out)
    }

    /// Hex-encode the full blob ID.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a BlobId from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(BlobId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Trees and snapshots are canonical JSON, so the ID is stored as a hex
// string rather than a byte array.
impl Serialize for BlobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlobId::from_hex(&s).map_err(D::Error::custom)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_deterministic() {
        let data = b"hello world";
        let id1 = BlobId::compute(data);
        let id2 = BlobId::compute(data);
        assert_eq!(id1, id2);
    }

    #[test]
    fn compute_different_data_different_id() {
        let id1 = BlobId::compute(b"hello");
        let id2 = BlobId::compute(b"world");
        assert_ne!(id1, id2);
    }

    #[test]
    fn hex_roundtrip() {
        let id = BlobId::compute(b"roundtrip");
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(BlobId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(BlobId::from_hex("zz").is_err());
        assert!(BlobId::from_hex("ab").is_err());
    }

    #[test]
    fn serde_as_hex_string() {
        let id = BlobId([0xAB; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn empty_data_produces_valid_id() {
        let id = BlobId::compute(b"");
        assert_ne!(id.0, [0u8; 32]);
    }
}
