//! Key material and identifiers
//!
//! A peer is addressed either by its peer ID (the 33-byte compressed
//! secp256k1 public key) or by its node ID (the 32-byte blake3 hash of the
//! compressed public key). Content and lookup keys are 32-byte blake3 hashes.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Length of a blake3 hash and of a node ID.
pub const HASH_SIZE: usize = 32;

/// Length of a compressed secp256k1 public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Errors while decoding user-supplied key material.
#[derive(Debug, Error)]
pub enum KeyParseError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("public key decoding failed")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("peer ID or node ID must be 66 or 64 hex characters, got {0}")]
    InvalidTargetLength(usize),
}

fn decode_fixed<const N: usize>(text: &str) -> Result<[u8; N], KeyParseError> {
    let bytes = hex::decode(text.trim())?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| KeyParseError::InvalidLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// 256-bit node identifier, blake3 of the compressed public key.
///
/// Equality is constant-time.
#[allow(clippy::derived_hash_with_manual_eq)]
#[derive(Clone, Copy, Hash)]
pub struct NodeId(pub [u8; HASH_SIZE]);

impl PartialEq for NodeId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for NodeId {}

impl NodeId {
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parse a 64 character hex string.
    pub fn from_hex(text: &str) -> Result<Self, KeyParseError> {
        decode_fixed(text).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", shorten_text(&self.to_hex(), 16))
    }
}

/// blake3 hash of a piece of content, also used as a DHT lookup key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256(pub [u8; HASH_SIZE]);

impl Hash256 {
    /// Hash arbitrary data.
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_hex(text: &str) -> Result<Self, KeyParseError> {
        decode_fixed(text).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", shorten_text(&self.to_hex(), 16))
    }
}

/// Compressed secp256k1 public key, validated to be a curve point.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Decode a compressed (or uncompressed) SEC1 encoded key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyParseError> {
        let point =
            k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| KeyParseError::InvalidPublicKey)?;
        Ok(Self::from_point(&point))
    }

    /// Decode a 66 character hex peer ID.
    pub fn from_hex(text: &str) -> Result<Self, KeyParseError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = decode_fixed(text)?;
        Self::from_bytes(&bytes)
    }

    fn from_point(point: &k256::PublicKey) -> Self {
        let encoded = point.to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        // A compressed point on the curve is always 33 bytes.
        bytes.copy_from_slice(encoded.as_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Node ID of this key: blake3 of the compressed encoding.
    pub fn node_id(&self) -> NodeId {
        NodeId(*blake3::hash(&self.0).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", shorten_text(&self.to_hex(), 16))
    }
}

/// A secp256k1 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut rand::rngs::OsRng))
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyParseError> {
        SecretKey::from_slice(bytes)
            .map(Self::from_secret)
            .map_err(|_| KeyParseError::InvalidPrivateKey)
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_point(&secret.public_key());
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn node_id(&self) -> NodeId {
        self.public.node_id()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// A peer addressed by the operator, either by peer ID or by node ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTarget {
    PublicKey(PublicKey),
    NodeId(NodeId),
}

impl PeerTarget {
    /// 66 hex characters name a peer ID, 64 name a node ID.
    pub fn parse(text: &str) -> Result<Self, KeyParseError> {
        let text = text.trim();
        match text.len() {
            66 => PublicKey::from_hex(text).map(Self::PublicKey),
            64 => NodeId::from_hex(text).map(Self::NodeId),
            other => Err(KeyParseError::InvalidTargetLength(other)),
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            Self::PublicKey(key) => key.node_id(),
            Self::NodeId(id) => *id,
        }
    }
}

/// Abbreviates long text to `max_length` characters around an ellipsis.
pub fn shorten_text(text: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < max_length {
        return text.to_string();
    }
    let half = max_length / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}...{tail}")
}

/// First 8 bytes of a key, hex encoded.
pub fn abbreviate_key(key: &[u8]) -> String {
    hex::encode(&key[..key.len().min(8)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_public_key_is_deterministic() {
        let pair = KeyPair::generate();
        let hex = pair.public_key().to_hex();

        let first = PeerTarget::parse(&hex).unwrap().node_id();
        let second = PeerTarget::parse(&hex).unwrap().node_id();

        assert_eq!(first, second);
        assert_eq!(first, pair.node_id());
    }

    #[test]
    fn test_node_id_is_blake3_of_compressed_key() {
        let pair = KeyPair::generate();
        let expected = blake3::hash(pair.public_key().as_bytes());
        assert_eq!(pair.node_id().as_bytes(), expected.as_bytes());
    }

    #[test]
    fn test_distinct_keys_have_distinct_node_ids() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_parse_target_by_node_id() {
        let id = NodeId::new([0xAB; 32]);
        let target = PeerTarget::parse(&id.to_hex()).unwrap();
        assert_eq!(target, PeerTarget::NodeId(id));
    }

    #[test]
    fn test_parse_target_rejects_other_lengths() {
        let err = PeerTarget::parse("abcd").unwrap_err();
        assert!(matches!(err, KeyParseError::InvalidTargetLength(4)));
    }

    #[test]
    fn test_parse_target_rejects_invalid_point_encoding() {
        // 0x05 is not a SEC1 tag.
        let text = format!("05{}", "11".repeat(32));
        let err = PeerTarget::parse(&text).unwrap_err();
        assert!(matches!(err, KeyParseError::InvalidPublicKey));
    }

    #[test]
    fn test_parse_target_rejects_bad_hex() {
        let text = "zz".repeat(32);
        assert!(matches!(
            PeerTarget::parse(&text),
            Err(KeyParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_hash_from_hex_requires_32_bytes() {
        assert!(Hash256::from_hex(&"aa".repeat(32)).is_ok());
        assert!(matches!(
            Hash256::from_hex(&"aa".repeat(31)),
            Err(KeyParseError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn test_key_pair_round_trips_secret() {
        let pair = KeyPair::generate();
        let secret = hex::decode(pair.secret_hex()).unwrap();
        let restored = KeyPair::from_secret_bytes(&secret).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());
    }

    #[test]
    fn test_shorten_text() {
        assert_eq!(shorten_text("abc", 8), "abc");
        assert_eq!(shorten_text("0123456789abcdef", 8), "0123...cdef");
    }

    #[test]
    fn test_abbreviate_key() {
        assert_eq!(abbreviate_key(&[0xAA; 32]), "aaaaaaaaaaaaaaaa");
        assert_eq!(abbreviate_key(&[1, 2]), "0102");
    }
}
