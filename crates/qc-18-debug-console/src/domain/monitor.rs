//! Monitor keys
//!
//! A monitor key is an opaque byte sequence compared by exact equality.
//! Two reserved values act as "all events of this class" switches and live
//! in the same registry as ordinary keys. Peer and lookup keys are always
//! 32 bytes, the sentinels are not, so they cannot collide.

use crate::domain::keys::{Hash256, NodeId};
use bytes::Bytes;
use std::borrow::Borrow;
use std::fmt;

/// Reserved key enabling traces of every outgoing search.
pub const ALL_SEARCHES: &[u8] = b"\0monitor/all-searches";

/// Reserved key enabling traces of every incoming information request.
pub const ALL_INCOMING_REQUESTS: &[u8] = b"\0monitor/all-incoming-requests";

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MonitorKey(Bytes);

impl MonitorKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    pub fn all_searches() -> Self {
        Self(Bytes::from_static(ALL_SEARCHES))
    }

    pub fn all_incoming_requests() -> Self {
        Self(Bytes::from_static(ALL_INCOMING_REQUESTS))
    }

    pub fn is_sentinel(&self) -> bool {
        self.as_bytes() == ALL_SEARCHES || self.as_bytes() == ALL_INCOMING_REQUESTS
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Lets the registry be queried with a plain `&[u8]` without building a key.
impl Borrow<[u8]> for MonitorKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<NodeId> for MonitorKey {
    fn from(id: NodeId) -> Self {
        Self::from_slice(id.as_bytes())
    }
}

impl From<Hash256> for MonitorKey {
    fn from(hash: Hash256) -> Self {
        Self::from_slice(hash.as_bytes())
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bytes() {
            ALL_SEARCHES => f.write_str("all searches"),
            ALL_INCOMING_REQUESTS => f.write_str("all incoming requests"),
            bytes => f.write_str(&hex::encode(bytes)),
        }
    }
}

impl fmt::Debug for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonitorKey({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sentinels_are_distinct_and_flagged() {
        assert_ne!(MonitorKey::all_searches(), MonitorKey::all_incoming_requests());
        assert!(MonitorKey::all_searches().is_sentinel());
        assert!(!MonitorKey::from(NodeId::new([0; 32])).is_sentinel());
    }

    #[test]
    fn test_lookup_by_borrowed_slice() {
        let mut set = HashSet::new();
        set.insert(MonitorKey::from(Hash256([7; 32])));
        assert!(set.contains(&[7u8; 32][..]));
        assert!(set.contains(Hash256([7; 32]).as_ref()));
    }

    #[test]
    fn test_display() {
        assert_eq!(MonitorKey::all_searches().to_string(), "all searches");
        assert_eq!(MonitorKey::from_slice(&[0xab, 0x01]).to_string(), "ab01");
    }
}
