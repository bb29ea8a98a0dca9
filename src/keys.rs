//! Vertex key codec and store key layout.
//!
//! A [`VertexKey`] is the opaque, totally ordered handle a vertex is
//! addressed by in the store. The encoding is one type-tag byte
//! followed by the identity payload; identity vertices carry a `u16`
//! big-endian provider-length prefix so the two string fields split
//! unambiguously. Node and identity keys can never collide because the
//! tag bytes differ.

use std::convert::TryInto;
use std::fmt;

use crate::error::{GestaltError, Result};
use crate::model::VertexId;
use crate::types::{IdentityId, NodeId, ProviderId};

const TAG_NODE: u8 = b'n';
const TAG_IDENTITY: u8 = b'i';

/// Table tag for the adjacency map (`matrix`).
pub(crate) const TABLE_MATRIX: u8 = b'm';
/// Table tag for node vertex metadata.
pub(crate) const TABLE_NODE_META: u8 = b'n';
/// Table tag for identity vertex metadata.
pub(crate) const TABLE_IDENTITY_META: u8 = b'i';
/// Table tag for the ACL `NodeId -> PermId` reference table.
pub(crate) const TABLE_ACL_REF: u8 = b'r';
/// Table tag for refcounted permission records.
pub(crate) const TABLE_ACL_PERM: u8 = b'p';
/// Key of the ACL permission-id counter.
pub(crate) const KEY_ACL_COUNTER: &[u8] = b"c";

/// Opaque encoded vertex key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexKey(Vec<u8>);

impl VertexKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the key back into a [`VertexId`].
    pub fn decode(&self) -> Result<VertexId> {
        decode_vertex_key(&self.0)
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VertexKey({})", hex::encode(&self.0))
    }
}

impl VertexId {
    /// Encodes this vertex id into its store key.
    ///
    /// Fails only when an identity's provider id exceeds the `u16`
    /// length prefix.
    pub fn to_key(&self) -> Result<VertexKey> {
        match self {
            VertexId::Node(id) => {
                let mut buf = Vec::with_capacity(1 + id.0.len());
                buf.push(TAG_NODE);
                buf.extend_from_slice(id.0.as_bytes());
                Ok(VertexKey(buf))
            }
            VertexId::Identity(provider, identity) => {
                let plen: u16 = provider.0.len().try_into().map_err(|_| {
                    GestaltError::InvalidKey(format!(
                        "provider id too long ({} bytes)",
                        provider.0.len()
                    ))
                })?;
                let mut buf = Vec::with_capacity(1 + 2 + provider.0.len() + identity.0.len());
                buf.push(TAG_IDENTITY);
                buf.extend_from_slice(&plen.to_be_bytes());
                buf.extend_from_slice(provider.0.as_bytes());
                buf.extend_from_slice(identity.0.as_bytes());
                Ok(VertexKey(buf))
            }
        }
    }
}

pub(crate) fn decode_vertex_key(bytes: &[u8]) -> Result<VertexId> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or_else(|| GestaltError::InvalidKey("empty vertex key".into()))?;
    match tag {
        TAG_NODE => {
            let id = std::str::from_utf8(rest)
                .map_err(|_| GestaltError::InvalidKey("node key is not utf-8".into()))?;
            Ok(VertexId::Node(NodeId(id.to_string())))
        }
        TAG_IDENTITY => {
            if rest.len() < 2 {
                return Err(GestaltError::InvalidKey(
                    "identity key shorter than its length prefix".into(),
                ));
            }
            let plen = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            let rest = &rest[2..];
            if rest.len() < plen {
                return Err(GestaltError::InvalidKey(format!(
                    "identity key declares {plen} provider bytes, has {}",
                    rest.len()
                )));
            }
            let provider = std::str::from_utf8(&rest[..plen])
                .map_err(|_| GestaltError::InvalidKey("provider id is not utf-8".into()))?;
            let identity = std::str::from_utf8(&rest[plen..])
                .map_err(|_| GestaltError::InvalidKey("identity id is not utf-8".into()))?;
            Ok(VertexId::Identity(
                ProviderId(provider.to_string()),
                IdentityId(identity.to_string()),
            ))
        }
        other => Err(GestaltError::InvalidKey(format!(
            "unknown vertex type tag 0x{other:02x}"
        ))),
    }
}

pub(crate) fn table_key(table: u8, suffix: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + suffix.len());
    buf.push(table);
    buf.extend_from_slice(suffix);
    buf
}

pub(crate) fn matrix_key(vertex: &VertexKey) -> Vec<u8> {
    table_key(TABLE_MATRIX, vertex.as_bytes())
}

pub(crate) fn node_meta_key(vertex: &VertexKey) -> Vec<u8> {
    table_key(TABLE_NODE_META, vertex.as_bytes())
}

pub(crate) fn identity_meta_key(vertex: &VertexKey) -> Vec<u8> {
    table_key(TABLE_IDENTITY_META, vertex.as_bytes())
}

pub(crate) fn acl_ref_key(node: &NodeId) -> Vec<u8> {
    table_key(TABLE_ACL_REF, node.0.as_bytes())
}

pub(crate) fn acl_perm_key(perm_id: u64) -> Vec<u8> {
    table_key(TABLE_ACL_PERM, &perm_id.to_be_bytes())
}

pub(crate) fn acl_counter_key() -> Vec<u8> {
    KEY_ACL_COUNTER.to_vec()
}

pub(crate) fn decode_perm_id(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| crate::error::corruption("permission id is not 8 bytes"))?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_round_trips() {
        let id = VertexId::Node(NodeId::from("vkdh1qjmrl4nc"));
        let key = id.to_key().unwrap();
        assert_eq!(key.as_bytes()[0], TAG_NODE);
        assert_eq!(key.decode().unwrap(), id);
    }

    #[test]
    fn identity_key_round_trips() {
        let id = VertexId::Identity(ProviderId::from("github.com"), IdentityId::from("alice"));
        let key = id.to_key().unwrap();
        assert_eq!(key.as_bytes()[0], TAG_IDENTITY);
        assert_eq!(key.decode().unwrap(), id);
    }

    #[test]
    fn identity_fields_split_unambiguously() {
        // Same concatenation, different split points.
        let a = VertexId::Identity(ProviderId::from("ab"), IdentityId::from("c"));
        let b = VertexId::Identity(ProviderId::from("a"), IdentityId::from("bc"));
        assert_ne!(a.to_key().unwrap(), b.to_key().unwrap());
    }

    #[test]
    fn variants_never_collide() {
        let node = VertexId::Node(NodeId::from("x"));
        let identity = VertexId::Identity(ProviderId::from(""), IdentityId::from("x"));
        assert_ne!(node.to_key().unwrap(), identity.to_key().unwrap());
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(decode_vertex_key(&[]).is_err());
        assert!(decode_vertex_key(&[b'z', 1, 2]).is_err());
        assert!(decode_vertex_key(&[TAG_IDENTITY, 0]).is_err());
        // Length prefix overruns the buffer.
        assert!(decode_vertex_key(&[TAG_IDENTITY, 0, 9, b'a']).is_err());
    }
}
