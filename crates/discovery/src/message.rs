//! Discovery datagram framing and the gossip message set (spec.md §4.G,
//! §6).
//!
//! Every datagram: `u8 message_type ‖ u8 proto_major ‖ u8 proto_minor ‖
//! varint-len ‖ cluster_name_bytes ‖ body`. Unknown major versions are
//! silently dropped; mismatched cluster names are ignored (both handled
//! by the caller, not this module — `decode` only reports what it saw).

use xapiand_core::node::Node;

use crate::error::{DiscoveryError, DiscoveryResult};

pub const PROTO_MAJOR: u8 = 1;
pub const PROTO_MINOR: u8 = 0;

const TYPE_HELLO: u8 = 0;
const TYPE_WAVE: u8 = 1;
const TYPE_SNEER: u8 = 2;
const TYPE_ENTER: u8 = 3;
const TYPE_BYE: u8 = 4;
const TYPE_DB_UPDATED: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// "I am here; anyone know this name?"
    Hello(Node),
    /// "Welcome" / affirmation that the proposed name is free.
    Wave(Node),
    /// "That name is taken by me."
    Sneer(Node),
    /// "I have joined."
    Enter(Node),
    /// Graceful departure.
    Bye(Node),
    /// "I committed this index."
    DbUpdated { node: Node, path: String },
}

impl Message {
    fn message_type(&self) -> u8 {
        match self {
            Message::Hello(_) => TYPE_HELLO,
            Message::Wave(_) => TYPE_WAVE,
            Message::Sneer(_) => TYPE_SNEER,
            Message::Enter(_) => TYPE_ENTER,
            Message::Bye(_) => TYPE_BYE,
            Message::DbUpdated { .. } => TYPE_DB_UPDATED,
        }
    }

    /// The node this message talks about — used to refresh
    /// `touched_at`/identify the sender (spec.md §4.G "Touching").
    pub fn node(&self) -> &Node {
        match self {
            Message::Hello(n) | Message::Wave(n) | Message::Sneer(n) | Message::Enter(n) | Message::Bye(n) => n,
            Message::DbUpdated { node, .. } => node,
        }
    }

    pub fn encode(&self, cluster_name: &str) -> DiscoveryResult<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        out.push(self.message_type());
        out.push(PROTO_MAJOR);
        out.push(PROTO_MINOR);
        write_varlen_str(&mut out, cluster_name);

        let node = self.node();
        let node_bytes = rmp_serde::to_vec(node).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        write_varlen_bytes(&mut out, &node_bytes);

        if let Message::DbUpdated { path, .. } = self {
            write_varlen_str(&mut out, path);
        }
        Ok(out)
    }

    /// Decode a datagram. Returns `(cluster_name, message)` so the caller
    /// can drop it if the name doesn't match the local cluster — decode
    /// itself does not know the local cluster name.
    pub fn decode(bytes: &[u8]) -> DiscoveryResult<(String, Message)> {
        if bytes.len() < 3 {
            return Err(DiscoveryError::Malformed("datagram shorter than preamble".into()));
        }
        let message_type = bytes[0];
        let proto_major = bytes[1];
        if proto_major != PROTO_MAJOR {
            return Err(DiscoveryError::UnsupportedVersion(proto_major));
        }
        let mut cursor = 3usize;
        let (cluster_name, n) = read_varlen_str(&bytes[cursor..])?;
        cursor += n;
        let (node_bytes, n) = read_varlen_bytes(&bytes[cursor..])?;
        cursor += n;
        let node: Node = rmp_serde::from_slice(&node_bytes).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        let message = match message_type {
            TYPE_HELLO => Message::Hello(node),
            TYPE_WAVE => Message::Wave(node),
            TYPE_SNEER => Message::Sneer(node),
            TYPE_ENTER => Message::Enter(node),
            TYPE_BYE => Message::Bye(node),
            TYPE_DB_UPDATED => {
                let (path, _) = read_varlen_str(&bytes[cursor..])?;
                Message::DbUpdated { node, path }
            }
            other => return Err(DiscoveryError::Malformed(format!("unknown message type {other}"))),
        };
        Ok((cluster_name, message))
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8]) -> DiscoveryResult<(u32, usize)> {
    let mut value: u32 = 0;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift > 28 {
            return Err(DiscoveryError::Malformed("varint too long".into()));
        }
    }
    Err(DiscoveryError::Malformed("truncated varint".into()))
}

fn write_varlen_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_varlen_str(out: &mut Vec<u8>, s: &str) {
    write_varlen_bytes(out, s.as_bytes());
}

fn read_varlen_bytes(bytes: &[u8]) -> DiscoveryResult<(Vec<u8>, usize)> {
    let (len, prefix_len) = read_varint(bytes)?;
    let len = len as usize;
    if bytes.len() < prefix_len + len {
        return Err(DiscoveryError::Malformed("truncated length-prefixed field".into()));
    }
    Ok((bytes[prefix_len..prefix_len + len].to_vec(), prefix_len + len))
}

fn read_varlen_str(bytes: &[u8]) -> DiscoveryResult<(String, usize)> {
    let (raw, n) = read_varlen_bytes(bytes)?;
    let s = String::from_utf8(raw).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    Ok((s, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new("n1", "127.0.0.1", 8880, 8890)
    }

    #[test]
    fn hello_round_trips() {
        let msg = Message::Hello(node());
        let encoded = msg.encode("my-cluster").unwrap();
        let (name, decoded) = Message::decode(&encoded).unwrap();
        assert_eq!(name, "my-cluster");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn db_updated_carries_path() {
        let msg = Message::DbUpdated {
            node: node(),
            path: "/idx/1".into(),
        };
        let encoded = msg.encode("c").unwrap();
        let (_, decoded) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::DbUpdated { path, .. } => assert_eq!(path, "/idx/1"),
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }

    #[test]
    fn unsupported_major_version_is_rejected() {
        let mut encoded = Message::Hello(node()).encode("c").unwrap();
        encoded[1] = 99;
        assert!(matches!(Message::decode(&encoded), Err(DiscoveryError::UnsupportedVersion(99))));
    }

    #[test]
    fn truncated_datagram_is_malformed() {
        assert!(matches!(Message::decode(&[1, 2]), Err(DiscoveryError::Malformed(_))));
    }
}
