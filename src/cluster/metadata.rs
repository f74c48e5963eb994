//! Node metadata wire format.
//!
//! Every node attaches a small blob to its gossip membership entry. Backends advertise
//! `{kind: "backend", applications: [...]}` and load balancers advertise `{kind: "load-balancer"}`.
//! The record is json encoded and then deflate compressed, since the transport caps the blob at
//! [`MAX_METADATA_SIZE`] bytes.
//!
//! Decoding never panics: truncated, corrupted or unknown blobs all come back as [`Error::Decode`].
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{
    error::{Error, Result},
    types::Application,
};

/// Upper bound the gossip transport places on per-node metadata.
pub const MAX_METADATA_SIZE: usize = 512;

/// Decompressed payloads larger than this are rejected instead of being fully inflated.
const MAX_DECODED_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NodeKind {
    Backend,
    LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<Application>,
}

impl NodeMetadata {
    pub fn backend(applications: Vec<Application>) -> Self {
        Self {
            kind: NodeKind::Backend,
            applications,
        }
    }

    pub fn load_balancer() -> Self {
        Self {
            kind: NodeKind::LoadBalancer,
            applications: Vec::new(),
        }
    }

    pub fn is_backend(&self) -> bool {
        self.kind == NodeKind::Backend
    }
}

/// Serializes and compresses the given metadata.
pub fn encode(metadata: &NodeMetadata) -> Result<Bytes> {
    let raw = serde_json::to_vec(metadata).map_err(|e| Error::Config {
        reason: format!("unable to serialize node metadata - {}", e),
    })?;

    let mut encoder = DeflateEncoder::new(Vec::with_capacity(raw.len()), Compression::best());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    Ok(Bytes::from(compressed))
}

/// Decompresses and deserializes a blob received from a peer.
pub fn decode(buf: &[u8]) -> Result<NodeMetadata> {
    if buf.is_empty() {
        return Err(Error::Decode {
            reason: "empty metadata".to_string(),
        });
    }

    let mut raw = Vec::new();
    DeflateDecoder::new(buf)
        .take(MAX_DECODED_SIZE + 1)
        .read_to_end(&mut raw)
        .map_err(|e| Error::Decode {
            reason: format!("unable to decompress metadata - {}", e),
        })?;

    if raw.len() as u64 > MAX_DECODED_SIZE {
        return Err(Error::Decode {
            reason: format!("decompressed metadata exceeds {} bytes", MAX_DECODED_SIZE),
        });
    }

    serde_json::from_slice(&raw).map_err(|e| Error::Decode {
        reason: format!("unable to parse metadata - {}", e),
    })
}
