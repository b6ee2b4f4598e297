//! Serializable snapshots of a [`ForkDB`].
//!
//! A snapshot captures the parent links, the block numbers, the attached
//! payloads (as a tagged union of supported shapes) and the LIB reference.
//! Restoring a snapshot yields a database that answers every read-only
//! query identically.

use crate::ForkDB;
use bytes::Bytes;
use chainstream_types::{BlockNum, BlockRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The payload shapes a snapshot can carry per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPayload {
    /// An opaque byte payload.
    RawBytes(Bytes),
    /// A JSON document.
    JsonString(String),
    /// A protobuf `Any`-style payload: a type url plus its encoded bytes.
    ProtobufAny {
        /// The type url identifying the encoded message.
        type_url: String,
        /// The encoded message bytes.
        value: Bytes,
    },
}

impl From<Bytes> for SnapshotPayload {
    fn from(bytes: Bytes) -> Self {
        Self::RawBytes(bytes)
    }
}

impl From<Vec<u8>> for SnapshotPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::RawBytes(bytes.into())
    }
}

impl From<String> for SnapshotPayload {
    fn from(json: String) -> Self {
        Self::JsonString(json)
    }
}

impl TryFrom<SnapshotPayload> for Bytes {
    type Error = PayloadKindError;

    fn try_from(payload: SnapshotPayload) -> Result<Self, Self::Error> {
        match payload {
            SnapshotPayload::RawBytes(bytes) => Ok(bytes),
            _ => Err(PayloadKindError { expected: "raw_bytes" }),
        }
    }
}

impl TryFrom<SnapshotPayload> for String {
    type Error = PayloadKindError;

    fn try_from(payload: SnapshotPayload) -> Result<Self, Self::Error> {
        match payload {
            SnapshotPayload::JsonString(json) => Ok(json),
            _ => Err(PayloadKindError { expected: "json_string" }),
        }
    }
}

/// A payload variant did not match the expected shape.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("payload variant mismatch, expected {expected}")]
pub struct PayloadKindError {
    expected: &'static str,
}

/// Errors taking or restoring snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A node payload could not be converted back to the target type.
    #[error("restoring payload for block {id}: {reason}")]
    Payload {
        /// The node id whose payload failed to convert.
        id: String,
        /// The conversion failure.
        reason: String,
    },

    /// The snapshot could not be serialized or deserialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// The serializable form of a [`ForkDB`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkDbSnapshot {
    /// Parent links: block id to previous block id.
    pub links: HashMap<String, String>,
    /// Block numbers by id.
    pub nums: HashMap<String, BlockNum>,
    /// Attached payloads by id.
    pub objects: HashMap<String, SnapshotPayload>,
    /// The LIB reference at snapshot time.
    pub lib_ref: BlockRef,
}

impl ForkDbSnapshot {
    /// Serialize the snapshot to JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<T> ForkDB<T> {
    /// Capture a snapshot of the database.
    pub fn snapshot(&self) -> ForkDbSnapshot
    where
        T: Clone + Into<SnapshotPayload>,
    {
        ForkDbSnapshot {
            links: self.links().clone(),
            nums: self.nums().clone(),
            objects: self
                .objects()
                .iter()
                .map(|(id, obj)| (id.clone(), obj.clone().into()))
                .collect(),
            lib_ref: self.lib_ref().clone(),
        }
    }

    /// Rebuild a database from a snapshot.
    pub fn restore(snapshot: ForkDbSnapshot) -> Result<Self, SnapshotError>
    where
        T: TryFrom<SnapshotPayload>,
        T::Error: std::fmt::Display,
    {
        let mut objects = HashMap::with_capacity(snapshot.objects.len());
        for (id, payload) in snapshot.objects {
            let obj = T::try_from(payload)
                .map_err(|e| SnapshotError::Payload { id: id.clone(), reason: e.to_string() })?;
            objects.insert(id, obj);
        }
        Ok(Self::from_parts(snapshot.links, snapshot.nums, objects, snapshot.lib_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> ForkDB<SnapshotPayload> {
        let mut db = ForkDB::new();
        for (id, num, prev) in [("1a", 1, "0a"), ("2a", 2, "1a"), ("2b", 2, "1a"), ("3a", 3, "2a")]
        {
            db.add_link(
                BlockRef::new(id, num),
                prev,
                SnapshotPayload::RawBytes(Bytes::from(id.as_bytes().to_vec())),
            );
        }
        db.set_lib(BlockRef::new("3a", 3), "2a", 1);
        db
    }

    #[test]
    fn snapshot_restore_answers_queries_identically() {
        let db = sample_db();
        let json = db.snapshot().to_json().unwrap();
        let restored: ForkDB<SnapshotPayload> =
            ForkDB::restore(ForkDbSnapshot::from_json(&json).unwrap()).unwrap();

        assert_eq!(restored.lib_ref(), db.lib_ref());
        assert_eq!(restored.len(), db.len());
        for id in ["1a", "2a", "2b", "3a", "zz"] {
            assert_eq!(restored.node(id), db.node(id));
            assert_eq!(restored.object(id), db.object(id));
        }
        assert_eq!(
            restored.reversible_segment(BlockRef::new("3a", 3)),
            db.reversible_segment(BlockRef::new("3a", 3)),
        );
        assert_eq!(
            restored.complete_segment(BlockRef::new("3a", 3)),
            db.complete_segment(BlockRef::new("3a", 3)),
        );
        assert_eq!(
            restored.chain_switch_segments("3a", "2b"),
            db.chain_switch_segments("3a", "2b"),
        );
    }

    #[test]
    fn payload_variants_round_trip() {
        for payload in [
            SnapshotPayload::RawBytes(Bytes::from_static(b"\x01\x02")),
            SnapshotPayload::JsonString("{\"k\":1}".to_owned()),
            SnapshotPayload::ProtobufAny {
                type_url: "type.example.com/pkg.Message".to_owned(),
                value: Bytes::from_static(b"\x0a\x03abc"),
            },
        ] {
            let json = serde_json::to_string(&payload).unwrap();
            let back: SnapshotPayload = serde_json::from_str(&json).unwrap();
            assert_eq!(back, payload);
        }
    }

    #[test]
    fn restore_rejects_mismatched_payload() {
        let db = sample_db();
        let snapshot = db.snapshot();
        let err = ForkDB::<String>::restore(snapshot).unwrap_err();
        assert!(matches!(err, SnapshotError::Payload { .. }));
    }
}
