//! Transaction and snapshot formats.
//!
//! Both formats are CBOR bodies inside a [`relvault_codec::Envelope`] whose
//! version constant is checked on decode; bytes written by another format
//! version are rejected rather than misread.

use crate::command::Params;
use crate::error::CoreResult;
use crate::schema::{Cardinality, DataType};
use crate::types::CorrelationId;
use relvault_codec::{Envelope, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Version of the transaction format.
pub const TRANSACTION_FORMAT_VERSION: u16 = 1;

/// Version of the snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

const TRANSACTION_ENVELOPE: Envelope = Envelope::new(*b"RVTR", TRANSACTION_FORMAT_VERSION);
const SNAPSHOT_ENVELOPE: Envelope = Envelope::new(*b"RVSN", SNAPSHOT_FORMAT_VERSION);

/// One command of a logged transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Registered command name.
    pub name: String,
    /// Command parameters.
    pub params: Params,
}

/// A transaction as it is appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Matches the execution back to the submitting future.
    pub correlation_id: CorrelationId,
    /// Commands in execution order.
    pub commands: Vec<CommandRecord>,
}

impl TransactionRecord {
    /// Serializes the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(TRANSACTION_ENVELOPE.encode(self)?)
    }

    /// Deserializes a transaction, rejecting other format versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a transaction of this version.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(TRANSACTION_ENVELOPE.decode(bytes)?)
    }
}

/// Schema descriptor of a snapshotted attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Attribute name.
    pub name: String,
    /// Declared type when the snapshot was taken.
    pub data_type: DataType,
    /// Nullability when the snapshot was taken.
    pub nullable: bool,
}

/// Schema descriptor of a snapshotted relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Relation name on the tail entity.
    pub name: String,
    /// Head entity name.
    pub head: String,
    /// Cardinality when the snapshot was taken.
    pub cardinality: Cardinality,
}

/// One snapshotted instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance id.
    pub id: u64,
    /// Non-null attributes.
    pub attributes: BTreeMap<String, Value>,
    /// Heads of every non-empty relation, ascending.
    pub relations: BTreeMap<String, Vec<u64>>,
}

/// Snapshot of one entity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFragment {
    /// Entity name.
    pub name: String,
    /// Attributes declared when the snapshot was taken.
    pub attributes: Vec<AttributeDescriptor>,
    /// Relations declared when the snapshot was taken.
    pub relations: Vec<RelationDescriptor>,
    /// Unique attributes declared when the snapshot was taken.
    pub unique: Vec<String>,
    /// Id counter; every instance id is below it.
    pub next_id: u64,
    /// Live instances in increasing id order.
    pub instances: Vec<InstanceRecord>,
}

/// A complete snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBundle {
    /// Model version of the store that wrote it.
    pub model_version: u32,
    /// Id of the last transaction reflected in it.
    pub transaction_id: u64,
    /// One fragment per entity type.
    pub entities: Vec<EntityFragment>,
}

impl SnapshotBundle {
    /// Writes the snapshot to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn encode_to<W: Write>(&self, writer: W) -> CoreResult<()> {
        Ok(SNAPSHOT_ENVELOPE.encode_to(self, writer)?)
    }

    /// Reads a snapshot, rejecting other format versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a snapshot of this version.
    pub fn decode_from<R: Read>(reader: R) -> CoreResult<Self> {
        Ok(SNAPSHOT_ENVELOPE.decode_from(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use relvault_codec::CodecError;

    #[test]
    fn transaction_keeps_command_order() {
        let record = TransactionRecord {
            correlation_id: CorrelationId::generate(),
            commands: vec![
                CommandRecord {
                    name: "b".into(),
                    params: Params::new().with("x", 1),
                },
                CommandRecord {
                    name: "a".into(),
                    params: Params::new(),
                },
            ],
        };
        let decoded = TransactionRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn rejects_other_transaction_version() {
        let record = TransactionRecord {
            correlation_id: CorrelationId::generate(),
            commands: Vec::new(),
        };
        let future = Envelope::new(*b"RVTR", TRANSACTION_FORMAT_VERSION + 1);
        let bytes = future.encode(&record).unwrap();
        assert!(matches!(
            TransactionRecord::decode(&bytes),
            Err(CoreError::Codec(CodecError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn snapshot_is_not_a_transaction() {
        let bundle = SnapshotBundle {
            model_version: 1,
            transaction_id: 4,
            entities: Vec::new(),
        };
        let mut bytes = Vec::new();
        bundle.encode_to(&mut bytes).unwrap();
        assert!(matches!(
            TransactionRecord::decode(&bytes),
            Err(CoreError::Codec(CodecError::WrongMagic { .. }))
        ));
        assert_eq!(SnapshotBundle::decode_from(&bytes[..]).unwrap(), bundle);
    }
}
