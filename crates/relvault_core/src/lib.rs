//! # relvault core
//!
//! An embedded, schema-typed object store kept entirely in memory and made
//! durable by event sourcing.
//!
//! This crate provides:
//! - A schema model of entities, attributes, unique constraints and typed
//!   relations with reverse accessors, validated once at build time
//! - Entity and relation stores with unique indices and mirrored reverse
//!   maps, where every mutation records its inverse
//! - A single-writer engine that executes named commands from a
//!   transaction log, rolling a transaction back entirely on failure
//! - Snapshot and replay recovery through pluggable providers from
//!   `relvault_storage`
//!
//! ## Writing
//!
//! Writes are [`Command`]s registered by name in a [`CommandRegistry`].
//! [`Store::submit`] appends a transaction to the log and returns a
//! [`TransactionFuture`]; the consumer thread executes it against a
//! [`WriteContext`] and resolves the future with a [`TransactionReceipt`].
//!
//! ## Reading
//!
//! [`Store::read`] runs a closure with a [`ReadContext`] under the shared
//! lock. Readers never observe a partially applied transaction.
//!
//! ## Durability
//!
//! The transaction log is the source of truth. [`Store::snapshot`] bounds
//! replay; opening a store loads the newest snapshot and replays the log
//! after it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod commit_feed;
mod config;
mod context;
mod engine;
mod error;
mod future;
mod instance;
mod manager;
mod persistence;
mod schema;
mod store;
mod types;
pub mod wire;

pub use command::{Command, CommandRegistry, Params};
pub use commit_feed::CommitEvent;
pub use config::{StoreConfig, MODEL_VERSION};
pub use context::{InstanceBuilder, ReadContext, UpdateBuilder, WriteContext};
pub use error::{CoreError, CoreResult};
pub use future::{CommandFuture, TransactionFuture, TransactionReceipt};
pub use instance::{FieldValue, Instance};
pub use manager::{Store, StoreBuilder, TransactionBuilder};
pub use schema::{
    Accessor, AttributeDef, Cardinality, DataType, EntityDef, EntitySpec, RelationDef, Schema,
    SchemaBuilder,
};
pub use types::{CorrelationId, EntityTypeId, InstanceId, RelationTypeId, TransactionId};
pub use wire::{CommandRecord, TransactionRecord, SNAPSHOT_FORMAT_VERSION, TRANSACTION_FORMAT_VERSION};

pub use relvault_codec::Value;
