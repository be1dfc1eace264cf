//! # relvault testkit
//!
//! Test utilities for relvault.
//!
//! This crate provides:
//! - A sample schema (people, companies, friendships) with its commands
//! - [`TestStore`], a store over in-memory or temporary file providers
//!   that can be reopened or joined by a second handle
//! - Property-based test generators using proptest
//! - [`init_tracing`] for readable logs in failing tests
//!
//! The cross-crate integration tests live in this crate's `tests/`.
//!
//! ## Usage
//!
//! ```rust
//! use relvault_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! let ann = store.execute("create_person", person("Ann")).unwrap();
//! assert_eq!(ann, Value::Integer(0));
//!
//! let store = store.reopen();
//! assert_eq!(store.read(|ctx| ctx.count("Person")).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::init_tracing;
    pub use relvault_core::{
        CoreError, CoreResult, FieldValue, Instance, Params, Store, StoreConfig, TransactionId,
        Value,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use logging::init_tracing;
