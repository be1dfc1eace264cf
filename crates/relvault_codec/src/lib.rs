//! # relvault codec
//!
//! Value type and wire framing shared by every relvault format.
//!
//! - [`Value`] is the dynamic, totally ordered value held by entity
//!   attributes and command parameters. Floats are intentionally absent so
//!   that values can key unique indices and compare deterministically.
//! - [`Envelope`] frames a serde-serializable body as
//!   `magic | version | CBOR`, and refuses to decode bytes whose magic or
//!   version does not match. Each relvault format (transactions, snapshots)
//!   declares its own envelope constant.
//!
//! ## Usage
//!
//! ```
//! use relvault_codec::{Envelope, Value};
//!
//! const NOTES: Envelope = Envelope::new(*b"NOTE", 3);
//!
//! let bytes = NOTES.encode(&Value::from("hello")).unwrap();
//! let back: Value = NOTES.decode(&bytes).unwrap();
//! assert_eq!(back, Value::from("hello"));
//!
//! const NOTES_V4: Envelope = Envelope::new(*b"NOTE", 4);
//! assert!(NOTES_V4.decode::<Value>(&bytes).is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod value;

pub use envelope::Envelope;
pub use error::{CodecError, CodecResult};
pub use value::Value;
