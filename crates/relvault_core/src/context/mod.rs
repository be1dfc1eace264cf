//! Read and write contexts over the object graph.

mod read;
mod write;

pub use read::ReadContext;
pub use write::{InstanceBuilder, UpdateBuilder, WriteContext};
