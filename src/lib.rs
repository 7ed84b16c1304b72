//! Dual-index collections with a SQL-backed mirror.
//!
//! A [`Superq`] is simultaneously an ordered sequence and a keyed
//! mapping, usable as a queue, deque, stack, or map. Attached to the
//! process [`store::DataStore`] it is mirrored into an embedded
//! relational engine, so collections can be queried and joined with
//! SQL. A collection hosted on a remote node is driven through the same
//! API as a local one.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]

pub mod collection;
pub mod error;
pub mod net;
pub mod store;
pub mod types;

pub use collection::{Atom, Elem, ElemRef, NodeId, OrderedList, Payload, Superq, SuperqBuilder};
pub use error::{Result, SuperqError};
pub use types::{AtomType, Item, Record, Sample, Value};

/// Release the process datastore's pooled resources and terminate the
/// auto-launched node process, if any.
pub fn shutdown() {
    store::shutdown();
}
