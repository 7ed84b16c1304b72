//! The dual-index collection and its parts: the ordered list, the
//! element, and the collection handle.

pub mod elem;
pub mod list;
mod superq;

pub use elem::{Atom, Elem};
pub use list::{NodeId, OrderedList};
pub use superq::{ElemRef, Payload, Superq, SuperqBuilder};

pub(crate) use superq::{Schema, SuperqMeta};
