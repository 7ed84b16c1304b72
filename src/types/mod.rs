//! Scalar values, atom types, and the user-struct bridge.

mod record;
mod value;

pub use record::{Item, Record, Sample};
pub use value::{AtomType, Value};
