//! The pluggable bridge between user structs and collection elements.
//!
//! Any struct whose fields are `str`/`int`/`float`-typed implements
//! [`Record`] to be stored in a collection: its fields become the
//! element's atoms, in declared order. Reads reverse the mapping.

use std::any::Any;

use super::Value;

/// Bridge trait for storing arbitrary user structs in a collection.
///
/// `fields` drives marshalling (struct to atoms) and `set_field` drives
/// demarshalling (atoms back into a copy of a representative object).
/// Implementations should visit only `str`/`int`/`float`-typed fields and
/// preserve declaration order.
pub trait Record: Send {
    /// The record's fields as `(name, value)` pairs, in declared order.
    fn fields(&self) -> Vec<(String, Value)>;

    /// Overwrite the named field, coercing `value` into the field's own
    /// type. Returns `false` when the record has no such field.
    fn set_field(&mut self, name: &str, value: &Value) -> bool;

    /// Clone into a new boxed record.
    fn clone_record(&self) -> Box<dyn Record>;

    /// Borrow as `Any` for concrete-type recovery.
    fn as_any(&self) -> &dyn Any;

    /// Convert into `Any` for by-value downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// The element key this record was read out under, if any.
    ///
    /// Objects returned from a collection are tagged through
    /// [`Record::set_key_hint`] so they can be routed back to `update`
    /// and `delete_elem` even when the collection has no key column.
    fn key_hint(&self) -> Option<Value> {
        None
    }

    /// Remember the element key this record was read out under.
    fn set_key_hint(&mut self, _key: &Value) {}
}

impl Clone for Box<dyn Record> {
    fn clone(&self) -> Self {
        self.clone_record()
    }
}

/// What a read or pop returns.
pub enum Item {
    /// A scalar element's value.
    Value(Value),
    /// A demarshalled user object (the element's remembered source
    /// object, or a populated copy of the representative object).
    Record(Box<dyn Record>),
    /// The element itself, when there is nothing to demarshal into.
    Elem(crate::collection::Elem),
}

impl Item {
    /// Extract the scalar value.
    pub fn into_value(self) -> crate::error::Result<Value> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Record(_) | Self::Elem(_) => Err(crate::error::SuperqError::TypeMismatch(
                "item is not a scalar".to_owned(),
            )),
        }
    }

    /// Extract the record.
    pub fn into_record(self) -> crate::error::Result<Box<dyn Record>> {
        match self {
            Self::Record(r) => Ok(r),
            Self::Value(_) | Self::Elem(_) => Err(crate::error::SuperqError::TypeMismatch(
                "item is not a record".to_owned(),
            )),
        }
    }

    /// Extract the element.
    pub fn into_elem(self) -> crate::error::Result<crate::collection::Elem> {
        match self {
            Self::Elem(e) => Ok(e),
            Self::Value(_) | Self::Record(_) => Err(crate::error::SuperqError::TypeMismatch(
                "item is not an element".to_owned(),
            )),
        }
    }

    /// Downcast a record item into its concrete type.
    pub fn downcast<T: 'static>(self) -> crate::error::Result<T> {
        let record = self.into_record()?;
        record
            .into_any()
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| {
                crate::error::SuperqError::TypeMismatch("record is a different type".to_owned())
            })
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Record(r) => {
                let fields = r.fields();
                f.debug_tuple("Record").field(&fields).finish()
            }
            Self::Elem(e) => f.debug_tuple("Elem").field(e).finish(),
        }
    }
}

/// A representative object used to reshape read results.
///
/// Single-value samples demarshal the `_val_` column of scalar rows;
/// a record sample is copied per element and populated field by field.
pub enum Sample {
    /// Demarshal scalar rows as strings.
    Str,
    /// Demarshal scalar rows as integers.
    Int,
    /// Demarshal scalar rows as floats.
    Float,
    /// Copy this record per element and fill its fields from atoms.
    Record(Box<dyn Record>),
}

impl Clone for Sample {
    fn clone(&self) -> Self {
        match self {
            Self::Str => Self::Str,
            Self::Int => Self::Int,
            Self::Float => Self::Float,
            Self::Record(r) => Self::Record(r.clone_record()),
        }
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str => f.write_str("Sample::Str"),
            Self::Int => f.write_str("Sample::Int"),
            Self::Float => f.write_str("Sample::Float"),
            Self::Record(_) => f.write_str("Sample::Record"),
        }
    }
}
