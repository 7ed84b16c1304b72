//! The core scalar type - a discriminated union of the three atom types.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Result, SuperqError};

/// The type of an atom or scalar: one of `str`, `int`, `float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomType {
    /// UTF-8 string.
    Str,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
}

impl AtomType {
    /// Wire tag for this type.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
        }
    }

    /// SQL column type for this atom type.
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Str => "TEXT",
            Self::Int => "INTEGER",
            Self::Float => "REAL",
        }
    }

    /// Parse a wire tag. Matching is by prefix, so spellings like
    /// `str_` or `int64` coming off the wire still resolve.
    pub fn parse(tag: &str) -> Result<Self> {
        if tag.starts_with("str") {
            Ok(Self::Str)
        } else if tag.starts_with("int") {
            Ok(Self::Int)
        } else if tag.starts_with("float") {
            Ok(Self::Float)
        } else {
            Err(SuperqError::TypeMismatch(format!(
                "unsupported atom type tag: {tag}"
            )))
        }
    }
}

impl fmt::Display for AtomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A scalar value - the union of types an atom, a scalar element, or an
/// element name can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
}

// Element names are Values and live in keyed indexes, so Value must be
// usable as a map key. Floats hash and compare by bit pattern.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Str(s) => {
                0_u8.hash(state);
                s.hash(state);
            }
            Self::Int(i) => {
                1_u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2_u8.hash(state);
                f.to_bits().hash(state);
            }
        }
    }
}

impl Value {
    /// The type tag of this value.
    #[must_use]
    pub fn atom_type(&self) -> AtomType {
        match self {
            Self::Str(_) => AtomType::Str,
            Self::Int(_) => AtomType::Int,
            Self::Float(_) => AtomType::Float,
        }
    }

    /// Parse a wire string under the direction of a type tag.
    pub fn parse_typed(ty: AtomType, s: &str) -> Result<Self> {
        match ty {
            AtomType::Str => Ok(Self::Str(s.to_owned())),
            AtomType::Int => s
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|e| SuperqError::TypeMismatch(format!("bad int {s:?}: {e}"))),
            AtomType::Float => s
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|e| SuperqError::TypeMismatch(format!("bad float {s:?}: {e}"))),
        }
    }

    /// Parse a free-form key string: integer if it reads as one, then
    /// float, then string. Used where keys arrive over the wire untyped.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            Self::Int(i)
        } else if let Ok(f) = s.parse::<f64>() {
            Self::Float(f)
        } else {
            Self::Str(s.to_owned())
        }
    }

    /// Coerce this value into the given type, the way demarshalling into
    /// a representative object preserves the object's field types.
    pub fn coerce_to(&self, ty: AtomType) -> Result<Self> {
        match (self, ty) {
            (Self::Str(s), AtomType::Str) => Ok(Self::Str(s.clone())),
            (Self::Str(s), AtomType::Int) => Self::parse_typed(AtomType::Int, s),
            (Self::Str(s), AtomType::Float) => Self::parse_typed(AtomType::Float, s),
            (Self::Int(i), AtomType::Str) => Ok(Self::Str(i.to_string())),
            (Self::Int(i), AtomType::Int) => Ok(Self::Int(*i)),
            #[allow(clippy::cast_precision_loss)]
            (Self::Int(i), AtomType::Float) => Ok(Self::Float(*i as f64)),
            (Self::Float(f), AtomType::Str) => Ok(Self::Str(format_float(*f))),
            #[allow(clippy::cast_possible_truncation)]
            (Self::Float(f), AtomType::Int) => Ok(Self::Int(*f as i64)),
            (Self::Float(f), AtomType::Float) => Ok(Self::Float(*f)),
        }
    }

    /// Render as a SQL literal: strings single-quoted with `''` escaping,
    /// numbers bare.
    #[must_use]
    pub fn sql_literal(&self) -> String {
        match self {
            Self::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
        }
    }

    /// Borrow the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload, if this is a float.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Floats render without an exponent and keep a trailing `.0` so the
/// wire form parses back as a float.
fn format_float(f: f64) -> String {
    let s = f.to_string();
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&format_float(*v)),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for ty in [AtomType::Str, AtomType::Int, AtomType::Float] {
            assert_eq!(AtomType::parse(ty.as_wire()).unwrap(), ty);
        }
    }

    #[test]
    fn lenient_tag_prefixes() {
        assert_eq!(AtomType::parse("str_").unwrap(), AtomType::Str);
        assert_eq!(AtomType::parse("int64").unwrap(), AtomType::Int);
        assert!(AtomType::parse("bool").is_err());
    }

    #[test]
    fn typed_parse() {
        assert_eq!(
            Value::parse_typed(AtomType::Int, "42").unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            Value::parse_typed(AtomType::Float, "2.5").unwrap(),
            Value::Float(2.5)
        );
        assert!(Value::parse_typed(AtomType::Int, "x").is_err());
    }

    #[test]
    fn lenient_parse_prefers_int() {
        assert_eq!(Value::parse_lenient("7"), Value::Int(7));
        assert_eq!(Value::parse_lenient("7.5"), Value::Float(7.5));
        assert_eq!(Value::parse_lenient("abc"), Value::Str("abc".to_owned()));
    }

    #[test]
    fn sql_literal_escapes_quotes() {
        assert_eq!(
            Value::Str("it's".to_owned()).sql_literal(),
            "'it''s'".to_owned()
        );
        assert_eq!(Value::Int(-3).sql_literal(), "-3");
        assert_eq!(Value::Float(1.5).sql_literal(), "1.5");
    }

    #[test]
    fn float_display_keeps_fraction() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(
            Value::parse_typed(AtomType::Float, "2.0").unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn coercion_matches_field_types() {
        assert_eq!(
            Value::Str("5".to_owned()).coerce_to(AtomType::Int).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            Value::Int(5).coerce_to(AtomType::Str).unwrap(),
            Value::Str("5".to_owned())
        );
        assert!(Value::Str("x".to_owned()).coerce_to(AtomType::Int).is_err());
    }
}
