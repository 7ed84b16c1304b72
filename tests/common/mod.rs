//! Record fixtures shared by the integration tests.

#![allow(dead_code)]

use std::any::Any;

use superq::{AtomType, Record, Value};

/// Two-field record keyed on a string column in most tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Foo {
    pub a: String,
    pub b: i64,
}

impl Foo {
    pub fn new(a: &str, b: i64) -> Self {
        Self { a: a.to_owned(), b }
    }
}

impl Record for Foo {
    fn fields(&self) -> Vec<(String, Value)> {
        vec![
            ("a".to_owned(), Value::Str(self.a.clone())),
            ("b".to_owned(), Value::Int(self.b)),
        ]
    }

    fn set_field(&mut self, name: &str, value: &Value) -> bool {
        match name {
            "a" => {
                if let Ok(Value::Str(s)) = value.coerce_to(AtomType::Str) {
                    self.a = s;
                }
                true
            }
            "b" => {
                if let Ok(Value::Int(i)) = value.coerce_to(AtomType::Int) {
                    self.b = i;
                }
                true
            }
            _ => false,
        }
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Two integer fields; used where the key column is numeric.
#[derive(Debug, Clone, PartialEq)]
pub struct IntPair {
    pub a: i64,
    pub b: i64,
}

impl IntPair {
    pub fn new(a: i64, b: i64) -> Self {
        Self { a, b }
    }
}

impl Record for IntPair {
    fn fields(&self) -> Vec<(String, Value)> {
        vec![
            ("a".to_owned(), Value::Int(self.a)),
            ("b".to_owned(), Value::Int(self.b)),
        ]
    }

    fn set_field(&mut self, name: &str, value: &Value) -> bool {
        let Ok(Value::Int(i)) = value.coerce_to(AtomType::Int) else {
            return matches!(name, "a" | "b");
        };
        match name {
            "a" => {
                self.a = i;
                true
            }
            "b" => {
                self.b = i;
                true
            }
            _ => false,
        }
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Three typed fields, plus the key tag written onto objects returned
/// from reads so they can be routed back without a key column.
#[derive(Debug, Clone, PartialEq)]
pub struct Foo2 {
    pub a: String,
    pub b: i64,
    pub c: f64,
    pub tag: Option<Value>,
}

impl Foo2 {
    pub fn new(a: &str, b: i64, c: f64) -> Self {
        Self {
            a: a.to_owned(),
            b,
            c,
            tag: None,
        }
    }
}

impl Record for Foo2 {
    fn fields(&self) -> Vec<(String, Value)> {
        vec![
            ("a".to_owned(), Value::Str(self.a.clone())),
            ("b".to_owned(), Value::Int(self.b)),
            ("c".to_owned(), Value::Float(self.c)),
        ]
    }

    fn set_field(&mut self, name: &str, value: &Value) -> bool {
        match name {
            "a" => {
                if let Ok(Value::Str(s)) = value.coerce_to(AtomType::Str) {
                    self.a = s;
                }
                true
            }
            "b" => {
                if let Ok(Value::Int(i)) = value.coerce_to(AtomType::Int) {
                    self.b = i;
                }
                true
            }
            "c" => {
                if let Ok(Value::Float(f)) = value.coerce_to(AtomType::Float) {
                    self.c = f;
                }
                true
            }
            _ => false,
        }
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn key_hint(&self) -> Option<Value> {
        self.tag.clone()
    }

    fn set_key_hint(&mut self, key: &Value) {
        self.tag = Some(key.clone());
    }
}

/// Scalar values of a collection, in order.
pub fn scalar_values(sq: &superq::Superq) -> Vec<Value> {
    sq.elems()
        .into_iter()
        .map(|e| e.scalar_value().cloned().expect("scalar element"))
        .collect()
}

/// Integer scalars of a collection, in order.
pub fn int_values(sq: &superq::Superq) -> Vec<i64> {
    scalar_values(sq)
        .into_iter()
        .map(|v| v.as_int().expect("int scalar"))
        .collect()
}
