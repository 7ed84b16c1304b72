//! Elements: the unit of storage inside a collection.
//!
//! An element is either a scalar (one typed value) or a structured
//! record (an ordered sequence of named atoms). Elements also carry a
//! link set referencing other elements by public name; links are
//! resolved on read, never owned, so cyclic references are fine.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SuperqError};
use crate::types::{AtomType, Item, Record, Sample, Value};

use super::list::{NodeId, OrderedList};

/// A named typed field of a structured element.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Field name, unique within the element.
    pub name: String,
    /// Type tag; fixed at creation.
    pub ty: AtomType,
    /// Current value.
    pub value: Value,
}

/// Mint a unique name with the given prefix.
pub(crate) fn mint_name(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}

/// A scalar or structured record stored in a collection.
pub struct Elem {
    name: Value,
    scalar: Option<Value>,
    atoms: OrderedList<Atom>,
    atom_index: HashMap<String, NodeId>,
    links: String,
    link_map: HashMap<String, String>,
    obj: Option<Box<dyn Record>>,
}

impl Elem {
    fn bare(name: Value) -> Self {
        Self {
            name,
            scalar: None,
            atoms: OrderedList::new(),
            atom_index: HashMap::new(),
            links: String::new(),
            link_map: HashMap::new(),
            obj: None,
        }
    }

    /// Create a scalar element.
    pub fn scalar(name: impl Into<Value>, value: impl Into<Value>) -> Self {
        let mut elem = Self::bare(name.into());
        elem.scalar = Some(value.into());
        elem
    }

    /// Create an empty structured element; atoms are added one by one.
    pub fn structured(name: impl Into<Value>) -> Self {
        Self::bare(name.into())
    }

    /// Create a structured element from a user record: each field, in
    /// declared order, becomes one atom. The element remembers the
    /// record and returns a copy of it verbatim on read.
    pub fn from_record(name: impl Into<Value>, record: Box<dyn Record>) -> Self {
        let mut elem = Self::bare(name.into());
        for (field, value) in record.fields() {
            elem.add_atom(&field, value.atom_type(), value);
        }
        elem.obj = Some(record);
        elem
    }

    /// The element's name.
    #[must_use]
    pub fn name(&self) -> &Value {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: Value) {
        self.name = name;
    }

    /// Host-qualified name: `parent-public-name.element-name`, or the
    /// bare name when detached.
    #[must_use]
    pub fn public_name(&self, parent_public_name: Option<&str>) -> String {
        match parent_public_name {
            Some(parent) => format!("{parent}.{}", self.name),
            None => self.name.to_string(),
        }
    }

    /// Whether this element is a scalar.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.scalar.is_some()
    }

    /// The scalar value, when this element is a scalar.
    #[must_use]
    pub fn scalar_value(&self) -> Option<&Value> {
        self.scalar.as_ref()
    }

    /// Overwrite the scalar value, coercing into the element's scalar
    /// type. Fails with a type error on structured elements.
    pub fn set_scalar(&mut self, value: impl Into<Value>) -> Result<()> {
        let Some(current) = &self.scalar else {
            return Err(SuperqError::TypeMismatch(
                "scalar setter on structured element".to_owned(),
            ));
        };
        self.scalar = Some(value.into().coerce_to(current.atom_type())?);
        Ok(())
    }

    /// Number of atoms (zero for scalars).
    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    /// Iterate atoms in order.
    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.atoms.iter()
    }

    /// Append an atom. Atom names are unique within the element; scalar
    /// elements never hold atoms.
    pub fn add_atom(&mut self, name: &str, ty: AtomType, value: Value) {
        debug_assert!(self.scalar.is_none(), "atom on scalar element");
        let id = self.atoms.push_tail(Atom {
            name: name.to_owned(),
            ty,
            value,
        });
        self.atom_index.insert(name.to_owned(), id);
    }

    fn atom_id(&self, key: &str) -> Option<NodeId> {
        self.atom_index.get(key).copied()
    }

    /// Read an atom value by name.
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.atom_id(name)
            .map(|id| &self.atoms.value(id).value)
            .ok_or_else(|| SuperqError::UnknownKey(name.to_owned()))
    }

    /// Read an atom value by zero-based position.
    pub fn get_at(&self, idx: usize) -> Result<&Value> {
        self.atoms
            .get(idx)
            .map(|atom| &atom.value)
            .ok_or_else(|| SuperqError::UnknownKey(idx.to_string()))
    }

    /// Overwrite an atom value in place by name. The new value is
    /// coerced into the atom's type. Fails with a type error on scalar
    /// elements.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.scalar.is_some() {
            return Err(SuperqError::TypeMismatch(
                "atom setter on scalar element".to_owned(),
            ));
        }
        let id = self
            .atom_id(name)
            .ok_or_else(|| SuperqError::UnknownKey(name.to_owned()))?;
        let atom = self.atoms.value_mut(id);
        let coerced = value.into().coerce_to(atom.ty)?;
        atom.value = coerced.clone();
        // keep the remembered source object in step
        if let Some(obj) = &mut self.obj {
            obj.set_field(name, &coerced);
        }
        Ok(())
    }

    /// Overwrite an atom value in place by position.
    pub fn set_at(&mut self, idx: usize, value: impl Into<Value>) -> Result<()> {
        let name = self
            .atoms
            .get(idx)
            .map(|atom| atom.name.clone())
            .ok_or_else(|| SuperqError::UnknownKey(idx.to_string()))?;
        self.set(&name, value)
    }

    /// The parseable link string: `attr^publicName/attr^publicName/...`.
    #[must_use]
    pub fn links_str(&self) -> &str {
        &self.links
    }

    /// The public name a link attribute points at, if set.
    #[must_use]
    pub fn link_target(&self, attr: &str) -> Option<&str> {
        self.link_map.get(attr).map(String::as_str)
    }

    /// Link attribute names, in no particular order.
    pub fn link_attrs(&self) -> impl Iterator<Item = &str> {
        self.link_map.keys().map(String::as_str)
    }

    /// Record a link `attr -> public name`, replacing any prior mapping
    /// for the attribute. String and map forms update together.
    pub fn set_link(&mut self, attr: &str, target_public_name: &str) {
        if let Some(old) = self.link_map.get(attr) {
            let from = format!("{attr}^{old}");
            let to = format!("{attr}^{target_public_name}");
            self.links = self.links.replace(&from, &to);
        } else {
            self.links
                .push_str(&format!("{attr}^{target_public_name}/"));
        }
        self.link_map
            .insert(attr.to_owned(), target_public_name.to_owned());
    }

    /// Drop all links.
    pub fn clear_links(&mut self) {
        self.links.clear();
        self.link_map.clear();
    }

    /// Append links parsed from their string form.
    pub fn add_links_from_str(&mut self, links_str: &str) -> Result<()> {
        for link in links_str.split('/') {
            if link.is_empty() {
                break;
            }
            let (attr, target) = link.split_once('^').ok_or_else(|| {
                SuperqError::InvalidArgument(format!("bad link pair: {link}"))
            })?;
            self.links.push_str(&format!("{attr}^{target}/"));
            self.link_map.insert(attr.to_owned(), target.to_owned());
        }
        Ok(())
    }

    /// Whether this element remembers the user object it was built from.
    #[must_use]
    pub fn has_source_object(&self) -> bool {
        self.obj.is_some()
    }

    pub(crate) fn set_source_object(&mut self, obj: Option<Box<dyn Record>>) {
        self.obj = obj;
    }

    /// Reshape this element for a read.
    ///
    /// The remembered source object wins; otherwise a representative
    /// sample directs the shape (scalar samples read the `_val_` atom,
    /// record samples are copied and populated with per-field type
    /// coercion); with neither, the element itself is returned.
    pub fn demarshal(&self, sample: Option<&Sample>) -> Result<Item> {
        if let Some(obj) = &self.obj {
            let mut copy = obj.clone_record();
            copy.set_key_hint(&self.name);
            return Ok(Item::Record(copy));
        }

        match sample {
            None => Ok(Item::Elem(self.clone())),
            Some(Sample::Str) => Ok(Item::Value(self.get("_val_")?.coerce_to(AtomType::Str)?)),
            Some(Sample::Int) => Ok(Item::Value(self.get("_val_")?.coerce_to(AtomType::Int)?)),
            Some(Sample::Float) => {
                Ok(Item::Value(self.get("_val_")?.coerce_to(AtomType::Float)?))
            }
            Some(Sample::Record(sample_obj)) => {
                let mut copy = sample_obj.clone_record();
                for atom in self.atoms.iter() {
                    // joined query columns arrive as table.column
                    let field = atom.name.rsplit('.').next().unwrap_or(&atom.name);
                    if !copy.set_field(field, &atom.value) {
                        return Err(SuperqError::TypeMismatch(format!(
                            "sample object has no field {field}"
                        )));
                    }
                }
                copy.set_key_hint(&self.name);
                Ok(Item::Record(copy))
            }
        }
    }

    /// Copy atom values, scalar value, and links from another element,
    /// keeping this element's identity and atom order.
    pub(crate) fn absorb(&mut self, other: &Elem) -> Result<()> {
        if let Some(value) = other.scalar_value() {
            self.set_scalar(value.clone())?;
        } else {
            let values: Vec<(String, Value)> = other
                .atoms()
                .map(|a| (a.name.clone(), a.value.clone()))
                .collect();
            for (name, value) in values {
                self.set(&name, value)?;
            }
        }
        self.clear_links();
        let links = other.links_str().to_owned();
        self.add_links_from_str(&links)
    }

    // ------------------------------------------------------------------
    // Wire form
    // ------------------------------------------------------------------

    /// Parse the wire form produced by [`Elem::to_wire`].
    pub fn from_wire(wire: &str) -> Result<Self> {
        let bad = || SuperqError::MalformedRequest(format!("bad element: {wire}"));

        let sep = wire.find(';').ok_or_else(bad)?;
        let header = &wire[..sep];
        let mut body = &wire[sep + 1..];

        let fields: Vec<&str> = header.split(',').collect();
        if fields.len() < 6 {
            return Err(bad());
        }

        let name = Value::parse_typed(AtomType::parse(fields[0])?, fields[1])?;
        let mut elem = Self::bare(name);

        elem.add_links_from_str(fields[4])?;

        // a non-empty value type marks a scalar element
        if !fields[2].is_empty() {
            elem.scalar = Some(Value::parse_typed(AtomType::parse(fields[2])?, fields[3])?);
            return Ok(elem);
        }

        let atom_count: usize = fields[5].parse().map_err(|_| bad())?;
        for _ in 0..atom_count {
            let sep = body.find('|').ok_or_else(bad)?;
            let atom_len: usize = body[..sep].parse().map_err(|_| bad())?;
            body = &body[sep + 1..];
            if atom_len == 0 || atom_len > body.len() {
                return Err(bad());
            }

            // atom_len counts through the trailing semicolon
            let atom_str = &body[..atom_len - 1];
            body = &body[atom_len..];

            let (atom_name, rest) = atom_str.split_once('|').ok_or_else(bad)?;
            let (atom_ty, atom_val) = rest.split_once('|').ok_or_else(bad)?;
            let ty = AtomType::parse(atom_ty)?;
            elem.add_atom(atom_name, ty, Value::parse_typed(ty, atom_val)?);
        }

        Ok(elem)
    }

    /// Serialize to the wire form:
    /// `nameType,name,valueType,value,links,atomCount;` followed by one
    /// length-prefixed `name|type|value;` chunk per atom.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let (value_type, value) = match &self.scalar {
            Some(v) => (v.atom_type().as_wire(), v.to_string()),
            None => ("", "None".to_owned()),
        };
        let mut wire = format!(
            "{},{},{},{},{},{};",
            self.name.atom_type().as_wire(),
            self.name,
            value_type,
            value,
            self.links,
            self.atoms.len()
        );
        for atom in self.atoms.iter() {
            let chunk = format!("{}|{}|{};", atom.name, atom.ty.as_wire(), atom.value);
            wire.push_str(&format!("{}|{chunk}", chunk.len()));
        }
        wire
    }
}

impl fmt::Display for Elem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl Clone for Elem {
    fn clone(&self) -> Self {
        let mut copy = Self::bare(self.name.clone());
        copy.scalar = self.scalar.clone();
        for atom in self.atoms.iter() {
            copy.add_atom(&atom.name, atom.ty, atom.value.clone());
        }
        copy.links = self.links.clone();
        copy.link_map = self.link_map.clone();
        copy.obj = self.obj.as_ref().map(|o| o.clone_record());
        copy
    }
}

impl PartialEq for Elem {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.scalar == other.scalar
            && self.links == other.links
            && self.atoms.len() == other.atoms.len()
            && self.atoms.iter().zip(other.atoms.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Debug for Elem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Elem")
            .field("name", &self.name)
            .field("scalar", &self.scalar)
            .field("atoms", &self.atoms.iter().collect::<Vec<_>>())
            .field("links", &self.links)
            .field("has_source_object", &self.obj.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured() -> Elem {
        let mut elem = Elem::bare(Value::from("e1"));
        elem.add_atom("a", AtomType::Str, Value::from("hello"));
        elem.add_atom("b", AtomType::Int, Value::from(7));
        elem.add_atom("c", AtomType::Float, Value::from(0.5));
        elem
    }

    #[test]
    fn scalar_round_trip() {
        let elem = Elem::scalar("k", 42);
        let back = Elem::from_wire(&elem.to_wire()).unwrap();
        assert_eq!(back, elem);
        assert_eq!(back.scalar_value(), Some(&Value::Int(42)));
    }

    #[test]
    fn structured_round_trip() {
        let elem = structured();
        let back = Elem::from_wire(&elem.to_wire()).unwrap();
        assert_eq!(back, elem);
        assert_eq!(back.get("b").unwrap(), &Value::Int(7));
        assert_eq!(back.get_at(2).unwrap(), &Value::Float(0.5));
    }

    #[test]
    fn numeric_name_round_trip() {
        let elem = Elem::scalar(5_i64, "x");
        let back = Elem::from_wire(&elem.to_wire()).unwrap();
        assert_eq!(back.name(), &Value::Int(5));
    }

    #[test]
    fn atom_writes_coerce_in_place() {
        let mut elem = structured();
        elem.set("b", "12").unwrap();
        assert_eq!(elem.get("b").unwrap(), &Value::Int(12));
        assert!(elem.set("b", "oops").is_err());
        assert!(elem.set("missing", 1).is_err());
    }

    #[test]
    fn scalar_structured_mismatch() {
        let mut scalar = Elem::scalar("k", 1);
        assert!(scalar.set("a", 2).is_err());

        let mut structured = structured();
        assert!(structured.set_scalar(2).is_err());
    }

    #[test]
    fn scalar_set_keeps_type() {
        let mut elem = Elem::scalar("k", "1");
        elem.set_scalar(2).unwrap();
        assert_eq!(elem.scalar_value(), Some(&Value::Str("2".to_owned())));
    }

    #[test]
    fn link_replacement() {
        let mut elem = structured();
        elem.set_link("other", "sqA.x");
        assert_eq!(elem.links_str(), "other^sqA.x/");

        elem.set_link("other", "sqA.y");
        assert_eq!(elem.links_str(), "other^sqA.y/");
        assert_eq!(elem.link_target("other"), Some("sqA.y"));

        elem.set_link("second", "sqB.z");
        assert_eq!(elem.links_str(), "other^sqA.y/second^sqB.z/");
    }

    #[test]
    fn links_survive_wire() {
        let mut elem = structured();
        elem.set_link("other", "sqA.x");
        let back = Elem::from_wire(&elem.to_wire()).unwrap();
        assert_eq!(back.link_target("other"), Some("sqA.x"));
        assert_eq!(back.links_str(), "other^sqA.x/");
    }

    #[test]
    fn atom_values_with_separators_survive() {
        let mut elem = Elem::bare(Value::from("e"));
        elem.add_atom("a", AtomType::Str, Value::from("x|y;z"));
        let back = Elem::from_wire(&elem.to_wire()).unwrap();
        assert_eq!(back.get("a").unwrap(), &Value::Str("x|y;z".to_owned()));
    }

    #[test]
    fn absorb_copies_values_and_links() {
        let mut local = structured();
        let mut incoming = structured();
        incoming.set("b", 99).unwrap();
        incoming.set_link("other", "sqA.x");

        local.absorb(&incoming).unwrap();
        assert_eq!(local.get("b").unwrap(), &Value::Int(99));
        assert_eq!(local.link_target("other"), Some("sqA.x"));
    }

    #[test]
    fn malformed_wire_rejected() {
        assert!(Elem::from_wire("no-separator").is_err());
        assert!(Elem::from_wire("str,e,,None,,2;3|a;").is_err());
    }
}
