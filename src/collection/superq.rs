//! The collection itself: an ordered sequence married to a keyed index,
//! with a blocking producer/consumer core and a SQL-backed mirror.
//!
//! A `Superq` is a cheap clonable handle over shared state; every clone
//! is the same collection. One mutex guards the dual index, and two
//! condition variables on that mutex ("not empty", "not full") implement
//! the bounded blocking discipline. Mirror calls into the datastore run
//! under the guard already held by the public operation.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, SuperqError};
use crate::store;
use crate::types::{Item, Record, Sample, Value};

use super::elem::{mint_name, Elem};
use super::list::{NodeId, OrderedList};

/// Immutable collection configuration, fixed at construction.
#[derive(Debug, Clone)]
pub(crate) struct SuperqMeta {
    /// Local name; doubles as the backing table name.
    pub name: String,
    /// Host tag; absent means local-hosted.
    pub host: Option<String>,
    /// Field used as the element key, when not auto-keyed.
    pub key_col: Option<String>,
    /// Whether element names are minted automatically.
    pub auto_key: bool,
    /// Bounded capacity, when set.
    pub maxlen: Option<usize>,
}

impl SuperqMeta {
    pub(crate) fn public_name(&self) -> String {
        match &self.host {
            Some(host) => format!("{host}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Backing-table shape, derived from the first element and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub(crate) struct Schema {
    /// Column names in table order.
    pub col_names: Vec<String>,
    /// Atom types per column.
    pub col_types: Vec<crate::types::AtomType>,
    /// Comma-delimited column list, usable in INSERTs.
    pub name_str: String,
    /// Column name and SQL type pairs, usable in CREATEs.
    pub name_type_str: String,
}

impl Schema {
    fn push_col(&mut self, name: &str, ty: crate::types::AtomType) {
        if !self.name_str.is_empty() {
            self.name_str.push(',');
            self.name_type_str.push(',');
        }
        self.name_str.push_str(name);
        self.name_type_str.push_str(&format!("{name} {}", ty.sql_type()));
        self.col_names.push(name.to_owned());
        self.col_types.push(ty);
    }

    /// Inspect the first element to determine the backing table shape.
    pub(crate) fn from_first_elem(elem: &Elem, key_col: Option<&str>) -> Self {
        use crate::types::AtomType;

        let mut schema = Self {
            col_names: Vec::new(),
            col_types: Vec::new(),
            name_str: String::new(),
            name_type_str: String::new(),
        };

        if let Some(value) = elem.scalar_value() {
            schema.push_col("_name_", AtomType::Str);
            schema.push_col("_val_", value.atom_type());
            schema.push_col("_links_", AtomType::Str);
            return schema;
        }

        if key_col.is_none() {
            schema.push_col("_name_", AtomType::Str);
        }
        for atom in elem.atoms() {
            schema.push_col(&atom.name, atom.ty);
        }
        schema.push_col("_links_", AtomType::Str);
        schema
    }
}

/// What can be pushed into a collection.
pub enum Payload {
    /// A scalar.
    Value(Value),
    /// A user record; its fields become atoms.
    Record(Box<dyn Record>),
    /// A ready-made element, used as-is.
    Elem(Elem),
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Self::Value(v.into())
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Self::Value(v.into())
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Self::Value(v.into())
    }
}

impl From<i32> for Payload {
    fn from(v: i32) -> Self {
        Self::Value(v.into())
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Self::Value(v.into())
    }
}

impl From<Elem> for Payload {
    fn from(e: Elem) -> Self {
        Self::Elem(e)
    }
}

impl From<Box<dyn Record>> for Payload {
    fn from(r: Box<dyn Record>) -> Self {
        Self::Record(r)
    }
}

impl From<Item> for Payload {
    fn from(item: Item) -> Self {
        match item {
            Item::Value(v) => Self::Value(v),
            Item::Record(r) => Self::Record(r),
            Item::Elem(e) => Self::Elem(e),
        }
    }
}

struct State {
    list: OrderedList<Elem>,
    index: HashMap<Value, NodeId>,
    schema: Option<Schema>,
    table_created: bool,
    attached: bool,
    sample: Option<Sample>,
}

struct Shared {
    meta: SuperqMeta,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Clone, Copy)]
enum PushPos {
    Head,
    Tail,
    At(usize),
}

#[derive(Clone, Copy)]
enum PushMode {
    Evict,
    Wait(Option<Duration>),
    NonBlocking,
}

#[derive(Clone, Copy)]
enum PopMode {
    Wait(Option<Duration>),
    NonBlocking,
}

/// The dual-index collection: an ordered sequence that is also a keyed
/// mapping, optionally bounded, optionally mirrored into the process
/// datastore's backing table, optionally hosted on a remote node.
#[derive(Clone)]
pub struct Superq {
    shared: Arc<Shared>,
}

/// Configures and creates a [`Superq`].
#[derive(Debug, Default)]
pub struct SuperqBuilder {
    name: Option<String>,
    host: Option<String>,
    key_col: Option<String>,
    maxlen: Option<usize>,
    attach: bool,
}

impl SuperqBuilder {
    /// Set the local name. A uuid-derived name is minted when unset.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the host tag: `local`, `host[:port]`, or `ssl:host:port`.
    /// Collections without a host live in this process only.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Use the named record field as the element key.
    #[must_use]
    pub fn key_col(mut self, key_col: impl Into<String>) -> Self {
        self.key_col = Some(key_col.into());
        self
    }

    /// Bound the collection to at most `maxlen` elements.
    #[must_use]
    pub fn maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = Some(maxlen);
        self
    }

    /// Attach to the process datastore as the final build step.
    #[must_use]
    pub fn attach(mut self, attach: bool) -> Self {
        self.attach = attach;
        self
    }

    fn finish(self, elems: Vec<Elem>) -> Result<Superq> {
        let auto_key = self.key_col.is_none();
        let meta = SuperqMeta {
            name: self.name.unwrap_or_else(|| mint_name("sq")),
            host: self.host,
            key_col: self.key_col,
            auto_key,
            maxlen: self.maxlen,
        };
        let sq = Superq::from_meta(meta);
        for elem in elems {
            sq.push(elem)?;
        }
        if self.attach {
            sq.attach()?;
        }
        Ok(sq)
    }

    /// Build an empty collection.
    pub fn build(self) -> Result<Superq> {
        self.finish(Vec::new())
    }

    /// Build from an ordered sequence of scalar values.
    pub fn from_values<V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Superq> {
        let attach = self.attach;
        let sq = Self {
            attach: false,
            ..self
        }
        .build()?;
        for value in values {
            sq.push(value.into())?;
        }
        if attach {
            sq.attach()?;
        }
        Ok(sq)
    }

    /// Build from an ordered sequence of user records. Element names
    /// come from the key column when configured, else are minted.
    pub fn from_records(self, records: Vec<Box<dyn Record>>) -> Result<Superq> {
        let attach = self.attach;
        let sq = Self {
            attach: false,
            ..self
        }
        .build()?;
        for record in records {
            sq.push(record)?;
        }
        if attach {
            sq.attach()?;
        }
        Ok(sq)
    }

    /// Build from a keyed mapping: each entry's key becomes the element
    /// name and its payload the element body.
    pub fn from_entries<K: Into<Value>>(
        self,
        entries: Vec<(K, Payload)>,
    ) -> Result<Superq> {
        let elems = entries
            .into_iter()
            .map(|(key, payload)| {
                let name = key.into();
                match payload {
                    Payload::Value(v) => Elem::scalar(name, v),
                    Payload::Record(r) => Elem::from_record(name, r),
                    Payload::Elem(mut e) => {
                        e.set_name(name);
                        e
                    }
                }
            })
            .collect();
        self.finish(elems)
    }

    /// Build a detached clone of an existing collection.
    pub fn from_superq(mut self, other: &Superq) -> Result<Superq> {
        if self.name.is_none() {
            self.name = Some(other.name().to_owned());
        }
        if self.key_col.is_none() {
            self.key_col = other.key_col();
        }
        self.finish(other.elems())
    }
}

impl Superq {
    /// Start building a collection.
    #[must_use]
    pub fn builder() -> SuperqBuilder {
        SuperqBuilder::default()
    }

    fn from_meta(meta: SuperqMeta) -> Self {
        Self {
            shared: Arc::new(Shared {
                meta,
                state: Mutex::new(State {
                    list: OrderedList::new(),
                    index: HashMap::new(),
                    schema: None,
                    table_created: false,
                    attached: false,
                    sample: None,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    /// Look up an existing local collection by name.
    ///
    /// Collection identity is per public name: repeated opens return the
    /// same instance.
    pub fn open(name: &str) -> Result<Self> {
        store::datastore().superq_read(name, None)
    }

    /// Look up a collection hosted on a node, reading it over the wire.
    ///
    /// The local in-memory image is rebuilt from the server's serialized
    /// form on every call.
    pub fn open_on(host: &str, name: &str) -> Result<Self> {
        store::datastore().superq_read(name, Some(host))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The local name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.meta.name
    }

    /// The host tag, when remote-hosted.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        self.shared.meta.host.clone()
    }

    /// Host-qualified name used for cross-process identity.
    #[must_use]
    pub fn public_name(&self) -> String {
        self.shared.meta.public_name()
    }

    /// The key column, when configured.
    #[must_use]
    pub fn key_col(&self) -> Option<String> {
        self.shared.meta.key_col.clone()
    }

    /// Whether element names are minted automatically.
    #[must_use]
    pub fn auto_key(&self) -> bool {
        self.shared.meta.auto_key
    }

    /// The bounded capacity, when set.
    #[must_use]
    pub fn maxlen(&self) -> Option<usize> {
        self.shared.meta.maxlen
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().list.len()
    }

    /// Whether the collection has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the collection is registered with the datastore.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.state.lock().attached
    }

    /// Whether an element with this key exists.
    pub fn contains(&self, key: impl Into<Value>) -> bool {
        self.shared.state.lock().index.contains_key(&key.into())
    }

    /// Set the representative object used to reshape read results.
    pub fn set_sample(&self, sample: Sample) {
        self.shared.state.lock().sample = Some(sample);
    }

    /// Clear the representative object.
    pub fn clear_sample(&self) {
        self.shared.state.lock().sample = None;
    }

    pub(crate) fn mark_attached(&self) {
        self.shared.state.lock().attached = true;
    }

    pub(crate) fn table_created(&self) -> bool {
        self.shared.state.lock().table_created
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register with the process datastore and start mirroring.
    ///
    /// For a local-hosted collection every pre-existing element is
    /// mirrored; the first mirrored element creates the backing table.
    /// For a remote-hosted collection the serialized collection is
    /// forwarded to the node instead.
    pub fn attach(&self) -> Result<()> {
        let ds = store::datastore();
        if self.is_attached() {
            return Err(SuperqError::InvalidArgument(format!(
                "superq {} is already attached",
                self.name()
            )));
        }
        if ds.superq_exists(self.name(), None)? {
            return Err(SuperqError::NotImplemented(
                "attaching to an existing superq",
            ));
        }
        self.shared.state.lock().attached = true;

        if let Err(e) = ds.superq_create(self) {
            self.shared.state.lock().attached = false;
            return Err(e);
        }

        // locally-backed collections mirror each pre-existing element;
        // the first mirror also creates the backing table
        if self.shared.meta.host.is_none() || ds.is_public() {
            let mut st = self.shared.state.lock();
            let ids: Vec<NodeId> = (0..st.list.len())
                .filter_map(|i| st.list.node_at(i))
                .collect();
            for id in ids {
                self.mirror_create(&mut st, id, None)?;
            }
        }
        Ok(())
    }

    /// Rebuild the in-memory image from the backing table.
    ///
    /// # Errors
    ///
    /// Always fails: defined in the design, intentionally absent.
    pub fn reload(&self) -> Result<()> {
        Err(SuperqError::NotImplemented("superq reload"))
    }

    /// Wait for the collection to become empty.
    ///
    /// # Errors
    ///
    /// Always fails: defined in the design, intentionally absent.
    pub fn join(&self) -> Result<()> {
        Err(SuperqError::NotImplemented("superq join"))
    }

    /// Stop mirroring without touching the datastore.
    pub fn detach(&self) -> Result<()> {
        let mut st = self.shared.state.lock();
        if !st.attached {
            return Err(SuperqError::InvalidArgument(format!(
                "superq {} is not attached",
                self.name()
            )));
        }
        st.attached = false;
        Ok(())
    }

    /// Unregister from the datastore and drop the backing table.
    pub fn delete(&self) -> Result<()> {
        let was_attached = {
            let mut st = self.shared.state.lock();
            let was = st.attached;
            st.attached = false;
            was
        };
        if was_attached {
            store::datastore().superq_delete(self)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Push at the tail. On a full bounded collection the head is
    /// evicted, giving a bounded-deque discipline.
    pub fn push(&self, payload: impl Into<Payload>) -> Result<()> {
        self.push_impl(payload.into(), None, PushPos::Tail, PushMode::Evict)
            .map(|_| ())
    }

    /// Alias for [`Superq::push`].
    pub fn push_tail(&self, payload: impl Into<Payload>) -> Result<()> {
        self.push(payload)
    }

    /// Push at the head. On a full bounded collection the tail is
    /// evicted.
    pub fn push_head(&self, payload: impl Into<Payload>) -> Result<()> {
        self.push_impl(payload.into(), None, PushPos::Head, PushMode::Evict)
            .map(|_| ())
    }

    /// Push at an explicit position. Fails with a value error on a full
    /// bounded collection: a mid-insert is not a legal eviction.
    pub fn push_at(&self, idx: usize, payload: impl Into<Payload>) -> Result<()> {
        self.push_impl(payload.into(), None, PushPos::At(idx), PushMode::Evict)
            .map(|_| ())
    }

    /// Push at the tail with a caller-supplied element name. The name is
    /// ignored when the collection mints its own keys.
    pub fn push_named(&self, name: impl Into<Value>, payload: impl Into<Payload>) -> Result<()> {
        self.push_impl(
            payload.into(),
            Some(name.into()),
            PushPos::Tail,
            PushMode::Evict,
        )
        .map(|_| ())
    }

    /// Push at the tail, waiting while the collection is full instead of
    /// evicting. `timeout` of `None` waits indefinitely; the deadline is
    /// absolute, computed at entry. Expiry fails with the full signal.
    pub fn push_wait(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.push_impl(payload.into(), None, PushPos::Tail, PushMode::Wait(timeout))
            .map(|_| ())
    }

    /// [`Superq::push_wait`] at the head.
    pub fn push_head_wait(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.push_impl(payload.into(), None, PushPos::Head, PushMode::Wait(timeout))
            .map(|_| ())
    }

    /// Non-blocking push without eviction: returns `Ok(false)` and
    /// leaves the collection untouched when full.
    pub fn try_push(&self, payload: impl Into<Payload>) -> Result<bool> {
        self.push_impl(payload.into(), None, PushPos::Tail, PushMode::NonBlocking)
    }

    fn wrap_payload(&self, payload: Payload, name: Option<Value>) -> Result<Elem> {
        let meta = &self.shared.meta;
        if let Payload::Elem(e) = payload {
            return Ok(e);
        }
        let name = if meta.auto_key {
            Value::Str(mint_name("sqe"))
        } else if let Some(key_col) = &meta.key_col {
            match &payload {
                Payload::Record(r) => r
                    .fields()
                    .into_iter()
                    .find(|(n, _)| n == key_col)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        SuperqError::UnknownKey(format!("key field {key_col} not found"))
                    })?,
                _ => {
                    return Err(SuperqError::UnknownKey(format!(
                        "key field {key_col} not found"
                    )))
                }
            }
        } else if let Some(name) = name {
            name
        } else {
            return Err(SuperqError::InvalidArgument(
                "element name required without autoKey or keyCol".to_owned(),
            ));
        };
        Ok(match payload {
            Payload::Value(v) => Elem::scalar(name, v),
            Payload::Record(r) => Elem::from_record(name, r),
            Payload::Elem(_) => unreachable!("handled above"),
        })
    }

    fn push_impl(
        &self,
        payload: Payload,
        name: Option<Value>,
        pos: PushPos,
        mode: PushMode,
    ) -> Result<bool> {
        let shared = &self.shared;
        let mut st = shared.state.lock();

        if let Some(maxlen) = shared.meta.maxlen {
            if st.list.len() >= maxlen {
                match mode {
                    PushMode::Evict => match pos {
                        PushPos::At(_) => {
                            return Err(SuperqError::InvalidArgument(format!(
                                "cannot insert into full superq {}",
                                self.name()
                            )));
                        }
                        PushPos::Tail => {
                            self.remove_at_locked(&mut st, 0)?;
                        }
                        PushPos::Head => {
                            let last = st.list.len().saturating_sub(1);
                            self.remove_at_locked(&mut st, last)?;
                        }
                    },
                    PushMode::Wait(timeout) => match timeout {
                        None => {
                            while st.list.len() >= maxlen {
                                shared.not_full.wait(&mut st);
                            }
                        }
                        Some(timeout) => {
                            let deadline = Instant::now() + timeout;
                            while st.list.len() >= maxlen {
                                let timed_out =
                                    shared.not_full.wait_until(&mut st, deadline).timed_out();
                                if timed_out && st.list.len() >= maxlen {
                                    return Err(SuperqError::Full(self.name().to_owned()));
                                }
                            }
                        }
                    },
                    PushMode::NonBlocking => return Ok(false),
                }
            }
        }

        let elem = self.wrap_payload(payload, name)?;
        let elem_name = elem.name().clone();
        if st.index.contains_key(&elem_name) {
            return Err(SuperqError::InvalidArgument(format!(
                "element {elem_name} already exists in superq {}",
                self.name()
            )));
        }

        let (id, mirror_idx) = match pos {
            PushPos::Tail => (st.list.push_tail(elem), None),
            PushPos::Head => (st.list.push_head(elem), Some(0)),
            PushPos::At(idx) => {
                let idx = idx.min(st.list.len());
                (st.list.push(idx, elem), Some(idx))
            }
        };
        st.index.insert(elem_name, id);

        if st.attached {
            self.mirror_create(&mut st, id, mirror_idx)?;
        }

        shared.not_empty.notify_one();
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Pop
    // ------------------------------------------------------------------

    /// Pop the tail (LIFO), waiting while the collection is empty.
    pub fn pop(&self) -> Result<Item> {
        self.pop_impl(None, PopMode::Wait(None))
    }

    /// Pop the tail, waiting up to `timeout`. The deadline is absolute,
    /// computed at entry; expiry fails with the empty signal.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Item> {
        self.pop_impl(None, PopMode::Wait(Some(timeout)))
    }

    /// Non-blocking pop of the tail; fails with the empty signal.
    pub fn try_pop(&self) -> Result<Item> {
        self.pop_impl(None, PopMode::NonBlocking)
    }

    /// Pop the head (FIFO when paired with tail pushes), waiting while
    /// the collection is empty.
    pub fn pop_head(&self) -> Result<Item> {
        self.pop_impl(Some(0), PopMode::Wait(None))
    }

    /// Pop the head, waiting up to `timeout`.
    pub fn pop_head_timeout(&self, timeout: Duration) -> Result<Item> {
        self.pop_impl(Some(0), PopMode::Wait(Some(timeout)))
    }

    /// Non-blocking pop of the head.
    pub fn try_pop_head(&self) -> Result<Item> {
        self.pop_impl(Some(0), PopMode::NonBlocking)
    }

    /// Pop the element at an explicit position, waiting while empty.
    pub fn pop_at(&self, idx: usize) -> Result<Item> {
        self.pop_impl(Some(idx), PopMode::Wait(None))
    }

    fn pop_impl(&self, idx: Option<usize>, mode: PopMode) -> Result<Item> {
        let shared = &self.shared;
        let mut st = shared.state.lock();

        match mode {
            PopMode::NonBlocking => {
                if st.list.is_empty() {
                    return Err(SuperqError::Empty(self.name().to_owned()));
                }
            }
            PopMode::Wait(None) => {
                while st.list.is_empty() {
                    shared.not_empty.wait(&mut st);
                }
            }
            PopMode::Wait(Some(timeout)) => {
                let deadline = Instant::now() + timeout;
                while st.list.is_empty() {
                    let timed_out = shared.not_empty.wait_until(&mut st, deadline).timed_out();
                    if timed_out && st.list.is_empty() {
                        return Err(SuperqError::Empty(self.name().to_owned()));
                    }
                }
            }
        }

        let idx = idx.unwrap_or_else(|| st.list.len() - 1);
        let elem = self.remove_at_locked(&mut st, idx)?;
        shared.not_full.notify_one();

        let sample = st.sample.clone();
        drop(st);
        unwrap_elem(elem, sample.as_ref())
    }

    /// Remove the element at `idx` from both indices and mirror the row
    /// delete. The caller holds the lock and signals not_full.
    fn remove_at_locked(&self, st: &mut MutexGuard<'_, State>, idx: usize) -> Result<Elem> {
        let elem = st
            .list
            .pop(idx)
            .ok_or_else(|| SuperqError::Empty(self.name().to_owned()))?;
        st.index.remove(elem.name());
        if st.attached {
            store::datastore().superqelem_delete(&self.shared.meta, elem.name())?;
        }
        Ok(elem)
    }

    // ------------------------------------------------------------------
    // Mirror plumbing (runs under the state lock)
    // ------------------------------------------------------------------

    fn mirror_create(
        &self,
        st: &mut MutexGuard<'_, State>,
        id: NodeId,
        idx: Option<usize>,
    ) -> Result<()> {
        let ds = store::datastore();
        let schema = match &st.schema {
            Some(schema) => schema.clone(),
            None => {
                let schema = Schema::from_first_elem(
                    st.list.value(id),
                    self.shared.meta.key_col.as_deref(),
                );
                st.schema = Some(schema.clone());
                schema
            }
        };
        let create_table =
            !st.table_created && (self.shared.meta.host.is_none() || ds.is_public());
        ds.superqelem_create(&self.shared.meta, &schema, st.list.value(id), idx, create_table)?;
        if create_table {
            st.table_created = true;
        }
        Ok(())
    }

    fn mirror_update(&self, st: &MutexGuard<'_, State>, id: NodeId) -> Result<()> {
        if st.attached {
            store::datastore().superqelem_update(
                &self.shared.meta,
                st.schema.as_ref(),
                st.list.value(id),
            )?;
        }
        Ok(())
    }

    fn mirror_update_links(&self, st: &MutexGuard<'_, State>, id: NodeId) -> Result<()> {
        if st.attached {
            store::datastore().superqelem_update_links(&self.shared.meta, st.list.value(id))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn locate(st: &State, key: &Value) -> Option<NodeId> {
        if let Some(id) = st.index.get(key) {
            return Some(*id);
        }
        // elements not keyed on an integer treat it as an index
        if let Value::Int(i) = key {
            if *i >= 0 {
                #[allow(clippy::cast_sign_loss)]
                return st.list.node_at(*i as usize);
            }
        }
        None
    }

    /// Read the element under `key`, demarshalled. Keyed lookup wins;
    /// an integer key that is not an element name is used as an index.
    pub fn get(&self, key: impl Into<Value>) -> Result<Item> {
        let key = key.into();
        let st = self.shared.state.lock();
        let id = Self::locate(&st, &key)
            .ok_or_else(|| SuperqError::UnknownKey(key.to_string()))?;
        let elem = st.list.value(id).clone();
        let sample = st.sample.clone();
        drop(st);
        unwrap_elem(elem, sample.as_ref())
    }

    /// Read the element at `idx`, demarshalled.
    pub fn get_at(&self, idx: usize) -> Result<Item> {
        let st = self.shared.state.lock();
        let id = st
            .list
            .node_at(idx)
            .ok_or_else(|| SuperqError::UnknownKey(idx.to_string()))?;
        let elem = st.list.value(id).clone();
        let sample = st.sample.clone();
        drop(st);
        unwrap_elem(elem, sample.as_ref())
    }

    /// Snapshot the raw element under `key`, with no demarshalling.
    pub fn elem(&self, key: impl Into<Value>) -> Result<Elem> {
        let key = key.into();
        let st = self.shared.state.lock();
        Self::locate(&st, &key)
            .map(|id| st.list.value(id).clone())
            .ok_or_else(|| SuperqError::UnknownKey(key.to_string()))
    }

    /// Snapshot the raw element at `idx`.
    pub fn elem_at(&self, idx: usize) -> Result<Elem> {
        let st = self.shared.state.lock();
        st.list
            .node_at(idx)
            .map(|id| st.list.value(id).clone())
            .ok_or_else(|| SuperqError::UnknownKey(idx.to_string()))
    }

    /// A live handle to the element under `key`, for in-place atom and
    /// link mutation.
    pub fn elem_ref(&self, key: impl Into<Value>) -> Result<ElemRef> {
        let key = key.into();
        let st = self.shared.state.lock();
        let id = Self::locate(&st, &key)
            .ok_or_else(|| SuperqError::UnknownKey(key.to_string()))?;
        let name = st.list.value(id).name().clone();
        drop(st);
        Ok(ElemRef {
            sq: self.clone(),
            name,
        })
    }

    /// Snapshot all elements in order.
    #[must_use]
    pub fn elems(&self) -> Vec<Elem> {
        let st = self.shared.state.lock();
        st.list.iter().cloned().collect()
    }

    /// Snapshot all elements in order, demarshalled.
    pub fn items(&self) -> Result<Vec<Item>> {
        let (elems, sample) = {
            let st = self.shared.state.lock();
            (
                st.list.iter().cloned().collect::<Vec<_>>(),
                st.sample.clone(),
            )
        };
        elems
            .into_iter()
            .map(|e| unwrap_elem(e, sample.as_ref()))
            .collect()
    }

    /// Clone out a detached collection holding a slice of this one, with
    /// half-open bounds and a signed step that wraps at the boundaries.
    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: i64) -> Result<Superq> {
        let elems = {
            let st = self.shared.state.lock();
            st.list.slice(start, stop, step)?
        };
        let sq = Superq::builder().build()?;
        for elem in elems {
            sq.push(elem)?;
        }
        Ok(sq)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Overwrite the scalar element under `key`, or create it when the
    /// key is unknown.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        {
            let mut st = self.shared.state.lock();
            if let Some(id) = Self::locate(&st, &key) {
                let elem = st.list.value_mut(id);
                if !elem.is_scalar() {
                    return Err(SuperqError::NotImplemented(
                        "keyed assignment over structured elements",
                    ));
                }
                elem.set_scalar(value)?;
                return self.mirror_update(&st, id);
            }
        }
        self.push(Elem::scalar(key, value))
    }

    /// Copy an incoming element's values onto the local element of the
    /// same name without touching the datastore. Used when the incoming
    /// element is already the authoritative image.
    pub(crate) fn absorb_elem_local(&self, incoming: &Elem) -> Result<()> {
        let mut st = self.shared.state.lock();
        let id = st
            .index
            .get(incoming.name())
            .copied()
            .ok_or_else(|| SuperqError::UnknownKey(incoming.name().to_string()))?;
        st.list.value_mut(id).absorb(incoming)
    }

    /// Copy a detached element's atom values, scalar value, and links
    /// onto the local element of the same name, then mirror.
    pub fn update_elem(&self, incoming: &Elem) -> Result<()> {
        let mut st = self.shared.state.lock();
        let id = st
            .index
            .get(incoming.name())
            .copied()
            .ok_or_else(|| SuperqError::UnknownKey(incoming.name().to_string()))?;
        st.list.value_mut(id).absorb(incoming)?;
        self.mirror_update(&st, id)
    }

    /// Locate the element corresponding to a user object and copy the
    /// object's field values onto its atoms, then mirror.
    ///
    /// Resolution uses the key column when configured, then the key hint
    /// written onto objects returned from reads.
    pub fn update_record(&self, obj: &dyn Record) -> Result<()> {
        let name = self.record_key(obj)?;
        let fields: HashMap<String, Value> = obj.fields().into_iter().collect();
        let mut st = self.shared.state.lock();
        let id = st
            .index
            .get(&name)
            .copied()
            .ok_or_else(|| SuperqError::UnknownKey(name.to_string()))?;
        {
            let elem = st.list.value_mut(id);
            let atom_names: Vec<String> = elem.atoms().map(|a| a.name.clone()).collect();
            for atom_name in atom_names {
                let value = fields.get(&atom_name).ok_or_else(|| {
                    SuperqError::ObjectNotRecognized(format!("object has no field {atom_name}"))
                })?;
                elem.set(&atom_name, value.clone())?;
            }
            elem.set_source_object(Some(obj.clone_record()));
        }
        self.mirror_update(&st, id)
    }

    fn record_key(&self, obj: &dyn Record) -> Result<Value> {
        if let Some(key_col) = &self.shared.meta.key_col {
            return obj
                .fields()
                .into_iter()
                .find(|(n, _)| n == key_col)
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    SuperqError::ObjectNotRecognized(format!("key field {key_col} not found"))
                });
        }
        obj.key_hint()
            .ok_or_else(|| SuperqError::ObjectNotRecognized("object carries no key".to_owned()))
    }

    /// Remove the element under `key` from both indices and the backing
    /// table. Keyed lookup wins; an integer key that is not an element
    /// name is used as an index.
    pub fn delete_elem(&self, key: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let mut st = self.shared.state.lock();
        let id = Self::locate(&st, &key)
            .ok_or_else(|| SuperqError::UnknownKey(key.to_string()))?;
        self.delete_node_locked(&mut st, id)
    }

    /// Remove the element at `idx`.
    pub fn delete_at(&self, idx: usize) -> Result<()> {
        let mut st = self.shared.state.lock();
        let id = st
            .list
            .node_at(idx)
            .ok_or_else(|| SuperqError::UnknownKey(idx.to_string()))?;
        self.delete_node_locked(&mut st, id)
    }

    /// Remove the element corresponding to a user object.
    pub fn delete_record(&self, obj: &dyn Record) -> Result<()> {
        let name = self.record_key(obj)?;
        self.delete_elem(name)
    }

    fn delete_node_locked(&self, st: &mut MutexGuard<'_, State>, id: NodeId) -> Result<()> {
        let elem = st.list.pop_node(id);
        st.index.remove(elem.name());
        if st.attached {
            store::datastore().superqelem_delete(&self.shared.meta, elem.name())?;
        }
        self.shared.not_full.notify_one();
        Ok(())
    }

    /// Rotate `n` positions toward the head (negative `n`: toward the
    /// tail) by repeated pop-and-push at opposite ends.
    pub fn rotate(&self, n: i64) -> Result<()> {
        for _ in 0..n.unsigned_abs() {
            if self.is_empty() {
                break;
            }
            if n >= 0 {
                let item = self.try_pop()?;
                self.push_head(item)?;
            } else {
                let item = self.try_pop_head()?;
                self.push_tail(item)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    /// Query the backing table (and any other attached collections named
    /// in `tables`) through the embedded engine. `<self>` in any input
    /// is replaced by this collection's local name.
    ///
    /// The result is a new detached collection with one element per row,
    /// reshaped through `sample` when given. Queries require the
    /// collection to be attached.
    pub fn query(
        &self,
        columns: &[&str],
        tables: &[&str],
        conditional: &str,
        sample: Option<Sample>,
    ) -> Result<Superq> {
        if !self.is_attached() {
            return Err(SuperqError::NotImplemented(
                "queries on detached superqs",
            ));
        }
        store::datastore().superq_query(self, columns, tables, conditional, sample)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    fn attrs_line(&self) -> String {
        let meta = &self.shared.meta;
        format!(
            "host|{},keyCol|{},maxlen|{},autoKey|{}",
            meta.host.as_deref().unwrap_or("None"),
            meta.key_col.as_deref().unwrap_or("None"),
            meta.maxlen.map_or_else(|| "None".to_owned(), |m| m.to_string()),
            if meta.auto_key { "True" } else { "False" },
        )
    }

    /// Serialize to the wire form:
    /// `name,count;attr|val,...;elemLen,elemBytes...`.
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        let st = self.shared.state.lock();
        let mut wire = format!("{},{};{};", self.name(), st.list.len(), self.attrs_line());
        for elem in st.list.iter() {
            let elem_wire = elem.to_wire();
            wire.push_str(&format!("{},{elem_wire}", elem_wire.len()));
        }
        wire
    }

    /// Deserialize a detached collection from its wire form.
    pub fn from_wire_str(wire: &str) -> Result<Superq> {
        let (meta, elems) = parse_wire(wire)?;
        let sq = Superq::from_meta(meta);
        {
            let mut st = sq.shared.state.lock();
            for elem in elems {
                let name = elem.name().clone();
                let id = st.list.push_tail(elem);
                st.index.insert(name, id);
            }
        }
        Ok(sq)
    }

    /// Replace this collection's elements with those parsed from a wire
    /// form, keeping identity, attachment, and configuration.
    pub(crate) fn rebuild_from_wire(&self, wire: &str) -> Result<()> {
        let (_, elems) = parse_wire(wire)?;
        let mut st = self.shared.state.lock();
        st.list = OrderedList::new();
        st.index = HashMap::new();
        for elem in elems {
            let name = elem.name().clone();
            let id = st.list.push_tail(elem);
            st.index.insert(name, id);
        }
        Ok(())
    }

    /// Save to a file: line 1 the name, line 2 the attribute pairs, then
    /// one serialized element per line.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        let st = self.shared.state.lock();
        writeln!(file, "{}", self.name())?;
        writeln!(file, "{}", self.attrs_line())?;
        for elem in st.list.iter() {
            writeln!(file, "{}", elem.to_wire())?;
        }
        Ok(())
    }

    /// Restore a collection saved with [`Superq::save`], optionally
    /// attaching it.
    pub fn load(path: impl AsRef<Path>, attach: bool) -> Result<Superq> {
        let file = std::fs::File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let name = lines
            .next()
            .transpose()?
            .ok_or_else(|| SuperqError::InvalidArgument("empty superq file".to_owned()))?;
        let attrs = lines.next().transpose()?.unwrap_or_default();
        let meta = meta_from_attrs(name.trim().to_owned(), &attrs)?;
        let sq = Superq::from_meta(meta);

        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            sq.push(Elem::from_wire(line.trim())?)?;
        }
        if attach {
            sq.attach()?;
        }
        Ok(sq)
    }
}

impl fmt::Debug for Superq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Superq")
            .field("name", &self.name())
            .field("host", &self.shared.meta.host)
            .field("len", &self.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Scalar elements read back as their value; structured elements are
/// demarshalled through the sample.
fn unwrap_elem(elem: Elem, sample: Option<&Sample>) -> Result<Item> {
    if let Some(value) = elem.scalar_value() {
        return Ok(Item::Value(value.clone()));
    }
    elem.demarshal(sample)
}

fn meta_from_attrs(name: String, attrs: &str) -> Result<SuperqMeta> {
    let mut host = None;
    let mut key_col = None;
    let mut maxlen = None;
    let mut auto_key = None;

    for pair in attrs.split(',') {
        if pair.is_empty() {
            continue;
        }
        let (attr, value) = pair.split_once('|').ok_or_else(|| {
            SuperqError::InvalidArgument(format!("bad attribute pair: {pair}"))
        })?;
        if value.starts_with("None") {
            continue;
        }
        match attr {
            "host" => host = Some(value.to_owned()),
            "keyCol" => key_col = Some(value.to_owned()),
            "maxlen" => {
                maxlen = Some(value.parse().map_err(|_| {
                    SuperqError::InvalidArgument(format!("bad maxlen: {value}"))
                })?);
            }
            "autoKey" => auto_key = Some(value.starts_with("True") || value.starts_with("true")),
            _ => {}
        }
    }

    let auto_key = auto_key.unwrap_or(key_col.is_none());
    Ok(SuperqMeta {
        name,
        host,
        key_col,
        auto_key,
        maxlen,
    })
}

fn parse_wire(wire: &str) -> Result<(SuperqMeta, Vec<Elem>)> {
    let bad = || SuperqError::MalformedRequest(format!("bad superq: {wire}"));

    let sep = wire.find(';').ok_or_else(bad)?;
    let header = &wire[..sep];
    let rest = &wire[sep + 1..];

    let (name, count) = header.split_once(',').ok_or_else(bad)?;
    let count: usize = count.parse().map_err(|_| bad())?;

    let sep = rest.find(';').ok_or_else(bad)?;
    let attrs = &rest[..sep];
    let mut body = &rest[sep + 1..];

    let meta = meta_from_attrs(name.to_owned(), attrs)?;

    let mut elems = Vec::with_capacity(count);
    for _ in 0..count {
        let sep = body.find(',').ok_or_else(bad)?;
        let elem_len: usize = body[..sep].parse().map_err(|_| bad())?;
        body = &body[sep + 1..];
        if elem_len > body.len() {
            return Err(bad());
        }
        elems.push(Elem::from_wire(&body[..elem_len])?);
        body = &body[elem_len..];
    }
    Ok((meta, elems))
}

/// A live handle to one element of a collection.
///
/// Reads and writes go through the parent's lock; writes on an attached
/// collection mirror to the datastore. Link reads resolve the referenced
/// collection by name and return a handle to the live element.
#[derive(Clone)]
pub struct ElemRef {
    sq: Superq,
    name: Value,
}

impl ElemRef {
    /// The element's name.
    #[must_use]
    pub fn name(&self) -> &Value {
        &self.name
    }

    /// The element's host-qualified public name.
    #[must_use]
    pub fn public_name(&self) -> String {
        format!("{}.{}", self.sq.public_name(), self.name)
    }

    /// The collection this element belongs to.
    #[must_use]
    pub fn superq(&self) -> &Superq {
        &self.sq
    }

    fn with_node<T>(
        &self,
        f: impl FnOnce(&Superq, &mut MutexGuard<'_, State>, NodeId) -> Result<T>,
    ) -> Result<T> {
        let mut st = self.sq.shared.state.lock();
        let id = st
            .index
            .get(&self.name)
            .copied()
            .ok_or_else(|| SuperqError::UnknownKey(self.name.to_string()))?;
        f(&self.sq, &mut st, id)
    }

    /// Read an atom value by name.
    pub fn get(&self, atom: &str) -> Result<Value> {
        self.with_node(|_, st, id| st.list.value(id).get(atom).cloned())
    }

    /// Read an atom value by position.
    pub fn get_at(&self, idx: usize) -> Result<Value> {
        self.with_node(|_, st, id| st.list.value(id).get_at(idx).cloned())
    }

    /// Overwrite an atom in place, by name, and mirror the row update.
    pub fn set(&self, atom: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_node(|sq, st, id| {
            st.list.value_mut(id).set(atom, value)?;
            sq.mirror_update(st, id)
        })
    }

    /// Overwrite an atom in place, by position, and mirror.
    pub fn set_at(&self, idx: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_node(|sq, st, id| {
            st.list.value_mut(id).set_at(idx, value)?;
            sq.mirror_update(st, id)
        })
    }

    /// Overwrite the scalar value and mirror.
    pub fn set_scalar(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_node(|sq, st, id| {
            st.list.value_mut(id).set_scalar(value)?;
            sq.mirror_update(st, id)
        })
    }

    /// Record a link from `attr` to another element, replacing any prior
    /// mapping. Only the `_links_` column is mirrored; the collection
    /// structure is untouched.
    pub fn set_link(&self, attr: &str, target: &ElemRef) -> Result<()> {
        let target_name = target.public_name();
        self.with_node(|sq, st, id| {
            st.list.value_mut(id).set_link(attr, &target_name);
            sq.mirror_update_links(st, id)
        })
    }

    /// Resolve a link attribute to the live element it references.
    pub fn link(&self, attr: &str) -> Result<ElemRef> {
        let target = self.with_node(|_, st, id| {
            st.list
                .value(id)
                .link_target(attr)
                .map(ToOwned::to_owned)
                .ok_or_else(|| SuperqError::UnknownKey(attr.to_owned()))
        })?;
        let (sq_name, elem_name) = target.rsplit_once('.').ok_or_else(|| {
            SuperqError::InvalidArgument(format!("bad link target: {target}"))
        })?;
        let sq = store::datastore().superq_read(sq_name, None)?;
        sq.elem_ref(Value::parse_lenient(elem_name))
    }

    /// Snapshot the element.
    pub fn to_elem(&self) -> Result<Elem> {
        self.with_node(|_, st, id| Ok(st.list.value(id).clone()))
    }
}

impl fmt::Debug for ElemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElemRef")
            .field("superq", &self.sq.name())
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomType;

    fn values_sq(values: &[i64]) -> Superq {
        let sq = Superq::builder().build().unwrap();
        for v in values {
            sq.push(*v).unwrap();
        }
        sq
    }

    fn scalar_values(sq: &Superq) -> Vec<Value> {
        sq.elems()
            .into_iter()
            .map(|e| e.scalar_value().cloned().unwrap())
            .collect()
    }

    #[test]
    fn push_then_pop_is_identity() {
        let sq = values_sq(&[1, 2, 3]);
        // LIFO at the tail
        assert_eq!(sq.try_pop().unwrap().into_value().unwrap(), Value::Int(3));
        // FIFO when popping the head after tail pushes
        assert_eq!(
            sq.try_pop_head().unwrap().into_value().unwrap(),
            Value::Int(1)
        );
        assert_eq!(sq.len(), 1);
    }

    #[test]
    fn dual_index_stays_aligned() {
        let sq = Superq::builder().build().unwrap();
        for i in 0..10 {
            sq.push(Elem::scalar(format!("k{i}"), i64::from(i))).unwrap();
        }
        assert_eq!(sq.len(), 10);
        for i in 0..10 {
            assert!(sq.contains(format!("k{i}")));
        }
        sq.delete_elem("k3").unwrap();
        assert_eq!(sq.len(), 9);
        assert!(!sq.contains("k3"));
        assert_eq!(sq.elems().len(), 9);
    }

    #[test]
    fn bounded_push_evicts_opposite_end() {
        let sq = Superq::builder().maxlen(5).build().unwrap();
        for v in [1, 2, 3, 4, 5] {
            sq.push(v).unwrap();
        }

        sq.push(6).unwrap();
        assert_eq!(
            scalar_values(&sq),
            vec![2, 3, 4, 5, 6].into_iter().map(Value::Int).collect::<Vec<_>>()
        );

        sq.push_head(0).unwrap();
        assert_eq!(
            scalar_values(&sq),
            vec![0, 2, 3, 4, 5].into_iter().map(Value::Int).collect::<Vec<_>>()
        );

        let err = sq.push_at(2, 9).unwrap_err();
        assert!(matches!(err, SuperqError::InvalidArgument(_)));
        assert_eq!(sq.len(), 5);
    }

    #[test]
    fn size_never_exceeds_maxlen() {
        let sq = Superq::builder().maxlen(3).build().unwrap();
        for v in 0..20 {
            sq.push(v).unwrap();
            assert!(sq.len() <= 3);
        }
    }

    #[test]
    fn try_push_full_returns_without_mutating() {
        let sq = Superq::builder().maxlen(2).build().unwrap();
        sq.push(1).unwrap();
        sq.push(2).unwrap();
        assert!(!sq.try_push(3).unwrap());
        assert_eq!(sq.len(), 2);
        assert_eq!(
            scalar_values(&sq),
            vec![Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn blocking_push_times_out_with_full() {
        let sq = Superq::builder().maxlen(1).build().unwrap();
        sq.push(1).unwrap();
        let err = sq
            .push_wait(2, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.is_full_signal());
    }

    #[test]
    fn blocking_pop_times_out_with_empty() {
        let sq = Superq::builder().build().unwrap();
        let err = sq.pop_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_empty_signal());
    }

    #[test]
    fn pop_unblocks_waiting_push() {
        let sq = Superq::builder().maxlen(1).build().unwrap();
        sq.push(1).unwrap();

        let pusher = {
            let sq = sq.clone();
            std::thread::spawn(move || sq.push_wait(2, Some(Duration::from_secs(5))))
        };
        std::thread::sleep(Duration::from_millis(30));
        sq.pop().unwrap();
        pusher.join().unwrap().unwrap();
        assert_eq!(scalar_values(&sq), vec![Value::Int(2)]);
    }

    #[test]
    fn keyed_get_wins_over_index() {
        let sq = Superq::builder().build().unwrap();
        // element keyed on the integer 1
        sq.push(Elem::scalar(1_i64, "keyed")).unwrap();
        sq.push(Elem::scalar("other", "positional")).unwrap();

        // 1 is an element name, so it is not an index
        assert_eq!(
            sq.get(1_i64).unwrap().into_value().unwrap(),
            Value::Str("keyed".to_owned())
        );
        // 0 is not an element name, so it indexes
        assert_eq!(
            sq.get(0_i64).unwrap().into_value().unwrap(),
            Value::Str("keyed".to_owned())
        );
    }

    #[test]
    fn key_col_extracts_element_names() {
        struct Pair {
            a: String,
            b: i64,
        }
        impl Record for Pair {
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
                Box::new(Self {
                    a: self.a.clone(),
                    b: self.b,
                })
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
                self
            }
        }

        let sq = Superq::builder().key_col("a").build().unwrap();
        sq.push(Box::new(Pair {
            a: "x".to_owned(),
            b: 1,
        }) as Box<dyn Record>)
            .unwrap();
        assert!(sq.contains("x"));

        let elem = sq.elem("x").unwrap();
        assert_eq!(elem.get("b").unwrap(), &Value::Int(1));

        // the remembered source object comes back verbatim
        let item = sq.get("x").unwrap();
        let pair: Pair = item.downcast().unwrap();
        assert_eq!(pair.b, 1);
    }

    #[test]
    fn rotate_moves_toward_head() {
        let sq = values_sq(&[1, 2, 3, 4, 5]);
        sq.rotate(2).unwrap();
        assert_eq!(
            scalar_values(&sq),
            vec![4, 5, 1, 2, 3].into_iter().map(Value::Int).collect::<Vec<_>>()
        );
        sq.rotate(-2).unwrap();
        assert_eq!(
            scalar_values(&sq),
            vec![1, 2, 3, 4, 5].into_iter().map(Value::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn slice_detached_clone() {
        let sq = values_sq(&[1, 2, 3, 4, 5]);
        let sliced = sq.slice(Some(1), Some(4), 1).unwrap();
        assert_eq!(
            scalar_values(&sliced),
            vec![2, 3, 4].into_iter().map(Value::Int).collect::<Vec<_>>()
        );
        assert_eq!(sq.len(), 5);
    }

    #[test]
    fn wire_round_trip_preserves_everything() {
        let sq = Superq::builder().name("wiresq").maxlen(7).build().unwrap();
        sq.push(1).unwrap();
        sq.push("two").unwrap();

        let back = Superq::from_wire_str(&sq.to_wire_string()).unwrap();
        assert_eq!(back.name(), "wiresq");
        assert_eq!(back.maxlen(), Some(7));
        assert_eq!(back.len(), 2);
        assert!(back.auto_key());
        assert_eq!(back.elems(), sq.elems());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sq.txt");

        let sq = Superq::builder().name("filesq").build().unwrap();
        for v in [10, 20, 30] {
            sq.push(v).unwrap();
        }
        sq.save(&path).unwrap();

        let back = Superq::load(&path, false).unwrap();
        assert_eq!(back.name(), "filesq");
        assert_eq!(back.elems(), sq.elems());
    }

    #[test]
    fn update_elem_requires_known_name() {
        let sq = values_sq(&[1]);
        let ghost = Elem::scalar("ghost", 9);
        assert!(matches!(
            sq.update_elem(&ghost),
            Err(SuperqError::UnknownKey(_))
        ));
    }
}
