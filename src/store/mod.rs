//! The process datastore: a registry of collections by public name, a
//! pool of connections to the embedded engine, and the dispatch point
//! that decides whether an operation runs locally or is forwarded to a
//! remote node.
//!
//! The datastore is a lazily initialized process-wide handle. A single
//! coarse lock guards registration and unregistration; per-collection
//! mutations rely on each collection's own lock. A datastore flipped to
//! public mode (the node server role) executes every operation locally
//! and never forwards.

mod pool;
mod sql;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::collection::{Elem, Schema, Superq, SuperqMeta};
use crate::error::{Result, SuperqError};
use crate::net::client::NetworkClientMgr;
use crate::types::{AtomType, Sample, Value};

use pool::ConnPool;

static DATASTORE: OnceLock<DataStore> = OnceLock::new();

/// The process-wide datastore handle.
pub fn datastore() -> &'static DataStore {
    DATASTORE.get_or_init(DataStore::new)
}

/// Release pooled engine connections and sockets, and terminate the
/// auto-launched node process if this process started one.
pub fn shutdown() {
    if let Some(ds) = DATASTORE.get() {
        ds.shutdown();
    }
}

/// Registry of collections plus the engine connection pool.
pub struct DataStore {
    public: AtomicBool,
    registry: Mutex<HashMap<String, Superq>>,
    pool: ConnPool,
    // the shared-cache in-memory database lives only while at least one
    // connection is open; this one anchors it for the process lifetime
    anchor: Mutex<Option<rusqlite::Connection>>,
    client: OnceLock<NetworkClientMgr>,
}

impl DataStore {
    fn new() -> Self {
        Self {
            public: AtomicBool::new(false),
            registry: Mutex::new(HashMap::new()),
            pool: ConnPool::new(),
            anchor: Mutex::new(None),
            client: OnceLock::new(),
        }
    }

    /// Whether this process is a networked node: remote-host operations
    /// are then executed locally rather than forwarded.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public.load(Ordering::SeqCst)
    }

    /// Flip this datastore into public (node server) mode.
    pub fn set_public(&self) {
        self.public.store(true, Ordering::SeqCst);
    }

    fn client(&self) -> &NetworkClientMgr {
        self.client.get_or_init(NetworkClientMgr::new)
    }

    /// Restore the datastore from a file.
    ///
    /// # Errors
    ///
    /// Always fails: defined in the design, intentionally absent
    /// (durable storage is out of scope).
    pub fn load_from_file(&self) -> Result<()> {
        Err(SuperqError::NotImplemented("datastore load_from_file"))
    }

    /// Persist the datastore to a file.
    ///
    /// # Errors
    ///
    /// Always fails: defined in the design, intentionally absent
    /// (durable storage is out of scope).
    pub fn save_to_file(&self) -> Result<()> {
        Err(SuperqError::NotImplemented("datastore save_to_file"))
    }

    fn acquire(&self) -> Result<rusqlite::Connection> {
        {
            let mut anchor = self.anchor.lock();
            if anchor.is_none() {
                *anchor = Some(pool::open_conn()?);
            }
        }
        self.pool.acquire()
    }

    fn release(&self, conn: rusqlite::Connection) {
        self.pool.release(conn);
    }

    /// Whether a collection is registered (or, for a remote host from a
    /// private process, known to the node).
    pub fn superq_exists(&self, name: &str, host: Option<&str>) -> Result<bool> {
        if let Some(host) = host {
            if !self.is_public() {
                let public_name = format!("{host}.{name}");
                return self.client().superq_exists(&public_name, host);
            }
        }
        Ok(self.registry.lock().contains_key(name))
    }

    /// Register a collection under its public name; remote-hosted
    /// collections are first created on their node.
    pub fn superq_create(&self, sq: &Superq) -> Result<()> {
        if let Some(host) = sq.host() {
            if !self.is_public() {
                self.client()
                    .superq_create(&host, &sq.public_name(), &sq.to_wire_string())?;
            }
        }
        let public_name = sq.public_name();
        let mut registry = self.registry.lock();
        if registry.contains_key(&public_name) {
            return Err(SuperqError::InvalidArgument(format!(
                "superq {public_name} exists"
            )));
        }
        registry.insert(public_name, sq.clone());
        Ok(())
    }

    /// Look up a collection. For a remote host from a private process
    /// the node's serialized image is fetched and the local cache is
    /// rebuilt from it (or created and registered on first read).
    pub fn superq_read(&self, name: &str, host: Option<&str>) -> Result<Superq> {
        if let Some(host) = host {
            if !self.is_public() {
                let public_name = format!("{host}.{name}");
                let wire = self.client().superq_read(&public_name, host)?;

                let known = self.registry.lock().get(&public_name).cloned();
                return match known {
                    Some(sq) => {
                        sq.rebuild_from_wire(&wire)?;
                        Ok(sq)
                    }
                    None => {
                        let sq = Superq::from_wire_str(&wire)?;
                        sq.mark_attached();
                        self.registry.lock().insert(public_name, sq.clone());
                        Ok(sq)
                    }
                };
            }
        }
        self.registry
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SuperqError::UnknownCollection(name.to_owned()))
    }

    /// Unregister a collection and drop its backing table (locally, or
    /// on its node).
    pub fn superq_delete(&self, sq: &Superq) -> Result<()> {
        {
            let mut registry = self.registry.lock();
            if registry.remove(&sq.public_name()).is_none() {
                return Err(SuperqError::UnknownCollection(sq.public_name()));
            }
        }

        if let Some(host) = sq.host() {
            if !self.is_public() {
                return self.client().superq_delete(&host, &sq.public_name());
            }
        }

        if sq.table_created() {
            let conn = self.acquire()?;
            let result = sql::db_delete_table(&conn, sq.name());
            self.release(conn);
            result?;
        }
        Ok(())
    }

    /// Run a relational query for a collection, substituting `<self>`
    /// with its local name, locally or on its node.
    pub fn superq_query(
        &self,
        sq: &Superq,
        columns: &[&str],
        tables: &[&str],
        conditional: &str,
        sample: Option<Sample>,
    ) -> Result<Superq> {
        let table_str = tables.join(",");
        if !table_str.contains("<self>") {
            return Err(SuperqError::InvalidArgument(format!(
                "join tables ({table_str}) not valid"
            )));
        }

        let col_str = columns.join(",").replace("<self>", sq.name());
        let table_str = table_str.replace("<self>", sq.name());
        let conditional = conditional.replace("<self>", sq.name());
        let query = format!("SELECT {col_str} FROM {table_str} WHERE {conditional};");

        match sq.host() {
            Some(host) if !self.is_public() => {
                let wire = self
                    .client()
                    .superq_query(&host, &sq.public_name(), &query)?;
                let result = Superq::from_wire_str(&wire)?;
                if let Some(sample) = sample {
                    result.set_sample(sample);
                }
                Ok(result)
            }
            _ => self.superq_query_local(&query, sample),
        }
    }

    /// Execute a query against the embedded engine and rebuild each
    /// result row as an element of a new detached collection.
    pub(crate) fn superq_query_local(
        &self,
        query: &str,
        sample: Option<Sample>,
    ) -> Result<Superq> {
        let conn = self.acquire()?;
        let rows = sql::db_select(&conn, query);
        self.release(conn);
        let rows = rows?;

        let result = Superq::builder().build()?;
        // single-value samples read the scalar column
        let scalar_ty = match &sample {
            Some(Sample::Str) => Some(AtomType::Str),
            Some(Sample::Int) => Some(AtomType::Int),
            Some(Sample::Float) => Some(AtomType::Float),
            _ => None,
        };
        for row in rows {
            if let Some(ty) = scalar_ty {
                let value = row
                    .get("_val_")
                    .ok_or_else(|| SuperqError::UnknownKey("_val_".to_owned()))?;
                result.push(value.coerce_to(ty)?)?;
                continue;
            }

            let mut elem = Elem::structured(Value::Str(crate::collection::elem::mint_name(
                "sqe",
            )));
            for (col, value) in row.columns {
                let Some(value) = value else { continue };
                let field = col.rsplit('.').next().unwrap_or(&col);
                elem.add_atom(field, value.atom_type(), value);
            }
            result.push(elem)?;
        }

        if let Some(sample @ Sample::Record(_)) = sample {
            result.set_sample(sample);
        }
        Ok(result)
    }

    /// Mirror an element insert: create the backing table when this is
    /// the first element, then insert the row (or forward both to the
    /// node).
    pub(crate) fn superqelem_create(
        &self,
        meta: &SuperqMeta,
        schema: &Schema,
        elem: &Elem,
        idx: Option<usize>,
        create_table: bool,
    ) -> Result<()> {
        if let Some(host) = &meta.host {
            if !self.is_public() {
                return self.client().superqelem_create(
                    host,
                    &meta.public_name(),
                    idx,
                    &elem.to_wire(),
                );
            }
        }

        let conn = self.acquire()?;
        let result = (|| {
            if create_table {
                sql::db_create_table(&conn, &meta.name, &schema.name_type_str)?;
            }
            let values = insert_values(schema, elem)?;
            sql::db_create_row(&conn, &meta.name, &schema.name_str, &values)
        })();
        self.release(conn);
        result
    }

    /// Snapshot one element, from the local image or from the node.
    pub fn superqelem_read(&self, sq: &Superq, name: &Value) -> Result<Elem> {
        if let Some(host) = sq.host() {
            if !self.is_public() {
                let wire = self
                    .client()
                    .superqelem_read(&host, &sq.public_name(), &name.to_string())?;
                let elem = Elem::from_wire(&wire)?;
                if sq.contains(name.clone()) {
                    // refresh the cached image; the node already holds
                    // the authoritative row
                    sq.absorb_elem_local(&elem)?;
                } else {
                    return Err(SuperqError::ObjectNotRecognized(format!(
                        "sqe {name} not known"
                    )));
                }
                return Ok(elem);
            }
        }
        sq.elem(name.clone())
    }

    /// Mirror an element's atom values (and links) into its row.
    pub(crate) fn superqelem_update(
        &self,
        meta: &SuperqMeta,
        schema: Option<&Schema>,
        elem: &Elem,
    ) -> Result<()> {
        if let Some(host) = &meta.host {
            if !self.is_public() {
                return self
                    .client()
                    .superqelem_update(host, &meta.public_name(), &elem.to_wire());
            }
        }

        let schema = schema.ok_or_else(|| {
            SuperqError::InvalidArgument(format!("superq {} has no schema yet", meta.name))
        })?;
        let update_str = update_set_clause(meta, schema, elem)?;
        let key_col = meta.key_col.as_deref().unwrap_or("_name_");

        let conn = self.acquire()?;
        let result = sql::db_update_row(
            &conn,
            &meta.name,
            &update_str,
            key_col,
            &elem.name().sql_literal(),
        );
        self.release(conn);
        result
    }

    /// Mirror only an element's `_links_` column. Link mutations change
    /// no collection structure.
    pub(crate) fn superqelem_update_links(&self, meta: &SuperqMeta, elem: &Elem) -> Result<()> {
        if let Some(host) = &meta.host {
            if !self.is_public() {
                return self
                    .client()
                    .superqelem_update(host, &meta.public_name(), &elem.to_wire());
            }
        }

        let links = Value::Str(elem.links_str().to_owned()).sql_literal();
        let key_col = meta.key_col.as_deref().unwrap_or("_name_");

        let conn = self.acquire()?;
        let result = sql::db_update_row(
            &conn,
            &meta.name,
            &format!("_links_={links}"),
            key_col,
            &elem.name().sql_literal(),
        );
        self.release(conn);
        result
    }

    /// Mirror an element removal into a row delete.
    pub(crate) fn superqelem_delete(&self, meta: &SuperqMeta, elem_name: &Value) -> Result<()> {
        if let Some(host) = &meta.host {
            if !self.is_public() {
                return self.client().superqelem_delete(
                    host,
                    &meta.public_name(),
                    &elem_name.to_string(),
                );
            }
        }

        let key_col = meta.key_col.as_deref().unwrap_or("_name_");
        let conn = self.acquire()?;
        let result = sql::db_delete_row(&conn, &meta.name, key_col, &elem_name.sql_literal());
        self.release(conn);
        result
    }

    /// Whether an element exists, locally or on the node.
    pub fn superqelem_exists(&self, sq: &Superq, name: &Value) -> Result<bool> {
        if let Some(host) = sq.host() {
            if !self.is_public() {
                return self.client().superqelem_exists(
                    &host,
                    &sq.public_name(),
                    &name.to_string(),
                );
            }
        }
        Ok(sq.contains(name.clone()))
    }

    /// Release pooled resources and kill the auto-launched node.
    pub fn shutdown(&self) {
        if let Some(client) = self.client.get() {
            client.shutdown();
        }
        self.pool.drain();
    }
}

/// Render the VALUES list for an element insert, in schema column order.
fn insert_values(schema: &Schema, elem: &Elem) -> Result<String> {
    let links = Value::Str(elem.links_str().to_owned()).sql_literal();

    if let Some(value) = elem.scalar_value() {
        return Ok(format!(
            "{},{},{links}",
            elem.name().sql_literal(),
            value.sql_literal()
        ));
    }

    let mut parts = Vec::with_capacity(schema.col_names.len());
    for col in &schema.col_names {
        match col.as_str() {
            "_name_" => parts.push(elem.name().sql_literal()),
            "_links_" => {}
            _ => parts.push(elem.get(col)?.sql_literal()),
        }
    }
    parts.push(links);
    Ok(parts.join(","))
}

/// Render the SET clause for an element update: every non-key column,
/// with the `_links_` column always last.
fn update_set_clause(meta: &SuperqMeta, schema: &Schema, elem: &Elem) -> Result<String> {
    let links = Value::Str(elem.links_str().to_owned()).sql_literal();

    if let Some(value) = elem.scalar_value() {
        return Ok(format!("_val_={},_links_={links}", value.sql_literal()));
    }

    let key_col = meta.key_col.as_deref().unwrap_or("_name_");
    let mut parts = Vec::new();
    for col in &schema.col_names {
        if col == key_col || col == "_name_" || col == "_links_" {
            continue;
        }
        parts.push(format!("{col}={}", elem.get(col)?.sql_literal()));
    }
    parts.push(format!("_links_={links}"));
    Ok(parts.join(","))
}
