//! Persistent catalog store: collections keyed by natural key.
//!
//! The reconciler only needs point lookup by `(namespace, remote, version)`,
//! insert returning a generated id, and full replace by id. `SqliteStore`
//! keeps one table per collection with the record body as JSON.

use super::types::{EntityKey, EntityKind, Record};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot encode {kind} record: {source}")]
    Encode {
        kind: EntityKind,
        source: serde_json::Error,
    },

    #[error("cannot decode {kind} record {id}: {source}")]
    Decode {
        kind: EntityKind,
        id: String,
        source: serde_json::Error,
    },

    #[error("{kind} record {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("cannot create store directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
}

/// A raw stored record.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub body: serde_json::Value,
}

/// Keyed lookup/insert/replace over the catalog collections.
pub trait CatalogStore: Send + Sync {
    /// Id of the named namespace, created when absent.
    fn ensure_namespace(&self, name: &str) -> Result<String, StoreError>;

    /// Id of the named namespace, if it exists.
    fn find_namespace(&self, name: &str) -> Result<Option<String>, StoreError>;

    fn find(&self, kind: EntityKind, key: &EntityKey)
        -> Result<Option<StoredDocument>, StoreError>;

    /// Insert a new record, returning its generated id.
    fn insert(
        &self,
        kind: EntityKind,
        key: &EntityKey,
        body: &serde_json::Value,
    ) -> Result<String, StoreError>;

    /// Replace the body of an existing record.
    fn replace(
        &self,
        kind: EntityKind,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<(), StoreError>;

    fn list(&self, kind: EntityKind, namespace: &str) -> Result<Vec<StoredDocument>, StoreError>;
}

/// Collection (table) name for a kind.
pub fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Recipe => "recipes",
        EntityKind::Template => "templates",
        EntityKind::Endpoint => "endpoints",
        EntityKind::Application => "applications",
    }
}

/// Generate a 24-hex-character record id.
pub fn generate_id(scope: &str, key: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = blake3::Hasher::new();
    hasher.update(scope.as_bytes());
    hasher.update(b"\0");
    hasher.update(key.as_bytes());
    hasher.update(b"\0");
    hasher.update(&nanos.to_le_bytes());
    hasher.finalize().to_hex()[..24].to_string()
}

/// Look up a typed record by natural key.
pub fn find_record<R: Record>(
    store: &dyn CatalogStore,
    key: &EntityKey,
) -> Result<Option<R>, StoreError> {
    store
        .find(R::KIND, key)?
        .map(decode::<R>)
        .transpose()
}

/// Insert a typed record, returning its generated id.
pub fn insert_record<R: Record>(store: &dyn CatalogStore, record: &R) -> Result<String, StoreError> {
    store.insert(R::KIND, &record.key(), &encode(record)?)
}

/// Replace a typed record by its id.
pub fn replace_record<R: Record>(store: &dyn CatalogStore, record: &R) -> Result<(), StoreError> {
    store.replace(R::KIND, record.id(), &encode(record)?)
}

/// List every typed record of a namespace.
pub fn list_records<R: Record>(
    store: &dyn CatalogStore,
    namespace: &str,
) -> Result<Vec<R>, StoreError> {
    store
        .list(R::KIND, namespace)?
        .into_iter()
        .map(decode::<R>)
        .collect()
}

fn encode<R: Record>(record: &R) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(record).map_err(|source| StoreError::Encode {
        kind: R::KIND,
        source,
    })
}

fn decode<R: Record>(doc: StoredDocument) -> Result<R, StoreError> {
    let mut record: R =
        serde_json::from_value(doc.body).map_err(|source| StoreError::Decode {
            kind: R::KIND,
            id: doc.id.clone(),
            source,
        })?;
    record.set_id(doc.id);
    Ok(record)
}

/// SQLite-backed catalog store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file. `timeout` bounds how long a single
    /// operation waits on a locked database.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Recovers a poisoned lock. Every write is a single statement.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn namespace_id(conn: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM namespaces WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS namespaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    for kind in EntityKind::ORDER {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    namespace TEXT NOT NULL,
                    remote TEXT NOT NULL,
                    remote_version TEXT NOT NULL,
                    body TEXT NOT NULL,
                    UNIQUE (namespace, remote, remote_version)
                )",
                collection(kind)
            ),
            [],
        )?;
    }
    Ok(())
}

fn parse_body(kind: EntityKind, id: &str, body: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(body).map_err(|source| StoreError::Decode {
        kind,
        id: id.to_string(),
        source,
    })
}

impl CatalogStore for SqliteStore {
    fn ensure_namespace(&self, name: &str) -> Result<String, StoreError> {
        let conn = self.conn();
        if let Some(id) = namespace_id(&conn, name)? {
            return Ok(id);
        }
        let id = generate_id("namespaces", name);
        conn.execute(
            "INSERT INTO namespaces (id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
        tracing::info!(namespace = name, %id, "created namespace");
        Ok(id)
    }

    fn find_namespace(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(namespace_id(&self.conn(), name)?)
    }

    fn find(
        &self,
        kind: EntityKind,
        key: &EntityKey,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let conn = self.conn();
        let row: Option<(String, String)> = conn
            .query_row(
                &format!(
                    "SELECT id, body FROM {} WHERE namespace = ?1 AND remote = ?2 AND remote_version = ?3",
                    collection(kind)
                ),
                params![
                    key.namespace,
                    key.identity.name,
                    key.identity.version.as_deref().unwrap_or("")
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, body)| {
            let body = parse_body(kind, &id, &body)?;
            Ok(StoredDocument { id, body })
        })
        .transpose()
    }

    fn insert(
        &self,
        kind: EntityKind,
        key: &EntityKey,
        body: &serde_json::Value,
    ) -> Result<String, StoreError> {
        let conn = self.conn();
        let id = generate_id(collection(kind), &format!("{}/{}", key.namespace, key.identity));
        conn.execute(
            &format!(
                "INSERT INTO {} (id, namespace, remote, remote_version, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                collection(kind)
            ),
            params![
                id,
                key.namespace,
                key.identity.name,
                key.identity.version.as_deref().unwrap_or(""),
                body.to_string()
            ],
        )?;
        Ok(id)
    }

    fn replace(
        &self,
        kind: EntityKind,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let updated = conn.execute(
            &format!("UPDATE {} SET body = ?2 WHERE id = ?1", collection(kind)),
            params![id, body.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn list(&self, kind: EntityKind, namespace: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, body FROM {} WHERE namespace = ?1 ORDER BY remote, remote_version",
            collection(kind)
        ))?;
        let mut rows = stmt.query(params![namespace])?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let body: String = row.get(1)?;
            let body = parse_body(kind, &id, &body)?;
            docs.push(StoredDocument { id, body });
        }
        Ok(docs)
    }
}
