use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use activitybase_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::rules::{AccessRule, AccessRules, RequestContext, RuleOp};
use crate::schema::{Collection, CollectionType, Schema, now_string};

const SYSTEM_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS _collections (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT UNIQUE NOT NULL,
    type TEXT NOT NULL DEFAULT 'base',
    schema TEXT NOT NULL DEFAULT '[]',
    listRule TEXT DEFAULT NULL,
    viewRule TEXT DEFAULT NULL,
    createRule TEXT DEFAULT NULL,
    updateRule TEXT DEFAULT NULL,
    deleteRule TEXT DEFAULT NULL,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _migrations (
    file TEXT PRIMARY KEY NOT NULL,
    applied INTEGER NOT NULL
);
";

const COLLECTION_COLUMNS: &str =
    "id, name, type, schema, listRule, viewRule, createRule, updateRule, deleteRule";

/// SQLite-backed store holding collection metadata, collection data tables
/// and the migration ledger.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_system_tables()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_system_tables()?;
        Ok(store)
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("store lock poisoned".into()))
    }

    fn init_system_tables(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(SYSTEM_TABLES_SQL)
            .map_err(|e| Error::Database(format!("failed to create system tables: {e}")))?;
        Ok(())
    }

    /// Run `f` inside a single transaction. The transaction commits when `f`
    /// returns `Ok` and rolls back otherwise, so a failing call leaves no trace.
    pub fn transaction<T>(&self, f: impl FnOnce(&Dao<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let result = f(&Dao::new(&tx));
        match result {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| Error::Database(format!("failed to commit: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!("rollback after error failed: {rb}");
                }
                Err(e)
            }
        }
    }
}

/// Store handle scoped to one transaction.
pub struct Dao<'a> {
    pub(crate) conn: &'a Connection,
}

impl<'a> Dao<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Look a collection up by id, or by name ignoring case.
    pub fn find_collection_by_name_or_id(&self, name_or_id: &str) -> Result<Collection> {
        self.find_collection(name_or_id)?
            .ok_or_else(|| Error::NotFound(format!("collection '{name_or_id}'")))
    }

    pub fn collection_exists(&self, name_or_id: &str) -> Result<bool> {
        Ok(self.find_collection(name_or_id)?.is_some())
    }

    fn find_collection(&self, name_or_id: &str) -> Result<Option<Collection>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLLECTION_COLUMNS} FROM _collections
                     WHERE id = ?1 OR name = ?1 COLLATE NOCASE
                     LIMIT 1"
                ),
                params![name_or_id],
                CollectionRow::from_row,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to query collection: {e}")))?;

        row.map(CollectionRow::into_collection).transpose()
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLLECTION_COLUMNS} FROM _collections ORDER BY created ASC, name ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], CollectionRow::from_row)
            .map_err(|e| Error::Database(format!("failed to query collections: {e}")))?;

        let mut collections = Vec::new();
        for row in rows {
            let row =
                row.map_err(|e| Error::Database(format!("failed to read collection row: {e}")))?;
            collections.push(row.into_collection()?);
        }
        Ok(collections)
    }

    /// Persist a new collection and create its data table.
    pub fn save_collection(&self, collection: &Collection) -> Result<()> {
        collection.validate()?;

        for key in [&collection.name, &collection.id] {
            if self.collection_exists(key)? {
                return Err(Error::AlreadyExists(format!("collection '{key}'")));
            }
        }

        let schema = serde_json::to_string(&collection.schema)?;
        let now = now_string();
        let rules = &collection.rules;
        self.conn
            .execute(
                "INSERT INTO _collections
                    (id, name, type, schema, listRule, viewRule, createRule, updateRule, deleteRule, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    collection.id,
                    collection.name,
                    collection.kind.as_str(),
                    schema,
                    rules.list_rule.expression(),
                    rules.view_rule.expression(),
                    rules.create_rule.expression(),
                    rules.update_rule.expression(),
                    rules.delete_rule.expression(),
                    now,
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert collection: {e}")))?;

        self.conn
            .execute_batch(&create_table_sql(collection))
            .map_err(|e| Error::Database(format!("failed to create data table: {e}")))?;

        debug!("created collection {} ({})", collection.name, collection.id);
        Ok(())
    }

    /// Drop a collection's data table and metadata. All of its records are lost.
    ///
    /// The collection is matched by id; the table dropped is the one recorded
    /// in `_collections`, whatever name the caller's copy carries.
    pub fn delete_collection(&self, collection: &Collection) -> Result<()> {
        let stored_name: String = self
            .conn
            .query_row(
                "DELETE FROM _collections WHERE id = ?1 RETURNING name",
                params![collection.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to delete collection: {e}")))?
            .ok_or_else(|| Error::NotFound(format!("collection '{}'", collection.name)))?;

        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS [{stored_name}]"))
            .map_err(|e| Error::Database(format!("failed to drop data table: {e}")))?;

        debug!("deleted collection {stored_name} ({})", collection.id);
        Ok(())
    }

    pub(crate) fn authorize(
        &self,
        collection: &Collection,
        op: RuleOp,
        ctx: &RequestContext,
    ) -> Result<()> {
        if collection.rules.allows(op, ctx)? {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} rule denies access to '{}'",
                op.as_str(),
                collection.name
            )))
        }
    }
}

fn create_table_sql(collection: &Collection) -> String {
    let mut columns = vec!["[id] TEXT PRIMARY KEY NOT NULL".to_string()];
    for field in collection.schema.fields() {
        let mut column = format!("[{}] {}", field.name, field.field_type.sql_type());
        if field.unique {
            column.push_str(" UNIQUE");
        }
        columns.push(column);
    }
    columns.push("[created] TEXT NOT NULL".to_string());
    columns.push("[updated] TEXT NOT NULL".to_string());

    format!(
        "CREATE TABLE [{}] (\n    {}\n);",
        collection.name,
        columns.join(",\n    ")
    )
}

struct CollectionRow {
    id: String,
    name: String,
    kind: String,
    schema: String,
    rules: [Option<String>; 5],
}

impl CollectionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            schema: row.get(3)?,
            rules: [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
        })
    }

    fn into_collection(self) -> Result<Collection> {
        let kind = match self.kind.as_str() {
            "base" => CollectionType::Base,
            other => {
                return Err(Error::Database(format!(
                    "collection {} has unknown type {other}",
                    self.name
                )));
            }
        };
        let schema: Schema = serde_json::from_str(&self.schema)?;
        let [list, view, create, update, delete] = self.rules.map(|r| match r {
            Some(expr) => AccessRule::new(expr),
            None => AccessRule::unrestricted(),
        });

        Ok(Collection {
            id: self.id,
            name: self.name,
            kind,
            rules: AccessRules {
                list_rule: list,
                view_rule: view,
                create_rule: create,
                update_rule: update,
                delete_rule: delete,
            },
            schema,
        })
    }
}
