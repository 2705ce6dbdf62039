use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rowdeck_core::Record;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

const CREATE_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS records (
  post_id INTEGER NOT NULL,
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  email TEXT NOT NULL,
  body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_post_id ON records(post_id);
";

const INSERT_RECORD_SQL: &str =
    "INSERT INTO records(post_id, id, name, email, body) VALUES (?1, ?2, ?3, ?4, ?5)";

const RECORD_COLUMNS: &str = "post_id, id, name, email, body";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to initialize record store: {0}")]
    Init(#[source] rusqlite::Error),
    #[error("failed to write record batch: {0}")]
    Write(#[source] rusqlite::Error),
    #[error("failed to read records: {0}")]
    Read(#[source] rusqlite::Error),
    #[error("failed to close record store: {0}")]
    Close(#[source] rusqlite::Error),
}

/// A substring filter over the searchable text columns (`name`, `email`,
/// `body`), carried as one unit: the SQL fragment and its bound values never
/// travel separately, so the count and data queries built from the same
/// predicate always filter the same set.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SearchPredicate {
    term: Option<String>,
}

impl SearchPredicate {
    /// The predicate matching every record.
    #[must_use]
    pub fn match_all() -> Self {
        Self { term: None }
    }

    /// Build a predicate from a raw query string. Absent, empty, or
    /// whitespace-only input degrades to the match-all predicate.
    #[must_use]
    pub fn matching(query: Option<&str>) -> Self {
        let term = query.map(str::trim).filter(|trimmed| !trimmed.is_empty());
        Self { term: term.map(ToString::to_string) }
    }

    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.term.is_none()
    }

    fn where_sql(&self) -> &'static str {
        if self.term.is_some() {
            " WHERE (name LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\' OR body LIKE ? ESCAPE '\\')"
        } else {
            ""
        }
    }

    fn bind_values(&self) -> Vec<Value> {
        match &self.term {
            Some(term) => {
                let pattern = format!("%{}%", escape_like(term));
                vec![Value::Text(pattern.clone()), Value::Text(pattern.clone()), Value::Text(pattern)]
            }
            None => Vec::new(),
        }
    }
}

impl Default for SearchPredicate {
    fn default() -> Self {
        Self::match_all()
    }
}

// LIKE special characters in the query term are escaped so caller input only
// ever matches literally; `%`/`_` in an uploaded record body stay searchable.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// SQLite-backed record store.
///
/// The process opens exactly one store per database at startup and shares it
/// by reference; a single connection behind a mutex keeps batch inserts
/// strictly serialized. Reads serialize on the same lock, an accepted
/// simplification at this store's scale.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open a file-backed store at `path`, configure runtime pragmas, and
    /// create the schema if it is absent.
    ///
    /// # Errors
    /// Returns [`StoreError::Init`] when the database cannot be opened, the
    /// pragmas cannot be applied, or schema creation fails. Callers treat
    /// this as fatal at process startup.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::configure(Connection::open(path).map_err(StoreError::Init)?)
    }

    /// Open an ephemeral in-memory store that never shares state with any
    /// file-backed database. Used by test and scratch configurations.
    ///
    /// # Errors
    /// Returns [`StoreError::Init`] when the in-memory database cannot be
    /// configured.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::configure(Connection::open_in_memory().map_err(StoreError::Init)?)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(StoreError::Init)?;

        let store = Self { conn: Mutex::new(conn) };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Idempotently create the records table and its indexes.
    ///
    /// # Errors
    /// Returns [`StoreError::Init`] when schema creation fails.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(CREATE_SCHEMA_SQL).map_err(StoreError::Init)
    }

    // A poisoned lock means another thread panicked mid-operation; any open
    // transaction there already rolled back when it unwound, so the
    // connection itself is still consistent and safe to reuse.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a batch of records inside one transaction.
    ///
    /// Either every record becomes durable or none do: a constraint violation
    /// (duplicate `id` included) or I/O failure rolls the whole batch back.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] when the transaction cannot be started,
    /// any row fails to insert, or the commit fails.
    pub fn insert_batch(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::Write)?;
        {
            let mut stmt = tx.prepare(INSERT_RECORD_SQL).map_err(StoreError::Write)?;
            for record in records {
                stmt.execute(params![
                    record.post_id,
                    record.id,
                    record.name,
                    record.email,
                    record.body,
                ])
                .map_err(StoreError::Write)?;
            }
        }
        tx.commit().map_err(StoreError::Write)
    }

    /// Count records matching `predicate`.
    ///
    /// # Errors
    /// Returns [`StoreError::Read`] when the query fails.
    pub fn count(&self, predicate: &SearchPredicate) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM records{}", predicate.where_sql());
        let total: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(predicate.bind_values()), |row| row.get(0))
            .map_err(StoreError::Read)?;
        Ok(total.unsigned_abs())
    }

    /// Fetch records matching `predicate`, ordered by `id` ascending and
    /// windowed by `offset`/`limit`. A window past the end of the result set
    /// reads back empty, not as an error.
    ///
    /// # Errors
    /// Returns [`StoreError::Read`] when the query fails.
    pub fn query_range(
        &self,
        predicate: &SearchPredicate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records{} ORDER BY id ASC LIMIT ? OFFSET ?",
            predicate.where_sql()
        );
        let mut values = predicate.bind_values();
        values.push(Value::Integer(clamp_to_i64(limit)));
        values.push(Value::Integer(clamp_to_i64(offset)));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(StoreError::Read)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(Record {
                    post_id: row.get(0)?,
                    id: row.get(1)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                    body: row.get(4)?,
                })
            })
            .map_err(StoreError::Read)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(StoreError::Read)?);
        }
        Ok(records)
    }

    /// Tear the store down, surfacing any close-time failure SQLite buffered.
    ///
    /// # Errors
    /// Returns [`StoreError::Close`] when closing the connection fails.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, err)| StoreError::Close(err))
    }
}
