use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Row, Value};
use tracing::debug;

use crate::error::Error;
use crate::store::{LockRecord, RecordStore};

static CREATE_LOCKS_TABLE_SQL: &str = include_str!("../sql/create_locks_table.sql");
static TAKE_OVER_LOCK_SQL: &str = include_str!("../sql/take_over_lock.sql");

static INSERT_LOCK_SQL: &str = "INSERT INTO distributed_locks \
     (name, owner_id, expired_at, created_at, updated_at) \
     VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(name) DO NOTHING";
static SELECT_LOCK_SQL: &str = "SELECT name, owner_id, expired_at, created_at, updated_at \
     FROM distributed_locks WHERE name = ?1";
static EXTEND_LOCK_SQL: &str = "UPDATE distributed_locks SET expired_at = ?3, updated_at = ?4 \
     WHERE name = ?1 AND owner_id = ?2";
static DELETE_LOCK_SQL: &str = "DELETE FROM distributed_locks WHERE name = ?1 AND owner_id = ?2";

/// Relational record store on libsql.
///
/// Records live in the `distributed_locks` table, timestamps stored as unix
/// milliseconds. The table is created by [`SqlRecordStore::ensure_schema`],
/// which deployments that manage their own schema can skip.
#[derive(Clone)]
pub struct SqlRecordStore {
    connection: Connection,
}

impl Debug for SqlRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRecordStore").finish()
    }
}

impl SqlRecordStore {
    /// Opens the local database at `path` (`":memory:"` for a private
    /// in-memory database).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn connect(path: impl AsRef<Path> + Send) -> Result<Self, Error> {
        let connection = Builder::new_local(path).build().await?.connect()?;

        Ok(Self { connection })
    }

    /// Wraps an already open connection.
    #[must_use]
    pub const fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    /// Creates the `distributed_locks` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.connection
            .execute(CREATE_LOCKS_TABLE_SQL, Vec::<Value>::new())
            .await?;

        debug!("distributed_locks table ready");
        Ok(())
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<bool, Error> {
        Ok(self.connection.execute(sql, params).await? > 0)
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn millis(at: DateTime<Utc>) -> Value {
    Value::Integer(at.timestamp_millis())
}

fn timestamp(row: &Row, index: i32, column: &'static str) -> Result<DateTime<Utc>, Error> {
    let value = row.get::<i64>(index)?;
    DateTime::from_timestamp_millis(value).ok_or(Error::InvalidTimestamp { column, value })
}

fn record(row: &Row) -> Result<LockRecord, Error> {
    Ok(LockRecord {
        name: row.get::<String>(0)?,
        owner_id: row.get::<String>(1)?,
        expired_at: timestamp(row, 2, "expired_at")?,
        created_at: timestamp(row, 3, "created_at")?,
        updated_at: timestamp(row, 4, "updated_at")?,
    })
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    type Error = Error;

    async fn insert(&self, record: &LockRecord) -> Result<bool, Error> {
        self.execute(
            INSERT_LOCK_SQL,
            vec![
                text(&record.name),
                text(&record.owner_id),
                millis(record.expired_at),
                millis(record.created_at),
                millis(record.updated_at),
            ],
        )
        .await
    }

    async fn find(&self, name: &str) -> Result<Option<LockRecord>, Error> {
        let mut rows = self.connection.query(SELECT_LOCK_SQL, vec![text(name)]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(record(&row)?)),
            None => Ok(None),
        }
    }

    async fn take_over(
        &self,
        name: &str,
        owner_id: &str,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        self.execute(
            TAKE_OVER_LOCK_SQL,
            vec![text(name), text(owner_id), millis(expired_at), millis(now)],
        )
        .await
    }

    async fn extend(
        &self,
        name: &str,
        owner_id: &str,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        self.execute(
            EXTEND_LOCK_SQL,
            vec![text(name), text(owner_id), millis(expired_at), millis(now)],
        )
        .await
    }

    async fn remove(&self, name: &str, owner_id: &str) -> Result<bool, Error> {
        self.execute(DELETE_LOCK_SQL, vec![text(name), text(owner_id)])
            .await
    }
}
