use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::info;

const TOKEN_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

/// A credential row that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds; SQLite has no native datetime column.
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

impl Credential {
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.expires_at <= now_unix
    }
}

/// SQLite-backed credential table. Each operation opens its own connection and
/// transaction; nothing is held open between calls.
#[derive(Debug, Clone)]
pub struct TokenStore {
    db_path: PathBuf,
}

impl TokenStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Create the credential table if it is missing.
    pub fn initialize(&self) -> Result<()> {
        let connection = self.open()?;
        initialize_schema(&connection)
    }

    pub fn insert(&self, credential: &NewCredential) -> Result<Credential> {
        let mut connection = self.open()?;
        initialize_schema(&connection)?;
        let transaction = connection
            .transaction()
            .context("failed to start token insert transaction")?;
        transaction
            .execute(
                "INSERT INTO token (access_token, refresh_token, expires_at) VALUES (?1, ?2, ?3)",
                params![
                    credential.access_token,
                    credential.refresh_token,
                    credential.expires_at
                ],
            )
            .context("failed to insert token row")?;
        let id = transaction.last_insert_rowid();
        let stored = transaction
            .query_row(
                "SELECT id, access_token, refresh_token, expires_at FROM token WHERE id = ?1",
                [id],
                row_to_credential,
            )
            .with_context(|| format!("failed to read back token {id}"))?;
        transaction
            .commit()
            .context("failed to commit token insert transaction")?;

        info!("Created token {}", stored.id);
        Ok(stored)
    }

    /// Remove every stored credential. Returns how many rows were deleted.
    pub fn delete_all(&self) -> Result<usize> {
        let mut connection = self.open()?;
        initialize_schema(&connection)?;
        let transaction = connection
            .transaction()
            .context("failed to start token delete transaction")?;

        let ids = {
            let mut statement = transaction
                .prepare("SELECT id FROM token ORDER BY id")
                .context("failed to prepare token listing")?;
            let rows = statement
                .query_map([], |row| row.get::<_, i64>(0))
                .context("failed to list tokens")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to decode token ids")?
        };

        let mut count = 0usize;
        for id in &ids {
            info!("Deleting token {id}");
            count += transaction
                .execute("DELETE FROM token WHERE id = ?1", [id])
                .with_context(|| format!("failed to delete token {id}"))?;
        }
        transaction
            .commit()
            .context("failed to commit token delete transaction")?;

        info!("Deleted {count} tokens");
        Ok(count)
    }

    /// Most recently inserted credential, if any.
    pub fn latest(&self) -> Result<Option<Credential>> {
        if !self.db_path.exists() {
            return Ok(None);
        }
        let connection = self.open()?;
        initialize_schema(&connection)?;
        connection
            .query_row(
                "SELECT id, access_token, refresh_token, expires_at FROM token ORDER BY id DESC LIMIT 1",
                [],
                row_to_credential,
            )
            .optional()
            .context("failed to read latest token")
    }

    pub fn count(&self) -> Result<usize> {
        if !self.db_path.exists() {
            return Ok(0);
        }
        let connection = self.open()?;
        initialize_schema(&connection)?;
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM token", [], |row| row.get(0))
            .context("failed to count tokens")?;
        usize::try_from(count).context("token count does not fit into usize")
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create database parent directory {}",
                    parent.display()
                )
            })?;
        }
        let connection = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open {}", self.db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(TOKEN_SCHEMA_SQL)
        .context("failed to initialize token schema")
}

fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        expires_at: row.get(3)?,
    })
}
