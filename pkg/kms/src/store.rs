//! `SecretStore`: a rusqlite-backed, WAL-enabled, versioned path → (data,
//! metadata) store.
//!
//! A single shared connection behind a mutex gives Put/Get serializability
//! on the same path for free — the same "one backing handle, every method
//! borrows it" shape used by the state-store wrapper this crate is
//! grounded on, generalized from an LSM-tree backend to embedded SQL
//! because the wire contract here is a literal SQL schema, not an
//! arbitrary KV store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use pkg_types::validate::validate_secret_path;
use pkg_types::{Secret, SecretMetadata};

use crate::error::KmsError;

pub struct SecretStore {
    conn: Mutex<Connection>,
}

impl SecretStore {
    /// Open (creating if absent) the sqlite database at `path`, enabling
    /// WAL journaling so concurrent readers never block a writer.
    pub fn open(path: &std::path::Path) -> Result<Self, KmsError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(SecretStore {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database — used by tests only; production always
    /// opens a file-backed WAL database via [`SecretStore::open`].
    pub fn open_in_memory() -> Result<Self, KmsError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(SecretStore {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), KmsError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS secrets (
                path            TEXT PRIMARY KEY,
                data            TEXT NOT NULL,
                created_time    TEXT NOT NULL,
                version         INTEGER NOT NULL,
                destroyed       INTEGER NOT NULL DEFAULT 0,
                deletion_time   TEXT,
                custom_metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_secrets_path ON secrets(path);
            CREATE INDEX IF NOT EXISTS idx_secrets_created_time ON secrets(created_time);",
        )?;
        Ok(())
    }

    fn check_cancelled(token: &CancellationToken) -> Result<(), KmsError> {
        if token.is_cancelled() {
            return Err(KmsError::Cancelled);
        }
        Ok(())
    }

    pub async fn get(&self, path: &str, token: &CancellationToken) -> Result<Secret, KmsError> {
        validate_secret_path(path).map_err(|e| KmsError::InvalidPath(e.to_string()))?;
        Self::check_cancelled(token)?;

        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, u32, Option<String>)> = conn
            .query_row(
                "SELECT data, created_time, version, custom_metadata
                 FROM secrets WHERE path = ?1 AND destroyed = 0",
                params![path],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        let (data_json, created_time, version, custom_metadata_json) =
            row.ok_or_else(|| KmsError::NotFound(path.to_string()))?;

        let data: HashMap<String, Value> = serde_json::from_str(&data_json)?;
        let custom_metadata = custom_metadata_json
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        Ok(Secret {
            data,
            metadata: SecretMetadata {
                created_time,
                custom_metadata,
                deletion_time: String::new(),
                destroyed: false,
                version,
            },
        })
    }

    pub async fn get_metadata(
        &self,
        path: &str,
        token: &CancellationToken,
    ) -> Result<SecretMetadata, KmsError> {
        Ok(self.get(path, token).await?.metadata)
    }

    /// Insert or bump-version-update the secret at `path`. The upsert
    /// statement itself increments `version` monotonically, which
    /// trivially satisfies the "version >= 1" contract while being
    /// strictly stronger than it.
    pub async fn put(
        &self,
        path: &str,
        data: HashMap<String, Value>,
        token: &CancellationToken,
    ) -> Result<SecretMetadata, KmsError> {
        validate_secret_path(path).map_err(|e| KmsError::InvalidPath(e.to_string()))?;
        Self::check_cancelled(token)?;

        let data_json = serde_json::to_string(&data)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if token.is_cancelled() {
            return Err(KmsError::Cancelled);
        }

        tx.execute(
            "INSERT INTO secrets (path, data, created_time, version, destroyed)
             VALUES (?1, ?2, ?3, 1, 0)
             ON CONFLICT(path) DO UPDATE SET
                data = excluded.data,
                created_time = excluded.created_time,
                version = secrets.version + 1,
                destroyed = 0,
                deletion_time = NULL",
            params![path, data_json, now],
        )?;

        let version: u32 = tx.query_row(
            "SELECT version FROM secrets WHERE path = ?1",
            params![path],
            |r| r.get(0),
        )?;

        tx.commit()?;

        Ok(SecretMetadata {
            created_time: now,
            custom_metadata: None,
            deletion_time: String::new(),
            destroyed: false,
            version,
        })
    }

    pub async fn delete(&self, path: &str, token: &CancellationToken) -> Result<(), KmsError> {
        validate_secret_path(path).map_err(|e| KmsError::InvalidPath(e.to_string()))?;
        Self::check_cancelled(token)?;

        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE secrets SET destroyed = 1, deletion_time = ?2
             WHERE path = ?1 AND destroyed = 0",
            params![path, now],
        )?;
        if changed == 0 {
            return Err(KmsError::NotFound(path.to_string()));
        }
        Ok(())
    }

    /// Returns the set of distinct next path segments immediately
    /// following `prefix/`, directories suffixed with `/`, sorted
    /// lexicographically. The prefix itself is excluded.
    pub async fn list(
        &self,
        prefix: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>, KmsError> {
        Self::check_cancelled(token)?;

        let full_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM secrets WHERE destroyed = 0")?;
        let paths = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut segments = BTreeSet::new();
        for path in paths {
            let path = path?;
            let Some(rest) = path.strip_prefix(&full_prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.find('/') {
                Some(idx) => segments.insert(format!("{}/", &rest[..idx])),
                None => {
                    segments.insert(rest.to_string());
                }
            };
        }

        Ok(segments.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SecretStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        let d = data(&[("a", Value::from(1))]);
        store.put("foo", d.clone(), &token).await.unwrap();
        let got = store.get("foo", &token).await.unwrap();
        assert_eq!(got.data, d);
        assert!(got.metadata.version >= 1);
    }

    #[tokio::test]
    async fn put_bumps_version_monotonically() {
        let store = SecretStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        store
            .put("foo", data(&[("a", Value::from(1))]), &token)
            .await
            .unwrap();
        store
            .put("foo", data(&[("a", Value::from(2))]), &token)
            .await
            .unwrap();
        let meta = store.get_metadata("foo", &token).await.unwrap();
        assert!(meta.version >= 2);
    }

    #[tokio::test]
    async fn delete_then_get_not_found() {
        let store = SecretStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        store
            .put("foo", data(&[("a", Value::from(1))]), &token)
            .await
            .unwrap();
        store.delete("foo", &token).await.unwrap();
        assert!(matches!(
            store.get("foo", &token).await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_missing_path_not_found() {
        let store = SecretStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        assert!(matches!(
            store.delete("nope", &token).await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_returns_immediate_children_with_trailing_slash_for_dirs() {
        let store = SecretStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        store
            .put("inferno/volumes/vol_a/encryption-key", data(&[]), &token)
            .await
            .unwrap();
        store
            .put("inferno/volumes/vol_b/encryption-key", data(&[]), &token)
            .await
            .unwrap();
        store
            .put("inferno/other-secret", data(&[]), &token)
            .await
            .unwrap();

        let top = store.list("inferno", &token).await.unwrap();
        assert_eq!(top, vec!["other-secret".to_string(), "volumes/".to_string()]);

        let under_volumes = store.list("inferno/volumes", &token).await.unwrap();
        assert_eq!(under_volumes, vec!["vol_a/".to_string(), "vol_b/".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_returns_cancelled_error_without_mutation() {
        let store = SecretStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = store
            .put("foo", data(&[("a", Value::from(1))]), &token)
            .await;
        assert!(matches!(result, Err(KmsError::Cancelled)));

        let fresh_token = CancellationToken::new();
        assert!(matches!(
            store.get("foo", &fresh_token).await,
            Err(KmsError::NotFound(_))
        ));
    }
}
