/**
 * PostgreSQL Document Store
 *
 * Persists documents in the `documents` table (see `migrations/`). The
 * snapshot column is `jsonb`; snapshots travel as text and are cast on the
 * way in and out so the engine never depends on a particular JSON decoder
 * inside sqlx.
 *
 * # Optimistic Locking
 *
 * `save_state` issues a single conditional `UPDATE ... WHERE version = $old`.
 * Zero affected rows means either another writer advanced the version or the
 * record is gone; both surface as `StoreError::VersionMismatch`.
 */
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::PgPool;

use super::{DocumentRecord, DocumentStore, NewDocument, StoreError, StoredState};
use crate::shared::document::Version;

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    document_id: String,
    snapshot: String,
    version: i64,
    creator_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for DocumentRecord {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(DocumentRecord {
            document_id: row.document_id,
            snapshot: Bytes::from(row.snapshot),
            version: from_db_version(row.version)?,
            creator_id: row.creator_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {} out of range", version)))
}

fn from_db_version(version: i64) -> Result<Version, StoreError> {
    Version::try_from(version).map_err(|_| StoreError::Corrupt(format!("negative version {}", version)))
}

fn snapshot_text(snapshot: Bytes) -> Result<String, StoreError> {
    String::from_utf8(snapshot.to_vec())
        .map_err(|e| StoreError::Corrupt(format!("snapshot is not UTF-8: {}", e)))
}

impl DocumentStore for PgDocumentStore {
    fn load_state<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<StoredState, StoreError>> {
        Box::pin(async move {
            let row: Option<(String, i64)> = sqlx::query_as(
                r#"
                SELECT snapshot::text, version
                FROM documents
                WHERE document_id = $1
                "#,
            )
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

            let (snapshot, version) = row.ok_or(StoreError::NotFound)?;
            Ok(StoredState {
                snapshot: Bytes::from(snapshot),
                version: from_db_version(version)?,
            })
        })
    }

    fn exists<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS(SELECT 1 FROM documents WHERE document_id = $1)")
                    .bind(document_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        })
    }

    fn save_state<'a>(
        &'a self,
        document_id: &'a str,
        snapshot: Bytes,
        expected_old: Version,
        new_version: Version,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE documents
                SET snapshot = $1::jsonb, version = $2, updated_at = NOW()
                WHERE document_id = $3 AND version = $4
                "#,
            )
            .bind(snapshot_text(snapshot)?)
            .bind(to_db_version(new_version)?)
            .bind(document_id)
            .bind(to_db_version(expected_old)?)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::VersionMismatch);
            }
            Ok(())
        })
    }

    fn create(&self, document: NewDocument) -> BoxFuture<'_, Result<DocumentRecord, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, DocumentRow>(
                r#"
                INSERT INTO documents (document_id, snapshot, version, creator_id, created_at, updated_at)
                VALUES ($1, $2::jsonb, $3, $4, NOW(), NOW())
                RETURNING document_id, snapshot::text AS snapshot, version, creator_id, created_at, updated_at
                "#,
            )
            .bind(&document.document_id)
            .bind(snapshot_text(document.snapshot)?)
            .bind(to_db_version(document.version)?)
            .bind(&document.creator_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::AlreadyExists,
                other => StoreError::Database(other),
            })?;

            row.try_into()
        })
    }

    fn get<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<Option<DocumentRecord>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, DocumentRow>(
                r#"
                SELECT document_id, snapshot::text AS snapshot, version, creator_id, created_at, updated_at
                FROM documents
                WHERE document_id = $1
                "#,
            )
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

            row.map(DocumentRecord::try_from).transpose()
        })
    }

    fn delete<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM documents WHERE document_id = $1")
                .bind(document_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}
