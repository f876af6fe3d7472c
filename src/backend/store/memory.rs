/**
 * In-Memory Document Store
 *
 * A `DocumentStore` that keeps every record in a `HashMap` behind a tokio
 * `RwLock`. The conditional save mirrors the SQL store exactly: the write
 * lands only if the stored version still equals the expected old version.
 *
 * Besides serving as the development fallback when no database is
 * configured, it exposes a few knobs for tests: a save-call counter and a
 * switch that makes every save fail.
 */
use bytes::Bytes;
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{DocumentRecord, DocumentStore, NewDocument, StoreError, StoredState};
use crate::shared::document::Version;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    records: RwLock<HashMap<String, DocumentRecord>>,
    save_calls: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record directly, bypassing version checks
    pub async fn seed(&self, document_id: &str, snapshot: impl Into<Bytes>, version: Version) {
        let now = Utc::now();
        let record = DocumentRecord {
            document_id: document_id.to_string(),
            snapshot: snapshot.into(),
            version,
            creator_id: "seed".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.records
            .write()
            .await
            .insert(document_id.to_string(), record);
    }

    /// Number of `save_state` calls made so far, successful or not
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent `save_state` fail with a backend error
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load_state<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<StoredState, StoreError>> {
        Box::pin(async move {
            let records = self.records.read().await;
            let record = records.get(document_id).ok_or(StoreError::NotFound)?;
            Ok(StoredState {
                snapshot: record.snapshot.clone(),
                version: record.version,
            })
        })
    }

    fn exists<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.records.read().await.contains_key(document_id)) })
    }

    fn save_state<'a>(
        &'a self,
        document_id: &'a str,
        snapshot: Bytes,
        expected_old: Version,
        new_version: Version,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected save failure".to_string()));
            }

            let mut records = self.records.write().await;
            match records.get_mut(document_id) {
                Some(record) if record.version == expected_old => {
                    record.snapshot = snapshot;
                    record.version = new_version;
                    record.updated_at = Utc::now();
                    Ok(())
                }
                _ => Err(StoreError::VersionMismatch),
            }
        })
    }

    fn create(&self, document: NewDocument) -> BoxFuture<'_, Result<DocumentRecord, StoreError>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            if records.contains_key(&document.document_id) {
                return Err(StoreError::AlreadyExists);
            }
            let now = Utc::now();
            let record = DocumentRecord {
                document_id: document.document_id.clone(),
                snapshot: document.snapshot,
                version: document.version,
                creator_id: document.creator_id,
                created_at: now,
                updated_at: now,
            };
            records.insert(document.document_id, record.clone());
            Ok(record)
        })
    }

    fn get<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<Option<DocumentRecord>, StoreError>> {
        Box::pin(async move { Ok(self.records.read().await.get(document_id).cloned()) })
    }

    fn delete<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.records.write().await.remove(document_id).is_some()) })
    }
}
