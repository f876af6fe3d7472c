/**
 * Session Registry
 *
 * The directory of live sessions and the only component that creates or
 * destroys them. Lookups take a read lock on the directory; inserts and
 * removals take the write lock, and neither is ever held across I/O.
 *
 * # Creation
 *
 * The slow path of `get_or_create` runs behind a per-document gate so two
 * callers cannot both load and insert a session for the same document. The
 * directory is re-checked after acquiring the gate, the persistence load
 * runs with no directory lock held, and a document the store does not know
 * never gets a session. A slow load only holds up callers for that same
 * document.
 *
 * # Teardown
 *
 * Sessions report idleness over a channel drained by a background task. The
 * registry re-checks the connection count atomically with marking the
 * session stopping, waits for the stop (and its final flush), and only then
 * removes the directory entry if it still points at the same instance.
 * Idle handling and deletion take the same per-document gate as creation.
 */
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};

use super::session::{CloseReason, IdleSender, Session, SessionError};
use crate::backend::store::{DocumentStore, StoreError};
use crate::shared::config::EngineConfig;
use crate::shared::document::DocumentId;
use crate::shared::message::ErrorCode;

/// Registry failures
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The store has no record for this document
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    /// A session exists but is shutting down; retry shortly
    #[error("session for document {0} is closing")]
    Closing(DocumentId),

    #[error("failed to load document: {0}")]
    Load(#[from] StoreError),

    #[error("failed to start session: {0}")]
    Session(#[from] SessionError),
}

impl RegistryError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DocumentNotFound(_) => ErrorCode::SessionNotFound,
            Self::Closing(_) => ErrorCode::SessionClosing,
            Self::Session(SessionError::Closing) => ErrorCode::SessionClosing,
            Self::Load(_) | Self::Session(_) => ErrorCode::InternalError,
        }
    }
}

struct RegistryInner {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
    sessions: RwLock<HashMap<DocumentId, Session>>,
    gates: Arc<DocumentGates>,
    idle_tx: IdleSender,
}

/// One async mutex per document with a creation, idle or delete in flight
///
/// Entries are dropped once their last holder releases them, so the map
/// only ever contains documents somebody is currently working on.
#[derive(Default)]
struct DocumentGates {
    gates: std::sync::Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl DocumentGates {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentId, Arc<Mutex<()>>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(self: &Arc<Self>, document_id: &str) -> DocumentGate {
        let gate = self.map().entry(document_id.to_string()).or_default().clone();
        let guard = gate.clone().lock_owned().await;
        DocumentGate {
            gates: self.clone(),
            document_id: document_id.to_string(),
            gate,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// Held gate for one document; releases and prunes on drop
struct DocumentGate {
    gates: Arc<DocumentGates>,
    document_id: DocumentId,
    gate: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentGate {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.gates.map();
        // Only the map and this handle still refer to the gate: no waiters
        let unused = Arc::strong_count(&self.gate) == 2;
        let current = map
            .get(&self.document_id)
            .map_or(false, |gate| Arc::ptr_eq(gate, &self.gate));
        if unused && current {
            map.remove(&self.document_id);
        }
    }
}

/// Directory of live document sessions
///
/// Cloning is cheap; every clone refers to the same directory.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry backed by `store`
    ///
    /// Must be called from within a tokio runtime: it spawns the task that
    /// receives idle reports from sessions.
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RegistryInner {
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
            gates: Arc::new(DocumentGates::default()),
            idle_tx,
        });
        tokio::spawn(drive_idle_reports(Arc::downgrade(&inner), idle_rx));
        Self { inner }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Return the live session for `document_id`, starting one if needed
    ///
    /// # Errors
    ///
    /// - `DocumentNotFound` when the store has no such document; nothing is
    ///   registered in that case
    /// - `Closing` when the existing session is mid-stop
    /// - `Load` when the store fails
    pub async fn get_or_create(&self, document_id: &str) -> Result<Session, RegistryError> {
        if let Some(session) = self.lookup(document_id).await {
            return usable(session);
        }

        let _gate = self.inner.gates.acquire(document_id).await;
        if let Some(session) = self.lookup(document_id).await {
            return usable(session);
        }

        let state = match self.inner.store.load_state(document_id).await {
            Ok(state) => state,
            Err(StoreError::NotFound) => {
                tracing::info!("[Registry] Refusing session for unknown document {}", document_id);
                return Err(RegistryError::DocumentNotFound(document_id.to_string()));
            }
            Err(e) => {
                tracing::error!("[Registry] Failed to load document {}: {}", document_id, e);
                return Err(RegistryError::Load(e));
            }
        };

        let session = Session::spawn(
            document_id,
            state,
            self.inner.store.clone(),
            self.inner.config.clone(),
            Some(self.inner.idle_tx.clone()),
        )?;
        self.inner
            .sessions
            .write()
            .await
            .insert(document_id.to_string(), session.clone());
        tracing::info!("[Registry] Registered session for {}", document_id);
        Ok(session)
    }

    /// Live session for `document_id`, never creating one
    pub async fn get(&self, document_id: &str) -> Option<Session> {
        self.lookup(document_id)
            .await
            .filter(|session| !session.is_stopped())
    }

    async fn lookup(&self, document_id: &str) -> Option<Session> {
        self.inner.sessions.read().await.get(document_id).cloned()
    }

    /// Stop and unregister `session` if it still has no connections
    ///
    /// A session that regained a connection, or that is already stopping,
    /// is left alone. The directory entry is removed only if it still
    /// refers to this exact instance.
    pub async fn notify_idle(&self, session: &Session) {
        let document_id = session.document_id();
        {
            let _gate = self.inner.gates.acquire(document_id).await;
            if !session.begin_idle_stop() {
                tracing::debug!("[Registry] {} is no longer idle, keeping it", document_id);
                return;
            }
        }

        tracing::info!("[Registry] Stopping idle session {}", document_id);
        session.stop(None).await;

        let mut sessions = self.inner.sessions.write().await;
        let same = sessions
            .get(document_id)
            .map_or(false, |current| current.same_instance(session));
        if same {
            sessions.remove(document_id);
            tracing::info!("[Registry] Removed idle session {}", document_id);
        }
    }

    /// Evict the session for a document that is going away
    ///
    /// The entry is removed first so no new join can reach the old session,
    /// then the session is stopped with `reason` broadcast to everyone.
    /// Returns whether a live session existed.
    pub async fn force_close(&self, document_id: &str, reason: CloseReason) -> bool {
        let _gate = self.inner.gates.acquire(document_id).await;
        self.evict(document_id, reason).await
    }

    /// Close any live session and delete the document from the store
    ///
    /// Both steps run under the document's gate, so a concurrent
    /// `get_or_create` either finds the session already gone and the record
    /// deleted, or completes before the delete starts. Returns whether a
    /// session or a stored record existed.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the delete; the session is closed
    /// regardless.
    pub async fn delete_document(&self, document_id: &str, reason: CloseReason) -> Result<bool, StoreError> {
        let _gate = self.inner.gates.acquire(document_id).await;
        let had_session = self.evict(document_id, reason).await;
        let had_record = self.inner.store.delete(document_id).await?;
        tracing::info!(
            "[Registry] Deleted {} (session: {}, record: {})",
            document_id,
            had_session,
            had_record
        );
        Ok(had_session || had_record)
    }

    async fn evict(&self, document_id: &str, reason: CloseReason) -> bool {
        let removed = self.inner.sessions.write().await.remove(document_id);
        match removed {
            Some(session) => {
                tracing::info!("[Registry] Force-closing {}: {}", document_id, reason.message);
                session.stop(Some(reason)).await;
                true
            }
            None => false,
        }
    }

    /// Stop every session, waiting for all final flushes
    pub async fn shutdown(&self) {
        let sessions: Vec<Session> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        tracing::info!("[Registry] Shutting down {} session(s)", sessions.len());

        join_all(
            sessions
                .iter()
                .map(|session| session.stop(Some(CloseReason::server_shutdown()))),
        )
        .await;
    }

    /// Number of registered sessions, stopping ones included
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self.inner.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn usable(session: Session) -> Result<Session, RegistryError> {
    if session.is_stopping() {
        Err(RegistryError::Closing(session.document_id().to_string()))
    } else {
        Ok(session)
    }
}

async fn drive_idle_reports(registry: Weak<RegistryInner>, mut idle_rx: mpsc::UnboundedReceiver<Session>) {
    while let Some(session) = idle_rx.recv().await {
        let Some(inner) = registry.upgrade() else {
            break;
        };
        let registry = SessionRegistry { inner };
        tokio::spawn(async move {
            registry.notify_idle(&session).await;
        });
    }
}
