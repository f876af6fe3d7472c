/**
 * Document Session Actor
 *
 * One `Session` exists per actively edited document. It owns the
 * authoritative JSON document, its version counter and the set of attached
 * connections, and it serializes every mutation and every fan-out through a
 * single spawned event loop.
 *
 * # Structure
 *
 * - `Session` is a cheap, cloneable handle: an `Arc` of the state readable
 *   from outside the loop plus the sender half of the loop's command queue.
 * - `SessionLoop` is the task that owns the working document and the
 *   connection mailboxes. Nothing else ever touches them.
 *
 * State readable from outside (the published snapshot and the
 * idle/stopping flags) sits behind short `std::sync::RwLock` sections that
 * are never held across an `.await`.
 *
 * # Persistence
 *
 * Flushes run on spawned workers so the loop keeps accepting edits while a
 * write is in flight. A flush gate serializes the workers themselves, and
 * each flush re-reads the published state after acquiring it, so repeated
 * flushes with no intervening edits issue at most one write.
 */
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::backend::store::{DocumentStore, StoreError, StoredState};
use crate::shared::config::EngineConfig;
use crate::shared::document::{DocumentId, Version};
use crate::shared::error::SharedError;
use crate::shared::message::{Envelope, ErrorCode, Participant};

/// Identifier of one attached connection
pub type ConnectionId = Uuid;

/// An encoded wire frame, shared between every recipient of a broadcast
pub type Outbound = Arc<str>;

/// Receiving half of a connection's mailbox, handed out by `Session::join`
pub type MailboxReceiver = mpsc::Receiver<Outbound>;

/// Channel on which sessions report that their last connection left
pub type IdleSender = mpsc::UnboundedSender<Session>;

const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Session-level failures surfaced to callers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Expected version did not match; nothing was mutated
    #[error("version conflict: current {current}, expected {expected}")]
    VersionConflict { current: Version, expected: Version },

    /// Patch body is not a valid RFC 6902 operation list
    #[error("invalid patch: {0}")]
    PatchInvalid(String),

    /// Patch is well-formed but does not apply to the document
    #[error("patch failed: {0}")]
    PatchFailed(String),

    /// Session is stopping or stopped; retry against a fresh session
    #[error("session is closing")]
    Closing,

    /// Loaded snapshot is not valid JSON
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Wire error code for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::PatchInvalid(_) => ErrorCode::PatchInvalid,
            Self::PatchFailed(_) => ErrorCode::PatchFailed,
            Self::Closing => ErrorCode::SessionClosing,
            Self::CorruptSnapshot(_) | Self::Protocol(_) => ErrorCode::InternalError,
        }
    }

    /// Error envelope to send back to the originating connection
    pub fn to_envelope(&self) -> Envelope {
        match self {
            Self::VersionConflict { current, expected } => Envelope::version_conflict(*current, *expected),
            other => Envelope::error(other.error_code(), other.to_string()),
        }
    }
}

impl From<SharedError> for SessionError {
    fn from(error: SharedError) -> Self {
        Self::Protocol(error.to_string())
    }
}

/// Why a session is being torn down, broadcast to every participant first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: ErrorCode,
    pub message: String,
}

impl CloseReason {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn document_deleted() -> Self {
        Self::new(ErrorCode::DocumentDeleted, "document was deleted")
    }

    pub fn server_shutdown() -> Self {
        Self::new(ErrorCode::SessionClosing, "server is shutting down")
    }
}

/// What triggered a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Interval,
    Threshold,
    Final,
    Manual,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interval => "interval",
            Self::Threshold => "threshold",
            Self::Final => "final",
            Self::Manual => "manual",
        })
    }
}

/// Result of a successful flush call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write
    UpToDate,
    /// Versions `from` (exclusive) through `to` were persisted
    Persisted { from: Version, to: Version },
}

/// Snapshot/version pair as last published by the event loop
struct Published {
    snapshot: Bytes,
    version: Version,
    last_persisted: Version,
}

struct Lifecycle {
    /// Joined connections plus joins in flight
    connections: usize,
    stopping: bool,
}

struct SessionShared {
    document_id: DocumentId,
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    published: RwLock<Published>,
    lifecycle: RwLock<Lifecycle>,
    flush_gate: Mutex<()>,
    flush_pending: AtomicBool,
    stopped: watch::Sender<bool>,
}

impl SessionShared {
    fn published(&self) -> RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn published_mut(&self) -> RwLockWriteGuard<'_, Published> {
        self.published.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle_mut(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop one connection from the count; returns what remains
    fn release_connection(&self) -> usize {
        let mut lifecycle = self.lifecycle_mut();
        lifecycle.connections = lifecycle.connections.saturating_sub(1);
        lifecycle.connections
    }

    fn advance_persisted(&self, version: Version) {
        let mut published = self.published_mut();
        published.last_persisted = published.last_persisted.max(version);
    }

    async fn flush(&self, reason: FlushReason) -> Result<FlushOutcome, StoreError> {
        let _gate = self.flush_gate.lock().await;

        let (snapshot, version, last_persisted) = {
            let published = self.published();
            (published.snapshot.clone(), published.version, published.last_persisted)
        };
        if version <= last_persisted {
            return Ok(FlushOutcome::UpToDate);
        }

        let id = self.document_id.as_str();
        match self
            .store
            .save_state(id, snapshot.clone(), last_persisted, version)
            .await
        {
            Ok(()) => {}
            Err(StoreError::VersionMismatch) => {
                // Stored copy moved without us; rebase once if we are still ahead of it
                let stored = match self.store.load_state(id).await {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::error!("[Session {}] {} flush: reload after mismatch failed: {}", id, reason, e);
                        return Err(e);
                    }
                };
                if stored.version >= version {
                    tracing::error!(
                        "[Session {}] {} flush: stored version {} is not behind in-memory version {}",
                        id, reason, stored.version, version
                    );
                    return Err(StoreError::VersionMismatch);
                }
                tracing::warn!(
                    "[Session {}] {} flush: stored version {} differs from last persisted {}, rebasing",
                    id, reason, stored.version, last_persisted
                );
                if let Err(e) = self.store.save_state(id, snapshot, stored.version, version).await {
                    tracing::error!("[Session {}] {} flush failed after rebase: {}", id, reason, e);
                    return Err(e);
                }
            }
            Err(e) => {
                tracing::warn!("[Session {}] {} flush failed, will retry: {}", id, reason, e);
                return Err(e);
            }
        }

        self.advance_persisted(version);
        tracing::debug!(
            "[Session {}] {} flush persisted versions {}..={}",
            id, reason, last_persisted + 1, version
        );
        Ok(FlushOutcome::Persisted {
            from: last_persisted,
            to: version,
        })
    }
}

enum Command {
    Join {
        connection: ConnectionId,
        participant: Participant,
        reply: oneshot::Sender<Result<MailboxReceiver, SessionError>>,
    },
    Leave {
        connection: ConnectionId,
    },
    Apply {
        patch: Bytes,
        expected: Version,
        fanout: Option<Fanout>,
        reply: oneshot::Sender<Result<Version, SessionError>>,
    },
    Broadcast {
        message: Outbound,
        exclude: Option<ConnectionId>,
        critical: bool,
    },
    Stop {
        reason: Option<CloseReason>,
    },
}

/// Re-broadcast of an accepted edit to everyone but its origin
struct Fanout {
    origin: ConnectionId,
    message: Outbound,
}

/// Handle to a running document session
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
    commands: mpsc::Sender<Command>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("document_id", &self.shared.document_id)
            .field("version", &self.version())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

impl Session {
    /// Start a session seeded with `state` and spawn its event loop
    ///
    /// # Arguments
    ///
    /// * `document_id` - Document this session owns
    /// * `state` - Last persisted snapshot and version
    /// * `store` - Persistence service used for flushes
    /// * `config` - Engine tunables
    /// * `idle` - Where to report that the last connection left, if anywhere
    ///
    /// # Errors
    ///
    /// `SessionError::CorruptSnapshot` if the stored snapshot is not JSON.
    pub fn spawn(
        document_id: impl Into<DocumentId>,
        state: StoredState,
        store: Arc<dyn DocumentStore>,
        config: EngineConfig,
        idle: Option<IdleSender>,
    ) -> Result<Self, SessionError> {
        let document_id = document_id.into();
        let document: Value = serde_json::from_slice(&state.snapshot)
            .map_err(|e| SessionError::CorruptSnapshot(e.to_string()))?;

        let (stopped, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            document_id,
            config,
            store,
            published: RwLock::new(Published {
                snapshot: state.snapshot,
                version: state.version,
                last_persisted: state.version,
            }),
            lifecycle: RwLock::new(Lifecycle {
                connections: 0,
                stopping: false,
            }),
            flush_gate: Mutex::new(()),
            flush_pending: AtomicBool::new(false),
            stopped,
        });

        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let event_loop = SessionLoop {
            shared: shared.clone(),
            document,
            version: state.version,
            members: HashMap::new(),
            commands: receiver,
            handle: commands.downgrade(),
            idle,
        };
        tokio::spawn(event_loop.run());

        tracing::info!("[Session {}] Started at version {}", shared.document_id, state.version);
        Ok(Self { shared, commands })
    }

    pub fn document_id(&self) -> &str {
        &self.shared.document_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Current version as last published by the event loop
    pub fn version(&self) -> Version {
        self.shared.published().version
    }

    pub fn last_persisted_version(&self) -> Version {
        self.shared.published().last_persisted
    }

    /// Copy of the current snapshot bytes and their version
    ///
    /// The pair is always consistent: the bytes are exactly the document at
    /// the returned version.
    pub fn snapshot(&self) -> (Bytes, Version) {
        let published = self.shared.published();
        (published.snapshot.clone(), published.version)
    }

    /// Joined connections, including joins still in flight
    pub fn connection_count(&self) -> usize {
        self.shared.lifecycle().connections
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.lifecycle().stopping
    }

    /// Whether both handles point at the same session instance
    pub fn same_instance(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Mark the session stopping if it has no connections
    ///
    /// Returns `true` if the caller won the right to stop it. Joins that
    /// arrive afterwards fail with `SessionError::Closing`.
    pub(crate) fn begin_idle_stop(&self) -> bool {
        let mut lifecycle = self.shared.lifecycle_mut();
        if lifecycle.connections == 0 && !lifecycle.stopping {
            lifecycle.stopping = true;
            true
        } else {
            false
        }
    }

    /// Register a connection and obtain its outbound mailbox
    ///
    /// The first frame in the mailbox is always a full sync with the
    /// current snapshot, version and the other participants. Every other
    /// participant is told about the newcomer.
    ///
    /// # Errors
    ///
    /// `SessionError::Closing` if the session is stopping or stopped.
    pub async fn join(
        &self,
        connection: ConnectionId,
        participant: Participant,
    ) -> Result<MailboxReceiver, SessionError> {
        let mut slot = ConnectionSlot::claim(&self.shared)?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Join {
                connection,
                participant,
                reply,
            })
            .await
            .map_err(|_| SessionError::Closing)?;
        // The event loop now owns the slot
        slot.disarm();
        response.await.unwrap_or(Err(SessionError::Closing))
    }

    /// Unregister a connection; unknown connections are ignored
    pub async fn leave(&self, connection: ConnectionId) {
        let _ = self.commands.send(Command::Leave { connection }).await;
    }

    /// Apply an RFC 6902 patch if `expected` is the current version
    ///
    /// # Returns
    ///
    /// The new version, always `expected + 1`.
    ///
    /// # Errors
    ///
    /// - `VersionConflict` when `expected` is stale
    /// - `PatchInvalid` when `patch` is not a valid operation list
    /// - `PatchFailed` when the operations do not apply
    /// - `Closing` when the session is shutting down
    pub async fn apply_patch(&self, patch: impl Into<Bytes>, expected: Version) -> Result<Version, SessionError> {
        self.request_apply(patch.into(), expected, None).await
    }

    /// Apply a patch and, in the same loop step, fan `message` out to every
    /// other connection and acknowledge `origin`
    pub async fn apply_and_broadcast(
        &self,
        origin: ConnectionId,
        patch: Bytes,
        expected: Version,
        message: Outbound,
    ) -> Result<Version, SessionError> {
        self.request_apply(patch, expected, Some(Fanout { origin, message }))
            .await
    }

    async fn request_apply(
        &self,
        patch: Bytes,
        expected: Version,
        fanout: Option<Fanout>,
    ) -> Result<Version, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Apply {
                patch,
                expected,
                fanout,
                reply,
            })
            .await
            .map_err(|_| SessionError::Closing)?;
        response.await.unwrap_or(Err(SessionError::Closing))
    }

    /// Deliver an encoded frame to every connection except `exclude`
    ///
    /// Recipients whose mailbox is full are disconnected when `critical`
    /// is set and skipped otherwise.
    pub async fn broadcast(
        &self,
        message: Outbound,
        exclude: Option<ConnectionId>,
        critical: bool,
    ) -> Result<(), SessionError> {
        self.commands
            .send(Command::Broadcast {
                message,
                exclude,
                critical,
            })
            .await
            .map_err(|_| SessionError::Closing)
    }

    /// Encode and broadcast an envelope with its kind's criticality
    pub async fn broadcast_envelope(
        &self,
        envelope: &Envelope,
        exclude: Option<ConnectionId>,
    ) -> Result<(), SessionError> {
        let encoded = envelope.encode()?;
        self.broadcast(encoded.into(), exclude, envelope.is_critical())
            .await
    }

    /// Persist the current state if it is ahead of the stored copy
    pub async fn flush(&self, reason: FlushReason) -> Result<FlushOutcome, StoreError> {
        self.shared.flush(reason).await
    }

    /// Tear the session down and wait until the final flush has finished
    ///
    /// With a reason, every participant first receives a critical error
    /// carrying it. Calling `stop` again, or on a stopped session, just
    /// waits for the same completion.
    pub async fn stop(&self, reason: Option<CloseReason>) {
        self.shared.lifecycle_mut().stopping = true;
        let mut stopped = self.shared.stopped.subscribe();
        let _ = self.commands.send(Command::Stop { reason }).await;
        let _ = stopped.wait_for(|done| *done).await;
    }

    /// Whether the event loop has finished, final flush included
    pub fn is_stopped(&self) -> bool {
        *self.shared.stopped.borrow()
    }
}

/// A connection counted before its join reaches the event loop
///
/// Released on drop unless the join command was delivered.
struct ConnectionSlot<'a> {
    shared: &'a SessionShared,
    armed: bool,
}

impl<'a> ConnectionSlot<'a> {
    fn claim(shared: &'a SessionShared) -> Result<Self, SessionError> {
        let mut lifecycle = shared.lifecycle_mut();
        if lifecycle.stopping {
            return Err(SessionError::Closing);
        }
        lifecycle.connections += 1;
        Ok(Self { shared, armed: true })
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectionSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.release_connection();
        }
    }
}

struct Member {
    participant: Participant,
    mailbox: mpsc::Sender<Outbound>,
}

struct SessionLoop {
    shared: Arc<SessionShared>,
    document: Value,
    version: Version,
    members: HashMap<ConnectionId, Member>,
    commands: mpsc::Receiver<Command>,
    handle: mpsc::WeakSender<Command>,
    idle: Option<IdleSender>,
}

impl SessionLoop {
    async fn run(mut self) {
        let period = self.shared.config.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Stop { reason }) => {
                        self.shutdown(reason).await;
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        tracing::debug!("[Session {}] All handles dropped", self.shared.document_id);
                        self.shutdown(None).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.on_tick(),
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Join {
                connection,
                participant,
                reply,
            } => {
                let result = self.join(connection, participant);
                let joined = result.is_ok();
                if reply.send(result).is_err() && joined {
                    // Joiner went away before receiving its mailbox
                    self.remove_members(vec![connection]);
                } else if !joined {
                    self.settle_released();
                }
            }
            Command::Leave { connection } => {
                if self.members.contains_key(&connection) {
                    tracing::debug!("[Session {}] Connection {} left", self.shared.document_id, connection);
                    self.remove_members(vec![connection]);
                }
            }
            Command::Apply {
                patch,
                expected,
                fanout,
                reply,
            } => {
                let result = self.apply(&patch, expected);
                if let (Ok(version), Some(fanout)) = (&result, fanout) {
                    self.fan_out(fanout, *version);
                }
                let _ = reply.send(result);
            }
            Command::Broadcast {
                message,
                exclude,
                critical,
            } => {
                let evicted = self.deliver(&message, exclude, critical);
                self.remove_members(evicted);
            }
            Command::Stop { .. } => {}
        }
    }

    fn join(&mut self, connection: ConnectionId, participant: Participant) -> Result<MailboxReceiver, SessionError> {
        let peers: Vec<Participant> = self
            .members
            .iter()
            .filter(|(id, _)| **id != connection)
            .map(|(_, member)| member.participant.clone())
            .collect();
        let sync = Envelope::full_sync(self.document.clone(), self.version, peers).encode()?;
        let joined = Envelope::participant_joined(participant.clone()).encode()?;

        if self.members.contains_key(&connection) {
            tracing::warn!("[Session {}] Connection {} joined twice, replacing", self.shared.document_id, connection);
            self.remove_members(vec![connection]);
        }

        let (mailbox, receiver) = mpsc::channel(self.shared.config.mailbox_capacity.max(1));
        mailbox
            .try_send(Outbound::from(sync))
            .map_err(|_| SessionError::Protocol("fresh mailbox rejected full sync".to_string()))?;

        let evicted = self.deliver(&Outbound::from(joined), None, false);
        tracing::info!(
            "[Session {}] {} ({}) joined as connection {}",
            self.shared.document_id, participant.user_name, participant.user_id, connection
        );
        self.members.insert(connection, Member { participant, mailbox });
        self.remove_members(evicted);
        Ok(receiver)
    }

    /// A join that failed inside the loop gives its slot back
    fn settle_released(&mut self) {
        if self.shared.release_connection() == 0 {
            self.report_idle();
        }
    }

    fn apply(&mut self, patch: &[u8], expected: Version) -> Result<Version, SessionError> {
        if expected != self.version {
            tracing::debug!(
                "[Session {}] Version conflict: current {}, expected {}",
                self.shared.document_id, self.version, expected
            );
            return Err(SessionError::VersionConflict {
                current: self.version,
                expected,
            });
        }

        let operations: json_patch::Patch =
            serde_json::from_slice(patch).map_err(|e| SessionError::PatchInvalid(e.to_string()))?;

        let mut next = self.document.clone();
        json_patch::patch(&mut next, &operations.0).map_err(|e| SessionError::PatchFailed(e.to_string()))?;
        let snapshot = serde_json::to_vec(&next).map_err(|e| SessionError::PatchFailed(e.to_string()))?;

        self.document = next;
        self.version += 1;
        let last_persisted = {
            let mut published = self.shared.published_mut();
            published.snapshot = Bytes::from(snapshot);
            published.version = self.version;
            published.last_persisted
        };

        if self.version.saturating_sub(last_persisted) >= self.shared.config.flush_threshold {
            self.spawn_flush(FlushReason::Threshold);
        }
        Ok(self.version)
    }

    fn fan_out(&mut self, fanout: Fanout, version: Version) {
        let mut evicted = self.deliver(&fanout.message, Some(fanout.origin), true);

        if let Some(origin) = self.members.get(&fanout.origin) {
            match Envelope::ack(version).encode() {
                Ok(ack) => {
                    if origin.mailbox.try_send(Outbound::from(ack)).is_err() {
                        evicted.push(fanout.origin);
                    }
                }
                Err(e) => tracing::error!("[Session {}] Failed to encode ack: {}", self.shared.document_id, e),
            }
        }
        self.remove_members(evicted);
    }

    /// Try to enqueue `message` for every member except `exclude`
    ///
    /// Returns the members that must be evicted: those whose mailbox is
    /// closed, plus those whose mailbox is full when `critical` is set.
    fn deliver(&self, message: &Outbound, exclude: Option<ConnectionId>, critical: bool) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for (id, member) in &self.members {
            if Some(*id) == exclude {
                continue;
            }
            match member.mailbox.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) if critical => {
                    tracing::warn!(
                        "[Session {}] Connection {} cannot keep up with critical messages, evicting",
                        self.shared.document_id, id
                    );
                    evicted.push(*id);
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("[Session {}] Dropped ephemeral message for slow connection {}", self.shared.document_id, id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        evicted
    }

    /// Remove members, close their mailboxes and tell the rest
    fn remove_members(&mut self, initial: Vec<ConnectionId>) {
        let mut queue: VecDeque<ConnectionId> = initial.into();
        while let Some(id) = queue.pop_front() {
            let Some(member) = self.members.remove(&id) else {
                continue;
            };
            // Dropping the sender closes the mailbox once it drains
            drop(member.mailbox);

            match Envelope::participant_left(member.participant).encode() {
                Ok(left) => queue.extend(self.deliver(&Outbound::from(left), None, false)),
                Err(e) => tracing::error!("[Session {}] Failed to encode leave notice: {}", self.shared.document_id, e),
            }

            if self.shared.release_connection() == 0 {
                self.report_idle();
            }
        }
    }

    fn report_idle(&self) {
        let Some(idle) = &self.idle else {
            return;
        };
        if self.shared.lifecycle().stopping {
            return;
        }
        if let Some(commands) = self.handle.upgrade() {
            tracing::debug!("[Session {}] Idle, reporting to registry", self.shared.document_id);
            let _ = idle.send(Session {
                shared: self.shared.clone(),
                commands,
            });
        }
    }

    fn on_tick(&self) {
        let (version, last_persisted) = {
            let published = self.shared.published();
            (published.version, published.last_persisted)
        };
        if version > last_persisted {
            self.spawn_flush(FlushReason::Interval);
        }
        // A session nobody ever joined would otherwise never be reclaimed
        if self.members.is_empty() && self.shared.lifecycle().connections == 0 {
            self.report_idle();
        }
    }

    fn spawn_flush(&self, reason: FlushReason) {
        if self.shared.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _ = shared.flush(reason).await;
            shared.flush_pending.store(false, Ordering::SeqCst);
        });
    }

    async fn shutdown(&mut self, reason: Option<CloseReason>) {
        let id = self.shared.document_id.clone();
        self.shared.lifecycle_mut().stopping = true;

        if let Some(reason) = reason {
            tracing::info!("[Session {}] Stopping: {} ({})", id, reason.message, reason.code);
            match Envelope::error(reason.code, reason.message).encode() {
                Ok(notice) => {
                    let evicted = self.deliver(&Outbound::from(notice), None, true);
                    for connection in evicted {
                        self.members.remove(&connection);
                    }
                }
                Err(e) => tracing::error!("[Session {}] Failed to encode close notice: {}", id, e),
            }
            tokio::time::sleep(self.shared.config.stop_grace).await;
        } else {
            tracing::info!("[Session {}] Stopping", id);
        }

        self.members.clear();
        self.shared.lifecycle_mut().connections = 0;

        if let Err(e) = self.shared.flush(FlushReason::Final).await {
            tracing::error!("[Session {}] Final flush failed: {}", id, e);
        }
        tracing::info!("[Session {}] Stopped at version {}", id, self.version);
    }
}

impl Drop for SessionLoop {
    fn drop(&mut self) {
        self.shared.lifecycle_mut().stopping = true;
        self.shared.stopped.send_replace(true);
    }
}
