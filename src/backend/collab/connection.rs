/**
 * Participant Connection
 *
 * Adapts one transport link to a `Session`. The transport is anything that
 * can send and receive `Frame`s; the WebSocket route maps axum messages onto
 * it, and tests use in-memory channels.
 *
 * # Pumps
 *
 * - The writer task drains the session-fed mailbox and this connection's own
 *   error replies onto the wire, emits a ping every `ping_period`, and gives
 *   up if a single write stalls past `write_wait`. When the session closes
 *   the mailbox it sends a close frame and exits.
 * - The reader loop runs on the caller's task. Any inbound frame resets the
 *   `pong_wait` liveness timer; oversized frames, timeouts and transport
 *   errors end the connection. On exit it leaves the session.
 *
 * The connection holds a session handle only to submit commands; a stopped
 * session answers every command with `SessionError::Closing`.
 */
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use super::session::{ConnectionId, MailboxReceiver, Outbound, Session, SessionError};
use crate::shared::config::EngineConfig;
use crate::shared::error::SharedError;
use crate::shared::message::{Envelope, ErrorCode, MessageBody, MessageKind, Participant, SenderId};

const REPLY_QUEUE_CAPACITY: usize = 16;

/// Transport-level frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(String),
}

/// One authenticated participant's link to a session
pub struct Connection {
    id: ConnectionId,
    participant: Participant,
    session: Session,
    config: EngineConfig,
}

impl Connection {
    pub fn new(session: Session, participant: Participant) -> Self {
        let config = session.config().clone();
        Self {
            id: Uuid::new_v4(),
            participant,
            session,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Join the session and pump frames until either side goes away
    ///
    /// # Errors
    ///
    /// Only joining can fail. The client is sent the matching error frame
    /// (usually `SESSION_CLOSING`) and a close frame before this returns.
    pub async fn run<S, R>(self, mut sink: S, mut stream: R) -> Result<(), SessionError>
    where
        S: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
        R: Stream<Item = Result<Frame, TransportError>> + Send + Unpin,
    {
        let mailbox = match self.session.join(self.id, self.participant.clone()).await {
            Ok(mailbox) => mailbox,
            Err(e) => {
                tracing::info!(
                    "[Connection] {} could not join {}: {}",
                    self.participant.user_id,
                    self.session.document_id(),
                    e
                );
                if let Ok(text) = e.to_envelope().encode() {
                    let _ = timeout(self.config.write_wait, sink.send(Frame::Text(text))).await;
                }
                let _ = timeout(self.config.write_wait, sink.send(Frame::Close)).await;
                return Err(e);
            }
        };

        let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let writer = tokio::spawn(write_pump(
            sink,
            mailbox,
            reply_rx,
            self.config.clone(),
            self.id,
            done_tx,
        ));

        self.read_pump(&mut stream, reply_tx, done_rx).await;
        self.session.leave(self.id).await;
        let _ = writer.await;

        tracing::info!(
            "[Connection] {} disconnected from {}",
            self.participant.user_id,
            self.session.document_id()
        );
        Ok(())
    }

    async fn read_pump<R>(
        &self,
        stream: &mut R,
        replies: mpsc::Sender<Outbound>,
        mut writer_done: oneshot::Receiver<()>,
    ) where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = &mut writer_done => break,
                next = timeout(self.config.pong_wait, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    tracing::info!("[Connection] {} timed out waiting for frames", self.id);
                    break;
                }
                Ok(None) | Ok(Some(Ok(Frame::Close))) => break,
                Ok(Some(Err(e))) => {
                    tracing::debug!("[Connection] {} read failed: {}", self.id, e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Frame::Text(text) => {
                    if text.len() > self.config.max_message_size {
                        tracing::warn!(
                            "[Connection] {} sent {} bytes, limit is {}",
                            self.id,
                            text.len(),
                            self.config.max_message_size
                        );
                        break;
                    }
                    self.handle_text(&text, &replies).await;
                }
                Frame::Binary(data) => {
                    if data.len() > self.config.max_message_size {
                        break;
                    }
                    tracing::debug!("[Connection] {} ignoring binary frame", self.id);
                }
                Frame::Ping(_) | Frame::Pong(_) | Frame::Close => {}
            }
        }
    }

    async fn handle_text(&self, text: &str, replies: &mpsc::Sender<Outbound>) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(SharedError::PayloadError {
                kind: MessageKind::EditPatch,
                message,
            }) => {
                self.reply(replies, Envelope::error(ErrorCode::PatchInvalid, message))
                    .await;
                return;
            }
            Err(e) => {
                tracing::debug!("[Connection] {} sent an unreadable frame: {}", self.id, e);
                return;
            }
        };

        let kind = envelope.kind();
        // Peers only ever see the authenticated identity
        let stamped = envelope.with_sender(SenderId::User(self.participant.user_id.clone()));
        match &stamped.body {
            MessageBody::EditPatch(edit) => {
                let patch = match serde_json::to_vec(&edit.patches) {
                    Ok(patch) => Bytes::from(patch),
                    Err(e) => {
                        self.reply(replies, Envelope::error(ErrorCode::PatchInvalid, e.to_string()))
                            .await;
                        return;
                    }
                };
                let expected = edit.version;
                let outbound = match stamped.encode() {
                    Ok(text) => Outbound::from(text),
                    Err(e) => {
                        tracing::error!("[Connection] {} failed to re-encode edit: {}", self.id, e);
                        return;
                    }
                };

                if let Err(e) = self
                    .session
                    .apply_and_broadcast(self.id, patch, expected, outbound)
                    .await
                {
                    if !matches!(e, SessionError::VersionConflict { .. }) {
                        tracing::debug!("[Connection] {} edit rejected: {}", self.id, e);
                    }
                    self.reply(replies, e.to_envelope()).await;
                }
            }
            MessageBody::CursorUpdate(_) => {
                let outbound = match stamped.encode() {
                    Ok(text) => Outbound::from(text),
                    Err(_) => return,
                };
                let _ = self.session.broadcast(outbound, Some(self.id), false).await;
            }
            _ => {
                tracing::debug!("[Connection] {} ignoring client-sent {} message", self.id, kind);
            }
        }
    }

    async fn reply(&self, replies: &mpsc::Sender<Outbound>, envelope: Envelope) {
        match envelope.encode() {
            Ok(text) => {
                let _ = replies.send(Outbound::from(text)).await;
            }
            Err(e) => tracing::error!("[Connection] {} failed to encode reply: {}", self.id, e),
        }
    }
}

async fn write_pump<S>(
    mut sink: S,
    mut mailbox: MailboxReceiver,
    mut replies: mpsc::Receiver<Outbound>,
    config: EngineConfig,
    id: ConnectionId,
    done: oneshot::Sender<()>,
) where
    S: Sink<Frame, Error = TransportError> + Unpin,
{
    let mut heartbeat = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        let frame = tokio::select! {
            message = mailbox.recv() => match message {
                Some(message) => Frame::Text(message.to_string()),
                None => {
                    let _ = timeout(config.write_wait, sink.send(Frame::Close)).await;
                    break;
                }
            },
            Some(reply) = replies.recv() => Frame::Text(reply.to_string()),
            _ = heartbeat.tick() => Frame::Ping(Vec::new()),
        };

        match timeout(config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("[Connection] {} write failed: {}", id, e);
                break;
            }
            Err(_) => {
                tracing::warn!("[Connection] {} write stalled past {:?}", id, config.write_wait);
                break;
            }
        }
    }
    let _ = done.send(());
}
