//! In-memory transport for driving a `Connection` without sockets

use std::pin::Pin;
use std::time::Duration;

use futures_util::Sink;
use pagecollab::backend::collab::{Connection, Frame, Session, SessionError, TransportError};
use pagecollab::shared::message::{Envelope, Participant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

type BoxSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Client end of a connection: frames in, frames out
pub struct TestClient {
    pub user_id: String,
    inbound: mpsc::Sender<Result<Frame, TransportError>>,
    outbound: mpsc::Receiver<Frame>,
    task: JoinHandle<Result<(), SessionError>>,
}

impl TestClient {
    pub fn connect(session: &Session, user_id: &str) -> Self {
        let (inbound, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, outbound) = mpsc::channel(64);
        let sink: BoxSink = Box::pin(futures_util::sink::unfold(
            outbound_tx,
            |tx: mpsc::Sender<Frame>, frame: Frame| async move {
                tx.send(frame).await.map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(tx)
            },
        ));
        let connection = Connection::new(session.clone(), Participant::new(user_id, user_id));
        let task = tokio::spawn(connection.run(sink, ReceiverStream::new(inbound_rx)));
        Self {
            user_id: user_id.to_string(),
            inbound,
            outbound,
            task,
        }
    }

    pub async fn send(&self, text: &str) {
        self.inbound
            .send(Ok(Frame::Text(text.to_string())))
            .await
            .expect("connection still reading");
    }

    /// Next decoded envelope, skipping heartbeats; panics after one second
    pub async fn recv(&mut self) -> Envelope {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Frame::Text(text)) => return Envelope::decode(&text).expect("valid envelope"),
                Some(Frame::Ping(_)) => continue,
                other => panic!("Expected text frame, got {:?}", other),
            }
        }
    }

    /// Whether a text frame arrives within `wait`
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Envelope> {
        loop {
            match tokio::time::timeout(wait, self.outbound.recv()).await {
                Ok(Some(Frame::Text(text))) => return Envelope::decode(&text).ok(),
                Ok(Some(Frame::Ping(_))) => continue,
                _ => return None,
            }
        }
    }

    /// Wait for the server to send Close (or drop the link)
    pub async fn expect_closed(&mut self) {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
                .await
                .expect("timed out waiting for close");
            match frame {
                Some(Frame::Close) | None => return,
                Some(_) => continue,
            }
        }
    }

    /// Hang up from the client side and wait for the connection to finish
    pub async fn close(self) -> Result<(), SessionError> {
        let _ = self.inbound.send(Ok(Frame::Close)).await;
        self.task.await.expect("connection task panicked")
    }

    pub async fn join_result(self) -> Result<(), SessionError> {
        self.task.await.expect("connection task panicked")
    }
}
