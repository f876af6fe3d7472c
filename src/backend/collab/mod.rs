//! Real-time Collaboration Core
//!
//! Everything that keeps one document consistent while several participants
//! edit it at once.
//!
//! # Architecture
//!
//! - **`session`** - per-document actor: authoritative JSON state, version
//!   counter, mailboxes, persistence scheduling
//! - **`connection`** - one participant's transport link, pumping frames
//!   between the wire and its session
//! - **`registry`** - the directory of live sessions; the only place
//!   sessions are created or torn down
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagecollab::backend::collab::SessionRegistry;
//! use pagecollab::backend::store::MemoryDocumentStore;
//! use pagecollab::shared::EngineConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryDocumentStore::new());
//! store.seed("page-1", r#"{"rootId":1,"components":{}}"#, 1).await;
//!
//! let registry = SessionRegistry::new(store, EngineConfig::default());
//! let session = registry.get_or_create("page-1").await?;
//! let version = session
//!     .apply_patch(r#"[{"op":"add","path":"/title","value":"Home"}]"#, 1)
//!     .await?;
//! assert_eq!(version, 2);
//! # Ok(())
//! # }
//! ```

/// Per-document session actor
pub mod session;

/// Participant connection pumps
pub mod connection;

/// Session directory
pub mod registry;

pub use connection::{Connection, Frame, TransportError};
pub use registry::{RegistryError, SessionRegistry};
pub use session::{
    CloseReason, ConnectionId, FlushOutcome, FlushReason, MailboxReceiver, Outbound, Session,
    SessionError,
};
