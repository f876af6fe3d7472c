//! Route Configuration Module
//!
//! HTTP and WebSocket routes for the collaboration server.
//!
//! # Architecture
//!
//! - **`router`** - Main router creation and route assembly
//! - **`ws_routes`** - WebSocket upgrade into a document session
//! - **`api_routes`** - Document lifecycle endpoints
//!
//! # Module Structure
//!
//! ```text
//! routes/
//! ├── mod.rs          - Module exports and documentation
//! ├── router.rs       - Main router creation, /health
//! ├── ws_routes.rs    - GET /ws/{document_id}
//! └── api_routes.rs   - /api/documents
//! ```
//!
//! # Route Types
//!
//! ## WebSocket
//!
//! - `GET /ws/{document_id}?token=JWT` - join a document session
//!
//! ## API Routes (Bearer JWT)
//!
//! - `GET /api/documents/{id}` - live or stored snapshot
//! - `POST /api/documents` - create a document
//! - `DELETE /api/documents/{id}` - close the live session and delete
//!
//! ## Health
//!
//! - `GET /health` - liveness with live-session count

/// Main router creation
pub mod router;

/// WebSocket route handlers
pub mod ws_routes;

/// Document API handlers
pub mod api_routes;

pub use router::create_router;
