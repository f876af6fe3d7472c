/**
 * Application State
 *
 * `AppState` is the single state container handed to every axum handler.
 * It is cheap to clone: every field is a handle.
 *
 * # State Extraction
 *
 * `FromRef` implementations let handlers extract only the part they need,
 * e.g. `State(registry): State<SessionRegistry>`.
 */
use std::fmt;
use std::sync::Arc;

use axum::extract::FromRef;

use crate::backend::auth::JwtKeys;
use crate::backend::collab::SessionRegistry;
use crate::backend::store::DocumentStore;
use crate::shared::EngineConfig;

/// Application state shared by all routes
#[derive(Clone)]
pub struct AppState {
    /// Directory of live document sessions
    pub registry: SessionRegistry,

    /// Durable storage, shared with the registry
    ///
    /// Lifecycle routes (create, read, delete) talk to the store directly;
    /// sessions only ever reach it through the registry.
    pub store: Arc<dyn DocumentStore>,

    /// JWT verification keys
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    /// Build state around a store; spawns the registry's idle watcher, so
    /// this must run inside a tokio runtime.
    pub fn new(store: Arc<dyn DocumentStore>, engine: EngineConfig, jwt: JwtKeys) -> Self {
        Self {
            registry: SessionRegistry::new(store.clone(), engine),
            store,
            jwt: Arc::new(jwt),
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl FromRef<AppState> for SessionRegistry {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.registry.clone()
    }
}

impl FromRef<AppState> for Arc<dyn DocumentStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.jwt.clone()
    }
}
