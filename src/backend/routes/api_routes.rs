/**
 * Document API Routes
 *
 * Lifecycle endpoints around the collaboration core. All of them require
 * `Authorization: Bearer <JWT>`.
 *
 * # Routes
 *
 * - `GET /api/documents/{id}` - current snapshot; served from the live
 *   session when one exists (without creating one), else from the store
 * - `POST /api/documents` - create a document, 201 or 409
 * - `DELETE /api/documents/{id}` - close the live session with
 *   `DOCUMENT_DELETED`, then delete the record; 404 if neither existed
 */
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::backend::collab::CloseReason;
use crate::backend::error::BackendError;
use crate::backend::middleware::{auth_middleware, AuthUser};
use crate::backend::server::state::AppState;
use crate::backend::store::NewDocument;
use crate::shared::document::{PageSchema, Version, INITIAL_VERSION};
use crate::shared::SharedError;

/// Configure API routes
///
/// The auth layer is attached with `route_layer`, so unknown paths still
/// fall through to the router's 404 instead of a 401.
pub fn configure_api_routes(router: Router<AppState>, app_state: AppState) -> Router<AppState> {
    let documents = Router::new()
        .route("/api/documents", post(create_document))
        .route("/api/documents/{id}", get(get_document).delete(delete_document))
        .route_layer(middleware::from_fn_with_state(app_state, auth_middleware));

    router.merge(documents)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub document_id: String,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub document_id: String,
    pub version: Version,
    pub schema: serde_json::Value,
    /// Whether the snapshot came from a live session
    pub live: bool,
}

fn decode_snapshot(snapshot: &Bytes) -> Result<serde_json::Value, BackendError> {
    Ok(serde_json::from_slice(snapshot)?)
}

/// `GET /api/documents/{id}`
pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentResponse>, BackendError> {
    if let Some(session) = state.registry.get(&document_id).await {
        let (snapshot, version) = session.snapshot();
        return Ok(Json(DocumentResponse {
            document_id,
            version,
            schema: decode_snapshot(&snapshot)?,
            live: true,
        }));
    }

    let record = state
        .store
        .get(&document_id)
        .await?
        .ok_or_else(|| BackendError::not_found(format!("document {} not found", document_id)))?;

    Ok(Json(DocumentResponse {
        document_id: record.document_id,
        version: record.version,
        schema: decode_snapshot(&record.snapshot)?,
        live: false,
    }))
}

/// `POST /api/documents`
pub async fn create_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), BackendError> {
    let document_id = request.document_id.trim().to_string();
    if document_id.is_empty() {
        return Err(SharedError::validation("documentId", "must not be empty").into());
    }

    let schema = match request.schema {
        Some(schema) if schema.is_object() => schema,
        Some(_) => return Err(SharedError::validation("schema", "must be a JSON object").into()),
        None => serde_json::to_value(PageSchema::default_page())?,
    };

    let record = state
        .store
        .create(NewDocument {
            document_id,
            snapshot: Bytes::from(serde_json::to_vec(&schema)?),
            version: INITIAL_VERSION,
            creator_id: user.user_id,
        })
        .await?;

    tracing::info!("[API] Document {} created by {}", record.document_id, record.creator_id);

    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse {
            document_id: record.document_id,
            version: record.version,
            schema,
            live: false,
        }),
    ))
}

/// `DELETE /api/documents/{id}`
pub async fn delete_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(document_id): Path<String>,
) -> Result<StatusCode, BackendError> {
    let existed = state
        .registry
        .delete_document(&document_id, CloseReason::document_deleted())
        .await?;

    if !existed {
        return Err(BackendError::not_found(format!("document {} not found", document_id)));
    }

    tracing::info!("[API] Document {} deleted by {}", document_id, user.user_id);
    Ok(StatusCode::NO_CONTENT)
}
