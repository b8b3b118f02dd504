//! Metrics snapshot server
//!
//! Serves the most recently published [`MetricsDocument`] as JSON on every
//! path. The document is serialized once per publish and cached, so request
//! handling never touches the control loop's state.

use crate::models::MetricsDocument;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW, AUTHORIZATION, CONNECTION, CONTENT_LENGTH,
            CONTENT_TYPE,
        },
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Custom header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

const UNAUTHORIZED_BODY: &[u8] = br#"{"error":"unauthorized"}"#;
const METHOD_NOT_ALLOWED_BODY: &[u8] = br#"{"error":"method not allowed"}"#;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// The cached serialized document
pub struct SnapshotStore {
    document: RwLock<Bytes>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let initial = serde_json::to_vec(&MetricsDocument::default()).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            document: RwLock::new(Bytes::from(initial)),
        }
    }

    /// Serialize and swap in a new document.
    ///
    /// Serialization happens before the lock is taken. On failure the
    /// previous document stays in place.
    pub async fn publish(&self, document: &MetricsDocument) {
        match serde_json::to_vec(document) {
            Ok(bytes) => *self.document.write().await = Bytes::from(bytes),
            Err(e) => warn!(error = %e, "Failed to serialize metrics document"),
        }
    }

    /// Current serialized document
    pub async fn current(&self) -> Bytes {
        self.document.read().await.clone()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    store: Arc<SnapshotStore>,
    token: Option<Arc<str>>,
}

impl ServerState {
    /// An empty or missing token leaves the server open
    pub fn new(store: Arc<SnapshotStore>, token: Option<String>) -> Self {
        Self {
            store,
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }
}

/// Build the router. Every path serves the snapshot.
pub fn create_router(state: ServerState) -> Router {
    Router::new().fallback(serve_snapshot).with_state(state)
}

async fn serve_snapshot(
    State(state): State<ServerState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        let mut response = json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            Bytes::from_static(METHOD_NOT_ALLOWED_BODY),
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    if !is_authorized(&headers, state.token.as_deref()) {
        let mut response =
            json_response(StatusCode::UNAUTHORIZED, Bytes::from_static(UNAUTHORIZED_BODY));
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        return response;
    }

    json_response(StatusCode::OK, state.store.current().await)
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    let headers: [(HeaderName, HeaderValue); 3] = [
        (CONTENT_TYPE, HeaderValue::from_static("application/json")),
        (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
        (CONTENT_LENGTH, HeaderValue::from(body.len())),
    ];
    (status, headers, Body::from(body)).into_response()
}

/// Accepts `X-API-Key: <token>` or `Authorization: Bearer <token>`
pub fn is_authorized(headers: &HeaderMap, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return true;
    };

    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if api_key == Some(token) {
        return true;
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .map(|(scheme, value)| scheme.eq_ignore_ascii_case("bearer") && value.trim() == token)
        .unwrap_or(false)
}

/// Bind and serve until shutdown is signalled
pub async fn serve(
    bind: &str,
    port: u16,
    state: ServerState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let app = create_router(state);

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, "Starting snapshot server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(ServerError::Serve)?;

    info!("Snapshot server stopped");
    Ok(())
}
