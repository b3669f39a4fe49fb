use super::ConfigServer;
use crate::cache::{ConfigFileQuery, OutputFormat};
use crate::core::{ServiceInstance, WatchedNamespace};
use crate::error::RelayError;
use crate::notify::{PollOutcome, PollRequest};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Application state shared across all handlers.
type AppState = Arc<ConfigServer>;

const FORWARDED_FOR: &str = "x-forwarded-for";

pub(super) fn router(server: AppState) -> Router {
    Router::new()
        .route("/notifications/v2", get(poll_notifications))
        .route(
            "/configfiles/json/{tenant}/{cluster}/{namespace}",
            get(config_file_json),
        )
        .route(
            "/configfiles/{tenant}/{cluster}/{namespace}",
            get(config_file_properties),
        )
        .route(
            "/namespaces/{tenant}/{cluster}/{namespace}/lock",
            get(namespace_lock),
        )
        .route("/services/config", get(config_services))
        .with_state(server)
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) | Self::Deserialization(_) => StatusCode::BAD_REQUEST,
            Self::NamespaceNotFound(_) => StatusCode::NOT_FOUND,
            Self::LockHeld { .. } => StatusCode::CONFLICT,
            Self::LockCheckFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        error_response(status, self.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    tenant: String,
    cluster: String,
    notifications: String,
    region: Option<String>,
    ip: Option<String>,
}

/// `GET /notifications/v2`: park until a watched namespace changes.
async fn poll_notifications(
    State(server): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Response {
    let watched: Vec<WatchedNamespace> = match serde_json::from_str(&query.notifications) {
        Ok(watched) => watched,
        Err(err) => {
            debug!(notifications = %query.notifications, error = %err, "Rejected notification payload");
            return RelayError::BadRequest(format!("Invalid format of notifications: {err}"))
                .into_response();
        }
    };

    let mut request = PollRequest::new(query.tenant, query.cluster, watched);
    request.region = query.region.filter(|region| !region.is_empty());
    request.client_ip = query.ip;

    match server.hub().poll(request).await {
        Ok(PollOutcome::Changed(notifications)) => Json(notifications).into_response(),
        Ok(PollOutcome::NotModified) => StatusCode::NOT_MODIFIED.into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFileParams {
    region: Option<String>,
    ip: Option<String>,
}

/// `GET /configfiles/{tenant}/{cluster}/{namespace}`
async fn config_file_properties(
    State(server): State<AppState>,
    Path((tenant, cluster, namespace)): Path<(String, String, String)>,
    Query(params): Query<ConfigFileParams>,
    headers: HeaderMap,
) -> Response {
    let query = file_query(tenant, cluster, namespace, params, &headers);
    serve_config_file(server, OutputFormat::Properties, query).await
}

/// `GET /configfiles/json/{tenant}/{cluster}/{namespace}`
async fn config_file_json(
    State(server): State<AppState>,
    Path((tenant, cluster, namespace)): Path<(String, String, String)>,
    Query(params): Query<ConfigFileParams>,
    headers: HeaderMap,
) -> Response {
    let query = file_query(tenant, cluster, namespace, params, &headers);
    serve_config_file(server, OutputFormat::Json, query).await
}

fn file_query(
    tenant: String,
    cluster: String,
    namespace: String,
    params: ConfigFileParams,
    headers: &HeaderMap,
) -> ConfigFileQuery {
    let mut query = ConfigFileQuery::new(tenant, cluster, namespace);
    query.region = params.region.filter(|region| !region.is_empty());
    query.client_ip = params.ip.or_else(|| forwarded_for(headers));
    query
}

/// First address in `X-Forwarded-For`, if any.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|addr| !addr.is_empty())
        .map(str::to_string)
}

async fn serve_config_file(
    server: AppState,
    format: OutputFormat,
    query: ConfigFileQuery,
) -> Response {
    let namespace = query.namespace.clone();
    let rendered =
        tokio::task::spawn_blocking(move || server.cache().query(format, &query)).await;

    match rendered {
        Ok(Ok(Some(body))) => ([(header::CONTENT_TYPE, format.content_type())], body).into_response(),
        Ok(Ok(None)) => error_response(
            StatusCode::NOT_FOUND,
            format!("No release found for namespace {namespace}"),
        ),
        Ok(Err(err)) => err.into_response(),
        Err(err) => {
            error!(namespace = %namespace, error = %err, "Config file render task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "render task failed")
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LockResponse {
    namespace: String,
    lock_owner: Option<String>,
}

/// `GET /namespaces/{tenant}/{cluster}/{namespace}/lock`
async fn namespace_lock(
    State(server): State<AppState>,
    Path((tenant, cluster, namespace)): Path<(String, String, String)>,
) -> Response {
    let found = match server.content().find_namespace(&tenant, &cluster, &namespace) {
        Ok(Some(found)) => found,
        Ok(None) => {
            return RelayError::NamespaceNotFound(format!("{tenant}/{cluster}/{namespace}"))
                .into_response();
        }
        Err(err) => return err.into_response(),
    };

    let lock_owner = if server.lock().is_enabled() {
        match server.lock().owner(found.id) {
            Ok(owner) => owner,
            Err(err) => return err.into_response(),
        }
    } else {
        None
    };

    Json(LockResponse {
        namespace: found.name,
        lock_owner,
    })
    .into_response()
}

/// `GET /services/config`
async fn config_services(State(server): State<AppState>) -> Json<Vec<ServiceInstance>> {
    Json(
        server
            .settings()
            .server
            .instances
            .iter()
            .map(ServiceInstance::new)
            .collect(),
    )
}
