use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::admin::AdminState;
use crate::error::RouterError;
use crate::routing::Route;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routes: usize,
    pub services: Vec<ServiceStatus>,
    pub http_address: Option<String>,
    pub https_address: Option<String>,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub routes: usize,
}

/// Body of `POST /admin/routes` and `PUT /admin/routes`.
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
    #[serde(default)]
    pub parent_ref: Option<String>,
}

impl RouteRequest {
    fn into_route(self) -> Result<Route, ApiError> {
        if self.domain.trim().is_empty() {
            return Err(ApiError::BadRequest("domain is required".to_string()));
        }
        if self.service.trim().is_empty() {
            return Err(ApiError::BadRequest("service is required".to_string()));
        }
        let mut route = Route::new(self.domain.trim(), self.service.trim()).sticky(self.sticky);
        match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => route = route.with_tls(cert, key),
            (None, None) => {}
            _ => {
                return Err(ApiError::BadRequest(
                    "tls_cert and tls_key must be given together".to_string(),
                ))
            }
        }
        route.parent_ref = self.parent_ref;
        Ok(route)
    }
}

/// Admin API failure.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Router(RouterError),
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        ApiError::Router(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Router(e) => {
                let status = match &e {
                    RouterError::NotFound(_) => StatusCode::NOT_FOUND,
                    RouterError::Conflict(_) => StatusCode::CONFLICT,
                    RouterError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                    RouterError::Tls(_) | RouterError::Discovery(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let table = state.server.table();
    let snapshot = table.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if table.is_closed() { "closed" } else { "operational" },
        uptime_secs: state.started.elapsed().as_secs(),
        routes: snapshot.routes.len(),
        services: snapshot
            .services
            .into_iter()
            .map(|(name, routes)| ServiceStatus { name, routes })
            .collect(),
        http_address: state.server.addr().map(|a| a.to_string()),
        https_address: state.server.tls_addr().map(|a| a.to_string()),
    })
}

pub async fn list_routes(State(state): State<AdminState>) -> Result<Json<Vec<Route>>, ApiError> {
    Ok(Json(state.server.list_routes().await?))
}

pub async fn create_route(
    State(state): State<AdminState>,
    Json(request): Json<RouteRequest>,
) -> Result<(StatusCode, Json<Route>), ApiError> {
    let route = state.server.add_route(request.into_route()?).await?;
    tracing::info!(route_id = %route.id, domain = %route.domain, "Route added via admin API");
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn update_route(
    State(state): State<AdminState>,
    Json(request): Json<RouteRequest>,
) -> Result<Json<Route>, ApiError> {
    let route = state.server.set_route(request.into_route()?).await?;
    tracing::info!(route_id = %route.id, domain = %route.domain, "Route set via admin API");
    Ok(Json(route))
}

pub async fn get_route(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Route>, ApiError> {
    Ok(Json(state.server.get_route(&id).await?))
}

pub async fn delete_route(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.server.remove_route(&id).await?;
    tracing::info!(route_id = %id, "Route removed via admin API");
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent events, one per route table change.
pub async fn stream_events(
    State(state): State<AdminState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.server.watch();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = SseEvent::default()
                        .json_data(&event)
                        .unwrap_or_else(|_| SseEvent::default().data(event.id.clone()));
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Admin event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
