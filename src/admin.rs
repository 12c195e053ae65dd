//! Administrative HTTP surface.
//!
//! ```text
//! GET  /health      store connectivity
//! GET  /metrics     pipeline counters, stored / indexed event counts
//! GET  /notifiers   registered notifiers
//! POST /notifiers   register a notifier
//! POST /preview     render a template against a sample payload
//! ```
//!
//! When an API key is configured, POST routes require
//! `Authorization: Bearer <key>`.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelDispatcher, ChannelKind};
use crate::event::Payload;
use crate::notifier::{Notifier, NotifierRegistry};
use crate::pipeline::Metrics;
use crate::rules::Rule;
use crate::search::SearchIndex;
use crate::store::EventStore;
use crate::template::{RenderError, Template};

const CORRELATION_HEADER: &str = "X-Correlation-ID";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid rules: {0}")]
    InvalidRules(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] RenderError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::InvalidRules(_) | AdminError::InvalidTemplate(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub struct AdminState {
    pub registry: Arc<NotifierRegistry>,
    pub dispatcher: Arc<ChannelDispatcher>,
    pub store: Arc<dyn EventStore>,
    pub search: Option<(Arc<dyn SearchIndex>, String)>,
    pub metrics: Arc<Metrics>,
    pub api_key: Option<String>,
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/notifiers", get(list_notifiers).post(create_notifier))
        .route("/preview", post(preview_template))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<AdminState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    // Read-only routes stay open
    if req.method() == Method::GET {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok());

    match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API Key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<Arc<AdminState>>) -> (StatusCode, Json<Value>) {
    match state.store.count().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "store": "connected" })),
        ),
        Err(e) => {
            error!(error = %e, "Event store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "store": e.to_string() })),
            )
        }
    }
}

fn format_uptime(uptime: u64) -> String {
    if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    }
}

async fn get_metrics(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let snapshot = state.metrics.snapshot();

    let stored = match state.store.count().await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(error = %e, "Failed to count stored events");
            None
        }
    };

    let indexed = match &state.search {
        Some((index, name)) => match index.count(name).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(index = %name, error = %e, "Failed to count indexed events");
                None
            }
        },
        None => None,
    };

    let channels: Vec<&str> = state
        .dispatcher
        .kinds()
        .into_iter()
        .map(ChannelKind::as_str)
        .collect();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": snapshot.uptime_seconds,
        "uptime": format_uptime(snapshot.uptime_seconds),
        "events": {
            "received": snapshot.received,
            "decode_failures": snapshot.decode_failures,
            "persistence_failures": snapshot.persistence_failures,
            "dropped": snapshot.datagrams_dropped,
            "stored": stored,
            "indexed": indexed,
        },
        "notifications": {
            "matched": snapshot.notifiers_matched,
            "dispatched": snapshot.dispatched,
            "failed": snapshot.dispatch_failures,
            "render_failed": snapshot.render_failures,
        },
        "notifiers": state.registry.len(),
        "channels": channels,
        "status": "running"
    }))
}

async fn list_notifiers(State(state): State<Arc<AdminState>>) -> Json<Vec<Notifier>> {
    Json(state.registry.snapshot().as_ref().clone())
}

/// Body of `POST /notifiers`.
#[derive(Debug, Deserialize)]
struct NewNotifier {
    class: String,

    #[serde(alias = "channel")]
    notification_type: String,

    template: String,

    /// Array of rules, or the same array JSON-encoded as a string
    #[serde(default)]
    rules: Value,
}

fn parse_rules(raw: Value) -> Result<Vec<Rule>, AdminError> {
    let parsed = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
        Value::String(s) => serde_json::from_str(&s),
        array @ Value::Array(_) => serde_json::from_value(array),
        _ => {
            return Err(AdminError::InvalidRules(
                "expected an array or a JSON-encoded array".into(),
            ))
        }
    };

    parsed.map_err(|e| AdminError::InvalidRules(e.to_string()))
}

async fn create_notifier(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(body): Json<NewNotifier>,
) -> Result<(StatusCode, HeaderMap, Json<Notifier>), AdminError> {
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    debug!(correlation_id = %correlation_id, class = %body.class, "Registering notifier");

    if body.class.trim().is_empty() {
        return Err(AdminError::InvalidRequest("class must not be empty".into()));
    }

    Template::parse(&body.template)?;
    let rules = parse_rules(body.rules)?;

    let kind = ChannelKind::from(body.notification_type.as_str());
    if !state.dispatcher.is_registered(&kind) {
        warn!(
            correlation_id = %correlation_id,
            channel = %kind,
            "Registering notifier for a channel that is not configured"
        );
    }

    let notifier = state
        .registry
        .insert(Notifier::new(body.class, kind, body.template).with_rules(rules));

    info!(
        correlation_id = %correlation_id,
        notifier_id = notifier.id(),
        "Notifier created via admin API"
    );

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response_headers.insert(CORRELATION_HEADER, value);
    }

    Ok((StatusCode::CREATED, response_headers, Json(notifier)))
}

/// Body of `POST /preview`.
#[derive(Debug, Deserialize)]
struct PreviewRequest {
    template: String,
    #[serde(default)]
    payload: Payload,
}

async fn preview_template(Json(body): Json<PreviewRequest>) -> Result<Json<Value>, AdminError> {
    let rendered = Template::parse(&body.template)?.render(&body.payload)?;
    Ok(Json(json!({ "rendered": rendered })))
}
