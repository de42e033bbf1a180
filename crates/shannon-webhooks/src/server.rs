//! The webhook HTTP server: route on path, parse, validate, normalize,
//! publish.

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use shannon_config::{WebhookEndpointConfig, WebhooksConfig};
use shannon_core::{Event, EventBus, Result};

use crate::handlers::{
    normalize_generic_event, normalize_github_event, normalize_sentry_event,
    validate_generic_secret, validate_github_signature, validate_sentry_signature,
};

const MAX_BODY_BYTES: usize = 1 << 20;

struct ServerState {
    endpoints: Vec<WebhookEndpointConfig>,
    bus: EventBus,
}

/// Build the router for the configured endpoints. Endpoint paths are
/// config-driven, so requests are matched against the path inside a single
/// fallback handler. Exposed for tests.
pub fn router(config: &WebhooksConfig, bus: EventBus) -> Router {
    for endpoint in &config.endpoints {
        if endpoint.secret.is_empty() {
            warn!(
                endpoint = %endpoint.name,
                path = %endpoint.path,
                "webhook endpoint has no secret configured — all requests will be rejected"
            );
        }
    }
    let state = Arc::new(ServerState {
        endpoints: config.endpoints.clone(),
        bus,
    });
    Router::new().fallback(handle_webhook).with_state(state)
}

fn normalized_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

async fn handle_webhook(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let Some(endpoint) = state
        .endpoints
        .iter()
        .find(|ep| normalized_path(&ep.path) == parts.uri.path())
    else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    if parts.method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "POST only").into_response();
    }

    let Ok(bytes) = axum::body::to_bytes(body, MAX_BODY_BYTES).await else {
        return (StatusCode::BAD_REQUEST, "Unreadable body").into_response();
    };

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
    };

    if !validate(endpoint, &parts.headers, &bytes) {
        return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
    }

    let event = normalize(endpoint, &parts.headers, payload);
    info!(
        source = %event.source,
        event_type = %event.event_type,
        channel = %event.channel_target,
        "webhook received"
    );
    state.bus.publish(Event::WebhookReceived {
        event,
        prompt_template: endpoint.prompt_template.clone(),
    });

    (StatusCode::OK, "OK").into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn validate(endpoint: &WebhookEndpointConfig, headers: &HeaderMap, body: &[u8]) -> bool {
    let name = endpoint.name.to_lowercase();
    if name.contains("github") {
        return validate_github_signature(
            body,
            header(headers, "x-hub-signature-256"),
            &endpoint.secret,
        );
    }
    if name.contains("sentry") {
        return validate_sentry_signature(
            body,
            header(headers, "sentry-hook-signature"),
            &endpoint.secret,
        );
    }
    validate_generic_secret(header(headers, "x-webhook-secret"), &endpoint.secret)
}

fn normalize(
    endpoint: &WebhookEndpointConfig,
    headers: &HeaderMap,
    payload: serde_json::Value,
) -> shannon_core::WebhookEvent {
    let name = endpoint.name.to_lowercase();
    if name.contains("github") {
        let event_type = match header(headers, "x-github-event") {
            "" => "unknown",
            other => other,
        };
        return normalize_github_event(event_type, payload, &endpoint.channel);
    }
    if name.contains("sentry") {
        return normalize_sentry_event(payload, &endpoint.channel);
    }
    normalize_generic_event(payload, &endpoint.channel)
}

/// Owns the bound listener and its serve task.
pub struct WebhookServer {
    config: WebhooksConfig,
    bus: EventBus,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WebhookServer {
    pub fn new(config: WebhooksConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            shutdown: None,
            handle: None,
        }
    }

    /// Bind and start serving in a background task.
    pub async fn start(&mut self) -> Result<()> {
        let app = router(&self.config, self.bus.clone());
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, endpoints = self.config.endpoints.len(), "webhook server started");

        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown = Some(tx);
        self.handle = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                });
            if let Err(e) = serve.await {
                warn!(error = %e, "webhook server exited with error");
            }
        }));
        Ok(())
    }

    /// Signal shutdown and wait for in-flight requests to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("webhook server stopped");
    }
}
