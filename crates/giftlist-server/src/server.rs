//! `RealtimeServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use giftlist_auth::IdentityValidator;
use giftlist_core::{EventKind, Topic};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::EventBroadcaster;
use crate::websocket::connection::DisconnectReason;
use crate::websocket::dispatcher::MessageDispatcher;
use crate::websocket::gate::ConnectionGate;
use crate::websocket::lifecycle::Lifecycle;
use crate::websocket::registry::TopicRegistry;
use crate::websocket::session::{self, SessionContext};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    gate: Arc<ConnectionGate>,
    session: SessionContext,
    broadcaster: EventBroadcaster,
    registry: Arc<TopicRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
    max_message_size: usize,
}

/// The realtime server: owns the registry and everything wired to it.
pub struct RealtimeServer {
    config: ServerConfig,
    registry: Arc<TopicRegistry>,
    lifecycle: Lifecycle,
    gate: Arc<ConnectionGate>,
    dispatcher: Arc<MessageDispatcher>,
    broadcaster: EventBroadcaster,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl RealtimeServer {
    /// Create a server. Tokens are checked with `validator`; `/metrics`
    /// renders from `metrics`.
    pub fn new(
        config: ServerConfig,
        validator: Arc<dyn IdentityValidator>,
        metrics: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(TopicRegistry::new(config.limits));
        let lifecycle = Lifecycle::new(Arc::clone(&registry));
        let gate = Arc::new(ConnectionGate::new(
            validator,
            lifecycle.clone(),
            config.send_queue_capacity,
        ));
        Self {
            dispatcher: Arc::new(MessageDispatcher::new(Arc::clone(&registry))),
            broadcaster: EventBroadcaster::new(lifecycle.clone()),
            config,
            registry,
            lifecycle,
            gate,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            gate: Arc::clone(&self.gate),
            session: SessionContext {
                dispatcher: Arc::clone(&self.dispatcher),
                lifecycle: self.lifecycle.clone(),
                config: self.config.session(),
            },
            broadcaster: self.broadcaster.clone(),
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/broadcast", post(broadcast_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "realtime server listening");
        Ok((local_addr, handle))
    }

    /// Close every live connection with "going away", stop accepting new
    /// ones, and wait for `handles` and all sessions to finish.
    pub async fn stop(&self, handles: Vec<JoinHandle<()>>) -> bool {
        let live = self.registry.stop();
        info!(connections = live.len(), "closing live connections");
        for conn in &live {
            let _ = self.lifecycle.release(conn, DisconnectReason::ServerShutdown);
        }
        self.shutdown
            .graceful_shutdown(handles, self.config.shutdown_timeout())
            .await
    }

    /// Handle for publishing events in-process.
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// The subscription registry.
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// GET /ws?token=…
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let ws = ws.max_message_size(state.max_message_size);
    match state.gate.admit(params.token.as_deref()) {
        Ok(admission) => {
            let ctx = state.session.clone();
            let sessions = state.shutdown.sessions().clone();
            ws.on_upgrade(move |socket| {
                sessions.track_future(session::run_ws_session(socket, admission, ctx))
            })
        }
        Err(rejection) => ws.on_upgrade(move |socket| session::reject(socket, rejection)),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.is_open(),
        state.registry.stats(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    topic: Topic,
    event: EventKind,
    #[serde(default)]
    data: Value,
}

/// POST /broadcast
async fn broadcast_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let subject = match state.gate.authenticate(token) {
        Ok(subject) => subject,
        Err(e) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized", "details": e.to_string()})),
            )
                .into_response();
        }
    };

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": "Invalid broadcast request", "details": rejection.body_text()})),
            )
                .into_response();
        }
    };

    let outcome = state
        .broadcaster
        .broadcast(&request.topic, request.event, &request.data);
    info!(
        %subject,
        topic = %request.topic,
        event = %request.event,
        recipients = outcome.recipients,
        "broadcast via http"
    );
    (StatusCode::ACCEPTED, Json(outcome)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use giftlist_auth::AuthError;
    use giftlist_core::SubjectId;
    use tower::ServiceExt;

    fn make_server() -> RealtimeServer {
        let validator = |token: &str| -> Result<SubjectId, AuthError> {
            token
                .strip_prefix("valid-")
                .map(SubjectId::from_raw)
                .ok_or_else(|| AuthError::InvalidToken("bad".into()))
        };
        RealtimeServer::new(
            ServerConfig::default(),
            Arc::new(validator),
            crate::metrics::detached_handle(),
        )
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn broadcast_request(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/broadcast")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["topics"], 0);
        assert_eq!(parsed["subscriptions"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/ws?token=valid-a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert_eq!(server.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn broadcast_requires_token() {
        let server = make_server();
        let body = r#"{"topic":"list:1","event":"ADDED","data":{}}"#;
        for token in [None, Some("forged")] {
            let resp = server
                .router()
                .oneshot(broadcast_request(token, body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn broadcast_rejects_bad_body() {
        let server = make_server();
        for body in [
            r#"{"topic":"nope","event":"ADDED"}"#,
            r#"{"topic":"list:1","event":"EXPLODED"}"#,
            "not json",
        ] {
            let resp = server
                .router()
                .oneshot(broadcast_request(Some("valid-svc"), body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "body: {body}");
            assert!(body_json(resp).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_is_accepted() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(broadcast_request(
                Some("valid-svc"),
                r#"{"topic":"list:1","event":"UPDATED","data":{"name":"x"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await, json!({"recipients": 0, "failed": 0}));
    }

    #[tokio::test]
    async fn stop_closes_registry() {
        let server = make_server();
        assert!(server.stop(Vec::new()).await);
        assert!(!server.registry().is_open());
        assert!(server.shutdown().is_shutting_down());
    }
}
