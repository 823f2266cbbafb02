//! Axum router, listener and server handle.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::http_log::{fallback, log_request};
use crate::observer::Observer;
use crate::shutdown::ShutdownCoordinator;
use crate::upgrade::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Immutable server configuration.
    pub config: Arc<ServerConfig>,
    /// Receives session events.
    pub observer: Arc<dyn Observer>,
    /// Tracks live sessions and signals shutdown.
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    /// State with a fresh shutdown coordinator.
    pub fn new(config: ServerConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            config: Arc::new(config),
            observer,
            shutdown: ShutdownCoordinator::new(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let timeout = state.config.request_timeout();
    Router::new()
        .route("/ws", get(ws_handler))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), log_request))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

/// Bind `config.addr` and serve in the background.
pub async fn start(config: ServerConfig, observer: Arc<dyn Observer>) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(&config.addr).await?;
    let local_addr = listener.local_addr()?;
    let shutdown_timeout = config.shutdown_timeout();

    let state = AppState::new(config, observer);
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    let token = shutdown.token();
    let server = tokio::spawn(async move {
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            warn!(error = %e, "server stopped with error");
        }
    });

    info!(addr = %local_addr, "wiretap listening");
    Ok(ServerHandle {
        local_addr,
        shutdown_timeout,
        shutdown,
        server,
    })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
    shutdown: ShutdownCoordinator,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions still running.
    pub fn active_sessions(&self) -> usize {
        self.shutdown.active_tasks()
    }

    /// Stop accepting, send `Close` 1001 to live sessions and wait for them.
    ///
    /// Returns `false` if the shutdown timeout expired first.
    pub async fn shutdown(self) -> bool {
        info!("shutting down");
        let drained = self.shutdown.graceful_shutdown(self.shutdown_timeout).await;
        match tokio::time::timeout(self.shutdown_timeout, self.server).await {
            Ok(Ok(())) => drained,
            Ok(Err(e)) => {
                warn!(error = %e, "server task failed");
                false
            }
            Err(_) => {
                warn!("listener did not stop within {:?}", self.shutdown_timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::observer::TracingObserver;

    fn router_with(config: ServerConfig) -> Router {
        build_router(AppState::new(config, Arc::new(TracingObserver)))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_bad_request() {
        let response = router_with(ServerConfig::default())
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Upgrade"));
    }

    #[tokio::test]
    async fn missing_key_is_bad_request() {
        let request = Request::get("/ws")
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .body(Body::empty())
            .unwrap();
        let response = router_with(ServerConfig::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Sec-WebSocket-Key"));
    }

    #[tokio::test]
    async fn valid_handshake_without_upgrade_support_is_server_error() {
        // oneshot requests carry no hyper upgrade handle
        let request = Request::get("/ws")
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("sec-websocket-version", "13")
            .body(Body::empty())
            .unwrap();
        let response = router_with(ServerConfig::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn root_and_unknown_paths_answer_ok() {
        for uri in ["/", "/anything/else?x=1"] {
            let response = router_with(ServerConfig::default())
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, "ok");
        }
    }

    #[tokio::test]
    async fn posted_body_passes_through_logger() {
        let request = Request::post("/submit")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"hello":"world"}"#))
            .unwrap();
        let response = router_with(ServerConfig::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = ServerConfig {
            max_request_body: 8,
            ..ServerConfig::default()
        };
        let request = Request::post("/")
            .body(Body::from("far more than eight bytes"))
            .unwrap();
        let response = router_with(config).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn server_starts_and_shuts_down() {
        let config = ServerConfig {
            addr: "127.0.0.1:0".into(),
            ..ServerConfig::default()
        };
        let handle = start(config, Arc::new(TracingObserver)).await.unwrap();
        assert!(handle.local_addr().port() > 0);
        assert_eq!(handle.active_sessions(), 0);

        let url = format!("http://{}/health", handle.local_addr());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");

        assert!(handle.shutdown().await);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let config = ServerConfig {
            addr: "not an address".into(),
            ..ServerConfig::default()
        };
        assert!(start(config, Arc::new(TracingObserver)).await.is_err());
    }
}
