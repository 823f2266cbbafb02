//! `GET /ws`: validate the handshake, answer 101 and hand the detached
//! connection to a [`ConnectionSession`].

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};
use wiretap_protocol::{HandshakeRequest, negotiate};

use crate::errors::UpgradeError;
use crate::observer::ConnectionInfo;
use crate::server::AppState;
use crate::session::ConnectionSession;

/// Upgrade handler.
///
/// Validation failures answer 400 and a transport without upgrade support
/// answers 500; in both cases no session is created.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    mut request: Request,
) -> Result<Response, UpgradeError> {
    let handshake_request = HandshakeRequest::from_headers(request.headers());
    let selected = if state.config.session.select_subprotocol {
        handshake_request.requested_subprotocols.first().cloned()
    } else {
        None
    };
    let handshake = negotiate(&handshake_request)?.with_subprotocol(selected.clone());

    let on_upgrade = request
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(UpgradeError::HijackUnsupported)?;
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let info = ConnectionInfo::new(
        peer,
        request.headers(),
        query,
        &handshake_request,
        selected,
    );
    debug!(conn = %info.id, accept = %handshake.accept(), "handshake accepted");

    let session_config = state.config.session.clone();
    let observer = state.observer.clone();
    let token = state.shutdown.token();
    let _ = state.shutdown.spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let session =
                    ConnectionSession::new(TokioIo::new(upgraded), &session_config, observer)
                        .with_shutdown(token);
                let _ = session.run(info).await;
            }
            Err(e) => warn!(conn = %info.id, error = %e, "connection upgrade failed"),
        }
    });

    Ok(switching_protocols(handshake.headers()))
}

fn switching_protocols(headers: Vec<(&'static str, String)>) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    for (name, value) in headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::try_from(value),
        ) else {
            warn!(header = name, "dropping unencodable handshake header");
            continue;
        };
        let _ = response.headers_mut().insert(name, value);
    }
    response
}
