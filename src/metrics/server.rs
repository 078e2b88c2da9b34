//! Metrics and health HTTP server

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::CacheExporter;
use crate::cache::CacheEngine;
use crate::error::{Error, Result};

/// Shared state behind the endpoints
#[derive(Debug)]
pub struct ServerState {
    pub engine: Arc<CacheEngine>,
    pub exporter: CacheExporter,
}

impl ServerState {
    pub fn new(engine: Arc<CacheEngine>) -> Result<Self> {
        Ok(Self {
            engine,
            exporter: CacheExporter::new()?,
        })
    }
}

fn reply(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Route one request path
pub fn respond(state: &ServerState, path: &str) -> Response<Full<Bytes>> {
    match path {
        "/healthz" | "/livez" => reply(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            if state.engine.is_initialized() {
                reply(StatusCode::OK, "text/plain", "ok")
            } else {
                reply(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "cache not initialized")
            }
        }
        "/metrics" => {
            state.exporter.refresh(&state.engine.snapshot());
            match state.exporter.encode() {
                Ok(buffer) => reply(StatusCode::OK, state.exporter.format_type(), buffer),
                Err(e) => {
                    warn!(error = %e, "Failed to encode metrics");
                    reply(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string())
                }
            }
        }
        "/stats" => match serde_json::to_vec(&state.engine.snapshot()) {
            Ok(json) => reply(StatusCode::OK, "application/json", json),
            Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
        },
        _ => reply(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

/// Accept connections on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, state: Arc<ServerState>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = respond(&state, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
