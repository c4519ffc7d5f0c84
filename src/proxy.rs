//! Local Proxy Host
//!
//! Embeds a [`CacheLayer`] in a hyper server. Every request received on the
//! listen address is replayed against the configured origin through the
//! layer. One reserved path carries control commands.
//!
//! ```text
//!  client ──▶ ProxyServer ──▶ CacheLayer::intercept ──▶ origin
//!                 │
//!                 └── POST /__cache/control ──▶ CacheLayer::handle_control
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::control::ControlCommand;
use crate::cache::entry::InterceptedRequest;
use crate::cache::layer::CacheLayer;
use crate::domain::ports::InterceptionLayer;
use crate::error::{Error, Result};

/// Path that accepts control commands
pub const CONTROL_PATH: &str = "/__cache/control";

/// Response header naming where the body came from
pub const SOURCE_HEADER: &str = "x-cache-source";

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Local forward proxy in front of the cache layer
pub struct ProxyServer {
    layer: Arc<CacheLayer>,
}

impl ProxyServer {
    pub fn new(layer: Arc<CacheLayer>) -> Self {
        Self { layer }
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Proxy listening on {} for origin {}", addr, self.layer.config().origin);

        loop {
            let (stream, _) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Proxy shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted.map_err(|e| {
                    Error::Internal(format!("Proxy accept error: {}", e))
                })?,
            };

            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Proxy connection error: {}", e);
                }
            });
        }
    }

    /// Serve one hyper request
    pub async fn handle(&self, req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return plain(StatusCode::BAD_REQUEST, "unreadable request body");
            }
        };
        self.handle_parts(parts.method, &parts.uri, parts.headers, body).await
    }

    /// Serve one request given as its parts
    pub async fn handle_parts(
        &self,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        if uri.path() == CONTROL_PATH && method == Method::POST {
            return self.control(&body).await;
        }

        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let url = match self.layer.config().resolve(path) {
            Ok(url) => url,
            Err(e) => return plain(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        let mut request = InterceptedRequest::new(method, url).with_body(body);
        request.headers = strip_hop_by_hop(headers);
        request.headers.remove(HOST);

        match self.layer.intercept(request).await {
            Ok(served) => {
                let mut response = Response::new(Full::new(served.response.body));
                *response.status_mut() = served.response.status;
                let mut headers = strip_hop_by_hop(served.response.headers);
                headers.remove(CONTENT_LENGTH);
                if let Ok(source) = HeaderValue::from_str(&served.source.to_string()) {
                    headers.insert(HeaderName::from_static(SOURCE_HEADER), source);
                }
                *response.headers_mut() = headers;
                response
            }
            Err(e) if e.is_network() => {
                debug!("Origin unreachable: {}", e);
                plain(StatusCode::BAD_GATEWAY, &e.to_string())
            }
            Err(e) => {
                error!("Intercept failed: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    async fn control(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let message = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => return plain(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)),
        };
        let command = match ControlCommand::parse(message) {
            Ok(Some(command)) => command,
            Ok(None) => return empty(StatusCode::NO_CONTENT),
            Err(e) => return plain(StatusCode::BAD_REQUEST, &e.to_string()),
        };

        match self.layer.handle_control(command).await {
            Ok(reply) => match serde_json::to_vec(&reply) {
                Ok(json) => {
                    let mut response = Response::new(Full::new(Bytes::from(json)));
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    response
                }
                Err(e) => plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            },
            Err(e @ Error::InvalidTransition { .. }) => plain(StatusCode::CONFLICT, &e.to_string()),
            Err(e) => {
                warn!("Control command failed: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    // Headers named by Connection are connection-scoped as well
    let named: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

fn plain(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

// =============================================================================
// Tests
// =============================================================================
