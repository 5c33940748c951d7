//! JSON-over-HTTP transport: a single `POST /call` endpoint dispatching
//! through the registry.

use crate::error::ServerError;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use muxrpc_protocol::{CallRequest, CodecKind};
use muxrpc_registry::{DispatchError, Registry};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Binds `addr` and serves `POST /call` until shutdown.
pub async fn run_http_server(
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    serve_http(listener, registry, shutdown).await
}

/// Serves `POST /call` on an existing listener until shutdown.
pub async fn serve_http(
    listener: TcpListener,
    registry: Arc<Registry>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    tracing::info!("http server listening on http://{}/call", listener.local_addr()?);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let registry = registry.clone();
                                async move { handle_request(req, registry).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("http connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("http accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("http server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Routes one HTTP request.
async fn handle_request(
    req: Request<Incoming>,
    registry: Arc<Registry>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != "/call" {
        return Ok(plain(StatusCode::NOT_FOUND, "not found"));
    }
    if req.method() != Method::POST {
        return Ok(plain(StatusCode::METHOD_NOT_ALLOWED, "only POST is accepted"));
    }

    let body = req.into_body().collect().await?.to_bytes();
    let call: CallRequest = match serde_json::from_slice(&body) {
        Ok(call) => call,
        Err(e) => {
            return Ok(plain(
                StatusCode::BAD_REQUEST,
                &format!("invalid request: {}", e),
            ))
        }
    };

    tracing::debug!("http request {}", call.service_method);
    Ok(dispatch_call(&registry, call).await)
}

/// Resolves and invokes one call, racing the invocation against the
/// envelope's handle timeout.
async fn dispatch_call(registry: &Registry, call: CallRequest) -> Response<Full<Bytes>> {
    let entry = match registry.resolve(&call.service_method) {
        Ok((_, entry)) => entry,
        Err(e) => return plain(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    // Untyped args are coerced to the method's declared argument type by a
    // JSON round-trip through the dispatch closure.
    let raw_args = match serde_json::to_vec(&call.args) {
        Ok(bytes) => bytes,
        Err(e) => return plain(StatusCode::BAD_REQUEST, &format!("invalid args: {}", e)),
    };

    let invoke = tokio::task::spawn_blocking(move || entry.call(CodecKind::Json, &raw_args));
    let handle_timeout = Duration::from_secs(call.handle_timeout);

    let joined = if handle_timeout.is_zero() {
        invoke.await
    } else {
        match tokio::time::timeout(handle_timeout, invoke).await {
            Ok(joined) => joined,
            Err(_) => {
                return plain(
                    StatusCode::REQUEST_TIMEOUT,
                    &format!("request handle timeout: expect within {:?}", handle_timeout),
                )
            }
        }
    };

    match joined {
        Ok(Ok(reply)) => {
            let reply: serde_json::Value =
                serde_json::from_slice(&reply).unwrap_or(serde_json::Value::Null);
            let body = json!({ "result": reply }).to_string();
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        Ok(Err(DispatchError::InvalidArgs(e))) => plain(StatusCode::BAD_REQUEST, &e),
        Ok(Err(e)) => plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Err(e) => {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
            plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn plain(status: StatusCode, detail: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(detail.to_string())))
        .unwrap()
}
