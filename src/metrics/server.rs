//! HTTP endpoint exposing the registry in the Prometheus text format.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ExporterError;

/// Serves `/metrics` and `/healthz` until cancelled.
pub struct MetricsServer {
    listener: TcpListener,
    registry: Registry,
}

impl MetricsServer {
    pub async fn bind(address: SocketAddr, registry: Registry) -> Result<Self, ExporterError> {
        let listener = TcpListener::bind(address).await?;
        Ok(MetricsServer { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ExporterError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel` fires. Connections already
    /// accepted finish on their own.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), ExporterError> {
        info!(address = %self.local_addr()?, "serving metrics");
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("metrics server stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept metrics connection");
                        continue;
                    }
                },
            };

            let registry = self.registry.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let registry = registry.clone();
                    async move { Ok::<_, Infallible>(handle(&registry, req)) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(peer = %peer, error = %e, "metrics connection failed");
                }
            });
        }
    }
}

/// Encodes every metric family of `registry` in the text exposition format.
pub fn render(registry: &Registry) -> Result<Vec<u8>, ExporterError> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

fn handle(registry: &Registry, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match render(registry) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                response
            }
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n")
            }
        },
        (&Method::GET, "/healthz") => plain(StatusCode::OK, "ok\n"),
        _ => plain(StatusCode::NOT_FOUND, "not found\n"),
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
