//! The network seam: one buffered HTTP exchange per call.
//!
//! [`Client`](crate::Client) only ever talks to a [`Transport`]. The default
//! [`HyperTransport`] is a pooled `hyper_util` client (rustls for `https://`
//! when the `tls-rustls` feature is on); tests and embedders can plug their
//! own implementation through
//! [`ClientBuilder::transport`](crate::ClientBuilder::transport).

use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::error::TransportErrorKind;
#[cfg(feature = "tls-rustls")]
use crate::error::Error;
use crate::util::classify_transport_error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failure of a single exchange, before the client attaches method and URL.
#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("request failed ({kind}): {source}")]
    Send {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("response body exceeds {limit_bytes} bytes")]
    BodyTooLarge { limit_bytes: usize },
}

impl TransportFailure {
    pub fn send(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Send {
            kind,
            source: source.into(),
        }
    }

    pub fn read_body(source: impl Into<BoxError>) -> Self {
        Self::ReadBody {
            source: source.into(),
        }
    }
}

pub trait Transport: Send + Sync + 'static {
    /// Performs exactly one exchange and returns the fully read response.
    fn send(
        &self,
        request: Request<Bytes>,
    ) -> BoxFuture<'_, Result<Response<Bytes>, TransportFailure>>;
}

#[cfg(feature = "tls-rustls")]
type Connector = hyper_rustls::HttpsConnector<HttpConnector>;
#[cfg(not(feature = "tls-rustls"))]
type Connector = HttpConnector;

#[derive(Clone)]
pub struct HyperTransport {
    client: Client<Connector, Full<Bytes>>,
    max_response_body_bytes: usize,
}

impl HyperTransport {
    pub fn new(pool_idle_timeout: Duration, max_response_body_bytes: usize) -> crate::Result<Self> {
        let connector = build_connector(HttpConnector::new())?;
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(pool_idle_timeout)
            .build(connector);
        Ok(Self {
            client,
            max_response_body_bytes,
        })
    }

    pub fn max_response_body_bytes(&self) -> usize {
        self.max_response_body_bytes
    }
}

#[cfg(feature = "tls-rustls")]
fn build_connector(mut http: HttpConnector) -> crate::Result<Connector> {
    use hyper_rustls::HttpsConnectorBuilder;

    http.enforce_http(false);
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config =
        rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|source| Error::TlsBackendInit {
                message: source.to_string(),
            })?
            .with_root_certificates(root_store)
            .with_no_client_auth();

    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http))
}

#[cfg(not(feature = "tls-rustls"))]
fn build_connector(http: HttpConnector) -> crate::Result<Connector> {
    Ok(http)
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: Request<Bytes>,
    ) -> BoxFuture<'_, Result<Response<Bytes>, TransportFailure>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request.map(Full::new))
                .await
                .map_err(|source| TransportFailure::Send {
                    kind: classify_transport_error(&source),
                    source: Box::new(source),
                })?;
            let (parts, body) = response.into_parts();
            let body = read_all_body_limited(body, self.max_response_body_bytes).await?;
            Ok(Response::from_parts(parts, body))
        })
    }
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, TransportFailure> {
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(TransportFailure::read_body)?;
        if let Some(data) = frame.data_ref() {
            if collected.len().saturating_add(data.len()) > max_bytes {
                return Err(TransportFailure::BodyTooLarge {
                    limit_bytes: max_bytes,
                });
            }
            collected.extend_from_slice(data);
        }
    }
    Ok(Bytes::from(collected))
}
