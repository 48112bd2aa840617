//! HTTP transport.
//!
//! The [`Transport`] trait is the seam between request preparation and the
//! network.  [`HttpTransport`] is the production implementation on top of
//! `reqwest`; tests substitute an in-memory transport that records what was
//! sent and replays canned bodies.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::header::HeaderMap;

use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};

/// Response body as a sequence of raw chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A fully prepared, signed request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: HeaderMap,
    /// Exact signed payload bytes.
    pub body: Vec<u8>,
    /// Whether the caller expects an event stream back.
    pub stream: bool,
    /// Model the payload targets; carried for logging.
    pub model: String,
}

/// Status plus a body that has not been read yet.
pub struct InboundResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl fmt::Debug for InboundResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl InboundResponse {
    /// A response whose body is a single chunk.
    pub fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::from_chunks(status, vec![Ok(body.into())])
    }

    /// A response whose body arrives as the given chunks, in order.
    pub fn from_chunks(status: u16, chunks: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            status,
            body: Box::pin(stream::iter(chunks)),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body into memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        self.body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Sends one prepared request and hands back the unread response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse>;
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// Production transport: one pooled `reqwest::Client` per gateway client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a client honoring the configured proxy and timeout.
    ///
    /// The total-request timeout is applied per call and only to
    /// non-streaming requests; a stream may legitimately run longer.  The
    /// connect timeout always applies.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut builder = reqwest::Client::builder().connect_timeout(timeout);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                GatewayError::configuration(format!("invalid proxy url {proxy:?}: {e}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(|e| {
            GatewayError::configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse> {
        tracing::debug!(
            url = %request.url,
            model = %request.model,
            stream = request.stream,
            bytes = request.body.len(),
            "sending chat request"
        );

        let mut builder = self
            .http
            .post(&request.url)
            .headers(request.headers)
            .body(request.body);
        if !request.stream {
            builder = builder.timeout(self.timeout);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        tracing::debug!(status, "provider responded");

        let body = resp
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| GatewayError::Transport {
                        reason: format!("stream read error: {e}"),
                    })
            })
            .boxed();

        Ok(InboundResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[tokio::test]
    async fn into_bytes_concatenates_chunks() {
        let resp = InboundResponse::from_chunks(
            200,
            vec![Ok(b"he".to_vec()), Ok(b"llo".to_vec())],
        );
        assert!(resp.is_success());
        assert_eq!(resp.into_bytes().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn into_bytes_surfaces_read_error() {
        let resp = InboundResponse::from_chunks(
            200,
            vec![
                Ok(b"he".to_vec()),
                Err(GatewayError::Transport {
                    reason: "reset".into(),
                }),
            ],
        );
        assert!(resp.into_bytes().await.unwrap_err().is_transport());
    }

    #[test]
    fn status_classification() {
        assert!(InboundResponse::from_bytes(204, Vec::new()).is_success());
        assert!(!InboundResponse::from_bytes(401, Vec::new()).is_success());
        assert!(!InboundResponse::from_bytes(500, Vec::new()).is_success());
    }

    #[test]
    fn invalid_proxy_is_configuration_error() {
        let config = ClientConfig::with_token_and_proxy("tok", ProviderKind::Qwen, "::not a url::");
        assert!(HttpTransport::new(&config).unwrap_err().is_configuration());
    }

    #[test]
    fn valid_proxy_is_accepted() {
        let config =
            ClientConfig::with_token_and_proxy("tok", ProviderKind::Qwen, "http://127.0.0.1:3128");
        assert!(HttpTransport::new(&config).is_ok());
    }
}
