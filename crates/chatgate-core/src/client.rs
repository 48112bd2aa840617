//! The gateway's call surface.
//!
//! A [`ChatClient`] is bound to one provider at construction.  Every call
//! takes a snapshot of the client's global parameters, so concurrent calls
//! never see each other's payloads and a later
//! [`set_global_parameters`](ChatClient::set_global_parameters) only affects
//! calls that start after it.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ClientConfig, ProviderKind};
use crate::error::{GatewayError, Result};
use crate::provider::{self, ChatProvider, GlobalParameters};
use crate::stream::ChatStream;
use crate::transport::{HttpTransport, InboundResponse, OutboundRequest, Transport};
use crate::types::{ChatReply, ChatRequest};

/// Provider-agnostic chat client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    provider: Arc<dyn ChatProvider>,
    transport: Arc<dyn Transport>,
    global: Arc<RwLock<GlobalParameters>>,
}

impl ChatClient {
    /// Select the provider named in `config` and build an HTTP transport.
    ///
    /// Unknown providers, missing credentials and invalid proxy URLs are
    /// reported here, before any request exists.
    pub fn new(config: ClientConfig) -> Result<Self> {
        // Provider first: credential errors win over transport errors.
        provider::select(&config)?;
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Like [`new`](ChatClient::new) but with a caller-supplied transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let provider = provider::select(&config)?;
        let kind = provider.kind();

        let global = match config.global {
            Some(value) => GlobalParameters::from_value(kind, value)
                .map_err(|e| GatewayError::configuration(e.to_string()))?,
            None => GlobalParameters::empty(kind),
        };

        tracing::info!(provider = %kind, endpoint = provider.endpoint(), "chat client ready");

        Ok(Self {
            provider,
            transport,
            global: Arc::new(RwLock::new(global)),
        })
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Replace the global parameters used by subsequent calls.
    ///
    /// Parameters built for a different provider are rejected.
    pub fn set_global_parameters(&self, params: GlobalParameters) -> Result<&Self> {
        let kind = self.provider.kind();
        if params.kind() != kind {
            return Err(GatewayError::validation(format!(
                "global parameters are for {}, client uses {kind}",
                params.kind()
            )));
        }

        let mut global = self
            .global
            .write()
            .map_err(|_| GatewayError::Internal("global parameters lock poisoned".into()))?;
        *global = params;
        tracing::debug!(provider = %kind, "global parameters replaced");
        Ok(self)
    }

    /// [`set_global_parameters`](ChatClient::set_global_parameters) from a
    /// provider-native JSON document.
    pub fn set_global_parameters_json(&self, value: Value) -> Result<&Self> {
        let params = GlobalParameters::from_value(self.provider.kind(), value)?;
        self.set_global_parameters(params)
    }

    /// A copy of the current global parameters.
    pub fn global_parameters(&self) -> Result<GlobalParameters> {
        self.global
            .read()
            .map(|g| g.clone())
            .map_err(|_| GatewayError::Internal("global parameters lock poisoned".into()))
    }

    // -- Calls ---------------------------------------------------------------

    /// One request, one complete answer.
    pub async fn normal_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let call_id = Uuid::now_v7();
        let outbound = self.prepare(request)?;
        tracing::debug!(%call_id, provider = %self.provider.kind(), model = %outbound.model, "normal chat");

        let resp = self.transport.send(outbound).await?;
        let resp = self.check_status(resp, call_id).await?;
        let body = resp.into_bytes().await?;

        let reply = self.provider.decode_response(&body)?;
        tracing::debug!(%call_id, request_id = reply.raw.request_id(), "normal chat complete");
        Ok(reply)
    }

    /// One request, a stream of increments.
    ///
    /// The caller's request is not modified; streaming is forced on a copy.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream> {
        self.stream_chat_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// [`stream_chat`](ChatClient::stream_chat) with a caller-owned token.
    ///
    /// Cancelling `cancel` aborts a pending request or stops the stream
    /// worker and releases the response body.
    pub async fn stream_chat_with_cancellation(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream> {
        let call_id = Uuid::now_v7();
        let mut request = request.clone();
        request.stream = true;

        let outbound = self.prepare(&request)?;
        tracing::debug!(%call_id, provider = %self.provider.kind(), model = %outbound.model, "stream chat");

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GatewayError::Transport {
                    reason: "request cancelled before a response arrived".into(),
                });
            }
            resp = self.transport.send(outbound) => resp?,
        };
        let resp = self.check_status(resp, call_id).await?;

        Ok(ChatStream::spawn(self.provider.clone(), resp.body, cancel))
    }

    // -- Internals -----------------------------------------------------------

    fn prepare(&self, request: &ChatRequest) -> Result<OutboundRequest> {
        let global = self.global_parameters()?;
        self.provider
            .prepare(request, &global, chrono::Utc::now().timestamp())
    }

    async fn check_status(&self, resp: InboundResponse, call_id: Uuid) -> Result<InboundResponse> {
        if resp.is_success() {
            return Ok(resp);
        }
        let status = resp.status;
        let body = resp.into_bytes().await.unwrap_or_default();
        let err = self.provider.decode_error(status, &body);
        tracing::warn!(%call_id, status, error = %err, "provider returned non-success status");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::provider::{HunYuanParameters, QwenParameters};

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn send(&self, _request: OutboundRequest) -> Result<InboundResponse> {
            Err(GatewayError::Transport {
                reason: "connection refused".into(),
            })
        }
    }

    fn client(config: ClientConfig) -> Result<ChatClient> {
        ChatClient::with_transport(config, Arc::new(Unreachable))
    }

    #[test]
    fn construction_fails_without_credentials() {
        let err = client(ClientConfig::with_secret("id", "", ProviderKind::HunYuan)).unwrap_err();
        assert!(err.is_configuration());

        let err = ChatClient::new(ClientConfig::with_token("", ProviderKind::Qwen)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn config_global_is_loaded() {
        let mut config = ClientConfig::with_secret("id", "key", ProviderKind::HunYuan);
        config.global = Some(serde_json::json!({"Model": "hunyuan-lite"}));
        let c = client(config).unwrap();
        match c.global_parameters().unwrap() {
            GlobalParameters::HunYuan(p) => assert_eq!(p.model, "hunyuan-lite"),
            other => panic!("unexpected parameters: {other:?}"),
        }

        let mut config = ClientConfig::with_token("tok", ProviderKind::Qwen);
        config.global = Some(serde_json::json!("not an object"));
        assert!(client(config).unwrap_err().is_configuration());
    }

    #[test]
    fn set_global_parameters_checks_provider() {
        let c = client(ClientConfig::with_token("tok", ProviderKind::Qwen)).unwrap();
        let err = c
            .set_global_parameters(GlobalParameters::HunYuan(HunYuanParameters::default()))
            .unwrap_err();
        assert!(err.is_validation());

        let params = QwenParameters {
            model: "qwen-max".into(),
            ..Default::default()
        };
        c.set_global_parameters(GlobalParameters::Qwen(params.clone()))
            .unwrap()
            .set_global_parameters_json(serde_json::json!({"model": "qwen-plus"}))
            .unwrap();
        match c.global_parameters().unwrap() {
            GlobalParameters::Qwen(p) => assert_eq!(p.model, "qwen-plus"),
            other => panic!("unexpected parameters: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let c = client(ClientConfig::with_token("tok", ProviderKind::Qwen)).unwrap();
        let err = c.normal_chat(&ChatRequest::new("hi")).await.unwrap_err();
        assert!(err.is_transport());
        let err = c.stream_chat(&ChatRequest::new("hi")).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_send() {
        let c = client(ClientConfig::with_token("tok", ProviderKind::Qwen)).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = c
            .stream_chat_with_cancellation(&ChatRequest::new("hi"), token)
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
