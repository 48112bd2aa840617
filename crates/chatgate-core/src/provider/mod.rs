//! Provider integrations.
//!
//! Each provider bundles three concerns behind the [`ChatProvider`] trait:
//!
//! - **normalize** -- merge the client's global parameters, the new message,
//!   the optional tip, and the history into the provider's native payload;
//! - **sign** -- authenticate the serialized payload (see [`crate::signer`]);
//! - **decode** -- turn full responses, error bodies, and stream frames back
//!   into canonical values.
//!
//! [`select`] is the dispatch table from a configuration tag to a provider.
//! Adding a provider means adding a module and a match arm there.
//!
//! - [`qwen`] -- Alibaba DashScope text generation, bearer token.
//! - [`hunyuan`] -- Tencent Cloud HunYuan, TC3-HMAC-SHA256 signature.

pub mod hunyuan;
pub mod qwen;

use std::fmt;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::config::{ClientConfig, Credentials, ProviderKind};
use crate::error::{GatewayError, Result};
use crate::signer::Signer;
use crate::transport::OutboundRequest;
use crate::types::{ChatMessage, ChatReply, ChatRequest};

pub use hunyuan::{HunYuanChat, HunYuanParameters, HunYuanResponse};
pub use qwen::{QwenChat, QwenParameters, QwenResponse};

// ---------------------------------------------------------------------------
// Global parameters
// ---------------------------------------------------------------------------

/// Provider-native defaults set once on a client and cloned into every call.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalParameters {
    Qwen(QwenParameters),
    HunYuan(HunYuanParameters),
}

impl GlobalParameters {
    /// Parameters with nothing set, for the given provider.
    pub fn empty(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Qwen => GlobalParameters::Qwen(QwenParameters::default()),
            ProviderKind::HunYuan => GlobalParameters::HunYuan(HunYuanParameters::default()),
        }
    }

    /// Interpret an arbitrary JSON document as the given provider's native
    /// parameters.
    pub fn from_value(kind: ProviderKind, value: Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| {
            GatewayError::validation(format!("invalid {kind} global parameters: {e}"))
        };
        Ok(match kind {
            ProviderKind::Qwen => {
                GlobalParameters::Qwen(serde_json::from_value(value).map_err(invalid)?)
            }
            ProviderKind::HunYuan => {
                GlobalParameters::HunYuan(serde_json::from_value(value).map_err(invalid)?)
            }
        })
    }

    /// Which provider these parameters belong to.
    pub fn kind(&self) -> ProviderKind {
        match self {
            GlobalParameters::Qwen(_) => ProviderKind::Qwen,
            GlobalParameters::HunYuan(_) => ProviderKind::HunYuan,
        }
    }

    fn mismatch(&self, expected: ProviderKind) -> GatewayError {
        GatewayError::validation(format!(
            "global parameters are for {}, client uses {expected}",
            self.kind()
        ))
    }
}

// ---------------------------------------------------------------------------
// Raw envelopes and frames
// ---------------------------------------------------------------------------

/// The provider's full non-streaming response, returned next to the
/// canonical answer.
#[derive(Debug, Clone)]
pub enum ProviderEnvelope {
    Qwen(QwenResponse),
    HunYuan(HunYuanResponse),
}

impl ProviderEnvelope {
    /// The provider-assigned request id, when present.
    pub fn request_id(&self) -> &str {
        match self {
            ProviderEnvelope::Qwen(r) => &r.request_id,
            ProviderEnvelope::HunYuan(r) => &r.response.request_id,
        }
    }
}

/// What a single well-formed stream frame carried.
#[derive(Debug)]
pub enum FrameEvent {
    /// Zero or more message deltas, in frame order.
    Deltas(Vec<ChatMessage>),
    /// An embedded provider error; the stream must stop.
    Error(GatewayError),
}

// ---------------------------------------------------------------------------
// Provider interface
// ---------------------------------------------------------------------------

/// A normalized, not yet signed request.
#[derive(Debug)]
pub struct Normalized {
    /// The model the payload targets.
    pub model: String,
    /// Exact payload bytes; these are what gets signed and sent.
    pub body: Vec<u8>,
    /// Non-authentication headers.
    pub headers: HeaderMap,
}

/// One provider's {normalize, sign, decode} bundle.
pub trait ChatProvider: Send + Sync + fmt::Debug {
    /// The provider this implementation targets.
    fn kind(&self) -> ProviderKind;

    /// URL the request is POSTed to.
    fn endpoint(&self) -> &str;

    /// Authentication scheme for this provider.
    fn signer(&self) -> &Signer;

    /// Build the provider payload for `request` from a snapshot of the
    /// client's global parameters.
    fn normalize(&self, request: &ChatRequest, global: &GlobalParameters) -> Result<Normalized>;

    /// Decode a successful non-streaming body.
    fn decode_response(&self, body: &[u8]) -> Result<ChatReply>;

    /// Decode a non-success response into an error.
    fn decode_error(&self, status: u16, body: &[u8]) -> GatewayError;

    /// Decode the JSON after a `data:` marker.
    fn decode_frame(&self, data: &str) -> std::result::Result<FrameEvent, serde_json::Error>;

    /// Validate, normalize, serialize and sign `request`.
    fn prepare(
        &self,
        request: &ChatRequest,
        global: &GlobalParameters,
        timestamp: i64,
    ) -> Result<OutboundRequest> {
        request.validate()?;
        let Normalized {
            model,
            body,
            mut headers,
        } = self.normalize(request, global)?;
        self.signer().apply(&mut headers, &body, timestamp)?;

        Ok(OutboundRequest {
            url: self.endpoint().to_owned(),
            headers,
            body,
            stream: request.stream,
            model,
        })
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Choose and construct the provider named by `config.provider`.
///
/// Fails with [`GatewayError::Configuration`] for an unknown tag or when the
/// provider's credentials are missing.
pub fn select(config: &ClientConfig) -> Result<Arc<dyn ChatProvider>> {
    let kind: ProviderKind = config.provider.parse()?;

    let provider: Arc<dyn ChatProvider> = match (kind, &config.credentials) {
        (ProviderKind::Qwen, Credentials::Token(token)) if !token.is_empty() => {
            Arc::new(QwenChat::new(token.clone(), config.base_url.clone()))
        }
        (ProviderKind::Qwen, _) => {
            return Err(GatewayError::configuration(
                "provider qwen requires a bearer token",
            ));
        }
        (
            ProviderKind::HunYuan,
            Credentials::Secret {
                secret_id,
                secret_key,
            },
        ) if !secret_id.is_empty() && !secret_key.is_empty() => Arc::new(HunYuanChat::new(
            secret_id.clone(),
            secret_key.clone(),
            config.base_url.clone(),
            config.region.clone(),
        )),
        (ProviderKind::HunYuan, _) => {
            return Err(GatewayError::configuration(
                "provider hunyuan requires secret_id and secret_key",
            ));
        }
    };

    tracing::debug!(provider = %kind, endpoint = provider.endpoint(), "provider selected");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_known_providers() {
        let qwen = select(&ClientConfig::with_token("tok", ProviderKind::Qwen)).unwrap();
        assert_eq!(qwen.kind(), ProviderKind::Qwen);

        let hunyuan =
            select(&ClientConfig::with_secret("id", "key", ProviderKind::HunYuan)).unwrap();
        assert_eq!(hunyuan.kind(), ProviderKind::HunYuan);
        assert_eq!(hunyuan.endpoint(), hunyuan::HUNYUAN_BASE_URL);
    }

    #[test]
    fn select_rejects_unknown_tag() {
        let mut config = ClientConfig::with_token("tok", ProviderKind::Qwen);
        config.provider = "wenxin".into();
        assert!(select(&config).unwrap_err().is_configuration());
    }

    #[test]
    fn select_rejects_missing_credentials() {
        let cases = [
            ClientConfig::with_secret("", "key", ProviderKind::HunYuan),
            ClientConfig::with_secret("id", "", ProviderKind::HunYuan),
            ClientConfig::with_token("tok", ProviderKind::HunYuan),
            ClientConfig::with_token("", ProviderKind::Qwen),
            ClientConfig::with_secret("id", "key", ProviderKind::Qwen),
        ];
        for config in cases {
            let err = select(&config).unwrap_err();
            assert!(err.is_configuration(), "{config:?} gave {err}");
        }
    }

    #[test]
    fn base_url_override_is_used() {
        let config =
            ClientConfig::with_token("tok", ProviderKind::Qwen).base_url("http://127.0.0.1:9/gen");
        assert_eq!(select(&config).unwrap().endpoint(), "http://127.0.0.1:9/gen");
    }

    #[test]
    fn global_parameters_from_value() {
        let params = GlobalParameters::from_value(
            ProviderKind::HunYuan,
            serde_json::json!({"Model": "hunyuan-lite", "TopP": 0.5}),
        )
        .unwrap();
        match params {
            GlobalParameters::HunYuan(p) => {
                assert_eq!(p.model, "hunyuan-lite");
                assert_eq!(p.top_p, Some(0.5));
            }
            other => panic!("unexpected parameters: {other:?}"),
        }

        let err = GlobalParameters::from_value(ProviderKind::Qwen, serde_json::json!([1, 2]))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn prepare_rejects_empty_message() {
        let provider = select(&ClientConfig::with_token("tok", ProviderKind::Qwen)).unwrap();
        let err = provider
            .prepare(
                &ChatRequest::new(""),
                &GlobalParameters::empty(ProviderKind::Qwen),
                0,
            )
            .unwrap_err();
        assert!(err.is_validation());
    }
}
