//! Tencent Cloud HunYuan `ChatCompletions` API (API 3.0 style).
//!
//! Every request goes to a single host and is authenticated with a
//! TC3-HMAC-SHA256 signature over the exact payload bytes.  The API version
//! and language travel as `X-TC-Version` / `X-TC-Language` headers and are
//! kept out of the JSON body: the service recomputes the payload hash and a
//! stray field would break the signature.
//!
//! Field names on the wire are PascalCase.  Errors are reported inside a
//! `Response.Error` object, usually with HTTP 200.

use reqwest::header::{CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::provider::{ChatProvider, FrameEvent, GlobalParameters, Normalized, ProviderEnvelope};
use crate::signer::{Signer, Tc3Signer};
use crate::types::{ChatMessage, ChatReply, ChatRequest, ChatResponse, Role};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const HUNYUAN_PRO: &str = "hunyuan-pro";
pub const HUNYUAN_STANDARD: &str = "hunyuan-standard";
pub const HUNYUAN_LITE: &str = "hunyuan-lite";
pub const HUNYUAN_ROLE: &str = "hunyuan-role";
pub const HUNYUAN_FUNCTIONCALL: &str = "hunyuan-functioncall";
pub const HUNYUAN_CODE: &str = "hunyuan-code";

/// Model used when the request does not name one.
pub const DEFAULT_MODEL: &str = HUNYUAN_PRO;

pub const HUNYUAN_BASE_URL: &str = "https://hunyuan.tencentcloudapi.com";
pub const HUNYUAN_HOST: &str = "hunyuan.tencentcloudapi.com";
pub const HUNYUAN_SERVICE: &str = "hunyuan";
pub const HUNYUAN_ACTION: &str = "ChatCompletions";

/// API version sent as `X-TC-Version` when none is configured.
pub const DEFAULT_VERSION: &str = "2023-09-01";

/// Locale sent as `X-TC-Language` when none is configured.
pub const DEFAULT_LANGUAGE: &str = "zh-CN";

pub const REGION_GUANGZHOU: &str = "ap-guangzhou";
pub const REGION_BEIJING: &str = "ap-beijing";
pub const REGION_SHANGHAI: &str = "ap-shanghai";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A `{Role, Content}` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl From<&ChatMessage> for HunYuanMessage {
    fn from(m: &ChatMessage) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

impl From<HunYuanMessage> for ChatMessage {
    fn from(m: HunYuanMessage) -> Self {
        Self {
            role: m.role,
            content: m.content,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Request payload; also the shape of HunYuan global parameters.
///
/// `version` and `language` are read from global parameters but never
/// serialized into the payload; they become headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanParameters {
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing)]
    pub version: String,

    #[serde(default)]
    pub messages: Vec<HunYuanMessage>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub stream_moderation: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub citation: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_speed_search: bool,

    #[serde(default, skip_serializing)]
    pub language: String,
}

/// Non-streaming response: everything sits under `Response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanResponse {
    #[serde(default)]
    pub response: HunYuanResponseBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanResponseBody {
    #[serde(default)]
    pub error: Option<HunYuanError>,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub usage: Option<HunYuanUsage>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub choices: Vec<HunYuanChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<&HunYuanError> for GatewayError {
    fn from(e: &HunYuanError) -> Self {
        GatewayError::protocol(e.code.clone(), e.message.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanChoice {
    #[serde(default)]
    pub message: Option<HunYuanMessage>,
    #[serde(default)]
    pub finish_reason: String,
}

/// One SSE frame.  Unlike the full response it is not wrapped in `Response`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanStreamFrame {
    #[serde(default)]
    pub error: Option<HunYuanError>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub usage: Option<HunYuanUsage>,
    #[serde(default)]
    pub choices: Vec<HunYuanStreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HunYuanStreamChoice {
    #[serde(default)]
    pub delta: Option<HunYuanMessage>,
    #[serde(default)]
    pub finish_reason: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// HunYuan chat provider.
#[derive(Debug, Clone)]
pub struct HunYuanChat {
    endpoint: String,
    region: Option<String>,
    signer: Signer,
}

impl HunYuanChat {
    pub fn new(
        secret_id: String,
        secret_key: String,
        base_url: Option<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            endpoint: base_url.unwrap_or_else(|| HUNYUAN_BASE_URL.to_owned()),
            region,
            signer: Signer::Tc3(Tc3Signer::new(
                secret_id,
                secret_key,
                HUNYUAN_SERVICE,
                HUNYUAN_HOST,
                HUNYUAN_ACTION,
            )),
        }
    }
}

/// Assemble the payload for `request` on top of `global`.
///
/// When `global.model` is set, `global` is taken as the complete payload and
/// the request's message, tip and history are not used.  Otherwise messages
/// are appended in a fixed order: global messages, the new user message, the
/// tip (always as a system message), then the history.
pub fn build_parameters(request: &ChatRequest, global: &HunYuanParameters) -> HunYuanParameters {
    let mut params = global.clone();

    if global.model.is_empty() {
        params.model = if request.model.is_empty() {
            DEFAULT_MODEL.to_owned()
        } else {
            request.model.clone()
        };

        params.messages.push(HunYuanMessage {
            role: Role::User,
            content: request.message.clone(),
        });
        if let Some(tips) = &request.tips {
            params.messages.push(HunYuanMessage {
                role: Role::System,
                content: tips.content.clone(),
            });
        }
        params
            .messages
            .extend(request.history.iter().map(|h| HunYuanMessage {
                role: h.role,
                content: h.content.clone(),
            }));
    } else {
        tracing::debug!(
            provider = "hunyuan",
            model = %global.model,
            "global parameters name a model; using them as the full payload"
        );
    }

    if params.version.is_empty() {
        params.version = DEFAULT_VERSION.to_owned();
    }
    if params.language.is_empty() {
        params.language = DEFAULT_LANGUAGE.to_owned();
    }

    if request.stream {
        params.stream = true;
        params.stream_moderation = true;
    }

    params
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::validation(format!("invalid {name} header value: {e}")))
}

impl ChatProvider for HunYuanChat {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HunYuan
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn signer(&self) -> &Signer {
        &self.signer
    }

    fn normalize(&self, request: &ChatRequest, global: &GlobalParameters) -> Result<Normalized> {
        let GlobalParameters::HunYuan(global) = global else {
            return Err(global.mismatch(ProviderKind::HunYuan));
        };

        let payload = build_parameters(request, global);
        let body = serde_json::to_vec(&payload)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HOST, HeaderValue::from_static(HUNYUAN_HOST));
        headers.insert(
            HeaderName::from_static("x-tc-action"),
            HeaderValue::from_static(HUNYUAN_ACTION),
        );
        headers.insert(
            HeaderName::from_static("x-tc-version"),
            header_value("X-TC-Version", &payload.version)?,
        );
        headers.insert(
            HeaderName::from_static("x-tc-language"),
            header_value("X-TC-Language", &payload.language)?,
        );
        if let Some(region) = &self.region {
            headers.insert(
                HeaderName::from_static("x-tc-region"),
                header_value("X-TC-Region", region)?,
            );
        }

        Ok(Normalized {
            model: payload.model,
            body,
            headers,
        })
    }

    fn decode_response(&self, body: &[u8]) -> Result<ChatReply> {
        let output: HunYuanResponse =
            serde_json::from_slice(body).map_err(|e| GatewayError::Decode {
                reason: format!("invalid hunyuan response: {e}"),
            })?;

        if let Some(err) = &output.response.error {
            tracing::warn!(
                provider = "hunyuan",
                code = %err.code,
                request_id = %output.response.request_id,
                "provider reported error"
            );
            return Err(err.into());
        }

        let response = output
            .response
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| ChatResponse {
                role: m.role,
                content: m.content.clone(),
            })
            .unwrap_or_default();

        Ok(ChatReply {
            response,
            raw: ProviderEnvelope::HunYuan(output),
        })
    }

    fn decode_error(&self, status: u16, body: &[u8]) -> GatewayError {
        match serde_json::from_slice::<HunYuanResponse>(body) {
            Ok(HunYuanResponse {
                response:
                    HunYuanResponseBody {
                        error: Some(err), ..
                    },
            }) => {
                tracing::warn!(provider = "hunyuan", status, code = %err.code, "provider rejected request");
                (&err).into()
            }
            _ => GatewayError::protocol(
                status.to_string(),
                String::from_utf8_lossy(body).into_owned(),
            ),
        }
    }

    fn decode_frame(&self, data: &str) -> std::result::Result<FrameEvent, serde_json::Error> {
        let frame: HunYuanStreamFrame = serde_json::from_str(data)?;
        if let Some(err) = &frame.error {
            return Ok(FrameEvent::Error(err.into()));
        }
        Ok(FrameEvent::Deltas(
            frame
                .choices
                .into_iter()
                .filter_map(|c| c.delta.map(ChatMessage::from))
                .collect(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::types::HistoryEntry;

    fn provider() -> HunYuanChat {
        HunYuanChat::new("AKID".into(), "KEY".into(), None, None)
    }

    fn normalize(request: &ChatRequest, global: HunYuanParameters) -> (Normalized, Value) {
        let normalized = provider()
            .normalize(request, &GlobalParameters::HunYuan(global))
            .unwrap();
        let body = serde_json::from_slice(&normalized.body).unwrap();
        (normalized, body)
    }

    #[test]
    fn message_order_and_forced_system_tip() {
        let global = HunYuanParameters {
            messages: vec![HunYuanMessage {
                role: Role::System,
                content: "persona".into(),
            }],
            ..Default::default()
        };
        let mut request = ChatRequest::new("question").with_history(vec![
            HistoryEntry::new(Role::User, "old q"),
            HistoryEntry::new(Role::Assistant, "old a"),
        ]);
        // A tip always goes out as a system message, whatever role it carries.
        request.tips = Some(ChatMessage::user("tip"));

        let (_, body) = normalize(&request, global);
        let messages = body["Messages"].as_array().unwrap();
        let pairs: Vec<(&str, &str)> = messages
            .iter()
            .map(|m| (m["Role"].as_str().unwrap(), m["Content"].as_str().unwrap()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("system", "persona"),
                ("user", "question"),
                ("system", "tip"),
                ("user", "old q"),
                ("assistant", "old a"),
            ]
        );
    }

    #[test]
    fn version_and_language_are_headers_not_payload() {
        let (normalized, body) = normalize(&ChatRequest::new("hi"), HunYuanParameters::default());

        assert_eq!(body["Model"], "hunyuan-pro");
        assert!(body.get("Version").is_none());
        assert!(body.get("Language").is_none());
        assert!(body.get("Stream").is_none());
        assert!(body.get("TopP").is_none());

        assert_eq!(normalized.headers["x-tc-version"], DEFAULT_VERSION);
        assert_eq!(normalized.headers["x-tc-language"], DEFAULT_LANGUAGE);
        assert_eq!(normalized.headers["x-tc-action"], HUNYUAN_ACTION);
        assert_eq!(normalized.headers[HOST], HUNYUAN_HOST);
        assert!(normalized.headers.get("x-tc-region").is_none());
    }

    #[test]
    fn configured_version_language_and_sampling_are_kept() {
        let global = HunYuanParameters {
            version: "2024-01-01".into(),
            language: "en-US".into(),
            temperature: Some(0.2),
            ..Default::default()
        };
        let (normalized, body) = normalize(&ChatRequest::new("hi"), global);

        assert_eq!(normalized.headers["x-tc-version"], "2024-01-01");
        assert_eq!(normalized.headers["x-tc-language"], "en-US");
        assert_eq!(body["Temperature"], 0.2);
    }

    #[test]
    fn streaming_sets_stream_flags() {
        let mut request = ChatRequest::new("hi").with_model(HUNYUAN_LITE);
        request.stream = true;
        let (normalized, body) = normalize(&request, HunYuanParameters::default());

        assert_eq!(normalized.model, HUNYUAN_LITE);
        assert_eq!(body["Stream"], true);
        assert_eq!(body["StreamModeration"], true);
    }

    #[test]
    fn global_model_makes_global_authoritative() {
        let global = HunYuanParameters {
            model: HUNYUAN_STANDARD.into(),
            messages: vec![HunYuanMessage {
                role: Role::User,
                content: "preset".into(),
            }],
            ..Default::default()
        };
        let request = ChatRequest::new("ignored")
            .with_model(HUNYUAN_CODE)
            .with_tips("also ignored");

        let (normalized, body) = normalize(&request, global);

        assert_eq!(normalized.model, HUNYUAN_STANDARD);
        let messages = body["Messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["Content"], "preset");
        assert_eq!(normalized.headers["x-tc-version"], DEFAULT_VERSION);
    }

    #[test]
    fn region_header_when_configured() {
        let provider = HunYuanChat::new(
            "AKID".into(),
            "KEY".into(),
            None,
            Some(REGION_GUANGZHOU.into()),
        );
        let normalized = provider
            .normalize(
                &ChatRequest::new("hi"),
                &GlobalParameters::empty(ProviderKind::HunYuan),
            )
            .unwrap();
        assert_eq!(normalized.headers["x-tc-region"], "ap-guangzhou");
    }

    #[test]
    fn prepare_signs_the_sent_bytes() {
        let p = provider();
        let outbound = p
            .prepare(
                &ChatRequest::new("hi"),
                &GlobalParameters::empty(ProviderKind::HunYuan),
                1_551_113_065,
            )
            .unwrap();

        let Signer::Tc3(signer) = p.signer() else {
            panic!("hunyuan must sign with TC3");
        };
        let expected = signer.authorization(&outbound.body, 1_551_113_065).unwrap();
        assert_eq!(outbound.headers["authorization"], expected.as_str());
        assert_eq!(outbound.headers["x-tc-timestamp"], "1551113065");
        assert_eq!(outbound.url, HUNYUAN_BASE_URL);
    }

    #[test]
    fn decode_full_response() {
        let body = r#"{"Response": {
            "RequestId": "req-7", "Id": "id-7", "Created": 1700000000, "Note": "AI generated",
            "Usage": {"PromptTokens": 3, "CompletionTokens": 5, "TotalTokens": 8},
            "Choices": [{"FinishReason": "stop", "Message": {"Role": "assistant", "Content": "你好"}}]
        }}"#;
        let reply = provider().decode_response(body.as_bytes()).unwrap();

        assert_eq!(reply.response, ChatResponse::assistant("你好"));
        assert_eq!(reply.raw.request_id(), "req-7");
    }

    #[test]
    fn decode_embedded_error() {
        let body = br#"{"Response": {"RequestId": "r",
            "Error": {"Code": "AuthFailure.SignatureFailure", "Message": "signature mismatch"}}}"#;
        match provider().decode_response(body).unwrap_err() {
            GatewayError::Protocol { code, message } => {
                assert_eq!(code, "AuthFailure.SignatureFailure");
                assert_eq!(message, "signature mismatch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_error_status() {
        let err = provider().decode_error(
            400,
            br#"{"Response": {"Error": {"Code": "InvalidParameter", "Message": "bad"}}}"#,
        );
        assert!(matches!(err, GatewayError::Protocol { ref code, .. } if code == "InvalidParameter"));

        let err = provider().decode_error(503, b"");
        assert!(matches!(err, GatewayError::Protocol { ref code, .. } if code == "503"));
    }

    #[test]
    fn frame_with_delta_and_error() {
        let event = provider()
            .decode_frame(
                r#"{"Note":"n","Choices":[{"FinishReason":"","Delta":{"Role":"assistant","Content":"Hi"}}],"Created":1,"Id":"x"}"#,
            )
            .unwrap();
        match event {
            FrameEvent::Deltas(d) => assert_eq!(d, vec![ChatMessage::assistant("Hi")]),
            other => panic!("unexpected event: {other:?}"),
        }

        let event = provider()
            .decode_frame(r#"{"Error":{"Code":"LimitExceeded","Message":"slow down"}}"#)
            .unwrap();
        assert!(matches!(event, FrameEvent::Error(_)));
    }
}
