//! Alibaba DashScope (Qwen) text-generation API.
//!
//! Wire format:
//!
//! ```text
//! POST /api/v1/services/aigc/text-generation/generation
//! Authorization: Bearer <token>
//! X-DashScope-SSE: enable              (streaming only)
//!
//! {"model": "...", "input": {"messages": [...]}, "parameters": {...}}
//! ```
//!
//! `parameters.result_format` is always forced to `"message"` so the answer
//! arrives under `output.choices[].message`; streaming requests also force
//! `incremental_output` so each frame carries only the new text.

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::provider::{ChatProvider, FrameEvent, GlobalParameters, Normalized, ProviderEnvelope};
use crate::signer::Signer;
use crate::types::{ChatMessage, ChatReply, ChatRequest, ChatResponse, HistoryEntry};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const QWEN_TURBO: &str = "qwen-turbo";
pub const QWEN_PLUS: &str = "qwen-plus";
pub const QWEN_MAX: &str = "qwen-max";

/// Model used when the request does not name one.
pub const DEFAULT_MODEL: &str = QWEN_TURBO;

/// DashScope text-generation endpoint.
pub const QWEN_BASE_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

/// Header that switches DashScope into SSE mode.
const DASHSCOPE_SSE: &str = "x-dashscope-sse";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request payload; also the shape of Qwen global parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenParameters {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub input: QwenInput,

    /// Sampling parameters.  `None` means the caller never supplied any and
    /// the built-in defaults apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenInput {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Full response body, and the shape of each stream frame.
///
/// Failed calls carry `code` and `message` instead of `output`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QwenResponse {
    #[serde(default)]
    pub output: Option<QwenOutput>,
    #[serde(default)]
    pub usage: Option<QwenUsage>,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QwenResponse {
    /// The embedded error, if the body reports one.
    fn error(&self) -> Option<GatewayError> {
        let code = self.code.as_deref().filter(|c| !c.is_empty())?;
        Some(GatewayError::protocol(
            code,
            self.message.clone().unwrap_or_default(),
        ))
    }

    fn choices(&self) -> &[QwenChoice] {
        self.output.as_ref().map(|o| o.choices.as_slice()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QwenOutput {
    #[serde(default)]
    pub choices: Vec<QwenChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QwenChoice {
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QwenUsage {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Body of a non-2xx DashScope response.
#[derive(Debug, Deserialize)]
struct QwenErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    request_id: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// DashScope chat provider.
#[derive(Debug, Clone)]
pub struct QwenChat {
    endpoint: String,
    signer: Signer,
}

impl QwenChat {
    pub fn new(token: String, base_url: Option<String>) -> Self {
        Self {
            endpoint: base_url.unwrap_or_else(|| QWEN_BASE_URL.to_owned()),
            signer: Signer::Bearer { token },
        }
    }
}

/// Sampling parameters injected when the caller supplied none.
fn default_sampling() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("temperature".into(), json!(0.8));
    map.insert("top_p".into(), json!(0.8));
    map.insert("max_tokens".into(), json!(1500));
    map
}

/// Assemble the payload for `request` on top of `global`.
///
/// The model comes from the request, else the provider default; a model in
/// `global` is not consulted.  Messages are appended in a fixed order: global
/// messages, the new user message, the tip, then the history.
pub fn build_parameters(request: &ChatRequest, global: &QwenParameters) -> QwenParameters {
    let model = if request.model.is_empty() {
        DEFAULT_MODEL.to_owned()
    } else {
        request.model.clone()
    };

    let mut messages = global.input.messages.clone();
    messages.push(ChatMessage::user(request.message.clone()));
    if let Some(tips) = &request.tips {
        messages.push(tips.clone());
    }
    messages.extend(request.history.iter().map(HistoryEntry::to_message));

    let mut parameters = global.parameters.clone().unwrap_or_else(default_sampling);
    parameters.insert("result_format".into(), json!("message"));
    if request.stream {
        parameters.insert("incremental_output".into(), json!(true));
    }

    QwenParameters {
        model,
        input: QwenInput { messages },
        parameters: Some(parameters),
    }
}

impl ChatProvider for QwenChat {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qwen
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn signer(&self) -> &Signer {
        &self.signer
    }

    fn normalize(&self, request: &ChatRequest, global: &GlobalParameters) -> Result<Normalized> {
        let GlobalParameters::Qwen(global) = global else {
            return Err(global.mismatch(ProviderKind::Qwen));
        };

        let payload = build_parameters(request, global);
        let body = serde_json::to_vec(&payload)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if request.stream {
            headers.insert(
                HeaderName::from_static(DASHSCOPE_SSE),
                HeaderValue::from_static("enable"),
            );
        }

        Ok(Normalized {
            model: payload.model,
            body,
            headers,
        })
    }

    fn decode_response(&self, body: &[u8]) -> Result<ChatReply> {
        let output: QwenResponse =
            serde_json::from_slice(body).map_err(|e| GatewayError::Decode {
                reason: format!("invalid qwen response: {e}"),
            })?;

        if let Some(err) = output.error() {
            return Err(err);
        }

        let response = output
            .choices()
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| ChatResponse {
                role: m.role,
                content: m.content.clone(),
            })
            .unwrap_or_default();

        Ok(ChatReply {
            response,
            raw: ProviderEnvelope::Qwen(output),
        })
    }

    fn decode_error(&self, status: u16, body: &[u8]) -> GatewayError {
        match serde_json::from_slice::<QwenErrorBody>(body) {
            Ok(err) if !err.code.is_empty() => {
                tracing::warn!(
                    provider = "qwen",
                    status,
                    code = %err.code,
                    request_id = %err.request_id,
                    "provider rejected request"
                );
                GatewayError::protocol(err.code, err.message)
            }
            _ => GatewayError::protocol(
                status.to_string(),
                String::from_utf8_lossy(body).into_owned(),
            ),
        }
    }

    fn decode_frame(&self, data: &str) -> std::result::Result<FrameEvent, serde_json::Error> {
        let frame: QwenResponse = serde_json::from_str(data)?;
        if let Some(err) = frame.error() {
            return Ok(FrameEvent::Error(err));
        }
        Ok(FrameEvent::Deltas(
            frame
                .choices()
                .iter()
                .filter_map(|c| c.message.clone())
                .collect(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
