//! Provider-agnostic streaming chat gateway.
//!
//! One canonical [`ChatRequest`] goes in; it is mapped onto the wire format
//! and authentication scheme of the configured backend, sent over HTTP, and
//! the reply comes back as a canonical [`ChatResponse`] or a [`ChatStream`]
//! of increments.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────┐   ┌───────────┐
//! │ ChatClient │──>│ Normalizer │──>│ Signer │──>│ Transport │
//! │  (select)  │   │ (provider) │   │        │   │ (reqwest) │
//! └────────────┘   └────────────┘   └────────┘   └─────┬─────┘
//!                                                      │
//!                           ┌──────────────────────────┴──┐
//!                           │ decode_response │ ChatStream │
//!                           │   (one-shot)    │ (worker)   │
//!                           └─────────────────┴────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`client`] -- Call surface: `normal_chat`, `stream_chat`, global parameters.
//! - [`provider`] -- Provider selection plus the Qwen and HunYuan mappings.
//! - [`signer`] -- Bearer tokens and TC3-HMAC-SHA256 signatures.
//! - [`transport`] -- The HTTP seam.
//! - [`stream`] -- Line splitting, frame decoding, de-duplication, the worker.
//! - [`config`] -- Client configuration from code, TOML, or the environment.
//! - [`types`] -- Canonical messages, requests and responses.
//! - [`error`] -- Gateway error types.

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod signer;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::ChatClient;
pub use config::{ClientConfig, Credentials, DEFAULT_TIMEOUT_SECS, ProviderKind};
pub use error::{GatewayError, Result};
pub use provider::{
    ChatProvider, GlobalParameters, HunYuanChat, HunYuanParameters, HunYuanResponse,
    ProviderEnvelope, QwenChat, QwenParameters, QwenResponse,
};
pub use stream::{ChatStream, DecoderState, LineSplitter, StreamDecoder};
pub use transport::{ByteStream, HttpTransport, InboundResponse, OutboundRequest, Transport};
pub use types::{ChatMessage, ChatReply, ChatRequest, ChatResponse, HistoryEntry, Role};

pub use tokio_util::sync::CancellationToken;
