//! Client configuration.
//!
//! A [`ClientConfig`] names the provider by its configuration tag, carries the
//! credentials that provider needs, and describes how to build the HTTP
//! client (proxy, timeout, endpoint override).  Configurations can be built
//! in code, loaded from a TOML file, and overridden from `CHATGATE_*`
//! environment variables.
//!
//! Nothing here is validated eagerly: the tag and the credentials are
//! checked when [`crate::ChatClient::new`] selects the provider, so a bad
//! configuration fails before any request object is built.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};

/// Default HTTP timeout for a whole request/response cycle.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Provider tag
// ---------------------------------------------------------------------------

/// The providers the gateway knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Alibaba DashScope (Qwen), bearer-token authentication.
    Qwen,
    /// Tencent Cloud HunYuan, TC3-HMAC-SHA256 request signing.
    HunYuan,
}

impl ProviderKind {
    /// The configuration tag for this provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Qwen => "qwen",
            ProviderKind::HunYuan => "hunyuan",
        }
    }

    /// Whether this provider authenticates with a secret-id/secret-key pair
    /// rather than a bearer token.
    pub fn requires_secret(&self) -> bool {
        matches!(self, ProviderKind::HunYuan)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qwen" => Ok(ProviderKind::Qwen),
            "hunyuan" => Ok(ProviderKind::HunYuan),
            other => Err(GatewayError::configuration(format!(
                "unknown provider `{other}`"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Authentication material.  Immutable for the lifetime of a client.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Sent as `Authorization: Bearer <token>`.
    Token(String),
    /// Used only to derive a per-request signature; never transmitted.
    Secret {
        secret_id: String,
        secret_key: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Secret { secret_id, .. } => f
                .debug_struct("Secret")
                .field("secret_id", secret_id)
                .field("secret_key", &"***")
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for a single [`crate::ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider configuration tag (`"qwen"`, `"hunyuan"`).
    pub provider: String,
    /// Credentials for the provider.
    pub credentials: Credentials,
    /// Optional HTTP(S) proxy URL applied to all requests.
    pub proxy: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Overrides the provider's default endpoint URL.
    pub base_url: Option<String>,
    /// Tencent Cloud region, sent as `X-TC-Region` when set.
    pub region: Option<String>,
    /// Provider-native global parameters loaded from a config file.
    pub global: Option<Value>,
}

impl ClientConfig {
    fn base(provider: &str, credentials: Credentials) -> Self {
        Self {
            provider: provider.to_owned(),
            credentials,
            proxy: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_url: None,
            region: None,
            global: None,
        }
    }

    /// Bearer-token configuration.
    pub fn with_token(token: impl Into<String>, kind: ProviderKind) -> Self {
        Self::base(kind.as_str(), Credentials::Token(token.into()))
    }

    /// Bearer-token configuration routed through an HTTP proxy.
    pub fn with_token_and_proxy(
        token: impl Into<String>,
        kind: ProviderKind,
        proxy: impl Into<String>,
    ) -> Self {
        let mut config = Self::with_token(token, kind);
        config.proxy = Some(proxy.into());
        config
    }

    /// Secret-pair configuration for signature-based providers.
    pub fn with_secret(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        kind: ProviderKind,
    ) -> Self {
        Self::base(
            kind.as_str(),
            Credentials::Secret {
                secret_id: secret_id.into(),
                secret_key: secret_key.into(),
            },
        )
    }

    /// Secret-pair configuration routed through an HTTP proxy.
    pub fn with_secret_and_proxy(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        proxy: impl Into<String>,
        kind: ProviderKind,
    ) -> Self {
        let mut config = Self::with_secret(secret_id, secret_key, kind);
        config.proxy = Some(proxy.into());
        config
    }

    /// Replace the provider endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the Tencent Cloud region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    // -- Loading -------------------------------------------------------------

    /// Load a configuration from a TOML file, then apply `CHATGATE_*`
    /// environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load(Some(path), None)
    }

    /// Build a configuration purely from `CHATGATE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::load(None, None)
    }

    /// Optional file, then environment, then an explicit provider tag.
    ///
    /// The tag is applied before credentials are resolved, so overriding it
    /// also switches which credential variables are read.
    pub fn load(path: Option<&Path>, provider: Option<&str>) -> Result<Self> {
        let raw = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    GatewayError::configuration(format!(
                        "failed to read config file {}: {e}",
                        path.display()
                    ))
                })?;
                tracing::debug!(path = %path.display(), "configuration loaded from file");
                RawConfig::from_toml(&content)?
            }
            None => RawConfig::default(),
        };

        let mut raw = raw.with_overrides(env_lookup);
        if let Some(provider) = provider {
            raw.provider = Some(provider.to_owned());
        }
        raw.resolve()
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        RawConfig::from_toml(content)?.resolve()
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// File / environment layer
// ---------------------------------------------------------------------------

/// Unresolved configuration as it appears in a file or the environment.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    provider: Option<String>,
    token: Option<String>,
    secret_id: Option<String>,
    secret_key: Option<String>,
    proxy: Option<String>,
    timeout_secs: Option<u64>,
    base_url: Option<String>,
    region: Option<String>,
    global: Option<toml::Table>,
}

impl RawConfig {
    fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            GatewayError::configuration(format!("failed to parse TOML config: {e}"))
        })
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).  Set values win over the file.
    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut Option<String>); 7] = [
            ("CHATGATE_PROVIDER", &mut self.provider),
            ("CHATGATE_TOKEN", &mut self.token),
            ("CHATGATE_SECRET_ID", &mut self.secret_id),
            ("CHATGATE_SECRET_KEY", &mut self.secret_key),
            ("CHATGATE_PROXY", &mut self.proxy),
            ("CHATGATE_BASE_URL", &mut self.base_url),
            ("CHATGATE_REGION", &mut self.region),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key) {
                *slot = Some(value);
            }
        }
        if let Some(secs) = lookup("CHATGATE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.timeout_secs = Some(secs);
        }
        self
    }

    fn resolve(self) -> Result<ClientConfig> {
        let provider = self.provider.unwrap_or_default();

        // The tag decides which credential shape is read; an unknown tag is
        // reported later by provider selection.
        let wants_secret = provider
            .parse::<ProviderKind>()
            .map(|k| k.requires_secret())
            .unwrap_or(false);
        let credentials = if wants_secret {
            Credentials::Secret {
                secret_id: self.secret_id.unwrap_or_default(),
                secret_key: self.secret_key.unwrap_or_default(),
            }
        } else {
            Credentials::Token(self.token.unwrap_or_default())
        };

        let global = self
            .global
            .map(|table| serde_json::to_value(&table))
            .transpose()?;

        Ok(ClientConfig {
            provider,
            credentials,
            proxy: self.proxy,
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            base_url: self.base_url,
            region: self.region,
            global,
        })
    }
}
