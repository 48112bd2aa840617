//! Per-provider request authentication.
//!
//! Two schemes are supported:
//!
//! - **Bearer**: the token is sent verbatim in `Authorization: Bearer`.
//! - **TC3-HMAC-SHA256**: the Tencent Cloud API 3.0 signature.  The secret
//!   key never leaves the process; a signing key is derived from it per UTC
//!   date and used to sign a digest of the canonical request.
//!
//! Hashing and HMAC come from `ring`.  Every call re-signs with the caller's
//! timestamp; nothing is cached.

use chrono::DateTime;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use ring::{digest, hmac};

use crate::error::{GatewayError, Result};

/// Algorithm tag that prefixes the TC3 authorization header.
pub const TC3_ALGORITHM: &str = "TC3-HMAC-SHA256";

/// Terminator of the TC3 credential scope and final key-derivation input.
const TC3_REQUEST: &str = "tc3_request";

/// Headers covered by the TC3 signature, in canonical order.
const TC3_SIGNED_HEADERS: &str = "content-type;host;x-tc-action";

/// Content type the canonical request commits to.
const TC3_CONTENT_TYPE: &str = "application/json";

/// Header carrying the signing timestamp.
pub const X_TC_TIMESTAMP: &str = "x-tc-timestamp";

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// SHA-256 of `data`, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(digest::digest(&digest::SHA256, data).as_ref())
}

/// HMAC-SHA256 of `data` under `key`, raw bytes.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

// ---------------------------------------------------------------------------
// TC3 signer
// ---------------------------------------------------------------------------

/// TC3-HMAC-SHA256 signer bound to one service endpoint.
#[derive(Clone)]
pub struct Tc3Signer {
    secret_id: String,
    secret_key: String,
    service: String,
    host: String,
    action: String,
}

impl std::fmt::Debug for Tc3Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tc3Signer")
            .field("secret_id", &self.secret_id)
            .field("service", &self.service)
            .field("host", &self.host)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

impl Tc3Signer {
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        service: impl Into<String>,
        host: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            service: service.into(),
            host: host.into(),
            action: action.into(),
        }
    }

    /// The canonical request for a `POST /` with an empty query string.
    ///
    /// Header lines are lowercase and each one is newline-terminated, so the
    /// header block is followed by an empty line before the signed-header
    /// list.
    pub fn canonical_request(&self, payload: &[u8]) -> String {
        let canonical_headers = format!(
            "content-type:{TC3_CONTENT_TYPE}\nhost:{}\nx-tc-action:{}\n",
            self.host,
            self.action.to_ascii_lowercase()
        );
        format!(
            "POST\n/\n\n{canonical_headers}\n{TC3_SIGNED_HEADERS}\n{}",
            sha256_hex(payload)
        )
    }

    /// `{date}/{service}/tc3_request`.
    pub fn credential_scope(&self, date: &str) -> String {
        format!("{date}/{}/{TC3_REQUEST}", self.service)
    }

    /// The string that is finally HMAC'd with the derived signing key.
    pub fn string_to_sign(&self, canonical_request: &str, timestamp: i64, date: &str) -> String {
        format!(
            "{TC3_ALGORITHM}\n{timestamp}\n{}\n{}",
            self.credential_scope(date),
            sha256_hex(canonical_request.as_bytes())
        )
    }

    /// Derive the date- and service-scoped signing key.
    pub fn signing_key(&self, date: &str) -> Vec<u8> {
        let secret_date = hmac_sha256(
            format!("TC3{}", self.secret_key).as_bytes(),
            date.as_bytes(),
        );
        let secret_service = hmac_sha256(&secret_date, self.service.as_bytes());
        hmac_sha256(&secret_service, TC3_REQUEST.as_bytes())
    }

    /// Hex signature of `payload` at `timestamp`.
    pub fn signature(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let date = utc_date(timestamp)?;
        let string_to_sign =
            self.string_to_sign(&self.canonical_request(payload), timestamp, &date);
        Ok(hex_encode(&hmac_sha256(
            &self.signing_key(&date),
            string_to_sign.as_bytes(),
        )))
    }

    /// The full `Authorization` header value.
    pub fn authorization(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let date = utc_date(timestamp)?;
        let signature = self.signature(payload, timestamp)?;
        Ok(format!(
            "{TC3_ALGORITHM} Credential={}/{}, SignedHeaders={TC3_SIGNED_HEADERS}, Signature={signature}",
            self.secret_id,
            self.credential_scope(&date),
        ))
    }
}

/// `YYYY-MM-DD` of a Unix timestamp, in UTC.
fn utc_date(timestamp: i64) -> Result<String> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .ok_or_else(|| GatewayError::Internal(format!("timestamp out of range: {timestamp}")))
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Authentication scheme for one provider.
#[derive(Clone)]
pub enum Signer {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// TC3-HMAC-SHA256 request signature.
    Tc3(Tc3Signer),
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signer::Bearer { .. } => f.write_str("Bearer(***)"),
            Signer::Tc3(inner) => inner.fmt(f),
        }
    }
}

impl Signer {
    /// Add the authentication headers for `payload` to `headers`.
    ///
    /// `payload` must be the exact bytes that go on the wire: the receiving
    /// service hashes what it receives and rejects any mismatch.
    pub fn apply(&self, headers: &mut HeaderMap, payload: &[u8], timestamp: i64) -> Result<()> {
        match self {
            Signer::Bearer { token } => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
            }
            Signer::Tc3(signer) => {
                let authorization = signer.authorization(payload, timestamp)?;
                headers.insert(AUTHORIZATION, header_value(&authorization)?);
                headers.insert(
                    HeaderName::from_static(X_TC_TIMESTAMP),
                    HeaderValue::from(timestamp),
                );
            }
        }
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        GatewayError::configuration(format!("invalid authorization header: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_ID: &str = "AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE";
    const SECRET_KEY: &str = "Gu5t9xGARNpq86cd98joQYCN3EXAMPLE";
    const TIMESTAMP: i64 = 1_551_113_065;
    const PAYLOAD: &str = r#"{"Model":"hunyuan-pro","Messages":[{"Role":"user","Content":"hi"}]}"#;

    fn signer() -> Tc3Signer {
        Tc3Signer::new(
            SECRET_ID,
            SECRET_KEY,
            "hunyuan",
            "hunyuan.tencentcloudapi.com",
            "ChatCompletions",
        )
    }

    #[test]
    fn sha256_known_answer() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex_encode(&mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn canonical_request_layout() {
        let canonical = signer().canonical_request(PAYLOAD.as_bytes());
        let expected = "POST\n/\n\n\
                        content-type:application/json\n\
                        host:hunyuan.tencentcloudapi.com\n\
                        x-tc-action:chatcompletions\n\n\
                        content-type;host;x-tc-action\n\
                        3b0b9291b96e9571a7e40156b0c8cd30b5a6d2e72cd189a4e4cce2ccd6af8da6";
        assert_eq!(canonical, expected);
        assert_eq!(
            sha256_hex(canonical.as_bytes()),
            "352a0c2578d8c8d29bb2537a4d29d8364af20d8eb9680b7a420745c24417698c"
        );
    }

    #[test]
    fn signing_key_known_answer() {
        assert_eq!(
            hex_encode(&signer().signing_key("2019-02-25")),
            "1e9a372318937713175acd265eabbcf7366a995703428a7ada4d428459d0be30"
        );
    }

    #[test]
    fn authorization_known_answer() {
        let auth = signer()
            .authorization(PAYLOAD.as_bytes(), TIMESTAMP)
            .unwrap();
        assert_eq!(
            auth,
            "TC3-HMAC-SHA256 \
             Credential=AKIDz8krbsJ5yKBZQpn74WFkmLPx3EXAMPLE/2019-02-25/hunyuan/tc3_request, \
             SignedHeaders=content-type;host;x-tc-action, \
             Signature=09ffc5af07887db97e3fb50091bdb7e27b369d853385dc954df127214c6161a6"
        );
    }

    #[test]
    fn signature_is_deterministic_and_payload_sensitive() {
        let s = signer();
        let a = s.signature(PAYLOAD.as_bytes(), TIMESTAMP).unwrap();
        let b = s.signature(PAYLOAD.as_bytes(), TIMESTAMP).unwrap();
        let c = s.signature(b"{}", TIMESTAMP).unwrap();
        let d = s.signature(PAYLOAD.as_bytes(), TIMESTAMP + 86_400).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn bearer_sets_authorization_only() {
        let mut headers = HeaderMap::new();
        Signer::Bearer {
            token: "sk-test".into(),
        }
        .apply(&mut headers, b"{}", TIMESTAMP)
        .unwrap();

        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn tc3_sets_authorization_and_matching_timestamp() {
        let mut headers = HeaderMap::new();
        Signer::Tc3(signer())
            .apply(&mut headers, PAYLOAD.as_bytes(), TIMESTAMP)
            .unwrap();

        assert_eq!(headers[X_TC_TIMESTAMP], "1551113065");
        let auth = headers[AUTHORIZATION].to_str().unwrap();
        assert!(auth.ends_with("09ffc5af07887db97e3fb50091bdb7e27b369d853385dc954df127214c6161a6"));
    }

    #[test]
    fn bearer_token_with_newline_is_rejected() {
        let mut headers = HeaderMap::new();
        let err = Signer::Bearer {
            token: "bad\ntoken".into(),
        }
        .apply(&mut headers, b"{}", TIMESTAMP)
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn debug_hides_secret_key() {
        let printed = format!("{:?}", Signer::Tc3(signer()));
        assert!(printed.contains(SECRET_ID));
        assert!(!printed.contains(SECRET_KEY));
    }
}
