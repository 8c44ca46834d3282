//! Request signing for the streaming dictation endpoint.
//!
//! Every connection attempt is authorized with a fresh HMAC-SHA256 signature
//! over the host, an RFC-1123 date and the request line. The signed
//! descriptor travels base64-encoded in the `authorization` query parameter,
//! so the server can reject stale dates. Nothing here is cached or reused.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use url::Url;

use crate::error::{VoiceError, VoiceResult};

type HmacSha256 = Hmac<Sha256>;

/// Default dictation host
pub const DEFAULT_HOST: &str = "iat.xf-yun.com";

/// Default dictation path
pub const DEFAULT_PATH: &str = "/v1";

pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

pub const SIGNED_HEADERS: &str = "host date request-line";

/// Environment variables the credentials are read from
pub const ENV_APP_ID: &str = "XF_APPID";
pub const ENV_API_KEY: &str = "XF_APIKEY";
pub const ENV_API_SECRET: &str = "XF_APISECRET";

/// Speech service credentials
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Credentials {
    pub app_id: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read all three fields from the environment
    pub fn from_env() -> Self {
        let mut credentials = Self::default();
        credentials.fill_from_env();
        credentials
    }

    /// Fill any empty field from its environment variable
    pub fn fill_from_env(&mut self) {
        for (field, var) in [
            (&mut self.app_id, ENV_APP_ID),
            (&mut self.api_key, ENV_API_KEY),
            (&mut self.api_secret, ENV_API_SECRET),
        ] {
            if field.is_empty() {
                if let Ok(value) = std::env::var(var) {
                    *field = value.trim().to_string();
                }
            }
        }
    }

    /// Fail fast when any field is missing
    pub fn validate(&self) -> VoiceResult<()> {
        let missing: Vec<&str> = [
            (self.app_id.is_empty(), ENV_APP_ID),
            (self.api_key.is_empty(), ENV_API_KEY),
            (self.api_secret.is_empty(), ENV_API_SECRET),
        ]
        .into_iter()
        .filter_map(|(empty, name)| empty.then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(VoiceError::MissingCredentials(format!(
                "{} not set",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("api_key", &mask_middle(&self.api_key, 4))
            .field("api_secret", &"***")
            .finish()
    }
}

/// Signed material for one connection attempt
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub app_id: String,
    /// RFC-1123 date that was signed
    pub date: String,
    /// Base64 HMAC-SHA256 of the signing string
    pub signature: String,
    /// Base64 of the full authorization descriptor
    pub authorization: String,
    /// WebSocket URL carrying the authorization
    pub url: Url,
}

impl AuthorizationContext {
    /// Sign a connection attempt with the current time
    pub fn new(credentials: &Credentials, host: &str, path: &str) -> VoiceResult<Self> {
        Self::with_date(credentials, host, path, &rfc1123_date(Utc::now()))
    }

    /// Sign a connection attempt with an explicit date string
    pub fn with_date(
        credentials: &Credentials,
        host: &str,
        path: &str,
        date: &str,
    ) -> VoiceResult<Self> {
        credentials.validate()?;

        let signature = sign(&signing_string(host, date, path), &credentials.api_secret)?;
        let descriptor = authorization_descriptor(&credentials.api_key, &signature);
        let authorization = STANDARD.encode(descriptor.as_bytes());

        let base = format!("wss://{host}{path}");
        let url = Url::parse_with_params(
            &base,
            &[
                ("authorization", authorization.as_str()),
                ("date", date),
                ("host", host),
            ],
        )
        .map_err(|e| VoiceError::ConnectionFailed(format!("invalid service URL {base}: {e}")))?;

        Ok(Self {
            app_id: credentials.app_id.clone(),
            date: date.to_string(),
            signature,
            authorization,
            url,
        })
    }

    /// URL with the authorization value masked, for logs
    pub fn masked_url(&self) -> String {
        let mut url = self.url.clone();
        let masked = mask_middle(&self.authorization, 6);
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "authorization" {
                    masked.clone()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

/// Format a timestamp the way HTTP `Date` headers do
pub fn rfc1123_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Canonical string covered by the signature
pub fn signing_string(host: &str, date: &str, path: &str) -> String {
    format!("host: {host}\ndate: {date}\nGET {path} HTTP/1.1")
}

/// Base64 HMAC-SHA256 of `data` keyed with `secret`
pub fn sign(data: &str, secret: &str) -> VoiceResult<String> {
    if secret.is_empty() {
        return Err(VoiceError::MissingCredentials(format!(
            "{ENV_API_SECRET} not set"
        )));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| VoiceError::MissingCredentials(format!("unusable API secret: {e}")))?;
    mac.update(data.as_bytes());

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Authorization descriptor before base64 encoding
pub fn authorization_descriptor(api_key: &str, signature: &str) -> String {
    format!(
        r#"api_key="{api_key}", algorithm="{SIGNATURE_ALGORITHM}", headers="{SIGNED_HEADERS}", signature="{signature}""#
    )
}

/// Keep the first and last `keep` characters of a secret-bearing string
pub fn mask_middle(value: &str, keep: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= keep * 2 {
        return "***".to_string();
    }

    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}...MASK...{tail}")
}
