use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::CaptureConstraints;
use crate::session::SessionConfig;
use crate::transcription::auth::{Credentials, DEFAULT_HOST, DEFAULT_PATH};
use crate::transcription::transport::DEFAULT_CONNECT_TIMEOUT;
use crate::transcription::{RecognitionParams, SpeechConnector, WsConnector};

/// Config file looked up when no path is given (extension optional)
pub const DEFAULT_CONFIG_PATH: &str = "config/travel-voice";

/// Prefix for environment overrides, e.g. `TRAVEL_VOICE__SERVICE__HTTP__PORT`
pub const ENV_PREFIX: &str = "TRAVEL_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: CaptureConstraints,
    pub recognition: RecognitionConfig,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "travel-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub host: String,
    pub path: String,
    pub domain: String,
    pub language: String,
    pub accent: String,
    /// Trailing silence (ms) after which the service ends the utterance
    pub eos: u32,
    pub vinfo: u8,
    pub dwa: String,
    pub connect_timeout_secs: u64,
    /// Unset means no limit
    pub response_timeout_secs: Option<u64>,
    pub closing_grace_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        let params = RecognitionParams::default();

        Self {
            host: DEFAULT_HOST.to_string(),
            path: DEFAULT_PATH.to_string(),
            domain: params.domain,
            language: params.language,
            accent: params.accent,
            eos: params.eos,
            vinfo: params.vinfo,
            dwa: params.dwa,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            response_timeout_secs: None,
            closing_grace_ms: 3000,
        }
    }
}

impl RecognitionConfig {
    pub fn params(&self) -> RecognitionParams {
        RecognitionParams {
            domain: self.domain.clone(),
            language: self.language.clone(),
            accent: self.accent.clone(),
            eos: self.eos,
            vinfo: self.vinfo,
            dwa: self.dwa.clone(),
        }
    }
}

impl Config {
    /// Load from an optional file, then `TRAVEL_VOICE__*` overrides, then
    /// the `XF_*` credential variables for any credential still empty
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (DEFAULT_CONFIG_PATH, false),
        };

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.credentials.fill_from_env();

        Ok(cfg)
    }

    /// Session configuration for a new session
    pub fn session_config(&self, session_id: impl Into<String>) -> SessionConfig {
        SessionConfig {
            session_id: session_id.into(),
            credentials: self.credentials.clone(),
            host: self.recognition.host.clone(),
            path: self.recognition.path.clone(),
            params: self.recognition.params(),
            constraints: self.audio.clone(),
            response_timeout: self
                .recognition
                .response_timeout_secs
                .map(Duration::from_secs),
            closing_grace: Duration::from_millis(self.recognition.closing_grace_ms),
        }
    }

    /// WebSocket connector honouring the configured handshake timeout
    pub fn connector(&self) -> Arc<dyn SpeechConnector> {
        Arc::new(WsConnector::new(Duration::from_secs(
            self.recognition.connect_timeout_secs,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let cfg = Config::default();
        assert_eq!(cfg.service.http.port, 8088);
        assert_eq!(cfg.audio.sample_rate, 16000);
        assert_eq!(cfg.recognition.host, "iat.xf-yun.com");
        assert_eq!(cfg.recognition.closing_grace_ms, 3000);
        assert!(cfg.recognition.response_timeout_secs.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[service.http]
port = 9000

[recognition]
language = "en_us"
response_timeout_secs = 20

[credentials]
app_id = "app"
api_key = "key"
api_secret = "secret"
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.service.http.port, 9000);
        assert_eq!(cfg.service.http.bind, "127.0.0.1");
        assert_eq!(cfg.recognition.language, "en_us");
        assert_eq!(cfg.recognition.accent, "mandarin");
        assert_eq!(cfg.credentials.app_id, "app");

        let session = cfg.session_config("trip-1");
        assert_eq!(session.session_id, "trip-1");
        assert_eq!(session.params.language, "en_us");
        assert_eq!(session.response_timeout, Some(Duration::from_secs(20)));
        assert_eq!(session.closing_grace, Duration::from_millis(3000));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(Config::load(Some("/nonexistent/travel-voice.toml")).is_err());
    }
}
