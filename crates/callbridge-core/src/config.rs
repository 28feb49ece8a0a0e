//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level CallBridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition: Option<RecognitionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Public hostname the telephony provider dials back into for the
    /// media-stream URL (e.g. "bridge.example.com").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
}

fn default_port() -> u16 {
    8089
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            public_host: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Prompt spoken when the call is answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,

    /// Short phrases spoken immediately after a final transcript to mask
    /// decision-engine latency.
    #[serde(default)]
    pub fillers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprompt_fallback_phrase: Option<String>,
}

/// Wire-encoding parameters. Defaults describe μ-law, 8 kHz, mono —
/// 8 bytes per millisecond, 20 ms frames of 160 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    #[serde(default = "default_bytes_per_ms")]
    pub bytes_per_ms: u64,

    /// Buffered bytes that trigger a flush to the recognition relay.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold_bytes: usize,
}

fn default_frame_interval_ms() -> u64 {
    20
}

fn default_bytes_per_ms() -> u64 {
    8
}

fn default_flush_threshold() -> usize {
    20 * 160
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            bytes_per_ms: default_bytes_per_ms(),
            flush_threshold_bytes: default_flush_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Streaming endpoint, e.g.
    /// "wss://api.deepgram.com/v1/listen?encoding=mulaw&sample_rate=8000".
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl RecognitionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Synthesis endpoint returning raw audio in the call's wire encoding.
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl SynthesisConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// REST endpoint of the dialogue decision engine.
    pub url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the bounded audio outbox between the framer and the
    /// recognition relay. A full outbox suspends the framer (backpressure);
    /// chunks are never dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "callbridge_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::BridgeError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.callbridge/config.json`
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Host used in the media-stream callback URL. Falls back to the bind
    /// address, which only works for local testing.
    pub fn public_host(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.public_host.clone())
            .unwrap_or_else(|| self.bind_addr())
    }

    pub fn initial_prompt(&self) -> String {
        self.telephony
            .as_ref()
            .and_then(|t| t.initial_prompt.clone())
            .unwrap_or_else(|| "Hello, how can I help you today?".to_string())
    }

    /// Filler phrases, guaranteed non-empty.
    pub fn fillers(&self) -> Vec<String> {
        let configured = self
            .telephony
            .as_ref()
            .map(|t| t.fillers.clone())
            .unwrap_or_default();
        if configured.is_empty() {
            vec![
                "One moment.".to_string(),
                "Let me check that for you.".to_string(),
                "Just a second.".to_string(),
            ]
        } else {
            configured
        }
    }

    pub fn audio(&self) -> AudioConfig {
        self.audio.clone().unwrap_or_default()
    }

    pub fn outbox_capacity(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.outbox_capacity)
            .unwrap_or(32)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match &self.recognition {
            Some(rec) => {
                if !rec.url.starts_with("ws://") && !rec.url.starts_with("wss://") {
                    errors.push(format!("Recognition URL is not a WebSocket URL: {}", rec.url));
                }
                if rec.resolve_api_key().is_none() {
                    warnings.push("Recognition service has no API key configured".to_string());
                }
            }
            None => errors.push("No recognition service configured".to_string()),
        }

        match &self.synthesis {
            Some(synth) => {
                if synth.resolve_api_key().is_none() {
                    warnings.push("Synthesis service has no API key configured".to_string());
                }
            }
            None => errors.push("No synthesis service configured".to_string()),
        }

        if self.engine.is_none() {
            warnings.push("No decision engine configured; transcripts will be dropped".to_string());
        }

        let audio = self.audio();
        if audio.frame_interval_ms == 0 || audio.bytes_per_ms == 0 {
            errors.push("Audio frame interval and byte rate must be non-zero".to_string());
        }
        if audio.flush_threshold_bytes == 0 {
            errors.push("Flush threshold cannot be 0".to_string());
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
            if server.public_host.is_none() {
                warnings.push(
                    "No public_host configured; stream callback URL will use the bind address"
                        .to_string(),
                );
            }
        }

        (warnings, errors)
    }
}

/// Base directory for CallBridge data: `~/.callbridge/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".callbridge")
}
