//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment environment variables (`HOST`, `PORT`, `AZURE_TTS_API_KEY`,
//!    `AZURE_TTS_REGION`, `OPENAI_API_KEY`)
//! 2. Environment variables (`APP_SERVER_HOST`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Cloud credentials intentionally reuse the variable names the deployment
//! already provisions, so a `.env` written for the speech service works here
//! unchanged.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechConfig,
    pub translator: TranslatorConfig,
    pub relay: RelayConfig,
    pub audio: AudioSettings,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Cloud speech service configuration.
///
/// The recognition and synthesis endpoints default to the regional hosts of
/// the speech service; both can be overridden for private endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Subscription key sent on every cloud connection
    pub subscription_key: String,

    /// Service region used to derive the default endpoints
    pub region: String,

    /// Optional explicit recognition endpoint (wss://...)
    pub recognition_endpoint: Option<String>,

    /// Optional explicit synthesis endpoint (wss://...)
    pub synthesis_endpoint: Option<String>,
}

impl SpeechConfig {
    /// WebSocket URL for streaming translation recognition.
    pub fn recognition_url(&self) -> String {
        self.recognition_endpoint.clone().unwrap_or_else(|| {
            format!(
                "wss://{}.stt.speech.microsoft.com/speech/universal/v2",
                self.region
            )
        })
    }

    /// WebSocket URL for streaming text-input synthesis.
    ///
    /// Must be the v2 websocket endpoint; the v1 endpoint does not accept
    /// text-stream input.
    pub fn synthesis_url(&self) -> String {
        self.synthesis_endpoint.clone().unwrap_or_else(|| {
            format!(
                "wss://{}.tts.speech.microsoft.com/cognitiveservices/websocket/v2",
                self.region
            )
        })
    }
}

/// Hosted language-model translation pass configuration.
///
/// When enabled, recognized text takes an extra translation/correction hop
/// through the chat-completions API before synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub enabled: bool,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

/// Audio relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Fan-out dispatch policy for synthesized audio
    pub mode: DispatchMode,
}

/// Fan-out dispatch policy.
///
/// ## Modes:
/// - **Unicast** (development): synthesized audio returns only to the session
///   that produced it, so one browser tab can hear its own translation
/// - **Broadcast** (production): synthesized audio goes to every other
///   registered session, never back to the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Unicast,
    Broadcast,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Unicast => write!(f, "unicast"),
            DispatchMode::Broadcast => write!(f, "broadcast"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unicast" => Ok(DispatchMode::Unicast),
            "broadcast" => Ok(DispatchMode::Broadcast),
            other => Err(format!("Unknown dispatch mode: '{}'", other)),
        }
    }
}

/// Audio stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Sample rate of inbound microphone PCM (Hz)
    pub input_sample_rate: u32,

    /// Sample rate of outbound synthesized PCM (Hz)
    pub output_sample_rate: u32,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of concurrently registered sessions
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            speech: SpeechConfig {
                subscription_key: String::new(),
                region: "eastus".to_string(),
                recognition_endpoint: None,
                synthesis_endpoint: None,
            },
            translator: TranslatorConfig {
                enabled: true,
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4-turbo".to_string(),
            },
            relay: RelayConfig {
                mode: DispatchMode::Unicast,
            },
            audio: AudioSettings {
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms and the cloud service provision these without
        // the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("AZURE_TTS_API_KEY") {
            settings = settings.set_override("speech.subscription_key", key)?;
        }
        if let Ok(region) = env::var("AZURE_TTS_REGION") {
            settings = settings.set_override("speech.region", region)?;
        }
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("translator.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Credential presence is deliberately not checked here: a server without
    /// keys still starts and serves the demo page and health endpoints, and
    /// cloud connections fail per session with a logged error.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.speech.region.is_empty() && self.speech.recognition_endpoint.is_none() {
            return Err(anyhow::anyhow!(
                "Speech region must be set when no explicit endpoint is configured"
            ));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Allows partial updates; only the fields present in the JSON change.
    /// Credentials are not updatable at runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(relay) = partial_config.get("relay") {
            if let Some(mode) = relay.get("mode").and_then(|v| v.as_str()) {
                self.relay.mode = mode
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?;
            }
        }

        if let Some(translator) = partial_config.get("translator") {
            if let Some(enabled) = translator.get("enabled").and_then(|v| v.as_bool()) {
                self.translator.enabled = enabled;
            }
            if let Some(model) = translator.get("model").and_then(|v| v.as_str()) {
                self.translator.model = model.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.relay.mode, DispatchMode::Unicast);
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"mode": "broadcast"}, "translator": {"enabled": false}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.relay.mode, DispatchMode::Broadcast);
        assert!(!config.translator.enabled);
        // Unrelated fields stay untouched
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_config_update_rejects_bad_mode() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"mode": "multicast"}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [speech]
            subscription_key = "key"
            region = "westeurope"

            [translator]
            enabled = false
            api_base = "https://api.openai.com/v1"
            api_key = ""
            model = "gpt-4-turbo"

            [relay]
            mode = "broadcast"

            [audio]
            input_sample_rate = 16000
            output_sample_rate = 24000

            [performance]
            max_concurrent_sessions = 4
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.relay.mode, DispatchMode::Broadcast);
        assert!(config
            .speech
            .recognition_url()
            .starts_with("wss://westeurope."));
    }

    #[test]
    fn test_endpoint_override_wins_over_region() {
        let mut config = AppConfig::default();
        config.speech.synthesis_endpoint = Some("wss://private/tts".to_string());
        assert_eq!(config.speech.synthesis_url(), "wss://private/tts");
    }
}
