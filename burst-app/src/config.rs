//! Burstline configuration loader.
//!
//! TOML file with environment-variable overrides. The file is optional: a
//! missing config falls back to defaults plus whatever the environment
//! provides, which covers the pure-env deployment style.

use burst_core::scheduler::{MAX_DELAY, MIN_DELAY};
use burst_core::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstlineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

impl Default for BurstlineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            batching: BatchingConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            delivery: DeliveryConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    128
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Quiet period in seconds before a contact's batch is flushed.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_max_batch_age_seconds")]
    pub max_batch_age_seconds: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            max_concurrent_batches: default_max_concurrent_batches(),
            max_batch_age_seconds: default_max_batch_age_seconds(),
        }
    }
}

impl BatchingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            delay: self.delay(),
            max_concurrent_batches: self.max_concurrent_batches,
            max_batch_age: Duration::from_secs(self.max_batch_age_seconds),
        }
    }
}

fn default_delay_seconds() -> u64 {
    30
}

fn default_max_concurrent_batches() -> usize {
    50
}

fn default_max_batch_age_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Memory,
    Rest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,
    #[serde(default)]
    pub rest_url: String,
    #[serde(default)]
    pub rest_api_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Log outbound replies instead of sending them. Dev default.
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(default = "default_delivery_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_delivery_api_version")]
    pub api_version: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Log,
            api_url: default_delivery_api_url(),
            api_key: String::new(),
            api_version: default_delivery_api_version(),
        }
    }
}

fn default_delivery_api_url() -> String {
    "https://services.leadconnectorhq.com/conversations/messages".to_string()
}

fn default_delivery_api_version() -> String {
    "2021-04-15".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default = "default_system_prompt")]
    pub default_prompt: String,
    #[serde(default = "default_first_message")]
    pub default_first_message: String,
    #[serde(default = "default_prompt_sources")]
    pub sources: Vec<PromptSourceConfig>,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            default_prompt: default_system_prompt(),
            default_first_message: default_first_message(),
            sources: default_prompt_sources(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSourceConfig {
    pub tag: String,
    pub system_prompt: String,
    #[serde(default)]
    pub first_message: Option<String>,
}

fn default_system_prompt() -> String {
    "You are an AI SMS assistant running a friendly gym reactivation campaign. \
     Tone: casual, upbeat, human, like a personal trainer texting. Keep every \
     reply under 2 sentences, never use emojis, and never improvise offers. \
     Read the conversation history and do not repeat offers already made. If \
     the contact replies STOP, confirm they have been opted out and end the \
     conversation."
        .to_string()
}

fn default_first_message() -> String {
    "Hey [name]! You recently entered our raffle - want to hear how to claim a \
     free 30 days at the gym while you wait for the draw?"
        .to_string()
}

fn default_prompt_sources() -> Vec<PromptSourceConfig> {
    vec![
        PromptSourceConfig {
            tag: "form_entry".to_string(),
            system_prompt: "You are an AI SMS assistant following up with a contact \
                who just entered the gym raffle through a web form. Thank them for \
                entering, answer raffle questions, and transition them to the free \
                30-day intro offer. Casual trainer tone, under 2 sentences, no emojis."
                .to_string(),
            first_message: Some(
                "Thanks for entering the raffle, [name]! While you wait, want me to \
                 set you up with 30 days free at the gym?"
                    .to_string(),
            ),
        },
        PromptSourceConfig {
            tag: "facebook".to_string(),
            system_prompt: "You are an AI SMS assistant following up with a contact \
                who opted into the gym raffle via Facebook. Skip the entry step, thank \
                them for entering, and move straight to the free 30-day intro offer. \
                Casual trainer tone, under 2 sentences, no emojis."
                .to_string(),
            first_message: None,
        },
    ]
}

impl BurstlineConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    config_path = %path.display(),
                    "config file not found; using defaults with env overrides"
                );
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_nonempty("BURSTLINE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = env_nonempty("MESSAGE_BATCH_WAIT_TIME") {
            if let Ok(secs) = v.parse() {
                self.batching.delay_seconds = secs;
            }
        }
        if let Some(v) = env_nonempty("MAX_CONCURRENT_BATCHES") {
            if let Ok(n) = v.parse() {
                self.batching.max_concurrent_batches = n;
            }
        }
        if let Some(v) = env_nonempty("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = env_nonempty("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env_nonempty("SUPABASE_URL") {
            self.storage.rest_url = v;
            self.storage.mode = StorageMode::Rest;
        }
        if let Some(v) = env_nonempty("SUPABASE_ANON_KEY") {
            self.storage.rest_api_key = v;
        }
        if let Some(v) = env_nonempty("GHL_API_KEY") {
            self.delivery.api_key = v;
            self.delivery.mode = DeliveryMode::Http;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let delay = self.batching.delay();
        if delay < MIN_DELAY || delay > MAX_DELAY {
            return Err(anyhow::anyhow!(
                "batching.delay_seconds must be between {} and {} (got {})",
                MIN_DELAY.as_secs(),
                MAX_DELAY.as_secs(),
                self.batching.delay_seconds
            ));
        }
        if self.batching.max_concurrent_batches == 0 {
            return Err(anyhow::anyhow!(
                "batching.max_concurrent_batches must be > 0"
            ));
        }
        if self.storage.mode == StorageMode::Rest
            && (self.storage.rest_url.trim().is_empty()
                || self.storage.rest_api_key.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "storage.rest_url and storage.rest_api_key are required in rest mode"
            ));
        }
        if self.delivery.mode == DeliveryMode::Http && self.delivery.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "delivery.api_key is required in http delivery mode"
            ));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".burstline").join("config.toml")
}
