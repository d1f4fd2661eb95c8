use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::router::DEFAULT_ROUTER;

/// Forwarding pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Deadline for one outbound proxy call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum attempts while the pipeline observes server errors
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Name reserved for the default virtual router
    #[serde(default = "default_router_name")]
    pub default_router: String,
    /// Language used for internal endpoint paths
    #[serde(default = "default_lang")]
    pub default_lang: String,
    /// Language prefixes stripped from paths before routing
    #[serde(default = "default_supported_langs")]
    pub supported_langs: Vec<String>,
    /// Maximum registration body size in bytes
    #[serde(default = "default_body_limit_size")]
    pub body_limit_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            default_router: default_router_name(),
            default_lang: default_lang(),
            supported_langs: default_supported_langs(),
            body_limit_size: default_body_limit_size(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow::anyhow!("proxy timeout_secs must be greater than 0"));
        }
        if self.retries == 0 {
            return Err(anyhow::anyhow!("proxy retries must be greater than 0"));
        }
        if self.body_limit_size == 0 {
            return Err(anyhow::anyhow!(
                "proxy body_limit_size must be greater than 0"
            ));
        }
        if self.default_router.is_empty() {
            return Err(anyhow::anyhow!("proxy default_router must not be empty"));
        }
        if self.supported_langs.is_empty() {
            return Err(anyhow::anyhow!(
                "proxy supported_langs must not be empty"
            ));
        }
        if !self.supported_langs.contains(&self.default_lang) {
            return Err(anyhow::anyhow!(
                "proxy default_lang {:?} must be one of supported_langs",
                self.default_lang
            ));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_retries() -> u32 {
    5
}

fn default_router_name() -> String {
    DEFAULT_ROUTER.to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_supported_langs() -> Vec<String> {
    vec!["en".to_string(), "pt".to_string()]
}

fn default_body_limit_size() -> usize {
    1_048_576
}

/// Client re-register loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Seconds between re-register passes over the stored routes
    #[serde(default = "default_reregister_interval_secs")]
    pub reregister_interval_secs: u64,
    /// Milliseconds between attempts while the front door refuses connections
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reregister_interval_secs: default_reregister_interval_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ClientConfig {
    pub fn reregister_interval(&self) -> Duration {
        Duration::from_secs(self.reregister_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reregister_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "client reregister_interval_secs must be greater than 0"
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(anyhow::anyhow!(
                "client retry_delay_ms must be greater than 0"
            ));
        }
        Ok(())
    }
}

fn default_reregister_interval_secs() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    250
}
