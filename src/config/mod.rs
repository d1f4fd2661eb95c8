//! Configuration loading for the drouter front door.
//!
//! TOML files with `${VAR}` / `${VAR:-default}` environment expansion and
//! per-section validation. Every section has defaults, so a minimal file
//! (or none at all) yields a runnable configuration.

pub mod http_client;
pub mod proxy;
pub mod server;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{info, warn};

pub use http_client::HttpClientConfig;
pub use proxy::{ClientConfig, ProxyConfig};
pub use server::{BucketConfig, ServerConfig};

// Re-export external dependencies that are part of the config API
pub use crate::tls::TlsConfig;

/// drouter main configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission bucket sizing and deadline
    #[serde(default)]
    pub bucket: BucketConfig,
    /// Forwarding pipeline knobs (timeouts, retries, languages)
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Upstream HTTP client connection pool (optional)
    pub http_client: Option<HttpClientConfig>,
    /// TLS options for outbound calls (optional)
    pub tls: Option<TlsConfig>,
    /// Client re-register loop settings (optional)
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from file with environment variable expansion
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;

        // Expand environment variables in the content
        let expanded_content = expand_env_vars(&content);

        let config: Config = toml::from_str(&expanded_content)?;
        config.validate()?;

        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.bucket.validate()?;
        self.proxy.validate()?;

        if let Some(http_client) = &self.http_client {
            http_client.validate()?;
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        if let Some(client) = &self.client {
            client.validate()?;
        }

        Ok(())
    }
}

/// Expand environment variables in configuration content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_expr = &result[start + 2..start + end];
            let replacement = if let Some(default_pos) = var_expr.find(":-") {
                let var_name = &var_expr[..default_pos];
                let default_value = &var_expr[default_pos + 2..];
                env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            } else {
                env::var(var_expr).unwrap_or_else(|_| {
                    warn!(
                        "Environment variable '{}' not found, using empty string",
                        var_expr
                    );
                    String::new()
                })
            };

            result.replace_range(start..start + end + 1, &replacement);
        } else {
            break; // Malformed ${VAR expression
        }
    }

    result
}
