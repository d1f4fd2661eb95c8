use serde::{Deserialize, Serialize};

/// HTTP client configuration for upstream requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpClientConfig {
    pub pool_max_idle_per_host: Option<usize>,
    pub pool_idle_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: Some(32),
            pool_idle_timeout_secs: Some(90),
            connect_timeout_secs: Some(10),
        }
    }
}

impl HttpClientConfig {
    /// Validate HTTP client configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(max_idle) = self.pool_max_idle_per_host {
            if max_idle == 0 {
                return Err(anyhow::anyhow!(
                    "HTTP client pool_max_idle_per_host must be greater than 0"
                ));
            }
        }

        if let Some(idle_timeout) = self.pool_idle_timeout_secs {
            if idle_timeout == 0 {
                return Err(anyhow::anyhow!(
                    "HTTP client pool_idle_timeout_secs must be greater than 0"
                ));
            }
        }

        if let Some(connect_timeout) = self.connect_timeout_secs {
            if connect_timeout == 0 {
                return Err(anyhow::anyhow!(
                    "HTTP client connect_timeout_secs must be greater than 0"
                ));
            }
        }

        Ok(())
    }
}
