//! Service definitions for the managed environment.

use serde::{Deserialize, Serialize};

/// One externally reachable service dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Compose service name.
    pub name: String,

    /// Prefix of the `<PREFIX>_HOST` / `<PREFIX>_PORT` parameters.
    pub env_prefix: String,

    /// Host the tests reach the service at.
    pub host: String,

    /// Port the tests reach the service at.
    pub port: u16,
}

impl ServiceSpec {
    pub fn new(
        name: impl Into<String>,
        env_prefix: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            env_prefix: env_prefix.into(),
            host: host.into(),
            port,
        }
    }

    /// `(KEY, VALUE)` pairs this service contributes to the parameters file.
    pub fn params(&self) -> [(String, String); 2] {
        [
            (format!("{}_HOST", self.env_prefix), self.host.clone()),
            (format!("{}_PORT", self.env_prefix), self.port.to_string()),
        ]
    }
}

/// Cache, primary and secondary search index, and log relay.
pub fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("redis", "REDIS", "redis", 6379),
        ServiceSpec::new("elasticsearch", "ES", "elasticsearch", 9200),
        ServiceSpec::new(
            "elasticsearch-secondary",
            "ES_SECONDARY",
            "elasticsearch-secondary",
            9200,
        ),
        ServiceSpec::new("logstash", "LS", "logstash", 5044),
    ]
}
