//! The parameters file integration and system tests read their service
//! endpoints from: one `KEY=VALUE` pair per line.

use std::path::Path;

use tracing::debug;

use crate::error::EnvError;
use crate::services::ServiceSpec;
use crate::Result;

/// Ordered `KEY=VALUE` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentParams {
    entries: Vec<(String, String)>,
}

impl EnvironmentParams {
    /// Endpoint pairs for `services`, followed by `extras`.
    pub fn from_services(services: &[ServiceSpec], extras: &[(String, String)]) -> Self {
        let mut params = EnvironmentParams::default();
        for service in services {
            for (key, value) in service.params() {
                params.set(key, value);
            }
        }
        for (key, value) in extras {
            params.set(key.clone(), value.clone());
        }
        params
    }

    /// Insert or replace a pair, keeping first-insertion order.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect()
    }

    /// Parse `KEY=VALUE` lines; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut params = EnvironmentParams::default();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    params.set(key.trim(), value.trim());
                }
                _ => {
                    return Err(EnvError::InvalidParams {
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            }
        }
        Ok(params)
    }

    /// Overwrite `path` with these parameters, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        debug!(path = %path.display(), entries = self.len(), "wrote environment parameters");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}
