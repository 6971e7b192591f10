/*!
Platform configuration.

Loaded from JSON, every field optional:

```json
{
    "controller": "c0",
    "controller_port": 6653,
    "ip_base": "10.0.0.0/8",
    "runner": {"kind": "ssh", "host": "mininet-vm", "username": "mininet", "timeout": "10s"}
}
```
*/

use std::{path::Path, time::Duration};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::{
    emulator::{HostAddressPool, NetnsEmulator, netns::DEFAULT_CONTROLLER_PORT},
    runner::{CommandRunner, LocalRunner, RunnerError, SshRunner},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {0}: {1}")]
    Io(String, String),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Name of the controller installed by `pre_build`.
    pub controller: String,
    /// First port controllers listen on.
    pub controller_port: u16,
    /// Network host addresses are taken from.
    pub ip_base: IpNetwork,
    pub runner: RunnerConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            controller: "c0".to_string(),
            controller_port: DEFAULT_CONTROLLER_PORT,
            ip_base: HostAddressPool::default().base(),
            runner: RunnerConfig::Local,
        }
    }
}

impl PlatformConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Builds a namespace emulator on the configured host, connecting to it if remote.
    pub fn netns_emulator(&self) -> Result<NetnsEmulator<Box<dyn CommandRunner>>, ConfigError> {
        Ok(NetnsEmulator::new(
            self.runner.connect()?,
            HostAddressPool::new(self.ip_base),
            self.controller_port,
        ))
    }
}

/// Where emulator commands run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunnerConfig {
    Local,
    Ssh {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        /// Falls back to ssh-agent when absent.
        #[serde(default)]
        password: Option<String>,
        #[serde(
            default,
            deserialize_with = "deserialize_duration",
            serialize_with = "serialize_duration"
        )]
        timeout: Option<Duration>,
    },
}

impl RunnerConfig {
    pub fn connect(&self) -> Result<Box<dyn CommandRunner>, ConfigError> {
        match self {
            RunnerConfig::Local => Ok(Box::new(LocalRunner::new())),
            RunnerConfig::Ssh {
                host,
                port,
                username,
                password,
                timeout,
            } => {
                let mut runner = match password {
                    Some(password) => SshRunner::new_with_password(
                        username.clone(),
                        host.clone(),
                        password.clone(),
                        *port,
                    ),
                    None => SshRunner::new_with_agent(username.clone(), host.clone(), *port),
                };
                if let Some(timeout) = timeout {
                    runner = runner.with_timeout(*timeout);
                }
                runner.connect()?;
                Ok(Box::new(runner))
            }
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn serialize_duration<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match duration {
        Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PlatformConfig::default());
        assert_eq!(config.controller, "c0");
        assert_eq!(config.controller_port, 6653);
        assert_eq!(config.ip_base.to_string(), "10.0.0.0/8");
        assert_eq!(config.runner, RunnerConfig::Local);
    }

    #[test]
    fn test_ssh_runner() {
        let json = r#"{
            "ip_base": "192.168.0.0/16",
            "runner": {"kind": "ssh", "host": "mininet-vm", "username": "mininet", "timeout": "1m 30s"}
        }"#;
        let config = PlatformConfig::from_json_str(json).unwrap();
        assert_eq!(config.ip_base.to_string(), "192.168.0.0/16");
        assert_eq!(
            config.runner,
            RunnerConfig::Ssh {
                host: "mininet-vm".to_string(),
                port: 22,
                username: "mininet".to_string(),
                password: None,
                timeout: Some(Duration::from_secs(90)),
            }
        );

        let round = serde_json::to_string(&config).unwrap();
        assert_eq!(PlatformConfig::from_json_str(&round).unwrap(), config);
    }

    #[test]
    fn test_invalid_config() {
        let err = PlatformConfig::from_json_str(r#"{"runner": {"kind": "telnet"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = PlatformConfig::from_json_str(
            r#"{"runner": {"kind": "ssh", "host": "h", "username": "u", "timeout": "soon"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(matches!(
            PlatformConfig::from_path("/nonexistent/platform.json"),
            Err(ConfigError::Io(..))
        ));
    }
}
