use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::de::Error;
use serde::{Deserialize, Deserializer};

use crate::hooks::{InvalidRequest, WebhookRegisterRequest};

pub const CONFIG_FILE_PATH: &str = "bbs-bridge.toml";

/// Configuration of the bridge, loaded from a `bbs-bridge.toml` file.
#[derive(serde::Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Identifies the Bitbucket Server instance in the pull request store.
    pub server_id: String,
    /// Base URL of the Bitbucket Server instance.
    pub base_url: String,
    /// Base URL of the orchestrator that receives the webhooks.
    pub orchestrator_url: String,
    pub webhook_name: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(
        default = "default_refresh_interval",
        deserialize_with = "deserialize_duration_from_secs"
    )]
    pub refresh_interval: Duration,
    /// Always read the whole list of open pull requests during a refresh.
    #[serde(default)]
    pub full_refresh: bool,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub project_key: String,
    pub slug: String,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default = "default_true")]
    pub trigger_on_push: bool,
    #[serde(default = "default_true")]
    pub trigger_on_pr: bool,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Webhook that the orchestrator needs for `repository`.
    pub fn register_request(
        &self,
        repository: &RepositoryConfig,
    ) -> Result<WebhookRegisterRequest, InvalidRequest> {
        WebhookRegisterRequest::builder(&repository.project_key, &repository.slug)
            .orchestrator_url(&self.orchestrator_url)
            .name(&self.webhook_name)
            .mirror(repository.mirror)
            .trigger_on_push(repository.trigger_on_push)
            .trigger_on_pr(repository.trigger_on_pr)
            .build()
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_true() -> bool {
    true
}

fn deserialize_duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = u64::deserialize(deserializer)?;
    if seconds == 0 {
        return Err(Error::custom("refresh interval must be at least one second"));
    }
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::BridgeConfig;

    const MINIMAL: &str = r#"
server_id = "bbs"
base_url = "https://bitbucket.example.com"
orchestrator_url = "https://ci.example.com/"
webhook_name = "ci"
"#;

    #[test]
    fn defaults() {
        let config = BridgeConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert!(!config.full_refresh);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn repositories() {
        let content = format!(
            r#"{MINIMAL}
refresh_interval = 60

[[repositories]]
project_key = "PROJ"
slug = "repo"

[[repositories]]
project_key = "MIR"
slug = "mirrored"
mirror = true
trigger_on_pr = false
"#
        );
        let config = BridgeConfig::parse(&content).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        insta::assert_debug_snapshot!(config.repositories, @r###"
        [
            RepositoryConfig {
                project_key: "PROJ",
                slug: "repo",
                mirror: false,
                trigger_on_push: true,
                trigger_on_pr: true,
            },
            RepositoryConfig {
                project_key: "MIR",
                slug: "mirrored",
                mirror: true,
                trigger_on_push: true,
                trigger_on_pr: false,
            },
        ]
        "###);
    }

    #[test]
    fn register_request() {
        let content = format!(
            r#"{MINIMAL}
[[repositories]]
project_key = "PROJ"
slug = "repo"
trigger_on_pr = false
"#
        );
        let config = BridgeConfig::parse(&content).unwrap();
        let request = config.register_request(&config.repositories[0]).unwrap();
        assert_eq!(request.project_key(), "PROJ");
        assert!(request.trigger_on_push());
        assert!(!request.trigger_on_pr());
        assert_eq!(
            request.callback_url(),
            "https://ci.example.com/bitbucket-server-webhook/trigger"
        );
    }

    #[test]
    fn zero_refresh_interval() {
        let content = format!("{MINIMAL}\nrefresh_interval = 0\n");
        assert!(BridgeConfig::parse(&content).is_err());
    }

    #[test]
    fn unknown_field() {
        let content = format!("{MINIMAL}\nwebhook_names = \"typo\"\n");
        assert!(BridgeConfig::parse(&content).is_err());
    }

    #[test]
    fn missing_field() {
        assert!(BridgeConfig::parse("server_id = \"bbs\"").is_err());
    }
}
