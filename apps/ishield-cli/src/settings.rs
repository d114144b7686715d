// settings.rs — Process settings (`ishield.toml`).
//
// Paths are resolved relative to the settings file's directory so a settings
// file can travel with its data.

use std::path::{Path, PathBuf};

use anyhow::Context;
use ishield_policy::DEFAULT_POD_NAMESPACE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShieldSettings {
    /// Namespace for verifier dry runs, key secrets without a namespace, and
    /// deny events on cluster-scoped objects.
    pub pod_namespace: String,
    /// RequestHandlerConfig YAML.
    pub request_handler_config: PathBuf,
    /// Key secrets, laid out as `<key_dir>/<namespace>/<name>`.
    pub key_dir: PathBuf,
    /// JSONL log of denials, tailed by the aggregator.
    pub events_file: PathBuf,
    /// One JSON file per deny event.
    pub deny_event_dir: PathBuf,
    /// One JSON file per exemption record.
    pub exemption_dir: PathBuf,
    /// Live resource manifests used to prune exemptions.
    pub resource_dir: PathBuf,
    /// Aggregation interval in seconds.
    pub interval_seconds: Option<String>,
}

impl Default for ShieldSettings {
    fn default() -> Self {
        Self {
            pod_namespace: DEFAULT_POD_NAMESPACE.to_string(),
            request_handler_config: PathBuf::from("request-handler-config.yaml"),
            key_dir: PathBuf::from("keys"),
            events_file: PathBuf::from("events.jsonl"),
            deny_event_dir: PathBuf::from("deny-events"),
            exemption_dir: PathBuf::from("exemptions"),
            resource_dir: PathBuf::from("resources"),
            interval_seconds: None,
        }
    }
}

impl ShieldSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        let settings: ShieldSettings = toml::from_str(&content)
            .with_context(|| format!("invalid settings {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(settings.relative_to(base))
    }

    /// Load `path` if it exists; otherwise defaults relative to the current
    /// directory.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn relative_to(mut self, base: &Path) -> Self {
        for path in [
            &mut self.request_handler_config,
            &mut self.key_dir,
            &mut self.events_file,
            &mut self.deny_event_dir,
            &mut self.exemption_dir,
            &mut self.resource_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}
