// config.rs — Layered request configuration.
//
// Two documents drive every decision:
//
// - RequestHandlerConfig: cluster-wide settings, including the
//   RequestFilterProfile (skip users, skip objects, ignore fields) and the
//   default enforcement action.
// - ManifestIntegrityConstraint: one policy rule, with its scope, skip
//   lists, signature references, keys, verify options and action.
//
// Both are YAML with camelCase keys. They are read once per request and never
// mutated by the engine.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::matcher::{ObjectFieldBindingList, ObjectReferenceList, ObjectUserBindingList};
use crate::verifier::VerifyOptions;
use ishield_mapnode::Pattern;

/// Cluster-wide skip and ignore rules applied to every constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestFilterProfile {
    #[serde(default)]
    pub skip_objects: ObjectReferenceList,
    #[serde(default)]
    pub skip_users: ObjectUserBindingList,
    #[serde(default)]
    pub ignore_fields: ObjectFieldBindingList,
}

/// Enforcement action. Only `enforce` blocks; anything else informs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionConfig {
    #[serde(default)]
    pub mode: String,
}

impl ActionConfig {
    pub fn new(mode: impl Into<String>) -> Self {
        Self { mode: mode.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SideEffectConfig {
    #[serde(default)]
    pub create_deny_event: bool,
}

/// Where skip-user allows are reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionReporterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
}

/// Cluster-wide request handler settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestHandlerConfig {
    #[serde(default)]
    pub request_filter_profile: RequestFilterProfile,
    #[serde(default)]
    pub default_constraint_action: ActionConfig,
    #[serde(default)]
    pub side_effect: SideEffectConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub decision_reporter: DecisionReporterConfig,
}

impl RequestHandlerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        load_yaml(path)
    }

    /// Load from `path` if it exists, otherwise return the empty config.
    pub fn load_or_default(path: &Path) -> Result<Self, PolicyError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "request handler config not found; using empty config");
            Ok(Self::default())
        }
    }
}

/// A namespaced object reference (`name` + `namespace`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl ResourceRef {
    /// `k8s://ConfigMap/<namespace>/<name>`, or `None` unless both are set.
    pub fn as_uri(&self) -> Option<String> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return None;
        }
        Some(format!("k8s://ConfigMap/{}/{}", self.namespace, self.name))
    }
}

/// Where signatures for protected resources are found.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRef {
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub signature_resource_ref: ResourceRef,
    #[serde(default)]
    pub provenance_resource_ref: ResourceRef,
}

/// A verification key stored as a secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    #[serde(default)]
    pub key_secret_name: String,
    #[serde(default)]
    pub key_secret_namespace: String,
}

/// Images that must carry verified signatures.
///
/// The profile is enabled when at least one `match` pattern is set. An image
/// is in scope when it matches a `match` pattern and no `exclude` pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageProfile {
    #[serde(default, rename = "match")]
    pub matches: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ImageProfile {
    pub fn enabled(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn in_scope(&self, image: &str) -> bool {
        self.matches.iter().any(|p| Pattern::new(p).matches(image))
            && !self.exclude.iter().any(|p| Pattern::new(p).matches(image))
    }
}

/// One integrity policy rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIntegrityConstraint {
    #[serde(default)]
    pub constraint_name: String,
    /// Objects this constraint protects.
    #[serde(default, alias = "inScopeObjects")]
    pub object_selector: ObjectReferenceList,
    #[serde(default)]
    pub skip_objects: ObjectReferenceList,
    #[serde(default)]
    pub skip_users: ObjectUserBindingList,
    /// Users that are always checked, even if a skip-user rule matches.
    #[serde(default)]
    pub in_scope_users: ObjectUserBindingList,
    #[serde(default)]
    pub ignore_fields: ObjectFieldBindingList,
    #[serde(default)]
    pub signature_ref: SignatureRef,
    #[serde(default)]
    pub key_configs: Vec<KeyConfig>,
    #[serde(default)]
    pub verify_option: VerifyOptions,
    /// Unset means the handler's default action applies.
    #[serde(default)]
    pub action: Option<ActionConfig>,
    #[serde(default)]
    pub image_profile: ImageProfile,
}

impl ManifestIntegrityConstraint {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        load_yaml(path)
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, PolicyError> {
    let data = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&data).map_err(|e| PolicyError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HANDLER_YAML: &str = r#"
requestFilterProfile:
  skipUsers:
  - users: ["system:serviceaccount:kube-system:*"]
  skipObjects:
  - kind: Event
  ignoreFields:
  - objects:
    - kind: Deployment
    fields: ["spec.replicas"]
defaultConstraintAction:
  mode: inform
sideEffect:
  createDenyEvent: true
log:
  level: debug
decisionReporter:
  enabled: true
  path: /tmp/decisions.jsonl
"#;

    const CONSTRAINT_YAML: &str = r#"
constraintName: deployment-constraint
inScopeObjects:
- kind: Deployment
  namespace: prod
inScopeUsers:
- users: ["alice"]
signatureRef:
  imageRef: registry.example.com/sig:latest
  signatureResourceRef:
    name: sig-cm
    namespace: prod
keyConfigs:
- keySecretName: keyring
  keySecretNamespace: shield
action:
  mode: enforce
imageProfile:
  match: ["registry.example.com/*"]
  exclude: ["registry.example.com/dev/*"]
"#;

    #[test]
    fn handler_config_parses_all_sections() {
        let cfg = RequestHandlerConfig::from_yaml_str(HANDLER_YAML).unwrap();
        assert_eq!(cfg.request_filter_profile.skip_users.0.len(), 1);
        assert_eq!(cfg.request_filter_profile.skip_objects.0[0].kind, "Event");
        assert_eq!(cfg.default_constraint_action.mode, "inform");
        assert!(cfg.side_effect.create_deny_event);
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.log.format, "text");
        assert!(cfg.decision_reporter.enabled);
    }

    #[test]
    fn constraint_accepts_in_scope_objects_alias() {
        let c = ManifestIntegrityConstraint::from_yaml_str(CONSTRAINT_YAML).unwrap();
        assert_eq!(c.constraint_name, "deployment-constraint");
        assert_eq!(c.object_selector.0[0].namespace, "prod");
        assert_eq!(c.action, Some(ActionConfig::new("enforce")));
        assert_eq!(
            c.signature_ref.signature_resource_ref.as_uri().as_deref(),
            Some("k8s://ConfigMap/prod/sig-cm")
        );
        assert_eq!(c.signature_ref.provenance_resource_ref.as_uri(), None);
    }

    #[test]
    fn missing_action_is_none() {
        let c = ManifestIntegrityConstraint::from_yaml_str("constraintName: x").unwrap();
        assert!(c.action.is_none());
        assert!(!c.image_profile.enabled());
    }

    #[test]
    fn image_profile_scope_honours_exclude() {
        let c = ManifestIntegrityConstraint::from_yaml_str(CONSTRAINT_YAML).unwrap();
        let profile = &c.image_profile;
        assert!(profile.enabled());
        assert!(profile.in_scope("registry.example.com/app:1.0"));
        assert!(!profile.in_scope("registry.example.com/dev/app:1.0"));
        assert!(!profile.in_scope("docker.io/library/nginx"));
    }

    #[test]
    fn load_reports_path_on_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "constraintName: [unterminated").unwrap();
        match ManifestIntegrityConstraint::load(file.path()) {
            Err(PolicyError::Config { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn load_or_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RequestHandlerConfig::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg, RequestHandlerConfig::default());
    }
}
