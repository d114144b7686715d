// verifier.rs — Seams to the external signature verifiers.
//
// Cryptographic verification is not done here. The engine builds a
// VerifyOptions value, hands it to a ResourceVerifier and interprets the
// VerifyResult. Image signatures go through ImageVerifier the same way, and
// key secrets are located through KeySecretResolver.

use std::path::{Path, PathBuf};

use ishield_mapnode::DiffResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ImageProfile;
use crate::matcher::ObjectFieldBindingList;
use crate::resource::Resource;

/// A verifier failed to produce a result. Carried into deny messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct VerifierError(pub String);

impl VerifierError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Options passed to the resource verifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature_resource_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provenance_resource_ref: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_paths: Vec<String>,
    #[serde(default)]
    pub ignore_fields: ObjectFieldBindingList,
    /// Accepted signer identities; empty accepts any valid signer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dry_run_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_key_domain: Option<String>,
    #[serde(default)]
    pub check_dry_run_for_apply: bool,
}

impl VerifyOptions {
    /// Key paths as one comma-separated string.
    pub fn key_path(&self) -> String {
        self.key_paths.join(",")
    }
}

/// Outcome of a resource verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub in_scope: bool,
    pub verified: bool,
    #[serde(default)]
    pub signer: String,
    #[serde(default)]
    pub diff: Option<DiffResult>,
}

/// Outcome for one image in a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageVerifyResult {
    pub image: String,
    pub in_scope: bool,
    pub verified: bool,
    #[serde(default)]
    pub fail_reason: String,
}

pub trait ResourceVerifier: Send + Sync {
    fn verify(&self, resource: &Resource, options: &VerifyOptions)
        -> Result<VerifyResult, VerifierError>;
}

pub trait ImageVerifier: Send + Sync {
    fn verify(
        &self,
        resource: &Resource,
        profile: &ImageProfile,
    ) -> Result<Vec<ImageVerifyResult>, VerifierError>;
}

/// Locates a key secret and returns a local path to the key material.
pub trait KeySecretResolver: Send + Sync {
    fn resolve(&self, namespace: &str, name: &str) -> Result<PathBuf, VerifierError>;
}

/// Resolves key secrets from a directory laid out as `<root>/<namespace>/<name>`.
#[derive(Debug, Clone)]
pub struct KeyDirResolver {
    root: PathBuf,
}

impl KeyDirResolver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl KeySecretResolver for KeyDirResolver {
    fn resolve(&self, namespace: &str, name: &str) -> Result<PathBuf, VerifierError> {
        if name.contains('/') || namespace.contains('/') || name == ".." || namespace == ".." {
            return Err(VerifierError(format!(
                "invalid key secret reference {}/{}",
                namespace, name
            )));
        }
        let path = self.root.join(namespace).join(name);
        if path.exists() {
            Ok(path)
        } else {
            Err(VerifierError(format!(
                "key secret {}/{} not found at {}",
                namespace,
                name,
                path.display()
            )))
        }
    }
}

/// Returns the same result for every resource.
///
/// Used when no verifier service is wired in: the default result reports the
/// resource in scope and unsigned, so every protected change is denied.
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    result: Result<VerifyResult, VerifierError>,
}

impl StaticVerifier {
    pub fn new(result: VerifyResult) -> Self {
        Self { result: Ok(result) }
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            result: Err(VerifierError::new(msg)),
        }
    }

    pub fn unsigned() -> Self {
        Self::new(VerifyResult {
            in_scope: true,
            ..Default::default()
        })
    }
}

impl ResourceVerifier for StaticVerifier {
    fn verify(&self, _: &Resource, _: &VerifyOptions) -> Result<VerifyResult, VerifierError> {
        self.result.clone()
    }
}

/// Image verifier that marks every in-scope image from the pod template as
/// verified or not according to a fixed list of trusted images.
#[derive(Debug, Clone, Default)]
pub struct StaticImageVerifier {
    trusted: Vec<String>,
}

impl StaticImageVerifier {
    pub fn new(trusted: Vec<String>) -> Self {
        Self { trusted }
    }
}

impl ImageVerifier for StaticImageVerifier {
    fn verify(
        &self,
        resource: &Resource,
        profile: &ImageProfile,
    ) -> Result<Vec<ImageVerifyResult>, VerifierError> {
        Ok(container_images(resource)
            .into_iter()
            .map(|image| {
                let in_scope = profile.in_scope(&image);
                let verified = self.trusted.iter().any(|t| t == &image);
                let fail_reason = if in_scope && !verified {
                    format!("no trusted signature for image {}", image)
                } else {
                    String::new()
                };
                ImageVerifyResult {
                    image,
                    in_scope,
                    verified,
                    fail_reason,
                }
            })
            .collect())
    }
}

/// Container images referenced by a pod or a pod template.
pub fn container_images(resource: &Resource) -> Vec<String> {
    let node = resource.node();
    let spec = node
        .get_path(&["spec", "template", "spec"])
        .or_else(|| node.get("spec"));
    let Some(spec) = spec else {
        return Vec::new();
    };
    ["initContainers", "containers"]
        .iter()
        .filter_map(|key| spec.get(key).and_then(|n| n.as_list()))
        .flatten()
        .filter_map(|c| c.get("image").and_then(|i| i.as_str()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ishield_mapnode::Node;

    fn deployment() -> Resource {
        Resource::new(
            Node::from_bytes(
                br#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"web"},
                    "spec":{"template":{"spec":{
                        "initContainers":[{"name":"init","image":"registry.example.com/init:1"}],
                        "containers":[{"name":"app","image":"registry.example.com/app:1"},
                                      {"name":"side","image":"docker.io/proxy:2"}]}}}}"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn key_path_joins_with_comma() {
        let opts = VerifyOptions {
            key_paths: vec!["/k/a".into(), "/k/b".into()],
            ..Default::default()
        };
        assert_eq!(opts.key_path(), "/k/a,/k/b");
    }

    #[test]
    fn key_dir_resolver_finds_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shield")).unwrap();
        std::fs::write(dir.path().join("shield").join("keyring"), "pub").unwrap();
        let resolver = KeyDirResolver::new(dir.path());
        assert_eq!(
            resolver.resolve("shield", "keyring").unwrap(),
            dir.path().join("shield").join("keyring")
        );
        assert!(resolver.resolve("shield", "missing").is_err());
        assert!(resolver.resolve("..", "keyring").is_err());
    }

    #[test]
    fn container_images_reads_pod_template() {
        assert_eq!(
            container_images(&deployment()),
            vec![
                "registry.example.com/init:1".to_string(),
                "registry.example.com/app:1".to_string(),
                "docker.io/proxy:2".to_string()
            ]
        );
    }

    #[test]
    fn static_image_verifier_flags_untrusted_in_scope_images() {
        let profile = ImageProfile {
            matches: vec!["registry.example.com/*".into()],
            exclude: vec![],
        };
        let verifier = StaticImageVerifier::new(vec!["registry.example.com/init:1".into()]);
        let results = verifier.verify(&deployment(), &profile).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].verified);
        assert!(results[1].in_scope && !results[1].verified);
        assert!(results[1].fail_reason.contains("registry.example.com/app:1"));
        assert!(!results[2].in_scope);
    }

    #[test]
    fn verify_result_reads_camel_case_json() {
        let r: VerifyResult =
            serde_json::from_str(r#"{"inScope":true,"verified":true,"signer":"ops@example.com"}"#)
                .unwrap();
        assert!(r.in_scope && r.verified);
        assert_eq!(r.signer, "ops@example.com");
        assert!(r.diff.is_none());
    }
}
