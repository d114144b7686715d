// lookup.rs — Resource liveness checks used when pruning exemptions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ishield_policy::ResourceIdentity;

use crate::error::ExemptionError;

/// Answers whether a resource still exists.
pub trait ResourceLookup: Send + Sync {
    fn exists(&self, identity: &ResourceIdentity) -> Result<bool, ExemptionError>;
}

/// Looks for a manifest file per resource:
///
/// `<root>/<group or "core">/<version>/<kind>/<namespace or "_cluster">/<name>.{json,yaml,yml}`
#[derive(Debug, Clone)]
pub struct DirectoryResourceLookup {
    root: PathBuf,
}

impl DirectoryResourceLookup {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory that would hold the manifest for `identity`.
    pub fn resource_dir(&self, identity: &ResourceIdentity) -> PathBuf {
        let group = if identity.api_group.is_empty() {
            "core"
        } else {
            identity.api_group.as_str()
        };
        let namespace = if identity.namespace.is_empty() {
            "_cluster"
        } else {
            identity.namespace.as_str()
        };
        self.root
            .join(group)
            .join(&identity.api_version)
            .join(&identity.kind)
            .join(namespace)
    }
}

impl ResourceLookup for DirectoryResourceLookup {
    fn exists(&self, identity: &ResourceIdentity) -> Result<bool, ExemptionError> {
        let parts = [
            &identity.api_group,
            &identity.api_version,
            &identity.kind,
            &identity.namespace,
            &identity.name,
        ];
        // No manifest can exist for an identity that cannot be a path.
        if parts.iter().any(|p| p.contains('/') || p.as_str() == "..") || identity.name.is_empty() {
            tracing::debug!(resource = %identity, "identity is not addressable; treating as absent");
            return Ok(false);
        }
        let dir = self.resource_dir(identity);
        for ext in ["json", "yaml", "yml"] {
            let path = dir.join(format!("{}.{}", identity.name, ext));
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => return Ok(true),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ExemptionError::Io { path, source }),
            }
        }
        Ok(false)
    }
}

/// In-process set of live resources.
#[derive(Debug, Default)]
pub struct MemoryResourceLookup {
    live: Mutex<HashSet<ResourceIdentity>>,
}

impl MemoryResourceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: ResourceIdentity) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity);
    }

    pub fn remove(&self, identity: &ResourceIdentity) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identity);
    }
}

impl ResourceLookup for MemoryResourceLookup {
    fn exists(&self, identity: &ResourceIdentity) -> Result<bool, ExemptionError> {
        Ok(self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(group: &str, namespace: &str, name: &str) -> ResourceIdentity {
        ResourceIdentity {
            api_group: group.into(),
            api_version: "v1".into(),
            kind: "Thing".into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[test]
    fn directory_lookup_finds_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = DirectoryResourceLookup::new(dir.path());
        let namespaced = identity("apps", "prod", "web");
        let cluster = identity("", "", "node-1");

        std::fs::create_dir_all(lookup.resource_dir(&namespaced)).unwrap();
        std::fs::write(lookup.resource_dir(&namespaced).join("web.yaml"), "kind: Thing").unwrap();
        std::fs::create_dir_all(lookup.resource_dir(&cluster)).unwrap();
        std::fs::write(lookup.resource_dir(&cluster).join("node-1.json"), "{}").unwrap();

        assert!(lookup.exists(&namespaced).unwrap());
        assert!(lookup.exists(&cluster).unwrap());
        assert!(dir.path().join("core/v1/Thing/_cluster/node-1.json").is_file());
        assert!(!lookup.exists(&identity("apps", "prod", "gone")).unwrap());
    }

    #[test]
    fn unaddressable_identities_do_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.json"), "{}").unwrap();
        let lookup = DirectoryResourceLookup::new(dir.path().join("resources"));
        assert!(!lookup.exists(&identity("apps", "..", "x")).unwrap());
        assert!(!lookup.exists(&identity("apps", "prod", "")).unwrap());
        assert!(!lookup.exists(&identity("apps", "prod", "../../../x")).unwrap());
    }

    #[test]
    fn memory_lookup_tracks_inserts_and_removals() {
        let lookup = MemoryResourceLookup::new();
        let id = identity("apps", "prod", "web");
        assert!(!lookup.exists(&id).unwrap());
        lookup.insert(id.clone());
        assert!(lookup.exists(&id).unwrap());
        lookup.remove(&id);
        assert!(!lookup.exists(&id).unwrap());
    }
}
