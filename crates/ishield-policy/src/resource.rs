// resource.rs — Admission requests and the resource view used by the engine.
//
// The admission request mirrors the Kubernetes AdmissionRequest wire shape.
// The object bodies stay raw until the handler parses them, so a malformed
// body is reported as an input error instead of failing request decoding.

use std::fmt;

use ishield_mapnode::{Node, NodeMap};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::PolicyError;

/// The admission operation being performed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group/version/kind of the requested object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

/// Group/version/resource (plural name) of the requested object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

/// The requesting identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// An inbound admission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub kind: GroupVersionKind,
    #[serde(default)]
    pub resource: GroupVersionResource,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub operation: Operation,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default)]
    pub object: Option<Box<RawValue>>,
    #[serde(default)]
    pub old_object: Option<Box<RawValue>>,
}

impl AdmissionRequest {
    /// Build a request from JSON object bodies, filling kind, name and
    /// namespace from the new object's metadata.
    pub fn from_objects(
        operation: Operation,
        username: &str,
        object: &str,
        old_object: Option<&str>,
    ) -> Result<Self, PolicyError> {
        let resource = Resource::parse(object.as_bytes(), "object")?;
        let object = RawValue::from_string(object.to_string())?;
        let old_object = old_object
            .map(|raw| RawValue::from_string(raw.to_string()))
            .transpose()?;
        Ok(Self {
            uid: String::new(),
            kind: GroupVersionKind {
                group: resource.group().to_string(),
                version: resource.version().to_string(),
                kind: resource.kind().to_string(),
            },
            resource: GroupVersionResource {
                group: resource.group().to_string(),
                version: resource.version().to_string(),
                resource: String::new(),
            },
            name: resource.name().to_string(),
            namespace: resource.namespace().to_string(),
            operation,
            user_info: UserInfo {
                username: username.to_string(),
                groups: Vec::new(),
            },
            object: Some(object),
            old_object,
        })
    }

    /// Parse the new object body.
    pub fn parse_object(&self) -> Result<Resource, PolicyError> {
        let raw = self.object.as_ref().ok_or(PolicyError::MissingObject)?;
        Resource::parse(raw.get().as_bytes(), "object")
    }

    /// Parse the old object body. An absent or `null` body is `None`.
    pub fn parse_old_object(&self) -> Result<Option<Resource>, PolicyError> {
        match &self.old_object {
            Some(raw) if raw.get().trim() != "null" => {
                Resource::parse(raw.get().as_bytes(), "oldObject").map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Identity of a resource across versions: group/version/kind/namespace/name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentity {
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gv = if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        };
        if self.namespace.is_empty() {
            write!(f, "{} {} {}", gv, self.kind, self.name)
        } else {
            write!(f, "{} {} {}/{}", gv, self.kind, self.namespace, self.name)
        }
    }
}

/// Read-only view of a Kubernetes-style resource document.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    node: Node,
}

impl Resource {
    /// Wrap a parsed tree. The root must be a map.
    pub fn new(node: Node) -> Result<Self, PolicyError> {
        Self::from_node(node, "object")
    }

    fn from_node(node: Node, which: &'static str) -> Result<Self, PolicyError> {
        match node {
            Node::Map(_) => Ok(Self { node }),
            other => Err(PolicyError::NotAnObject {
                which,
                found: other.type_name(),
            }),
        }
    }

    pub(crate) fn parse(raw: &[u8], which: &'static str) -> Result<Self, PolicyError> {
        let node =
            Node::from_bytes(raw).map_err(|source| PolicyError::MalformedObject { which, source })?;
        Self::from_node(node, which)
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn str_at(&self, path: &[&str]) -> &str {
        self.node
            .get_path(path)
            .and_then(Node::as_str)
            .unwrap_or("")
    }

    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"])
    }

    /// API group; empty for the core group (`apiVersion: v1`).
    pub fn group(&self) -> &str {
        match self.api_version().split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    pub fn version(&self) -> &str {
        let api_version = self.api_version();
        match api_version.split_once('/') {
            Some((_, version)) => version,
            None => api_version,
        }
    }

    pub fn kind(&self) -> &str {
        self.str_at(&["kind"])
    }

    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"])
    }

    pub fn namespace(&self) -> &str {
        self.str_at(&["metadata", "namespace"])
    }

    pub fn labels(&self) -> Option<&NodeMap> {
        self.node.get_path(&["metadata", "labels"]).and_then(Node::as_map)
    }

    pub fn annotations(&self) -> Option<&NodeMap> {
        self.node
            .get_path(&["metadata", "annotations"])
            .and_then(Node::as_map)
    }

    /// Label value, if present. Non-string values read as `""`.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels()
            .and_then(|m| m.get(key))
            .map(|v| v.as_str().unwrap_or(""))
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations().is_some_and(|m| m.contains_key(key))
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            api_group: self.group().to_string(),
            api_version: self.version().to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }
}
