// matcher.rs — Declarative object and user match rules.
//
// A rule list is a set of clauses: a resource matches the list when any
// clause matches (OR), and a clause matches when every dimension it specifies
// matches (AND). Each dimension is a `Pattern` (exact, empty/`*` wildcard, or
// `*`-glob). An empty clause list never matches.

use std::collections::BTreeMap;

use ishield_mapnode::{is_listed, Pattern};
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// One selector clause. Unset dimensions match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Label key → value pattern. Every listed label must be present and
    /// match.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectReference {
    pub fn matches(&self, resource: &Resource) -> bool {
        is_listed(resource.group(), &self.group)
            && is_listed(resource.version(), &self.version)
            && is_listed(resource.kind(), &self.kind)
            && is_listed(resource.namespace(), &self.namespace)
            && is_listed(resource.name(), &self.name)
            && self.labels.iter().all(|(key, rule)| {
                resource
                    .label(key)
                    .is_some_and(|value| Pattern::new(rule).matches(value))
            })
    }
}

/// OR-list of [`ObjectReference`] clauses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ObjectReferenceList(pub Vec<ObjectReference>);

impl ObjectReferenceList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if any clause matches. An empty list matches nothing.
    pub fn matches(&self, resource: &Resource) -> bool {
        self.0.iter().any(|r| r.matches(resource))
    }

    /// Binding form: an omitted object list places no constraint.
    fn matches_or_unset(&self, resource: &Resource) -> bool {
        self.is_empty() || self.matches(resource)
    }
}

impl From<Vec<ObjectReference>> for ObjectReferenceList {
    fn from(refs: Vec<ObjectReference>) -> Self {
        Self(refs)
    }
}

/// Binds a set of users to the objects they act on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUserBinding {
    #[serde(default)]
    pub objects: ObjectReferenceList,
    #[serde(default)]
    pub users: Vec<String>,
}

impl ObjectUserBinding {
    pub fn matches(&self, resource: &Resource, username: &str) -> bool {
        self.objects.matches_or_unset(resource)
            && self.users.iter().any(|u| is_listed(username, u))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ObjectUserBindingList(pub Vec<ObjectUserBinding>);

impl ObjectUserBindingList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, resource: &Resource, username: &str) -> bool {
        self.0.iter().any(|b| b.matches(resource, username))
    }
}

impl From<Vec<ObjectUserBinding>> for ObjectUserBindingList {
    fn from(bindings: Vec<ObjectUserBinding>) -> Self {
        Self(bindings)
    }
}

/// Binds ignore-field paths to the objects they apply to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldBinding {
    #[serde(default)]
    pub objects: ObjectReferenceList,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ObjectFieldBindingList(pub Vec<ObjectFieldBinding>);

impl ObjectFieldBindingList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectFieldBinding> {
        self.0.iter()
    }

    /// Fields of every binding whose objects match, in declaration order.
    pub fn matched_fields(&self, resource: &Resource) -> Vec<String> {
        self.0
            .iter()
            .filter(|b| b.objects.matches_or_unset(resource))
            .flat_map(|b| b.fields.iter().cloned())
            .collect()
    }

    /// Concatenate two lists, `self` first.
    pub fn merged(&self, other: &ObjectFieldBindingList) -> ObjectFieldBindingList {
        ObjectFieldBindingList(self.0.iter().chain(other.0.iter()).cloned().collect())
    }
}

impl From<Vec<ObjectFieldBinding>> for ObjectFieldBindingList {
    fn from(bindings: Vec<ObjectFieldBinding>) -> Self {
        Self(bindings)
    }
}
