// event.rs — Deny events.
//
// When the side effect is enabled, every enforced deny is recorded as an
// event named `ishield-deny-<operation>-<kind>-<name>`. A repeat deny for the
// same object updates that event in place and bumps its count, so the store
// holds one event per denied object and operation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PolicyError;
use crate::resource::AdmissionRequest;

pub const EVENT_SOURCE: &str = "IntegrityShield";
pub const EVENT_REASON_DENY: &str = "Deny";
pub const EVENT_TYPE_ANNOTATION: &str = "integrityshield.io/eventType";
pub const EVENT_RESULT_ANNOTATION: &str = "integrityshield.io/eventResult";

const MAX_MESSAGE_CHARS: usize = 1024;
const TRIMMED_MESSAGE_CHARS: usize = 950;
const TRIMMED_SUFFIX: &str = " ... Trimmed. `Event.Message` can have 1024 chars at maximum.";
const MAX_NAME_LEN: usize = 253;

/// The object a deny event is about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvolvedObject {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DenyEvent {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub involved_object: InvolvedObject,
    pub reason: String,
    pub source: String,
    pub message: String,
    pub count: u32,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
}

/// Storage for deny events, addressed by namespace and name.
pub trait DenyEventStore: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<DenyEvent>, PolicyError>;
    fn create(&self, event: &DenyEvent) -> Result<(), PolicyError>;
    fn update(&self, event: &DenyEvent) -> Result<(), PolicyError>;
}

/// In-process event store.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<(String, String), DenyEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, ordered by namespace then name.
    pub fn all(&self) -> Vec<DenyEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<DenyEvent> = events.values().cloned().collect();
        all.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        all
    }
}

impl DenyEventStore for MemoryEventStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<DenyEvent>, PolicyError> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    fn create(&self, event: &DenyEvent) -> Result<(), PolicyError> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let key = (event.namespace.clone(), event.name.clone());
        if events.contains_key(&key) {
            return Err(PolicyError::Store(format!(
                "event {}/{} already exists",
                event.namespace, event.name
            )));
        }
        events.insert(key, event.clone());
        Ok(())
    }

    fn update(&self, event: &DenyEvent) -> Result<(), PolicyError> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let key = (event.namespace.clone(), event.name.clone());
        match events.get_mut(&key) {
            Some(slot) => {
                *slot = event.clone();
                Ok(())
            }
            None => Err(PolicyError::Store(format!(
                "event {}/{} not found",
                event.namespace, event.name
            ))),
        }
    }
}

/// Events stored as `<root>/<namespace>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirEventStore {
    root: PathBuf,
}

impl JsonDirEventStore {
    /// Create the store, creating `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| PolicyError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Both parts must be single path components that stay under `root`.
    fn event_file(&self, namespace: &str, name: &str) -> Result<PathBuf, PolicyError> {
        for part in [namespace, name] {
            if part.is_empty() || part.contains('/') || part.contains('\\') || part.starts_with('.') {
                return Err(PolicyError::Store(format!(
                    "invalid event path component {:?} in {}/{}",
                    part, namespace, name
                )));
            }
        }
        Ok(self.root.join(namespace).join(format!("{}.json", name)))
    }

    fn write(&self, event: &DenyEvent) -> Result<(), PolicyError> {
        let path = self.event_file(&event.namespace, &event.name)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| PolicyError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(event)?;
        fs::write(&path, json).map_err(|source| PolicyError::Io { path, source })
    }
}

impl DenyEventStore for JsonDirEventStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<DenyEvent>, PolicyError> {
        let path = self.event_file(namespace, name)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|source| PolicyError::Io { path, source })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn create(&self, event: &DenyEvent) -> Result<(), PolicyError> {
        if self.event_file(&event.namespace, &event.name)?.exists() {
            return Err(PolicyError::Store(format!(
                "event {}/{} already exists",
                event.namespace, event.name
            )));
        }
        self.write(event)
    }

    fn update(&self, event: &DenyEvent) -> Result<(), PolicyError> {
        self.write(event)
    }
}

/// `ishield-deny-<operation>-<kind>-<name>`, lowercased operation and kind.
/// Names longer than an object name allows keep a prefix and gain a hash
/// suffix of the full name.
pub fn deny_event_name(operation: &str, kind: &str, name: &str) -> String {
    let full = format!(
        "ishield-deny-{}-{}-{}",
        operation.to_lowercase(),
        kind.to_lowercase(),
        name
    );
    if full.len() <= MAX_NAME_LEN {
        return full;
    }
    let digest = format!("{:x}", Sha256::digest(full.as_bytes()));
    let suffix = &digest[..16];
    let mut cut = MAX_NAME_LEN - suffix.len() - 1;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &full[..cut], suffix)
}

/// `[<constraint>]<reason>`, trimmed when over the event message limit.
pub fn event_message(constraint_name: &str, reason: &str) -> String {
    truncate_message(&format!("[{}]{}", constraint_name, reason))
}

pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(TRIMMED_MESSAGE_CHARS).collect();
    out.push_str(TRIMMED_SUFFIX);
    out
}

/// Create the deny event for `request`, or bump the existing one.
///
/// Events live in the request namespace, or `fallback_namespace` for
/// cluster-scoped objects.
pub fn record_deny_event(
    store: &dyn DenyEventStore,
    request: &AdmissionRequest,
    constraint_name: &str,
    reason: &str,
    fallback_namespace: &str,
    now: DateTime<Utc>,
) -> Result<DenyEvent, PolicyError> {
    let name = deny_event_name(request.operation.as_str(), &request.kind.kind, &request.name);
    let namespace = if request.namespace.is_empty() {
        fallback_namespace.to_string()
    } else {
        request.namespace.clone()
    };

    let existing = store.get(&namespace, &name)?;
    let is_existing = existing.is_some();
    let mut event = existing.unwrap_or_else(|| {
        let api_version = if request.kind.group.is_empty() {
            request.kind.version.clone()
        } else {
            format!("{}/{}", request.kind.group, request.kind.version)
        };
        let mut annotations = BTreeMap::new();
        annotations.insert(EVENT_TYPE_ANNOTATION.to_string(), "verify-result".to_string());
        annotations.insert(EVENT_RESULT_ANNOTATION.to_string(), "deny".to_string());
        DenyEvent {
            name: name.clone(),
            namespace: namespace.clone(),
            annotations,
            involved_object: InvolvedObject {
                api_version,
                kind: request.kind.kind.clone(),
                namespace: request.namespace.clone(),
                name: request.name.clone(),
            },
            reason: EVENT_REASON_DENY.to_string(),
            source: EVENT_SOURCE.to_string(),
            message: String::new(),
            count: 0,
            first_timestamp: now,
            last_timestamp: now,
        }
    });

    event.message = event_message(constraint_name, reason);
    event.count += 1;
    event.last_timestamp = now;

    if is_existing {
        store.update(&event)?;
    } else {
        store.create(&event)?;
    }
    tracing::debug!(
        namespace = %request.namespace,
        name = %request.name,
        kind = %request.kind.kind,
        operation = %request.operation,
        event = %event.name,
        "deny event is generated"
    );
    Ok(event)
}
