// report.rs — Admission results and the append-only admission log.
//
// An AdmissionResult is one line of JSON describing a decision. Denials are
// appended to the event log that the exemption aggregator tails, and
// skip-user allows go to the decision reporter log. Both use AdmissionLog, a
// JSONL file that is flushed after every line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::DecisionResult;
use crate::error::PolicyError;
use crate::resource::{AdmissionRequest, ResourceIdentity};

/// One admission decision, as written to the event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Plural resource name, e.g. `deployments`.
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub constraint_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allow: bool,
    #[serde(default)]
    pub reason: String,
}

impl AdmissionResult {
    pub fn from_request(
        request: &AdmissionRequest,
        constraint_name: &str,
        decision: &DecisionResult,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            api_group: request.kind.group.clone(),
            api_version: request.kind.version.clone(),
            kind: request.kind.kind.clone(),
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            resource: request.resource.resource.clone(),
            user_name: request.user_info.username.clone(),
            constraint_name: constraint_name.to_string(),
            admission_time: Some(now),
            allow: decision.allow,
            reason: decision.message.clone(),
        }
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            api_group: self.api_group.clone(),
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// An append-only JSONL log of admission results.
///
/// Appends take `&self`; the writer sits behind a mutex so one log can be
/// shared by concurrent request handlers.
pub struct AdmissionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl AdmissionLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| PolicyError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PolicyError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result as a single line and flush.
    pub fn append(&self, result: &AdmissionResult) -> Result<(), PolicyError> {
        let json = serde_json::to_string(result)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}", json)
            .and_then(|_| writer.flush())
            .map_err(|source| PolicyError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Read every well-formed result from a log file, oldest first. Blank
    /// and malformed lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AdmissionResult>, PolicyError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut results = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| PolicyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping malformed admission result"),
            }
        }
        Ok(results)
    }
}
