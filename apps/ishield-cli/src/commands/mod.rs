pub mod aggregate;
pub mod diff;
pub mod evaluate;
pub mod exemptions;

use std::path::Path;

use anyhow::Context;
use ishield_mapnode::Node;

/// Read a manifest as JSON, or as YAML when the extension says so.
pub(crate) fn read_node(path: &Path) -> anyhow::Result<Node> {
    let content =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if is_yaml(path) {
        serde_yaml::from_slice(&content).with_context(|| format!("invalid YAML in {}", path.display()))
    } else {
        Node::from_bytes(&content).with_context(|| format!("invalid JSON in {}", path.display()))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
