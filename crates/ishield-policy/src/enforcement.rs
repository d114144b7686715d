// enforcement.rs — Inform vs enforce.
//
// The constraint's action wins; without one the handler default applies.
// Only the exact mode string `enforce` blocks requests. In every other mode a
// deny is rewritten to an allow that still carries the original reason.

use std::fmt;

use crate::config::ActionConfig;
use crate::engine::DecisionResult;

pub const MODE_ENFORCE: &str = "enforce";
pub const MODE_INFORM: &str = "inform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforceMode {
    Enforce,
    Inform,
}

impl fmt::Display for EnforceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforceMode::Enforce => f.write_str(MODE_ENFORCE),
            EnforceMode::Inform => f.write_str(MODE_INFORM),
        }
    }
}

/// Resolve the mode for one constraint. Unrecognised mode strings are
/// treated as inform and logged.
pub fn effective_mode(
    constraint_action: Option<&ActionConfig>,
    default_action: &ActionConfig,
    constraint_name: &str,
) -> EnforceMode {
    let mode = match constraint_action {
        Some(action) => {
            if action.mode != MODE_ENFORCE && action.mode != MODE_INFORM {
                tracing::warn!(
                    constraint = constraint_name,
                    mode = %action.mode,
                    "run mode should be set to 'enforce' or 'inform' in rule"
                );
            }
            action.mode.as_str()
        }
        None => {
            let mode = default_action.mode.as_str();
            if !mode.is_empty() && mode != MODE_ENFORCE && mode != MODE_INFORM {
                tracing::warn!(
                    mode = %mode,
                    "default constraint action should be 'enforce' or 'inform'"
                );
            }
            mode
        }
    };
    if mode == MODE_ENFORCE {
        EnforceMode::Enforce
    } else {
        EnforceMode::Inform
    }
}

/// Downgrade a deny to an allow unless enforcing.
pub fn apply_enforcement(decision: DecisionResult, mode: EnforceMode) -> DecisionResult {
    if decision.allow || mode == EnforceMode::Enforce {
        return decision;
    }
    DecisionResult::allow(format!("allowed because not enforced: {}", decision.message))
}
