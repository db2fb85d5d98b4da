use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineState;
use crate::host::{EntityId, HostError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    StatusEffect,
    ChainTarget,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::StatusEffect => f.write_str("status effect"),
            ReferenceKind::ChainTarget => f.write_str("chain target"),
        }
    }
}

/// Everything that can go wrong loading or running rules. None of it is fatal
/// to the evaluation loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or unknown rule/condition block. The block is skipped.
    #[error("{location}: {reason}")]
    Configuration { location: String, reason: String },

    /// A name that doesn't resolve. Only the referring consequence is skipped.
    #[error("rule '{rule}': unknown {kind} '{name}'")]
    UnresolvedReference {
        rule: String,
        kind: ReferenceKind,
        name: String,
    },

    /// A host query failed; the rule is treated as not applicable this cycle.
    #[error("host: {0}")]
    TransientHost(#[from] HostError),

    /// A deferred task outlived its entity.
    #[error("entity {0} has left")]
    StaleEntity(EntityId),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: EngineState,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn config(location: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn unresolved(rule: &str, kind: ReferenceKind, name: &str) -> Self {
        EngineError::UnresolvedReference {
            rule: rule.to_string(),
            kind,
            name: name.to_string(),
        }
    }
}
