//! Failure taxonomy of a sync run.
//!
//! Per-entry and per-source problems never abort a run: they are collected
//! as [`Warning`]s. Only configuration defects surface as [`SyncError`].

use std::fmt;

use thiserror::Error;

/// A run-aborting failure. Carries enough context to fix the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("group '{group}': unrecognized expression '{expression}'")]
    UnknownGroupSyntax { group: String, expression: String },

    #[error("{target} template is missing insertion point '{point}'")]
    Render { target: String, point: String },

    #[error("{target} template is unreadable: {reason}")]
    Template { target: String, reason: String },
}

/// A malformed subscription or manual entry. Skipped and reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}: entry {entry}: {reason}")]
pub struct ParseError {
    pub source_name: String,
    /// 1-based line number for text payloads, 0-based index for YAML entries.
    pub entry: usize,
    pub reason: String,
}

/// A chain whose derived name is already taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chain '{chain_name}' for '{node}' collides with an existing node")]
pub struct SynthesisCollision {
    pub node: String,
    pub chain_name: String,
}

/// Non-fatal diagnostic surfaced next to the rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    Fetch { source_name: String, reason: String },
    /// A non-empty payload with nothing recognizable in it.
    NoNodes { source_name: String },
    Parse(ParseError),
    DuplicateName { name: String },
    DuplicateEndpoint { kept: String, dropped: String },
    DuplicateExit,
    ChainCollision(SynthesisCollision),
    EmptyGroup { group: String },
    Unrenderable { node: String, kind: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch {
                source_name,
                reason,
            } => write!(f, "source '{source_name}' yielded no nodes: {reason}"),
            Self::NoNodes { source_name } => {
                write!(f, "source '{source_name}' returned content with no recognizable nodes")
            }
            Self::Parse(e) => write!(f, "skipped entry: {e}"),
            Self::DuplicateName { name } => {
                write!(f, "duplicate node '{name}' with different fields, kept first")
            }
            Self::DuplicateEndpoint { kept, dropped } => {
                write!(f, "'{dropped}' shares an endpoint with '{kept}', dropped")
            }
            Self::DuplicateExit => write!(f, "more than one EXIT node defined, kept first"),
            Self::ChainCollision(e) => write!(f, "chain skipped: {e}"),
            Self::EmptyGroup { group } => write!(f, "group '{group}' resolved to no members"),
            Self::Unrenderable { node, kind } => {
                write!(f, "node '{node}' of type '{kind}' cannot be rendered, skipped")
            }
        }
    }
}

impl From<ParseError> for Warning {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<SynthesisCollision> for Warning {
    fn from(e: SynthesisCollision) -> Self {
        Self::ChainCollision(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_names_group_and_expression() {
        let err = SyncError::UnknownGroupSyntax {
            group: "Proxy".into(),
            expression: "{any}".into(),
        };
        assert_eq!(err.to_string(), "group 'Proxy': unrecognized expression '{any}'");
    }

    #[test]
    fn render_error_names_point() {
        let err = SyncError::Render {
            target: "surge".into(),
            point: "[Proxy Group]".into(),
        };
        assert!(err.to_string().contains("[Proxy Group]"));
    }

    #[test]
    fn parse_warning_display() {
        let w: Warning = ParseError {
            source_name: "airport".into(),
            entry: 3,
            reason: "missing server".into(),
        }
        .into();
        assert_eq!(w.to_string(), "skipped entry: airport: entry 3: missing server");
    }
}
