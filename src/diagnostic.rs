//! Diagnostics for weaving resolution and schema computation.
//!
//! Structural problems in a weaving model are never fatal: the offending
//! entry is skipped, a diagnostic is recorded, and view construction
//! continues with a best-effort schema. Callers read the collected list
//! from [`Virtualizer::diagnostics`](crate::view::Virtualizer::diagnostics).

use serde::{Deserialize, Serialize};

use crate::address::ElementAddress;

/// A non-fatal problem discovered while resolving a weaving model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WeaveDiagnostic {
    /// A weaving entry's address could not be resolved against the loaded
    /// models. The entry is inert: the feature it would have added or the
    /// element it would have hidden is simply absent from the view.
    UnresolvedAddress {
        /// Name of the weaving entry the address belongs to.
        entry: String,
        address: ElementAddress,
    },

    /// Two weaving entries disagree on a feature's shape. The
    /// first-declared entry wins; the conflicting one is ignored.
    SchemaConflict {
        type_name: String,
        feature: String,
        detail: String,
    },

    /// A warning about a weaving entry (e.g. a link whose resolved target
    /// is hidden by a filter).
    Warning(String),

    /// An informational message.
    Info(String),
}

impl WeaveDiagnostic {
    pub fn unresolved(entry: impl Into<String>, address: ElementAddress) -> Self {
        Self::UnresolvedAddress {
            entry: entry.into(),
            address,
        }
    }

    pub fn conflict(
        type_name: impl Into<String>,
        feature: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::SchemaConflict {
            type_name: type_name.into(),
            feature: feature.into(),
            detail: detail.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info(message.into())
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::UnresolvedAddress { .. })
    }

    pub fn as_unresolved(&self) -> Option<(&str, &ElementAddress)> {
        match self {
            Self::UnresolvedAddress { entry, address } => Some((entry.as_str(), address)),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SchemaConflict { .. })
    }
}

impl std::fmt::Display for WeaveDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedAddress { entry, address } => {
                write!(f, "Unresolved address in entry '{entry}': {address}")
            }
            Self::SchemaConflict {
                type_name,
                feature,
                detail,
            } => write!(
                f,
                "Schema conflict on '{type_name}.{feature}': {detail}"
            ),
            Self::Warning(msg) => write!(f, "Warning: {msg}"),
            Self::Info(msg) => write!(f, "Info: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_accessors() {
        let addr: ElementAddress = "http://example.org/a#/a1".parse().unwrap();
        let unresolved = WeaveDiagnostic::unresolved("employment", addr.clone());
        assert!(unresolved.is_unresolved());
        assert_eq!(unresolved.as_unresolved().unwrap().0, "employment");
        assert!(!unresolved.is_conflict());

        let conflict = WeaveDiagnostic::conflict("Person", "employedAs", "multiplicity differs");
        assert!(conflict.is_conflict());
        assert!(conflict.as_unresolved().is_none());
    }

    #[test]
    fn test_diagnostic_display() {
        let addr: ElementAddress = "http://example.org/a#/a1".parse().unwrap();
        let rendered = WeaveDiagnostic::unresolved("e", addr).to_string();
        assert!(rendered.contains("http://example.org/a#/a1"));
        assert!(WeaveDiagnostic::warning("w").to_string().starts_with("Warning"));
    }
}
