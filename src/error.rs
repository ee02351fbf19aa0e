//! Error types with fix suggestions (v0.1)
//!
//! Error code ranges:
//! - NULLS-000-009: Path errors (missing templates, modules, files)
//! - NULLS-010-029: Argument errors (conflicting or incomplete declarations)
//! - NULLS-030-039: Script errors (a bound script broke its contract)
//! - NULLS-040-049: Configuration and IO errors
//! - NULLS-050-059: Client hydration errors (`client::ClientError`)

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NullsError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Coarse classification used by callers that only care about the family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Path,
    Argument,
    Script,
    Config,
    Io,
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum NullsError {
    // ─────────────────────────────────────────────────────────────
    // Path errors (NULLS-000 to NULLS-009)
    // ─────────────────────────────────────────────────────────────
    #[error("[NULLS-001] Root template '{path}' not found")]
    RootNotFound { path: String },

    #[error("[NULLS-002] Template '{path}' not found")]
    TemplateNotFound { path: String },

    #[error("[NULLS-003] Module '{path}' is not registered")]
    ModuleNotFound { path: String },

    #[error("[NULLS-004] Source file '{path}' could not be read: {reason}")]
    SourceNotFound { path: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Argument errors (NULLS-010 to NULLS-029)
    // ─────────────────────────────────────────────────────────────
    #[error("[NULLS-010] Action '{action}' declares {part} twice: '{first}' and '{second}'")]
    DuplicateAction {
        action: String,
        part: &'static str,
        first: String,
        second: String,
    },

    #[error("[NULLS-011] Slot id '{slot}' is used twice in '{template}'")]
    DuplicateSlot { template: String, slot: String },

    #[error("[NULLS-012] Slot '{slot}' in '{template}' is unreachable: no role applied")]
    UnreachableSlot { template: String, slot: String },

    #[error("[NULLS-013] Slot '{slot}' in '{template}': {reason}")]
    InvalidSlot {
        template: String,
        slot: String,
        reason: String,
    },

    #[error("[NULLS-014] Template cycle detected: {cycle}")]
    TemplateCycle { cycle: String },

    #[error("[NULLS-015] Render depth {depth} exceeded while rendering '{path}'")]
    DepthExceeded { path: String, depth: usize },

    #[error("[NULLS-016] Script compile error at position {position}: {details}")]
    Compile { position: usize, details: String },

    #[error("[NULLS-017] Malformed template '{template}': {details}")]
    Markup { template: String, details: String },

    // ─────────────────────────────────────────────────────────────
    // Script errors (NULLS-030 to NULLS-039)
    // ─────────────────────────────────────────────────────────────
    #[error("[NULLS-030] List script of slot '{slot}' returned a non-iterable {found}")]
    NotIterable { slot: String, found: String },

    #[error("[NULLS-031] Script failed: {details}")]
    Script { details: String },

    #[error("[NULLS-032] Script returned {found} where {expected} was expected")]
    ScriptContract { expected: &'static str, found: String },

    // ─────────────────────────────────────────────────────────────
    // Config / IO errors (NULLS-040 to NULLS-049)
    // ─────────────────────────────────────────────────────────────
    #[error("[NULLS-040] Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("[NULLS-041] YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[NULLS-042] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NullsError {
    /// Shorthand for a failed script evaluation
    pub fn script(details: impl Into<String>) -> Self {
        NullsError::Script {
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NullsError::RootNotFound { .. }
            | NullsError::TemplateNotFound { .. }
            | NullsError::ModuleNotFound { .. }
            | NullsError::SourceNotFound { .. } => ErrorKind::Path,
            NullsError::DuplicateAction { .. }
            | NullsError::DuplicateSlot { .. }
            | NullsError::UnreachableSlot { .. }
            | NullsError::InvalidSlot { .. }
            | NullsError::TemplateCycle { .. }
            | NullsError::DepthExceeded { .. }
            | NullsError::Compile { .. }
            | NullsError::Markup { .. } => ErrorKind::Argument,
            NullsError::NotIterable { .. }
            | NullsError::Script { .. }
            | NullsError::ScriptContract { .. } => ErrorKind::Script,
            NullsError::Config { .. } | NullsError::Yaml(_) => ErrorKind::Config,
            NullsError::Io(_) => ErrorKind::Io,
        }
    }
}

impl FixSuggestion for NullsError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            NullsError::RootNotFound { .. } => {
                Some("Create the root file (root/index.html) or set root_type in nulls.yaml")
            }
            NullsError::TemplateNotFound { .. } => {
                Some("Container scripts return a variant name; add <address>/<variant>.html")
            }
            NullsError::ModuleNotFound { .. } => {
                Some("Register the module with ModuleRegistry::register before loading")
            }
            NullsError::SourceNotFound { .. } => Some("Check the $path is relative to the template root"),
            NullsError::DuplicateAction { .. } => {
                Some("Declare each action script, access check and upload spec in one file only")
            }
            NullsError::DuplicateSlot { .. } => Some("Use unique null-id values within a file"),
            NullsError::UnreachableSlot { .. } => {
                Some("Give the slot a container, data, attribute or adder role")
            }
            NullsError::InvalidSlot { .. } => Some("Check the slot's null-* attributes"),
            NullsError::TemplateCycle { .. } => {
                Some("A template must not (transitively) render itself")
            }
            NullsError::DepthExceeded { .. } => Some("Raise max_depth in nulls.yaml"),
            NullsError::Compile { .. } => {
                Some("Check the inline script syntax (expressions, let, if, return)")
            }
            NullsError::Markup { .. } => Some("Check for unbalanced tags"),
            NullsError::NotIterable { .. } => Some("List scripts must return an array or object"),
            NullsError::Script { .. } => None,
            NullsError::ScriptContract { .. } => None,
            NullsError::Config { .. } => Some("Check nulls.yaml and NULLS_* environment variables"),
            NullsError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            NullsError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_action_names_both_files() {
        let err = NullsError::DuplicateAction {
            action: "/submit".into(),
            part: "script",
            first: "a.html".into(),
            second: "b.html".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/submit"));
        assert!(msg.contains("a.html") && msg.contains("b.html"));
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            NullsError::RootNotFound { path: "x".into() }.kind(),
            ErrorKind::Path
        );
        assert_eq!(
            NullsError::NotIterable {
                slot: "s".into(),
                found: "number".into()
            }
            .kind(),
            ErrorKind::Script
        );
        assert!(NullsError::script("boom").fix_suggestion().is_none());
    }
}
