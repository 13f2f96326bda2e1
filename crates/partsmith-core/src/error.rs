use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AssemblyError>;

/// Everything that can go wrong while building, resolving, or searching
/// for components.
///
/// None of these are transient: they describe a badly defined model or a
/// misuse of the tree, so they are propagated to the caller untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    // ── Frames ────────────────────────────────────────────────────────

    #[error("Invalid coordinate frame: {0}")]
    InvalidFrame(String),

    // ── Resolution ────────────────────────────────────────────────────

    #[error("Mate references component {0} which is not part of this tree")]
    DanglingReference(String),

    #[error("Component '{0}' has no resolved world coordinates")]
    UnresolvedComponent(String),

    #[error("Component '{0}' is already being resolved (circular dependency)")]
    CircularResolution(String),

    #[error("Component '{component}' was placed twice while solving '{assembly}'")]
    OverConstrained { assembly: String, component: String },

    #[error("Constraint in '{assembly}' references '{target}', which is outside its scope")]
    Scope { assembly: String, target: String },

    // ── Tree construction & lookup ────────────────────────────────────

    #[error("Invalid component name '{name}' in '{assembly}': {reason}")]
    InvalidComponentName {
        assembly: String,
        name: String,
        reason: String,
    },

    #[error("Could not find '{path}': '{segment}' is not a component of '{assembly}'")]
    ComponentNotFound {
        path: String,
        segment: String,
        assembly: String,
    },

    #[error("Could not find '{path}': '{component}' is not an assembly")]
    NotAnAssembly { path: String, component: String },

    #[error("Component '{component}' has no mate named '{mate}'")]
    MateNotFound { component: String, mate: String },

    #[error("Failed to make '{component}': {message}")]
    Make { component: String, message: String },

    // ── Registry ──────────────────────────────────────────────────────

    #[error("No registered component matches {0}")]
    NoneFound(String),

    #[error("{count} registered components match {criteria}")]
    MultipleFound { criteria: String, count: usize },

    // ── Configuration ─────────────────────────────────────────────────

    #[error("Invalid settings: {0}")]
    Config(String),
}

impl AssemblyError {
    /// Build a [`AssemblyError::Make`] from inside a part definition. The
    /// component name is filled in by the tree when the error surfaces.
    pub fn make(message: impl Into<String>) -> Self {
        AssemblyError::Make {
            component: String::new(),
            message: message.into(),
        }
    }

    /// True for the registry cardinality errors.
    pub fn is_search_error(&self) -> bool {
        matches!(
            self,
            AssemblyError::NoneFound(_) | AssemblyError::MultipleFound { .. }
        )
    }
}

impl From<serde_json::Error> for AssemblyError {
    fn from(err: serde_json::Error) -> Self {
        AssemblyError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_error_grouping() {
        assert!(AssemblyError::NoneFound("{a: 1}".into()).is_search_error());
        assert!(AssemblyError::MultipleFound {
            criteria: "{b: 2}".into(),
            count: 2
        }
        .is_search_error());
        assert!(!AssemblyError::UnresolvedComponent("top".into()).is_search_error());
    }

    #[test]
    fn test_error_messages() {
        let err = AssemblyError::Scope {
            assembly: "stack".into(),
            target: "other.box".into(),
        };
        assert_eq!(
            err.to_string(),
            "Constraint in 'stack' references 'other.box', which is outside its scope"
        );
    }
}
