//! Error types for schema compilation and attribute writes.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised while compiling a [`Definition`](crate::Definition) into a
/// [`Schema`](crate::Schema).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A derived property shares its name with a declared property.
    #[error("derived property \"{attribute}\" collides with a declared property of the same name")]
    DerivedCollision {
        /// The colliding name.
        attribute: String,
    },

    /// The derived dependency graph contains a cycle.
    #[error("dependency cycle in derived properties: {}", .path.join(" -> "))]
    DependencyCycle {
        /// The derived property names forming the cycle.
        path: Vec<String>,
    },

    /// A property names a data type that is neither built in, globally
    /// registered, nor declared in the definition's local data types.
    #[error("attribute \"{attribute}\" uses unknown data type \"{type_name}\"")]
    UnknownType {
        /// The attribute declaring the type.
        attribute: String,
        /// The unresolved type name.
        type_name: String,
    },
}

/// Errors raised by attribute writes.
///
/// Every variant is synchronous: it is returned from the offending `set`,
/// `set_many`, `toggle`, or constructor call, and never deferred. A failing
/// attribute inside a bulk write aborts the remaining attributes while the
/// ones already applied stay committed.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// The value could not be coerced to the attribute's declared type.
    ///
    /// Custom data types propagate their own failure through `reason`, which
    /// can be downcast via [`anyhow::Error::downcast_ref`].
    #[error("attribute \"{attribute}\" cannot hold the given value as {type_name}: {reason}")]
    InvalidType {
        /// The attribute being written.
        attribute: String,
        /// The declared type name.
        type_name: String,
        /// Why coercion failed.
        reason: Arc<anyhow::Error>,
    },

    /// Null was written to an attribute without `allow_null`.
    #[error("attribute \"{attribute}\" does not allow null")]
    NullDisallowed {
        /// The attribute being written.
        attribute: String,
    },

    /// The coerced value is not a member of the attribute's `values` list.
    #[error("value for attribute \"{attribute}\" is not one of the allowed values")]
    NotAllowedValue {
        /// The attribute being written.
        attribute: String,
    },

    /// The attribute's custom test function rejected the value.
    ///
    /// The display output is the test function's returned string, verbatim.
    #[error("{message}")]
    FailedTest {
        /// The attribute being written.
        attribute: String,
        /// The string returned by the test function.
        message: String,
    },

    /// A direct write targeted a derived property.
    #[error("\"{attribute}\" is a derived property, it can't be set directly.")]
    DerivedReadonly {
        /// The derived property name.
        attribute: String,
    },

    /// A write targeted an undeclared attribute while the instance's
    /// extra-properties policy is `Reject`.
    #[error("cannot set unknown attribute \"{attribute}\"")]
    UnknownAttribute {
        /// The undeclared name.
        attribute: String,
    },

    /// `toggle` was called on an attribute that is neither boolean-typed nor
    /// constrained to a `values` list.
    #[error("attribute \"{attribute}\" is neither boolean nor enumerated, it can't be toggled")]
    Untoggleable {
        /// The attribute passed to `toggle`.
        attribute: String,
    },
}

impl StateError {
    /// The attribute the error is about.
    pub fn attribute(&self) -> &str {
        match self {
            StateError::InvalidType { attribute, .. }
            | StateError::NullDisallowed { attribute }
            | StateError::NotAllowedValue { attribute }
            | StateError::FailedTest { attribute, .. }
            | StateError::DerivedReadonly { attribute }
            | StateError::UnknownAttribute { attribute }
            | StateError::Untoggleable { attribute } => attribute,
        }
    }

    /// Returns true for the family of type errors: coercion failures,
    /// disallowed nulls, values-list misses, and untoggleable attributes.
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            StateError::InvalidType { .. }
                | StateError::NullDisallowed { .. }
                | StateError::NotAllowedValue { .. }
                | StateError::Untoggleable { .. }
        )
    }
}
