//! Error taxonomy for the capsula stack.
//!
//! One enum covers compile-time, build-time, and run-time failures. Every
//! variant carries a stable numeric code (see [`Error::code`]) so that
//! errors can cross untyped boundaries - for example when delivered to a
//! capsule's `handle` method as a [`Value`].

use thiserror::Error;

use crate::Value;

/// Result type alias for capsula operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the capsula compiler, builder, and runtime.
///
/// The enum is `Clone` because a deferred call settles its pending result
/// handle with the error while the original may still propagate.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed schema input (compile-time).
    #[error("illegal argument: {message}")]
    IllegalArgument { message: String },

    /// A name is reused inside one merged type namespace (compile-time).
    #[error("duplicate name: {name}")]
    DuplicateName { name: String },

    /// A derived type tries to change a method's visibility (compile-time).
    #[error("illegal methods visibility for: {name}")]
    IllegalMethodsVisibility { name: String },

    /// A reserved or ill-formed element name (compile-time).
    #[error("forbidden name: {name}")]
    ForbiddenName { name: String },

    /// A referenced element does not exist (compile-time, or build-time for
    /// dynamically-marked names).
    #[error("element not found: {name}")]
    ElementNotFound { name: String },

    /// A binding statement is not a legal wire (compile-time).
    #[error("wire incompatibility: {message}")]
    WireIncompatibility { message: String },

    /// A binding statement is not a legal tie (compile-time).
    #[error("tie incompatibility: {message}")]
    TieIncompatibility { message: String },

    /// An abstract type was instantiated (build-time).
    #[error("abstract type cannot be instantiated: {name}")]
    AbstractInstantiation { name: String },

    /// The current context is not allowed to touch the entity (run-time).
    #[error("out of context: {message}")]
    OutOfContext { message: String },

    /// A structurally illegal runtime operation, such as giving a loop a
    /// second child or unrooting a connector hook (run-time).
    #[error("illegal operation: {message}")]
    IllegalOperationType { message: String },

    /// A position argument is outside the valid range (run-time).
    #[error("index out of bounds: {index} (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A capsule is attached somewhere else already (run-time).
    #[error("capsule already attached: {name}")]
    CapsuleAlreadyAttached { name: String },

    /// A dynamically supplied filter produced a non-list, non-STOP value
    /// (run-time).
    #[error("illegal filter return value: {message}")]
    IllegalFiltersReturnValue { message: String },

    /// Internal invariant failure - states unreachable given the checks
    /// above.
    #[error("unexpected internal state: {message}")]
    Unexpected { message: String },

    /// A fault raised by user code inside a method or filter.
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Create a user-level fault with just a message.
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
        }
    }

    /// Create an internal invariant failure.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Error::Unexpected {
            message: message.into(),
        }
    }

    /// Stable numeric code for this error category.
    pub fn code(&self) -> u32 {
        match self {
            Error::IllegalArgument { .. } => 1000,
            Error::DuplicateName { .. } => 1001,
            Error::IllegalMethodsVisibility { .. } => 1002,
            Error::ForbiddenName { .. } => 1003,
            Error::ElementNotFound { .. } => 1004,
            Error::WireIncompatibility { .. } => 1005,
            Error::TieIncompatibility { .. } => 1006,
            Error::AbstractInstantiation { .. } => 2000,
            Error::OutOfContext { .. } => 3000,
            Error::IllegalOperationType { .. } => 3001,
            Error::IndexOutOfBounds { .. } => 3002,
            Error::CapsuleAlreadyAttached { .. } => 3003,
            Error::IllegalFiltersReturnValue { .. } => 3004,
            Error::Unexpected { .. } => 9000,
            Error::Other { .. } => 9001,
        }
    }

    /// Render the error as a `{code, message}` map for delivery to a
    /// capsule's `handle` method.
    pub fn to_value(&self) -> Value {
        let mut map = std::collections::BTreeMap::new();
        map.insert("code".to_string(), Value::Integer(i64::from(self.code())));
        map.insert("message".to_string(), Value::String(self.to_string()));
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let e = Error::DuplicateName {
            name: "doX".to_string(),
        };
        assert!(e.to_string().contains("doX"));

        let e = Error::IndexOutOfBounds { index: 5, len: 2 };
        assert!(e.to_string().contains('5'));
        assert!(e.to_string().contains('2'));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::IllegalArgument {
                message: String::new()
            }
            .code(),
            1000
        );
        assert_eq!(
            Error::AbstractInstantiation {
                name: String::new()
            }
            .code(),
            2000
        );
        assert_eq!(
            Error::OutOfContext {
                message: String::new()
            }
            .code(),
            3000
        );
        assert_eq!(Error::unexpected("x").code(), 9000);
        assert_eq!(Error::other("x").code(), 9001);
    }

    #[test]
    fn codes_are_distinct() {
        let errors = vec![
            Error::IllegalArgument {
                message: String::new(),
            },
            Error::DuplicateName {
                name: String::new(),
            },
            Error::IllegalMethodsVisibility {
                name: String::new(),
            },
            Error::ForbiddenName {
                name: String::new(),
            },
            Error::ElementNotFound {
                name: String::new(),
            },
            Error::WireIncompatibility {
                message: String::new(),
            },
            Error::TieIncompatibility {
                message: String::new(),
            },
            Error::AbstractInstantiation {
                name: String::new(),
            },
            Error::OutOfContext {
                message: String::new(),
            },
            Error::IllegalOperationType {
                message: String::new(),
            },
            Error::IndexOutOfBounds { index: 0, len: 0 },
            Error::CapsuleAlreadyAttached {
                name: String::new(),
            },
            Error::IllegalFiltersReturnValue {
                message: String::new(),
            },
            Error::unexpected(""),
            Error::other(""),
        ];
        let mut codes: Vec<u32> = errors.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn to_value_shape() {
        let e = Error::OutOfContext {
            message: "nope".to_string(),
        };
        let v = e.to_value();
        let map = v.as_map().unwrap();
        assert_eq!(map.get("code"), Some(&Value::Integer(3000)));
        assert!(map
            .get("message")
            .and_then(Value::as_str)
            .unwrap()
            .contains("nope"));
    }

    #[test]
    fn error_is_clone() {
        let e = Error::other("fault");
        let e2 = e.clone();
        assert_eq!(e.to_string(), e2.to_string());
    }
}
