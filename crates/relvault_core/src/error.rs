//! Error types for relvault core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in relvault core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Log or snapshot provider error.
    #[error("storage error: {0}")]
    Storage(#[from] relvault_storage::StorageError),

    /// Transaction or snapshot encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] relvault_codec::CodecError),

    /// I/O error outside a provider, such as spawning the consumer thread.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The schema or command definitions are invalid.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the definition problem.
        message: String,
    },

    /// A unique attribute value is already held by another instance.
    #[error("unique constraint violation: {entity}.{attribute} = {value}")]
    UniqueConstraintViolation {
        /// Entity type name.
        entity: String,
        /// Unique attribute name.
        attribute: String,
        /// The colliding value, rendered for display.
        value: String,
    },

    /// A non-nullable attribute or relation was left unset.
    #[error("non-null constraint violation: {entity}.{member} must be set")]
    NonNullConstraintViolation {
        /// Entity type name.
        entity: String,
        /// Attribute or relation name.
        member: String,
    },

    /// An instance lookup found nothing.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// An entity, attribute or relation name is not part of the schema.
    #[error("unknown member {member} on {entity}")]
    UnknownMember {
        /// Entity type name, or `schema` for entity lookups.
        entity: String,
        /// The unresolved name.
        member: String,
    },

    /// A value does not fit the declared type.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// No command is registered under this name.
    #[error("unknown command: {name}")]
    UnknownCommand {
        /// Command name.
        name: String,
    },

    /// A command parameter is absent.
    #[error("missing parameter: {name}")]
    MissingParameter {
        /// Parameter name.
        name: String,
    },

    /// A command finished while a mutation builder was still open.
    #[error("command {command} violated its contract: {message}")]
    CommandContractViolation {
        /// Command name.
        command: String,
        /// What was left unfinished.
        message: String,
    },

    /// A command body rejected its input.
    #[error("command failed: {message}")]
    Command {
        /// Reason given by the command.
        message: String,
    },

    /// A snapshot cannot be recovered into the current schema.
    #[error("recovery failed: {message}")]
    Recovery {
        /// Description of the incompatibility.
        message: String,
    },

    /// A snapshot was written by a different model version.
    #[error("model version mismatch: expected {expected}, found {found}")]
    ModelVersionMismatch {
        /// Version this store expects.
        expected: u32,
        /// Version recorded in the snapshot.
        found: u32,
    },

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,

    /// A bounded wait elapsed.
    #[error("timed out: {message}")]
    Timeout {
        /// What was being waited for.
        message: String,
    },

    /// The caller cancelled the wait.
    #[error("cancelled")]
    Cancelled,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an unknown member error.
    pub fn unknown_member(entity: impl Into<String>, member: impl Into<String>) -> Self {
        Self::UnknownMember {
            entity: entity.into(),
            member: member.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Creates an application-level command failure.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a recovery error.
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for unique and non-null violations.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::UniqueConstraintViolation { .. } | Self::NonNullConstraintViolation { .. }
        )
    }

    /// Returns true if this error prevents the store from opening or serving.
    ///
    /// Everything raised while executing a command is scoped to its
    /// transaction and returns false.
    #[must_use]
    pub fn is_fatal_for_store(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. }
                | Self::Recovery { .. }
                | Self::ModelVersionMismatch { .. }
                | Self::StoreClosed
                | Self::Storage(_)
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let unique = CoreError::UniqueConstraintViolation {
            entity: "Person".into(),
            attribute: "name".into(),
            value: "\"Ann\"".into(),
        };
        assert!(unique.is_constraint_violation());
        assert!(!unique.is_fatal_for_store());

        assert!(CoreError::recovery("x").is_fatal_for_store());
        assert!(!CoreError::command("x").is_fatal_for_store());
        assert!(!CoreError::command("x").is_constraint_violation());
    }

    #[test]
    fn messages_name_the_member() {
        let err = CoreError::NonNullConstraintViolation {
            entity: "Person".into(),
            member: "name".into(),
        };
        assert_eq!(
            err.to_string(),
            "non-null constraint violation: Person.name must be set"
        );
    }
}
