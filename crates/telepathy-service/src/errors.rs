//! Error types surfaced to bus clients and backends.
//!
//! [`TpError`] mirrors the Telepathy error classes a connection can return
//! from a method call. Lower layers keep their own enums ([`HandleError`],
//! [`TransportError`]) and convert at the boundary.

use telepathy_config::ConfigError;
use thiserror::Error;

use crate::connection::ConnectionStatusReason;
use crate::handles::EntityType;

const ERROR_PREFIX: &str = "org.freedesktop.Telepathy.Error.";

/// Errors returned to the originator of a method call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TpError {
    /// Malformed or contradictory arguments.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human readable explanation.
        message: String,
    },

    /// A handle or identifier does not name a valid entity.
    #[error("invalid handle: {message}")]
    InvalidHandle {
        /// Human readable explanation.
        message: String,
    },

    /// Nothing in the connection implements the request.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Human readable explanation.
        message: String,
    },

    /// The request is understood but cannot be served right now.
    #[error("not available: {message}")]
    NotAvailable {
        /// Human readable explanation.
        message: String,
    },

    /// Local policy forbids the operation.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Human readable explanation.
        message: String,
    },

    /// The connection is not (or no longer) connected.
    #[error("disconnected: {message}")]
    Disconnected {
        /// Human readable explanation.
        message: String,
    },

    /// The underlying network failed.
    #[error("network error: {message}")]
    NetworkError {
        /// Human readable explanation.
        message: String,
    },

    /// The operation was abandoned before it completed.
    #[error("cancelled: {message}")]
    Cancelled {
        /// Human readable explanation.
        message: String,
    },
}

impl TpError {
    /// Builds an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Builds an `InvalidHandle` error.
    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::InvalidHandle {
            message: message.into(),
        }
    }

    /// Builds a `NotImplemented` error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Builds a `NotAvailable` error.
    pub fn not_available(message: impl Into<String>) -> Self {
        Self::NotAvailable {
            message: message.into(),
        }
    }

    /// Builds a `PermissionDenied` error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Builds a `Disconnected` error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Builds a `NetworkError` error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Builds a `Cancelled` error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Fully qualified D-Bus error name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{ERROR_PREFIX}{}", self.class())
    }

    /// Short class name, e.g. `NotAvailable`.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::InvalidHandle { .. } => "InvalidHandle",
            Self::NotImplemented { .. } => "NotImplemented",
            Self::NotAvailable { .. } => "NotAvailable",
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::Disconnected { .. } => "Disconnected",
            Self::NetworkError { .. } => "NetworkError",
            Self::Cancelled { .. } => "Cancelled",
        }
    }

    /// Human readable message without the class prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument { message }
            | Self::InvalidHandle { message }
            | Self::NotImplemented { message }
            | Self::NotAvailable { message }
            | Self::PermissionDenied { message }
            | Self::Disconnected { message }
            | Self::NetworkError { message }
            | Self::Cancelled { message } => message,
        }
    }

    /// Best-effort status reason for a connection torn down by this error.
    #[must_use]
    pub const fn status_reason(&self) -> ConnectionStatusReason {
        match self {
            Self::NetworkError { .. } => ConnectionStatusReason::NetworkError,
            Self::PermissionDenied { .. } => ConnectionStatusReason::AuthenticationFailed,
            _ => ConnectionStatusReason::NoneSpecified,
        }
    }
}

/// Failures reported by a handle table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The identifier cannot be normalised into a valid entity name.
    #[error("invalid {entity} identifier '{id}': {reason}")]
    InvalidIdentifier {
        /// Entity type of the table.
        entity: EntityType,
        /// Identifier as supplied.
        id: String,
        /// Why normalisation failed.
        reason: String,
    },

    /// The numeric handle is not currently allocated.
    #[error("{entity} handle {handle} is not valid")]
    InvalidHandle {
        /// Entity type of the table.
        entity: EntityType,
        /// Raw handle value.
        handle: u32,
    },

    /// The identifier is unknown locally and needs a remote lookup.
    #[error("{entity} identifier '{id}' needs a remote lookup")]
    LookupRequired {
        /// Entity type of the table.
        entity: EntityType,
        /// Identifier awaiting resolution.
        id: String,
    },

    /// The connection has no table for this entity type.
    #[error("handle type {entity} is not supported by this connection")]
    UnsupportedEntity {
        /// Entity type requested.
        entity: EntityType,
    },
}

impl From<HandleError> for TpError {
    fn from(error: HandleError) -> Self {
        match error {
            HandleError::UnsupportedEntity { .. } => Self::not_implemented(error.to_string()),
            HandleError::LookupRequired { .. } => Self::not_available(error.to_string()),
            HandleError::InvalidIdentifier { .. } | HandleError::InvalidHandle { .. } => {
                Self::invalid_handle(error.to_string())
            }
        }
    }
}

/// Failures reported by the bus transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// An object could not be exported.
    #[error("failed to register object at {path}: {message}")]
    Registration {
        /// Object path that was rejected.
        path: String,
        /// Transport supplied detail.
        message: String,
    },

    /// A well-known bus name could not be claimed.
    #[error("failed to claim bus name {name}: {message}")]
    NameUnavailable {
        /// Bus name that was rejected.
        name: String,
        /// Transport supplied detail.
        message: String,
    },
}

impl From<TransportError> for TpError {
    fn from(error: TransportError) -> Self {
        Self::not_available(error.to_string())
    }
}

impl From<ConfigError> for TpError {
    fn from(error: ConfigError) -> Self {
        Self::invalid_argument(error.to_string())
    }
}
