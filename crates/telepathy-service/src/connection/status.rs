use serde::{Serialize, Serializer};
use strum::Display;
use thiserror::Error;

use crate::errors::TpError;

/// Lifecycle state of a connection.
///
/// ```text
///   NEW ──► CONNECTING ──► CONNECTED
///    │           │             │
///    └───────────┴─────────────┴──► DISCONNECTED (terminal)
/// ```
///
/// A request to go straight from `NEW` to `CONNECTED` is carried out as two
/// transitions through `CONNECTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnectionStatus {
    /// Created, `Connect` not called yet.
    New,
    /// Connecting to the service.
    Connecting,
    /// Fully connected.
    Connected,
    /// Gone for good.
    Disconnected,
}

impl ConnectionStatus {
    /// Wire value; `New` is reported as disconnected.
    #[must_use]
    pub const fn as_wire(self) -> u32 {
        match self {
            Self::Connected => 0,
            Self::Connecting => 1,
            Self::Disconnected | Self::New => 2,
        }
    }
}

impl Serialize for ConnectionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_wire())
    }
}

/// Reason attached to a status change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatusReason {
    /// No particular reason.
    #[default]
    NoneSpecified,
    /// The user asked for it.
    Requested,
    /// The network failed.
    NetworkError,
    /// Credentials were rejected.
    AuthenticationFailed,
    /// Encryption could not be negotiated.
    EncryptionError,
    /// Somebody else is using the account.
    NameInUse,
    /// The server wanted a certificate that was not given.
    CertNotProvided,
    /// The server certificate is not trusted.
    CertUntrusted,
    /// The server certificate expired.
    CertExpired,
    /// The server certificate is not active yet.
    CertNotActivated,
    /// The server certificate names another host.
    CertHostnameMismatch,
    /// The server certificate fingerprint is wrong.
    CertFingerprintMismatch,
    /// The server certificate is self-signed.
    CertSelfSigned,
    /// Some other certificate problem.
    CertOtherError,
    /// The server certificate was revoked.
    CertRevoked,
    /// The server certificate uses weak cryptography.
    CertInsecure,
    /// The server certificate exceeds a length limit.
    CertLimitExceeded,
}

impl ConnectionStatusReason {
    /// Wire value.
    #[must_use]
    pub const fn as_wire(self) -> u32 {
        match self {
            Self::NoneSpecified => 0,
            Self::Requested => 1,
            Self::NetworkError => 2,
            Self::AuthenticationFailed => 3,
            Self::EncryptionError => 4,
            Self::NameInUse => 5,
            Self::CertNotProvided => 6,
            Self::CertUntrusted => 7,
            Self::CertExpired => 8,
            Self::CertNotActivated => 9,
            Self::CertHostnameMismatch => 10,
            Self::CertFingerprintMismatch => 11,
            Self::CertSelfSigned => 12,
            Self::CertOtherError => 13,
            Self::CertRevoked => 14,
            Self::CertInsecure => 15,
            Self::CertLimitExceeded => 16,
        }
    }
}

impl Serialize for ConnectionStatusReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_wire())
    }
}

/// Rejected status changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The lifecycle does not allow this move.
    #[error("illegal status transition from {from} to {to}")]
    Illegal {
        /// Current status.
        from: ConnectionStatus,
        /// Requested status.
        to: ConnectionStatus,
    },

    /// `CONNECTED` was requested before a valid self handle was set.
    #[error("cannot become connected without a valid self handle")]
    MissingSelfHandle,

    /// The connection is already disconnected.
    #[error("connection is disconnected; no further transitions are possible")]
    Terminal,
}

impl From<TransitionError> for TpError {
    fn from(error: TransitionError) -> Self {
        Self::not_available(error.to_string())
    }
}

/// How a requested status change is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Already in the requested state.
    Unchanged,
    /// One transition.
    Direct,
    /// `NEW` to `CONNECTED`, through `CONNECTING`.
    ViaConnecting,
}

pub(crate) fn plan_transition(
    from: ConnectionStatus,
    to: ConnectionStatus,
) -> Result<Step, TransitionError> {
    use ConnectionStatus::{Connected, Connecting, Disconnected, New};

    match (from, to) {
        _ if from == to => Ok(Step::Unchanged),
        (Disconnected, _) => Err(TransitionError::Terminal),
        (New, Connected) => Ok(Step::ViaConnecting),
        (New, Connecting) | (Connecting, Connected) | (_, Disconnected) => Ok(Step::Direct),
        _ => Err(TransitionError::Illegal { from, to }),
    }
}
