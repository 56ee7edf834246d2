//! Error types for meshplane
//!
//! Every variant is terminal for the current invocation. Nothing in this crate
//! retries; the caller corrects the input and re-runs the command.

use thiserror::Error;

/// Main error type for meshplane operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed flag value, bad format selector, unreadable values file
    #[error("{0}")]
    Input(String),

    /// The cluster could not be reached during the pre-flight check
    #[error(
        "Unable to install the meshplane control plane. Cannot connect to the Kubernetes cluster:\n\n{reason}\n\nYou can use the --ignore-cluster flag if you just want to generate the installation config."
    )]
    ClusterUnreachable {
        /// Why the cluster could not be reached
        reason: String,
    },

    /// An installation already exists in the target namespace
    #[error(
        "Can't install the meshplane control plane in the '{namespace}' namespace. Reason: {reason}.\nRun the command `meshplane upgrade`, if you are looking to upgrade meshplane."
    )]
    Conflict {
        /// Namespace that already holds an installation
        namespace: String,
        /// What was found
        reason: String,
    },

    /// A cross-field rule was violated
    #[error("{message}")]
    Validation {
        /// The offending setting (flag name or values path)
        field: String,
        /// Description of the violated constraint
        message: String,
    },

    /// Missing, partial, or inconsistent issuer credentials
    #[error("{0}")]
    Credential(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Template loading or evaluation failed
    #[error("failed to render the template: {0}")]
    Template(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The invocation context was cancelled mid-operation
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create an input error with the given message
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create a validation error for a field
    pub fn validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a credential error with the given message
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create an unreachable-cluster error
    pub fn cluster_unreachable(reason: impl Into<String>) -> Self {
        Self::ClusterUnreachable {
            reason: reason.into(),
        }
    }

    /// Create an existing-installation conflict error
    pub fn conflict(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    /// Create a template error with the given message
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// The field a validation error points at, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
