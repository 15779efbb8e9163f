//! Error types for AWS request execution.
//!
//! Errors are `Clone` because a single failed call is fanned out to every
//! caller sharing its cache key.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using the AWS error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Named profile absent from the credentials store
    InvalidProfile,
    /// Remote call reported missing credentials
    MissingCredentials,
    /// Rate limited and retries exhausted
    Throttled,
    /// Any other remote failure
    RemoteCallFailed,
    /// No client factory registered for the service
    UnknownService,
    /// Remote result lacked an expected field
    InvalidResponse,
    /// Local credential or certificate material could not be read
    LocalConfiguration,
}

impl ErrorKind {
    /// Upper-case code for the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidProfile => "INVALID_PROFILE",
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::Throttled => "THROTTLED",
            Self::RemoteCallFailed => "REMOTE_CALL_FAILED",
            Self::UnknownService => "UNKNOWN_SERVICE",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::LocalConfiguration => "LOCAL_CONFIGURATION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while resolving credentials or executing requests.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum Error {
    /// A named profile does not exist in the shared credentials file.
    #[error("Profile {profile} does not exist in {}", path.display())]
    #[diagnostic(
        code(skyhook_aws::invalid_profile),
        help("Check the profile name or set AWS_SHARED_CREDENTIALS_FILE")
    )]
    InvalidProfile {
        /// Requested profile
        profile: String,
        /// Credentials file that was searched
        path: PathBuf,
    },

    /// The credentials file exists but could not be read.
    #[error("Failed to read credentials file {}: {message}", path.display())]
    #[diagnostic(code(skyhook_aws::credentials_file))]
    CredentialsFile {
        /// Credentials file path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A certificate authority file could not be read.
    #[error("Failed to read certificate authority file {}: {message}", path.display())]
    #[diagnostic(code(skyhook_aws::ca_file))]
    CertificateFile {
        /// Certificate file path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// The remote call reported that no credentials were available.
    #[error("{message}")]
    #[diagnostic(code(skyhook_aws::missing_credentials))]
    MissingCredentials {
        /// Original message with a documentation pointer appended
        message: String,
    },

    /// The call kept being rate limited until the attempt budget ran out.
    #[error("{message}")]
    #[diagnostic(code(skyhook_aws::throttled))]
    Throttled {
        /// Service identifier
        service: String,
        /// Method name
        method: String,
        /// Message (or code) of the last failure
        message: String,
        /// Attempts made
        attempts: usize,
    },

    /// The remote call failed.
    #[error("{message}")]
    #[diagnostic(code(skyhook_aws::remote_call_failed))]
    RemoteCallFailed {
        /// Service identifier
        service: String,
        /// Method name
        method: String,
        /// Message, or the provider code when the message is empty
        message: String,
        /// Provider error code (e.g. `RepositoryNotFoundException`)
        code: Option<String>,
        /// HTTP status code
        status_code: Option<u16>,
    },

    /// No client factory is registered for the service.
    #[error("Unknown service: {service}")]
    #[diagnostic(
        code(skyhook_aws::unknown_service),
        help("Register a client factory for the service in the ServiceRegistry")
    )]
    UnknownService {
        /// Service identifier
        service: String,
    },

    /// The remote result did not contain an expected field.
    #[error("Unexpected response from {service}.{method}: {message}")]
    #[diagnostic(code(skyhook_aws::invalid_response))]
    InvalidResponse {
        /// Service identifier
        service: String,
        /// Method name
        method: String,
        /// What was missing
        message: String,
    },
}

impl Error {
    /// Stable kind of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProfile { .. } => ErrorKind::InvalidProfile,
            Self::CredentialsFile { .. } | Self::CertificateFile { .. } => {
                ErrorKind::LocalConfiguration
            }
            Self::MissingCredentials { .. } => ErrorKind::MissingCredentials,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::RemoteCallFailed { .. } => ErrorKind::RemoteCallFailed,
            Self::UnknownService { .. } => ErrorKind::UnknownService,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
        }
    }

    /// Provider error code carried by a remote failure
    #[must_use]
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::RemoteCallFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Create an invalid response error
    #[must_use]
    pub fn invalid_response(service: &str, method: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.to_string(),
            method: method.to_string(),
            message: message.into(),
        }
    }
}
