//! Classification of service failures into retry decisions and surfaced errors.

use crate::error::Error;
use crate::service::ProviderError;

/// Status code the service uses for rate limiting.
pub const THROTTLING_STATUS: u16 = 429;

/// Message fragment the SDK reports when no credentials could be found.
pub const MISSING_CREDENTIALS_FRAGMENT: &str = "Missing credentials in config";

/// Where users are pointed when credentials are missing.
pub const CREDENTIALS_DOCS_URL: &str =
    "https://github.com/skyhook-dev/skyhook/blob/main/docs/credentials.md";

/// Whether a failure should be retried.
///
/// Only rate limiting is retried; the transport's own `retryable` hint is
/// ignored, so a 403 marked retryable still fails on the first attempt.
#[must_use]
pub fn should_retry(err: &ProviderError) -> bool {
    !is_missing_credentials(err) && err.status_code == Some(THROTTLING_STATUS)
}

fn is_missing_credentials(err: &ProviderError) -> bool {
    err.message
        .as_deref()
        .is_some_and(|m| m.contains(MISSING_CREDENTIALS_FRAGMENT))
}

/// Turn the final failure of a call into the error surfaced to callers.
#[must_use]
pub fn surface(service: &str, method: &str, err: &ProviderError, attempts: usize) -> Error {
    let message = err.display_message();

    if is_missing_credentials(err) {
        return Error::MissingCredentials {
            message: format!(
                "{message}. Learn how to set up AWS credentials in our docs here: {CREDENTIALS_DOCS_URL}"
            ),
        };
    }

    if err.status_code == Some(THROTTLING_STATUS) {
        return Error::Throttled {
            service: service.to_string(),
            method: method.to_string(),
            message,
            attempts,
        };
    }

    Error::RemoteCallFailed {
        service: service.to_string(),
        method: method.to_string(),
        message,
        code: err.code.clone(),
        status_code: err.status_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_throttling_is_retried_regardless_of_hint() {
        assert!(should_retry(&ProviderError::new("slow down").with_status(429)));
        assert!(should_retry(
            &ProviderError::new("slow down")
                .with_status(429)
                .with_retryable(false)
        ));
    }

    #[test]
    fn test_forbidden_is_not_retried() {
        let err = ProviderError::new("denied")
            .with_status(403)
            .with_retryable(true);
        assert!(!should_retry(&err));
        assert_eq!(surface("S3", "getObject", &err, 1).kind(), ErrorKind::RemoteCallFailed);
    }

    #[test]
    fn test_missing_credentials_gets_docs_pointer() {
        let err = ProviderError::new("Missing credentials in config").with_status(429);
        assert!(!should_retry(&err));
        let surfaced = surface("S3", "putObject", &err, 1);
        assert_eq!(surfaced.kind(), ErrorKind::MissingCredentials);
        assert!(surfaced.to_string().contains("in our docs here:"));
    }

    #[test]
    fn test_exhausted_throttling_surfaces_throttled() {
        let err = ProviderError::default()
            .with_code("ThrottlingException")
            .with_status(429);
        let surfaced = surface("CloudFormation", "describeStacks", &err, 5);
        assert_eq!(surfaced.kind(), ErrorKind::Throttled);
        assert_eq!(surfaced.to_string(), "ThrottlingException");
    }

    #[test]
    fn test_code_is_kept_on_remote_failure() {
        let err = ProviderError::new("The repository does not exist")
            .with_code("RepositoryNotFoundException")
            .with_status(400);
        let surfaced = surface("ECR", "describeRepositories", &err, 1);
        assert_eq!(surfaced.provider_code(), Some("RepositoryNotFoundException"));
        assert_eq!(surfaced.to_string(), "The repository does not exist");
    }
}
