//! HTTP client options derived from the environment.

use std::path::PathBuf;
use std::time::Duration;

use skyhook_core::EnvSnapshot;
use tracing::warn;

use crate::error::{Error, Result};

const PROXY_VARS: &[&str] = &["proxy", "HTTP_PROXY", "http_proxy", "HTTPS_PROXY", "https_proxy"];
const TIMEOUT_VARS: &[&str] = &["AWS_CLIENT_TIMEOUT", "aws_client_timeout"];

/// Transport settings shared by every service client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpOptions {
    /// Proxy URL
    pub proxy: Option<String>,
    /// Extra PEM-encoded certificate authorities
    pub ca_certificates: Vec<String>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
    /// Log every request on the `skyhook::aws::requests` target
    pub debug_logging: bool,
}

impl HttpOptions {
    /// Read transport settings from an environment snapshot.
    ///
    /// `ca` holds comma-separated inline certificates (literal `\n` sequences
    /// are expanded); `cafile` holds comma-separated certificate paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CertificateFile`] if a `cafile` entry cannot be read.
    pub fn from_env(env: &EnvSnapshot) -> Result<Self> {
        let mut ca_certificates: Vec<String> = env
            .non_blank("ca")
            .map(|value| {
                value
                    .split(',')
                    .map(|cert| cert.trim().replace("\\n", "\n"))
                    .filter(|cert| !cert.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(files) = env.non_blank("cafile") {
            for path in files.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let contents =
                    std::fs::read_to_string(path).map_err(|err| Error::CertificateFile {
                        path: PathBuf::from(path),
                        message: err.to_string(),
                    })?;
                ca_certificates.push(contents);
            }
        }

        let timeout = env.first_of(TIMEOUT_VARS).and_then(|raw| {
            raw.trim().parse::<u64>().map_or_else(
                |_| {
                    warn!(value = raw, "Ignoring invalid AWS client timeout");
                    None
                },
                |millis| Some(Duration::from_millis(millis)),
            )
        });

        Ok(Self {
            proxy: env.first_of(PROXY_VARS).map(ToString::to_string),
            ca_certificates,
            timeout,
            debug_logging: env.is_truthy("SKYHOOK_DEBUG"),
        })
    }
}
