//! Shared credentials file (`~/.aws/credentials`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use skyhook_core::EnvSnapshot;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable overriding the credentials file location.
pub const SHARED_CREDENTIALS_FILE_ENV: &str = "AWS_SHARED_CREDENTIALS_FILE";

/// Parsed profiles from a shared credentials file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsStore {
    path: PathBuf,
    profiles: HashMap<String, ProfileSection>,
}

/// Key/value pairs of one profile section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSection {
    values: HashMap<String, String>,
}

impl ProfileSection {
    /// Non-blank value for a key (keys are case-insensitive)
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl CredentialsStore {
    /// Location of the credentials file for this environment.
    ///
    /// `AWS_SHARED_CREDENTIALS_FILE` wins; otherwise `~/.aws/credentials`.
    #[must_use]
    pub fn default_path(env: &EnvSnapshot) -> PathBuf {
        if let Some(path) = env.non_blank(SHARED_CREDENTIALS_FILE_ENV) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_default()
            .join(".aws")
            .join("credentials")
    }

    /// Load the store for this environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn from_env(env: &EnvSnapshot) -> Result<Self> {
        Self::load(Self::default_path(env)).await
    }

    /// Load a credentials file. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Self::parse(path, &contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No shared credentials file");
                Ok(Self {
                    path: path.to_path_buf(),
                    profiles: HashMap::new(),
                })
            }
            Err(err) => Err(Error::CredentialsFile {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Parse INI-style credentials content.
    #[must_use]
    pub fn parse(path: impl AsRef<Path>, contents: &str) -> Self {
        let mut profiles: HashMap<String, ProfileSection> = HashMap::new();
        let mut current: Option<String> = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = section.trim();
                let name = name.strip_prefix("profile ").unwrap_or(name).trim();
                profiles.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            let (Some(section), Some((key, value))) = (current.as_ref(), line.split_once('='))
            else {
                continue;
            };
            if let Some(profile) = profiles.get_mut(section) {
                profile
                    .values
                    .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Self {
            path: path.as_ref().to_path_buf(),
            profiles,
        }
    }

    /// Path the store was read from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a profile
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ProfileSection> {
        self.profiles.get(name)
    }
}
