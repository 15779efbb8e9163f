//! Image build pipeline
//!
//! Builds an image from a local context and pushes it to the service's
//! container repository:
//!
//! ```text
//! CheckDockerfile -> CheckToolAvailable -> EnsureRepository -> Build -> Tag
//!     -> Push -> [auth failure: Login -> Push] -> Done
//! ```
//!
//! The repository is looked up (and created when missing) once per pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use skyhook_aws::{AwsProvider, RequestOptions};
use skyhook_core::Diagnostics;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::reference::{digest_hex, push_digest};
use crate::runner::{CommandFailure, CommandRunner};

/// Dockerfile name used when an image does not set `file`.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Warning emitted when `docker login` stores the token in plain text.
pub const UNENCRYPTED_CREDENTIALS_WARNING: &str =
    "Docker authentication token will be stored unencrypted in docker config.";

/// Output fragments meaning the registry rejected our credentials; a login
/// followed by one more push is attempted.
const LOGIN_REQUIRED_MARKERS: &[&str] = &["no basic auth credentials", "token has expired"];

const UNENCRYPTED_MARKER: &str = "your password will be stored unencrypted";

const REPOSITORY_NOT_FOUND: &str = "RepositoryNotFoundException";

/// An image to build from a local context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Provider image name; used as the tag
    pub image_name: String,
    /// Build context, relative to the service directory
    pub path: String,
    /// Dockerfile name inside the context
    pub file: Option<String>,
}

impl BuildRequest {
    /// Request with the default Dockerfile
    #[must_use]
    pub fn new(image_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            path: path.into(),
            file: None,
        }
    }

    /// Use a specific Dockerfile
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// A pushed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// `repository@sha256:<hex>`
    pub uri: String,
    /// `sha256:<hex>`
    pub digest: String,
    /// `<hex>`, as expected by function version resources
    pub code_sha256: String,
}

impl ResolvedImage {
    /// Build from a repository uri and a `sha256:<hex>` digest
    #[must_use]
    pub fn new(repository_uri: &str, digest: &str) -> Self {
        Self {
            uri: format!("{repository_uri}@{digest}"),
            digest: digest.to_string(),
            code_sha256: digest_hex(digest).to_string(),
        }
    }
}

/// Builds and pushes images into the service's repository.
pub struct ImagePipeline {
    provider: Arc<AwsProvider>,
    runner: Arc<dyn CommandRunner>,
    diagnostics: Arc<dyn Diagnostics>,
    repository_name: String,
    repository_uri: OnceCell<String>,
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("repository_name", &self.repository_name)
            .field("repository_uri", &self.repository_uri.get())
            .finish_non_exhaustive()
    }
}

impl ImagePipeline {
    /// Create a pipeline for the provider's service
    #[must_use]
    pub fn new(
        provider: Arc<AwsProvider>,
        runner: Arc<dyn CommandRunner>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let repository_name = provider.naming().ecr_repository_name();
        Self {
            provider,
            runner,
            diagnostics,
            repository_name,
            repository_uri: OnceCell::new(),
        }
    }

    /// Repository images are pushed to
    #[must_use]
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    fn service_dir(&self) -> &Path {
        &self.provider.service().service_dir
    }

    /// Location of the Dockerfile for a request
    #[must_use]
    pub fn dockerfile_path(&self, request: &BuildRequest) -> PathBuf {
        self.service_dir().join(dockerfile_arg(request))
    }

    /// Build, tag and push an image, returning its pushed digest.
    ///
    /// # Errors
    ///
    /// Fails with the error kind of the step that failed; no step runs after
    /// a failure.
    #[instrument(level = "debug", skip(self), fields(image = %request.image_name))]
    pub async fn build(&self, request: &BuildRequest) -> Result<ResolvedImage> {
        let dockerfile = self.dockerfile_path(request);
        let available = tokio::fs::metadata(&dockerfile)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if !available {
            return Err(Error::DockerfileNotAvailable { path: dockerfile });
        }

        self.docker(&["--version"])
            .await
            .map_err(|failure| Error::DockerCommandNotAvailable {
                message: failure.details().to_string(),
            })?;

        let repository_uri = self.repository_uri().await?;
        let image = &request.image_name;
        let local_tag = format!("{}:{image}", self.repository_name);
        let remote_tag = format!("{repository_uri}:{image}");

        info!(image = %image, "Building image");
        self.docker(&[
            "build",
            "-t",
            &local_tag,
            "-f",
            &dockerfile_arg(request).to_string_lossy(),
            &request.path,
        ])
        .await
        .map_err(|failure| Error::DockerBuild {
            image: image.clone(),
            output: failure.details().to_string(),
        })?;

        self.docker(&["tag", &local_tag, &remote_tag])
            .await
            .map_err(|failure| Error::DockerTag {
                image: image.clone(),
                output: failure.details().to_string(),
            })?;

        let output = self.push(image, &remote_tag).await?;
        let digest = push_digest(&output).ok_or_else(|| Error::DockerPush {
            image: image.clone(),
            output: format!("no image digest in push output: {}", output.trim()),
        })?;

        debug!(image = %image, %digest, "Image pushed");
        Ok(ResolvedImage::new(&repository_uri, &digest))
    }

    async fn push(&self, image: &str, remote_tag: &str) -> Result<String> {
        let push_error = |failure: &CommandFailure| Error::DockerPush {
            image: image.to_string(),
            output: failure.details().to_string(),
        };

        match self.docker(&["push", remote_tag]).await {
            Ok(output) => Ok(output),
            Err(failure) if requires_login(&failure) => {
                debug!(image, "Registry rejected credentials, logging in");
                self.login().await?;
                self.docker(&["push", remote_tag])
                    .await
                    .map_err(|failure| push_error(&failure))
            }
            Err(failure) => Err(push_error(&failure)),
        }
    }

    /// Uri of the service repository, creating the repository when missing.
    ///
    /// # Errors
    ///
    /// Returns the remote failure of the lookup or the creation.
    pub async fn repository_uri(&self) -> Result<String> {
        self.repository_uri
            .get_or_try_init(|| self.ensure_repository())
            .await
            .cloned()
    }

    async fn ensure_repository(&self) -> Result<String> {
        let described = self
            .provider
            .request(
                "ECR",
                "describeRepositories",
                json!({ "repositoryNames": [self.repository_name] }),
                RequestOptions::new(),
            )
            .await;

        match described {
            Ok(result) => string_at(&result, "/repositories/0/repositoryUri", "describeRepositories"),
            Err(err) if err.provider_code() == Some(REPOSITORY_NOT_FOUND) => {
                info!(repository = %self.repository_name, "Creating container repository");
                let created = self
                    .provider
                    .request(
                        "ECR",
                        "createRepository",
                        json!({
                            "repositoryName": self.repository_name,
                            "imageScanningConfiguration": {
                                "scanOnPush": self.provider.service().provider.scan_on_push(),
                            },
                        }),
                        RequestOptions::new(),
                    )
                    .await?;
                string_at(&created, "/repository/repositoryUri", "createRepository")
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn login(&self) -> Result<()> {
        let auth = self
            .provider
            .request("ECR", "getAuthorizationToken", json!({}), RequestOptions::new())
            .await?;
        let token = string_at(&auth, "/authorizationData/0/authorizationToken", "getAuthorizationToken")?;
        let endpoint = string_at(&auth, "/authorizationData/0/proxyEndpoint", "getAuthorizationToken")?;

        let decoded = STANDARD
            .decode(token.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| invalid_ecr_response("getAuthorizationToken", "authorization token is not base64"))?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            invalid_ecr_response("getAuthorizationToken", "authorization token lacks a user name")
        })?;

        let output = self
            .docker(&["login", "--username", username, "--password", password, &endpoint])
            .await
            .map_err(|failure| Error::DockerLogin {
                endpoint: endpoint.clone(),
                output: failure.details().to_string(),
            })?;

        if output.to_lowercase().contains(UNENCRYPTED_MARKER) {
            self.diagnostics.warning(UNENCRYPTED_CREDENTIALS_WARNING);
        }
        Ok(())
    }

    async fn docker(&self, args: &[&str]) -> std::result::Result<String, CommandFailure> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.runner.run("docker", &args, self.service_dir()).await
    }
}

fn requires_login(failure: &CommandFailure) -> bool {
    LOGIN_REQUIRED_MARKERS
        .iter()
        .any(|marker| failure.output.contains(marker) || failure.message.contains(marker))
}

fn invalid_ecr_response(method: &str, message: &str) -> Error {
    skyhook_aws::Error::invalid_response("ECR", method, message).into()
}

/// Dockerfile path as passed to `docker build`, relative to the service
/// directory the command runs in.
fn dockerfile_arg(request: &BuildRequest) -> PathBuf {
    Path::new(&request.path)
        .join(request.file.as_deref().unwrap_or(DEFAULT_DOCKERFILE))
        .components()
        .collect()
}

fn string_at(value: &Value, pointer: &str, method: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| invalid_ecr_response(method, &format!("missing {pointer}")))
}
