//! Error types for image resolution and the build pipeline.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using the image error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Provider image declares both `uri` and `path`
    ImageBothUriAndPath,
    /// Provider image declares neither `uri` nor `path`
    ImageNeitherUriNorPath,
    /// Function image object declares both `uri` and `name`
    ImageBothUriAndName,
    /// Function image object declares neither `uri` nor `name`
    ImageNeitherUriNorName,
    /// Function references an image the provider does not declare
    ImageReferenceUndefined,
    /// An image uri could not be parsed
    InvalidImageReference,
    /// Dockerfile missing from the build context
    DockerfileNotAvailable,
    /// `docker` is not installed or not runnable
    DockerCommandNotAvailable,
    /// `docker build` failed
    DockerBuild,
    /// `docker tag` failed
    DockerTag,
    /// `docker push` failed
    DockerPush,
    /// `docker login` failed
    DockerLogin,
    /// A remote call failed
    Remote(skyhook_aws::ErrorKind),
}

impl ErrorKind {
    /// Upper-case code for the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImageBothUriAndPath => "IMAGE_BOTH_URI_AND_PATH",
            Self::ImageNeitherUriNorPath => "IMAGE_NEITHER_URI_NOR_PATH",
            Self::ImageBothUriAndName => "IMAGE_BOTH_URI_AND_NAME",
            Self::ImageNeitherUriNorName => "IMAGE_NEITHER_URI_NOR_NAME",
            Self::ImageReferenceUndefined => "IMAGE_REFERENCE_UNDEFINED",
            Self::InvalidImageReference => "INVALID_IMAGE_REFERENCE",
            Self::DockerfileNotAvailable => "DOCKERFILE_NOT_AVAILABLE",
            Self::DockerCommandNotAvailable => "DOCKER_COMMAND_NOT_AVAILABLE",
            Self::DockerBuild => "DOCKER_BUILD_ERROR",
            Self::DockerTag => "DOCKER_TAG_ERROR",
            Self::DockerPush => "DOCKER_PUSH_ERROR",
            Self::DockerLogin => "DOCKER_LOGIN_ERROR",
            Self::Remote(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while resolving or building images.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum Error {
    /// A provider image declares both a uri and a build path.
    #[error("Image '{image}' defines both \"uri\" and \"path\"; only one of them is allowed")]
    #[diagnostic(code(skyhook_images::both_uri_and_path))]
    ImageBothUriAndPath {
        /// Provider image name
        image: String,
    },

    /// A provider image declares neither a uri nor a build path.
    #[error("Image '{image}' defines neither \"uri\" nor \"path\"")]
    #[diagnostic(code(skyhook_images::neither_uri_nor_path))]
    ImageNeitherUriNorPath {
        /// Provider image name
        image: String,
    },

    /// A function image object declares both a uri and a name.
    #[error("Function '{function}' image defines both \"uri\" and \"name\"; only one of them is allowed")]
    #[diagnostic(code(skyhook_images::both_uri_and_name))]
    ImageBothUriAndName {
        /// Function name
        function: String,
    },

    /// A function image object declares neither a uri nor a name.
    #[error("Function '{function}' image defines neither \"uri\" nor \"name\"")]
    #[diagnostic(code(skyhook_images::neither_uri_nor_name))]
    ImageNeitherUriNorName {
        /// Function name
        function: String,
    },

    /// A function references an image missing from `provider.ecr.images`.
    #[error("Function '{function}' references image '{image}' which is not defined in provider.ecr.images")]
    #[diagnostic(
        code(skyhook_images::reference_undefined),
        help("Declare the image under provider.ecr.images or reference a full image uri")
    )]
    ImageReferenceUndefined {
        /// Function name
        function: String,
        /// Referenced image
        image: String,
    },

    /// An image uri could not be parsed.
    #[error("Invalid image reference '{reference}': {message}")]
    #[diagnostic(code(skyhook_images::invalid_reference))]
    InvalidImageReference {
        /// Offending reference
        reference: String,
        /// What is wrong with it
        message: String,
    },

    /// The Dockerfile does not exist.
    #[error("No Dockerfile found at {}", path.display())]
    #[diagnostic(code(skyhook_images::dockerfile_not_available))]
    DockerfileNotAvailable {
        /// Expected Dockerfile location
        path: PathBuf,
    },

    /// The docker command could not be run.
    #[error("Could not find Docker installation. Ensure Docker is installed before building images: {message}")]
    #[diagnostic(code(skyhook_images::docker_not_available))]
    DockerCommandNotAvailable {
        /// Failure reported by the runner
        message: String,
    },

    /// `docker build` failed.
    #[error("Failed to build image '{image}': {output}")]
    #[diagnostic(code(skyhook_images::docker_build))]
    DockerBuild {
        /// Image name
        image: String,
        /// Command output
        output: String,
    },

    /// `docker tag` failed.
    #[error("Failed to tag image '{image}': {output}")]
    #[diagnostic(code(skyhook_images::docker_tag))]
    DockerTag {
        /// Image name
        image: String,
        /// Command output
        output: String,
    },

    /// `docker push` failed.
    #[error("Failed to push image '{image}': {output}")]
    #[diagnostic(code(skyhook_images::docker_push))]
    DockerPush {
        /// Image name
        image: String,
        /// Command output
        output: String,
    },

    /// `docker login` failed.
    #[error("Failed to log in to container registry {endpoint}: {output}")]
    #[diagnostic(code(skyhook_images::docker_login))]
    DockerLogin {
        /// Registry endpoint
        endpoint: String,
        /// Command output
        output: String,
    },

    /// A remote call failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Aws(#[from] skyhook_aws::Error),
}

impl Error {
    /// Stable kind of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageBothUriAndPath { .. } => ErrorKind::ImageBothUriAndPath,
            Self::ImageNeitherUriNorPath { .. } => ErrorKind::ImageNeitherUriNorPath,
            Self::ImageBothUriAndName { .. } => ErrorKind::ImageBothUriAndName,
            Self::ImageNeitherUriNorName { .. } => ErrorKind::ImageNeitherUriNorName,
            Self::ImageReferenceUndefined { .. } => ErrorKind::ImageReferenceUndefined,
            Self::InvalidImageReference { .. } => ErrorKind::InvalidImageReference,
            Self::DockerfileNotAvailable { .. } => ErrorKind::DockerfileNotAvailable,
            Self::DockerCommandNotAvailable { .. } => ErrorKind::DockerCommandNotAvailable,
            Self::DockerBuild { .. } => ErrorKind::DockerBuild,
            Self::DockerTag { .. } => ErrorKind::DockerTag,
            Self::DockerPush { .. } => ErrorKind::DockerPush,
            Self::DockerLogin { .. } => ErrorKind::DockerLogin,
            Self::Aws(err) => ErrorKind::Remote(err.kind()),
        }
    }

    /// Create an invalid reference error
    #[must_use]
    pub fn invalid_reference(reference: &str, message: impl Into<String>) -> Self {
        Self::InvalidImageReference {
            reference: reference.to_string(),
            message: message.into(),
        }
    }
}
