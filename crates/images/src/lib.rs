//! Container image resolution and build pipeline for skyhook.
//!
//! Functions deployed from container images reference either a full image
//! uri or a named image declared under `provider.ecr.images`. This crate pins
//! every such reference to a content digest, building and pushing named
//! images from their local context through `docker` when they declare a
//! path.
//!
//! ```rust,ignore
//! let pipeline = Arc::new(ImagePipeline::new(provider.clone(), Arc::new(TokioCommandRunner), diagnostics));
//! let resolver = ImageResolver::new(provider.clone(), pipeline);
//! let images = resolver.resolve_all(&provider.service().functions).await?;
//! ```

mod error;
pub mod pipeline;
pub mod reference;
pub mod resolver;
pub mod runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, ErrorKind, Result};
pub use pipeline::{BuildRequest, ImagePipeline, ResolvedImage};
pub use reference::ImageReference;
pub use resolver::{ImageDescriptor, ImageResolver, ImageSource};
pub use runner::{CommandFailure, CommandRunner, TokioCommandRunner};
