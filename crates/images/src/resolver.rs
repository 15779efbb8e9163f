//! Function image resolution.
//!
//! Turns the `image` property of each function into a pinned
//! `repository@sha256:<hex>` uri, building provider images from their local
//! context when needed. Each provider image is resolved at most once per
//! resolver, however many functions reference it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use skyhook_aws::{AwsProvider, RequestOptions};
use skyhook_core::{FunctionConfig, FunctionImage, ImageDefinition, ProviderImage};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::pipeline::{BuildRequest, ImagePipeline, ResolvedImage};
use crate::reference::{ImageReference, is_digest_reference, looks_like_image_uri};

type SharedImage = Shared<BoxFuture<'static, Result<ResolvedImage>>>;

/// Where a function's image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// `image: <uri>` or `image: {uri}` on the function
    ExplicitUri,
    /// `image: {name}` on the function
    ExplicitName,
    /// A provider image whose shorthand or definition is a uri
    ImplicitUri,
    /// `image: <name>` naming a provider image
    ProviderAlias,
}

/// Resolved image of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// How the function referenced the image
    pub source: ImageSource,
    /// Provider image name, when one was referenced
    pub name: Option<String>,
    /// Pinned image
    pub image: ResolvedImage,
}

impl ImageDescriptor {
    /// Pinned `repository@sha256:<hex>` uri
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.image.uri
    }
}

/// Resolves function images against `provider.ecr.images`.
pub struct ImageResolver {
    provider: Arc<AwsProvider>,
    pipeline: Arc<ImagePipeline>,
    images: BTreeMap<String, ProviderImage>,
    resolved: Mutex<HashMap<String, SharedImage>>,
}

impl std::fmt::Debug for ImageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResolver")
            .field("images", &self.images.keys().collect::<Vec<_>>())
            .field("resolved", &self.resolved.lock().len())
            .finish_non_exhaustive()
    }
}

impl ImageResolver {
    /// Create a resolver over the provider's declared images
    #[must_use]
    pub fn new(provider: Arc<AwsProvider>, pipeline: Arc<ImagePipeline>) -> Self {
        let images = provider.service().provider.images();
        Self {
            provider,
            pipeline,
            images,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve every function that declares an image, concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first failure; validation errors surface before any
    /// build or remote call starts.
    pub async fn resolve_all(
        &self,
        functions: &BTreeMap<String, FunctionConfig>,
    ) -> Result<BTreeMap<String, ImageDescriptor>> {
        let declared: Vec<(&String, &FunctionImage)> = functions
            .iter()
            .filter_map(|(name, function)| function.image.as_ref().map(|image| (name, image)))
            .collect();

        for (name, image) in &declared {
            self.validate(name, image)?;
        }

        let resolved = try_join_all(declared.iter().map(|(name, image)| async move {
            let descriptor = self.resolve_function(name, image).await?;
            Ok::<_, Error>(((*name).clone(), descriptor))
        }))
        .await?;
        Ok(resolved.into_iter().collect())
    }

    /// Resolve the image of one function.
    ///
    /// # Errors
    ///
    /// Returns a validation kind for malformed references, or the failure
    /// of the lookup or build that pins the image.
    #[instrument(level = "debug", skip(self, image))]
    pub async fn resolve_function(&self, function: &str, image: &FunctionImage) -> Result<ImageDescriptor> {
        self.validate(function, image)?;
        match image {
            FunctionImage::Reference(reference) => {
                if self.images.contains_key(reference) {
                    return self.alias(function, reference, ImageSource::ProviderAlias).await;
                }
                Ok(ImageDescriptor {
                    source: ImageSource::ExplicitUri,
                    name: None,
                    image: self.resolve_uri(reference).await?,
                })
            }
            FunctionImage::Object(object) => match (&object.uri, &object.name) {
                (Some(uri), None) => Ok(ImageDescriptor {
                    source: ImageSource::ExplicitUri,
                    name: None,
                    image: self.resolve_uri(uri).await?,
                }),
                (None, Some(name)) => self.alias(function, name, ImageSource::ExplicitName).await,
                (Some(_), Some(_)) => Err(Error::ImageBothUriAndName {
                    function: function.to_string(),
                }),
                (None, None) => Err(Error::ImageNeitherUriNorName {
                    function: function.to_string(),
                }),
            },
        }
    }

    /// Checks that need no network or subprocess.
    fn validate(&self, function: &str, image: &FunctionImage) -> Result<()> {
        let alias = match image {
            FunctionImage::Reference(reference) => {
                if self.images.contains_key(reference) {
                    Some(reference)
                } else if is_digest_reference(reference) || looks_like_image_uri(reference) {
                    check_uri(reference)?;
                    None
                } else {
                    return Err(Error::ImageReferenceUndefined {
                        function: function.to_string(),
                        image: reference.clone(),
                    });
                }
            }
            FunctionImage::Object(object) => match (&object.uri, &object.name) {
                (Some(_), Some(_)) => {
                    return Err(Error::ImageBothUriAndName {
                        function: function.to_string(),
                    });
                }
                (None, None) => {
                    return Err(Error::ImageNeitherUriNorName {
                        function: function.to_string(),
                    });
                }
                (Some(uri), None) => {
                    check_uri(uri)?;
                    None
                }
                (None, Some(name)) => {
                    if !self.images.contains_key(name) {
                        return Err(Error::ImageReferenceUndefined {
                            function: function.to_string(),
                            image: name.clone(),
                        });
                    }
                    Some(name)
                }
            },
        };

        if let Some(alias) = alias
            && let ProviderSource::Uri(uri) = self.provider_source(function, alias)?
        {
            check_uri(&uri)?;
        }
        Ok(())
    }

    async fn alias(&self, function: &str, name: &str, source: ImageSource) -> Result<ImageDescriptor> {
        let (shared, provider_source) = self.shared_alias(function, name)?;
        let source = match (provider_source, source) {
            (ProviderSource::Uri(_), ImageSource::ProviderAlias) => ImageSource::ImplicitUri,
            (_, source) => source,
        };
        let image = shared.await?;
        Ok(ImageDescriptor {
            source,
            name: Some(name.to_string()),
            image,
        })
    }

    /// The in-flight or finished resolution of a provider image.
    fn shared_alias(&self, function: &str, name: &str) -> Result<(SharedImage, ProviderSource)> {
        let source = self.provider_source(function, name)?;
        let mut resolved = self.resolved.lock();
        if let Some(existing) = resolved.get(name) {
            return Ok((existing.clone(), source));
        }

        let future: BoxFuture<'static, Result<ResolvedImage>> = match &source {
            ProviderSource::Uri(uri) => {
                let provider = Arc::clone(&self.provider);
                let uri = uri.clone();
                async move { resolve_uri(&provider, &uri).await }.boxed()
            }
            ProviderSource::Build(request) => {
                let pipeline = Arc::clone(&self.pipeline);
                let request = request.clone();
                async move { pipeline.build(&request).await }.boxed()
            }
        };
        let shared = future.shared();
        resolved.insert(name.to_string(), shared.clone());
        Ok((shared, source))
    }

    fn provider_source(&self, function: &str, name: &str) -> Result<ProviderSource> {
        let image = self.images.get(name).ok_or_else(|| Error::ImageReferenceUndefined {
            function: function.to_string(),
            image: name.to_string(),
        })?;

        match image {
            ProviderImage::Shorthand(value) if looks_like_image_uri(value) => {
                Ok(ProviderSource::Uri(value.clone()))
            }
            ProviderImage::Shorthand(path) => Ok(ProviderSource::Build(BuildRequest::new(name, path.clone()))),
            ProviderImage::Definition(ImageDefinition { path, file, uri }) => match (path, uri) {
                (Some(_), Some(_)) => Err(Error::ImageBothUriAndPath {
                    image: name.to_string(),
                }),
                (None, None) => Err(Error::ImageNeitherUriNorPath {
                    image: name.to_string(),
                }),
                (None, Some(uri)) => Ok(ProviderSource::Uri(uri.clone())),
                (Some(path), None) => {
                    let request = BuildRequest::new(name, path.clone());
                    Ok(ProviderSource::Build(match file {
                        Some(file) => request.with_file(file.clone()),
                        None => request,
                    }))
                }
            },
        }
    }

    async fn resolve_uri(&self, uri: &str) -> Result<ResolvedImage> {
        resolve_uri(&self.provider, uri).await
    }
}

enum ProviderSource {
    Uri(String),
    Build(BuildRequest),
}

/// Syntax check for a uri that [`resolve_uri`] would otherwise reject later.
fn check_uri(uri: &str) -> Result<()> {
    if !is_digest_reference(uri) {
        ImageReference::parse(uri)?;
    }
    Ok(())
}

/// Pin a uri to a digest, looking tags up in the registry.
async fn resolve_uri(provider: &AwsProvider, uri: &str) -> Result<ResolvedImage> {
    let uri = uri.trim();
    if is_digest_reference(uri) {
        if let Some((repository, digest)) = uri.split_once('@') {
            return Ok(ResolvedImage::new(repository, digest));
        }
    }

    let reference = ImageReference::parse(uri)?;

    let tag = reference.tag_or_default();
    let mut params = Map::new();
    params.insert("imageIds".to_string(), json!([{ "imageTag": tag }]));
    if let Some(registry_id) = reference.registry_id() {
        params.insert("registryId".to_string(), json!(registry_id));
    }
    params.insert("repositoryName".to_string(), json!(reference.repository));

    let mut options = RequestOptions::new().cached(true);
    if let Some(region) = reference.registry_region() {
        options = options.region(region);
    }

    debug!(repository = %reference.repository, tag, "Looking up image digest");
    let result = provider
        .request("ECR", "describeImages", Value::Object(params), options)
        .await?;
    let digest = result
        .pointer("/imageDetails/0/imageDigest")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            skyhook_aws::Error::invalid_response(
                "ECR",
                "describeImages",
                format!("no digest for {}:{tag}", reference.repository_uri()),
            )
        })?;

    Ok(ResolvedImage::new(&reference.repository_uri(), digest))
}
