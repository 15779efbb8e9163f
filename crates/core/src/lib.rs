//! Core types for skyhook
//!
//! This crate holds the pieces every other skyhook crate consumes but none of
//! them owns:
//! - the resolved service configuration ([`config`])
//! - CLI deployment options ([`options`])
//! - an explicit snapshot of the process environment ([`env`])
//! - deterministic resource naming ([`naming`])
//! - the diagnostics sink used for non-fatal warnings ([`diagnostics`])

pub mod config;
pub mod diagnostics;
pub mod env;
mod error;
pub mod naming;
pub mod options;

pub use config::{
    AlbConfig, CredentialsConfig, DeploymentBucketConfig, EcrConfig, FunctionConfig,
    FunctionImage, FunctionImageObject, ImageDefinition, ProviderConfig, ProviderImage,
    ServiceConfig,
};
pub use diagnostics::{Diagnostics, MemoryDiagnostics, TracingDiagnostics};
pub use env::EnvSnapshot;
pub use error::{Error, Result};
pub use naming::{Naming, ServiceNaming};
pub use options::DeploymentOptions;
