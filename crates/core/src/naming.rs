//! Deterministic resource naming.

/// Produces logical and physical identifiers for a service's resources.
///
/// Every method is a pure function of the service name, the stage and its
/// arguments.
pub trait Naming: Send + Sync {
    /// CloudFormation stack name
    fn stack_name(&self) -> String;

    /// Logical id of the managed deployment bucket
    fn deployment_bucket_logical_id(&self) -> String;

    /// Name of the container repository for the service's images
    fn ecr_repository_name(&self) -> String;
}

/// Default naming scheme keyed by service and stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNaming {
    service: String,
    stage: String,
}

impl ServiceNaming {
    /// Create a naming scheme
    #[must_use]
    pub fn new(service: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            stage: stage.into(),
        }
    }
}

impl Naming for ServiceNaming {
    fn stack_name(&self) -> String {
        format!("{}-{}", self.service, self.stage)
    }

    fn deployment_bucket_logical_id(&self) -> String {
        "SkyhookDeploymentBucket".to_string()
    }

    fn ecr_repository_name(&self) -> String {
        format!("skyhook-{}-{}", self.service, self.stage).to_lowercase()
    }
}
