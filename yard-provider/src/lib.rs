//! Container driver abstraction.
//!
//! The control plane never talks to a hypervisor or container runtime
//! directly. It goes through the two traits defined here: [`ContainerDriver`]
//! for workspace containers and [`TemplateDriver`] for building template
//! images. Concrete drivers live outside this repository; a scriptable
//! in-memory driver is available behind the `test-helpers` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use yard_core::EnvMap;

pub mod error;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use error::{ProviderError, Result};

/// Everything a driver needs to create a workspace container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub workspace_id: String,
    pub name: String,
    pub branch_name: String,
    /// Template image to clone from; `None` means the driver's default image.
    pub template: Option<TemplateHost>,
    /// Written to the container's `.env` on creation.
    pub env: EnvMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHandle {
    pub container_id: String,
    pub ip: Option<String>,
}

/// A template container on a specific hypervisor node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateHost {
    pub vmid: u32,
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneSource {
    /// A stock container template shipped by the hypervisor.
    BaseImage(String),
    /// A finished template built by yard.
    Template(TemplateHost),
}

/// Lifecycle operations on workspace containers.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Get the name of the driver (e.g., "proxmox", "docker").
    fn name(&self) -> &'static str;

    /// Create and boot a container. Returns once the driver has an id and address.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Start an existing, stopped container.
    async fn start(&self, container_id: &str) -> Result<()>;

    /// Stop a running container without destroying it.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Restart a container (stop then start).
    async fn restart(&self, container_id: &str) -> Result<()> {
        self.stop(container_id).await?;
        self.start(container_id).await
    }

    /// Destroy a container, removing all associated resources.
    async fn destroy(&self, container_id: &str) -> Result<()>;

    /// Read the container's live `.env` file.
    async fn read_env(&self, container_id: &str) -> Result<String>;

    /// Replace the container's live `.env` file.
    async fn write_env(&self, container_id: &str, contents: &str) -> Result<()>;
}

/// Steps used by the template provisioning pipeline.
#[async_trait]
pub trait TemplateDriver: Send + Sync {
    /// Clone a new template container from a base image or an existing template.
    async fn clone_source(&self, template_id: &str, source: &CloneSource) -> Result<TemplateHost>;

    /// Run one install command inside the template container.
    async fn run_step(&self, host: &TemplateHost, command: &str) -> Result<()>;

    /// Install and enable the in-container agent.
    async fn configure_agent(&self, host: &TemplateHost) -> Result<()>;

    /// Stop the container and convert it into an immutable template.
    async fn convert_to_template(&self, host: &TemplateHost) -> Result<()>;

    /// Remove a template container or template image.
    async fn destroy_host(&self, host: &TemplateHost) -> Result<()>;
}
