//! Orchestration provider interface.
//!
//! The provider abstracts container lifecycle operations:
//! - Creating a container from a fully resolved [`ContainerSpec`]
//! - Listing and inspecting running instances
//! - Restarting and destroying instances
//!
//! A Docker implementation backs production deployments and an in-memory
//! mock is provided for testing and development.

mod docker;
mod mock;

use std::collections::BTreeMap;

use arena_id::InstanceId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use docker::DockerProvider;
pub use mock::MockProvider;

/// Provider errors.
///
/// Mirrors the provider's own failure taxonomy so callers can tell a missing
/// instance from a retryable outage from a request the provider will never accept.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The addressed instance does not exist.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// The provider could not be reached or failed temporarily.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider rejected the request.
    #[error("provider rejected request: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Returns true if the addressed instance does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// A declared port binding.
///
/// A `host` of `0` means "any"; host-mode provisioning overwrites both sides
/// with the allocated port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host-side port.
    #[serde(default)]
    pub host: u16,

    /// Container-side port.
    #[serde(default)]
    pub container: u16,

    /// Transport protocol (`tcp` or `udp`), `tcp` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl PortBinding {
    /// The protocol, defaulting to `tcp`.
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or("tcp")
    }
}

/// Everything the provider needs to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image reference.
    pub image: String,

    /// Declared port bindings.
    #[serde(default)]
    pub ports: Vec<PortBinding>,

    /// Virtual network to join. Set means overlay mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Static address on `network`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Volume mappings, host path to container path.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,

    /// Memory limit in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<i64>,

    /// Number of CPUs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u32>,

    /// Extra labels attached to the container.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// The overlay network name, if one is declared and non-empty.
    pub fn overlay_network(&self) -> Option<&str> {
        self.network.as_deref().filter(|n| !n.is_empty())
    }
}

/// Coarse instance state as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Running,
    Stopped,
    #[default]
    Unknown,
}

/// A container known to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: InstanceId,

    /// Human-readable name (the provisional server ID for servers we created).
    #[serde(default)]
    pub name: String,

    /// Image the container runs.
    #[serde(default)]
    pub image: String,

    /// Container port to host port.
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,

    /// Reachable address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Running state.
    #[serde(default)]
    pub state: InstanceState,
}

impl Instance {
    /// Returns true if the provider reports the instance as running.
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}

/// Filter for [`Provider::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListFilter {
    /// Only instances created from this template.
    #[serde(default)]
    pub template: Option<String>,

    /// Only running instances.
    #[serde(default)]
    pub running_only: bool,
}

/// Orchestration provider interface.
#[async_trait]
pub trait Provider: Send + Sync {
    /// List instances matching `filter`.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>, ProviderError>;

    /// Inspect a single instance.
    async fn get(&self, id: &str) -> Result<Instance, ProviderError>;

    /// Create and start a container.
    async fn allocate(&self, spec: &ContainerSpec) -> Result<Instance, ProviderError>;

    /// Stop and remove an instance.
    async fn deallocate(&self, id: &str) -> Result<(), ProviderError>;

    /// Restart an instance in place.
    async fn restart(&self, id: &str) -> Result<(), ProviderError>;
}

/// Label marking containers created by this service.
pub const MANAGED_LABEL: &str = "arena.managed";

/// Label carrying the provisional server ID.
pub const SERVER_ID_LABEL: &str = "arena.server-id";

/// Label carrying the template name.
pub const TEMPLATE_LABEL: &str = "arena.template";
