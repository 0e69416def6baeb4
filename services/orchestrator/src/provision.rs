//! Server provisioning and teardown.
//!
//! Creating a server walks a fixed sequence:
//!
//! 1. Look up the template and copy its container spec
//! 2. Generate a provisional [`ServerId`] and expand volume placeholders
//! 3. Merge the template's server config into the environment
//! 4. Lease one resource: an IP in overlay mode, a port in host mode
//! 5. Write identity into the environment and call the pre-start hook
//! 6. Apply caller overrides and ask the provider for a container
//! 7. Commit the lease to the container ID
//!
//! The lease is the rollback: any failure between steps 4 and 7, including a
//! dropped request future, returns the resource to its pool.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use arena_id::{IdError, ServerId};
use arena_networking::{IpPool, Lease, PoolError, PoolResource, PortPool, ResourcePool};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hook::{HookClient, HookError};
use crate::provider::{
    ContainerSpec, Instance, ListFilter, Provider, ProviderError, SERVER_ID_LABEL, TEMPLATE_LABEL,
};
use crate::template::{Template, TemplateStore};

/// Environment key carrying the reachable host.
pub const SERVER_HOST_ENV: &str = "SERVER_HOST";

/// Environment key carrying the reachable port.
pub const SERVER_PORT_ENV: &str = "SERVER_PORT";

/// Environment key carrying the provisional server ID.
pub const SERVER_ID_ENV: &str = "SERVER_ID";

/// Placeholder in host volume paths replaced by the server ID.
pub const SERVER_ID_PLACEHOLDER: &str = "{{SERVER_ID}}";

/// Game port used in overlay mode when the template declares none.
pub const DEFAULT_GAME_PORT: u16 = 5520;

/// Bind address advertised in host mode.
pub const HOST_BIND_ADDR: &str = "0.0.0.0";

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("resource pool exhausted: {0}")]
    ResourcePoolExhausted(#[source] PoolError),

    #[error("pre-start hook failed: {0}")]
    HookFailed(#[from] HookError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("pool error: {0}")]
    Pool(#[source] PoolError),

    #[error("invalid server id: {0}")]
    InvalidServerId(#[from] IdError),
}

impl From<PoolError> for ProvisionError {
    fn from(err: PoolError) -> Self {
        if err.is_exhausted() {
            ProvisionError::ResourcePoolExhausted(err)
        } else {
            ProvisionError::Pool(err)
        }
    }
}

/// Caller-supplied resource limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceOverrides {
    /// Memory limit in bytes; ignored unless positive.
    #[serde(default)]
    pub memory_limit: Option<i64>,

    /// CPU count; ignored unless positive.
    #[serde(default)]
    pub cpu_count: Option<u32>,
}

/// Request to create a server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateServerRequest {
    /// Template name.
    pub template: String,

    /// Environment overrides; these win over everything else.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Resource limit overrides.
    #[serde(default)]
    pub resources: ResourceOverrides,
}

/// One allocation as reported by [`PoolUsage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolAllocation {
    pub value: String,
    pub owner: String,
}

/// Usage report for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub kind: &'static str,
    pub start: String,
    pub end: String,
    pub capacity: u64,
    pub allocated: u64,
    pub available: u64,
    pub allocations: Vec<PoolAllocation>,
}

impl PoolUsage {
    fn of<R: PoolResource>(pool: &ResourcePool<R>) -> Self {
        let allocations: Vec<PoolAllocation> = pool
            .snapshot()
            .into_iter()
            .map(|(value, owner)| PoolAllocation {
                value: value.to_string(),
                owner,
            })
            .collect();
        let stats = pool.stats();

        Self {
            kind: R::KIND,
            start: stats.start.to_string(),
            end: stats.end.to_string(),
            capacity: stats.capacity,
            allocated: allocations.len() as u64,
            available: stats.capacity.saturating_sub(allocations.len() as u64),
            allocations,
        }
    }

    /// Returns true if no value is free.
    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }
}

/// Usage of both pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolsUsage {
    pub ip: PoolUsage,
    pub port: PoolUsage,
}

/// The single resource a provisioning attempt holds.
enum Allocation {
    Ip(Lease<Ipv4Addr>),
    Port(Lease<u16>),
}

impl Allocation {
    /// Returns false if the value was released while provisioning.
    fn commit(self, owner: &str) -> bool {
        match self {
            Allocation::Ip(lease) => lease.commit(owner).is_some(),
            Allocation::Port(lease) => lease.commit(owner).is_some(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Allocation::Ip(lease) => lease.value().to_string(),
            Allocation::Port(lease) => lease.value().to_string(),
        }
    }
}

/// Runs the provisioning and teardown workflows against shared pools.
pub struct Provisioner {
    templates: Arc<TemplateStore>,
    provider: Arc<dyn Provider>,
    ip_pool: Arc<IpPool>,
    port_pool: Arc<PortPool>,
    hooks: HookClient,
    external_host: Option<String>,
}

impl Provisioner {
    /// Create a new provisioner.
    pub fn new(
        templates: Arc<TemplateStore>,
        provider: Arc<dyn Provider>,
        ip_pool: Arc<IpPool>,
        port_pool: Arc<PortPool>,
        hooks: HookClient,
    ) -> Self {
        Self {
            templates,
            provider,
            ip_pool,
            port_pool,
            hooks,
            external_host: None,
        }
    }

    /// Report `host` as the address of every created server.
    pub fn with_external_host(mut self, host: Option<String>) -> Self {
        self.external_host = host.filter(|h| !h.trim().is_empty());
        self
    }

    /// Loaded templates.
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Provision a server from a template.
    pub async fn create_server(
        &self,
        request: CreateServerRequest,
    ) -> Result<Instance, ProvisionError> {
        let template = self
            .templates
            .get(&request.template)
            .ok_or_else(|| ProvisionError::TemplateNotFound(request.template.clone()))?;

        // Templates are shared; every request works on its own copy.
        let mut spec = template.container.clone();
        let server_id = ServerId::generate(&template.name)?;

        expand_volumes(&mut spec, &server_id);
        spec.environment
            .extend(template.server.iter().map(|(k, v)| (k.clone(), v.clone())));

        let (allocation, port) = self.allocate(&mut spec, &server_id)?;

        match self
            .launch(template, spec, &server_id, port, request)
            .await
        {
            Ok(mut instance) => {
                let resource = allocation.describe();
                if !allocation.commit(instance.id.as_str()) {
                    warn!(
                        server_id = %server_id,
                        instance_id = %instance.id,
                        resource = %resource,
                        "Allocation was released during provisioning, instance is not tracked"
                    );
                }

                instance.name = server_id.to_string();
                instance.ports.entry(port.to_string()).or_insert(port);
                if let Some(host) = &self.external_host {
                    instance.ip = Some(host.clone());
                }

                info!(
                    server_id = %server_id,
                    instance_id = %instance.id,
                    port,
                    "Server provisioned"
                );
                Ok(instance)
            }
            Err(e) => {
                warn!(
                    server_id = %server_id,
                    resource = %allocation.describe(),
                    error = %e,
                    "Provisioning failed, releasing allocation"
                );
                drop(allocation);
                Err(e)
            }
        }
    }

    /// Lease the resource for the request's mode and write it into `spec`.
    ///
    /// Returns the lease and the port the server will be reachable on.
    fn allocate(
        &self,
        spec: &mut ContainerSpec,
        server_id: &ServerId,
    ) -> Result<(Allocation, u16), ProvisionError> {
        if let Some(network) = spec.overlay_network() {
            let lease = self.ip_pool.lease(server_id.as_str())?;
            let ip = lease.value().to_string();
            let port = spec
                .ports
                .first()
                .map(|binding| binding.container)
                .unwrap_or(DEFAULT_GAME_PORT);

            info!(server_id = %server_id, network, %ip, port, "Overlay mode allocation");

            spec.ip = Some(ip.clone());
            spec.environment.insert(SERVER_HOST_ENV.to_string(), ip);
            Ok((Allocation::Ip(lease), port))
        } else {
            let lease = self.port_pool.lease(server_id.as_str())?;
            let port = lease.value();

            info!(server_id = %server_id, host = HOST_BIND_ADDR, port, "Host mode allocation");

            for binding in &mut spec.ports {
                binding.host = port;
                binding.container = port;
            }
            spec.environment
                .insert(SERVER_HOST_ENV.to_string(), HOST_BIND_ADDR.to_string());
            Ok((Allocation::Port(lease), port))
        }
    }

    /// Finish the environment and create the container.
    async fn launch(
        &self,
        template: &Template,
        mut spec: ContainerSpec,
        server_id: &ServerId,
        port: u16,
        request: CreateServerRequest,
    ) -> Result<Instance, ProvisionError> {
        spec.environment
            .insert(SERVER_PORT_ENV.to_string(), port.to_string());
        spec.environment
            .insert(SERVER_ID_ENV.to_string(), server_id.to_string());

        if let Some(url) = template.pre_start_hook() {
            let hook_env = self.hooks.pre_start(url).await?;
            spec.environment.extend(hook_env);
        } else {
            debug!(template = %template.name, "No pre-start hook declared");
        }

        spec.environment.extend(request.env);

        if let Some(memory) = request.resources.memory_limit.filter(|m| *m > 0) {
            spec.memory_limit = Some(memory);
        }
        if let Some(cpus) = request.resources.cpu_count.filter(|c| *c > 0) {
            spec.cpu_count = Some(cpus);
        }

        spec.labels
            .insert(SERVER_ID_LABEL.to_string(), server_id.to_string());
        spec.labels
            .insert(TEMPLATE_LABEL.to_string(), template.name.clone());

        debug!(
            server_id = %server_id,
            image = %spec.image,
            env_keys = ?spec.environment.keys().collect::<Vec<_>>(),
            "Requesting container"
        );

        Ok(self.provider.allocate(&spec).await?)
    }

    /// Release the server's resource and destroy its container.
    ///
    /// The resource is freed even if the provider then fails.
    pub async fn destroy_server(&self, id: &str) -> Result<(), ProvisionError> {
        let port = self.port_pool.release_by_owner(id);
        let ip = self.ip_pool.release_by_owner(id);

        match (port, ip) {
            (Some(port), _) => info!(instance_id = %id, port, "Released port"),
            (_, Some(ip)) => info!(instance_id = %id, %ip, "Released IP address"),
            (None, None) => debug!(instance_id = %id, "No pool entry for instance"),
        }

        self.provider.deallocate(id).await?;
        info!(instance_id = %id, "Server destroyed");
        Ok(())
    }

    /// List servers known to the provider.
    pub async fn list_servers(&self, filter: &ListFilter) -> Result<Vec<Instance>, ProvisionError> {
        Ok(self.provider.list(filter).await?)
    }

    /// Inspect one server.
    pub async fn get_server(&self, id: &str) -> Result<Instance, ProvisionError> {
        Ok(self.provider.get(id).await?)
    }

    /// Restart one server in place. Its resource stays allocated.
    pub async fn restart_server(&self, id: &str) -> Result<(), ProvisionError> {
        self.provider.restart(id).await?;
        info!(instance_id = %id, "Server restarted");
        Ok(())
    }

    /// Usage of both pools.
    pub fn pool_usage(&self) -> PoolsUsage {
        PoolsUsage {
            ip: PoolUsage::of(&self.ip_pool),
            port: PoolUsage::of(&self.port_pool),
        }
    }
}

fn expand_volumes(spec: &mut ContainerSpec, server_id: &ServerId) {
    if !spec
        .volumes
        .keys()
        .any(|host| host.contains(SERVER_ID_PLACEHOLDER))
    {
        return;
    }

    spec.volumes = std::mem::take(&mut spec.volumes)
        .into_iter()
        .map(|(host, container)| {
            (
                host.replace(SERVER_ID_PLACEHOLDER, server_id.as_str()),
                container,
            )
        })
        .collect();
}
