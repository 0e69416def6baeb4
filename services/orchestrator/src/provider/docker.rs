//! Docker-backed provider.
//!
//! Containers created here carry the [`MANAGED_LABEL`] so that listing (and
//! therefore startup reconciliation) only sees game servers this service owns.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, EndpointIpamConfig, EndpointSettings, HostConfig,
    PortBinding as DockerPortBinding,
};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{
    ContainerSpec, Instance, InstanceState, ListFilter, Provider, ProviderError, MANAGED_LABEL,
    SERVER_ID_LABEL, TEMPLATE_LABEL,
};

/// Seconds Docker waits for a graceful stop before killing on restart.
const RESTART_TIMEOUT_SECS: isize = 10;

/// Provider that talks to the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerProvider {
    docker: Docker,
}

impl DockerProvider {
    /// Connect to the daemon using the platform defaults (`DOCKER_HOST` or the local socket).
    pub async fn connect() -> Result<Self, ProviderError> {
        let docker = Docker::connect_with_local_defaults().map_err(classify)?;
        docker.ping().await.map_err(classify)?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pull `image` unless it is already present.
    async fn ensure_image(&self, image: &str) -> Result<(), ProviderError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(classify(e)),
        }

        info!(image, "Pulling image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| match classify(e) {
                ProviderError::NotFound(message) => {
                    ProviderError::Permanent(format!("image {image} not found: {message}"))
                }
                other => other,
            })?;
            if let Some(status) = progress.status {
                debug!(image, status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, ProviderError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)
    }
}

/// Map a Docker error onto the provider taxonomy.
fn classify(err: DockerError) -> ProviderError {
    match &err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ProviderError::NotFound(message.clone()),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } if *status_code >= 500 => {
            ProviderError::Transient(format!("docker returned {status_code}: {message}"))
        }
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => ProviderError::Permanent(format!("docker returned {status_code}: {message}")),
        _ => ProviderError::Transient(err.to_string()),
    }
}

fn port_key(container_port: u16, protocol: &str) -> String {
    format!("{container_port}/{protocol}")
}

/// Translate a resolved spec into a Docker create request.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let env: Vec<String> = spec
        .environment
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    let mut labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .iter()
        .map(|binding| (port_key(binding.container, binding.protocol()), HashMap::new()))
        .collect();

    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|(host, container)| format!("{host}:{container}"))
        .collect();

    let mut host_config = HostConfig {
        binds: (!binds.is_empty()).then_some(binds),
        memory: spec.memory_limit.filter(|m| *m > 0),
        nano_cpus: spec
            .cpu_count
            .filter(|c| *c > 0)
            .map(|c| i64::from(c) * 1_000_000_000),
        ..Default::default()
    };

    let networking_config = match spec.overlay_network() {
        Some(network) => {
            host_config.network_mode = Some(network.to_string());
            let endpoint = EndpointSettings {
                ipam_config: Some(EndpointIpamConfig {
                    ipv4_address: spec.ip.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            };
            Some(NetworkingConfig {
                endpoints_config: HashMap::from([(network.to_string(), endpoint)]),
            })
        }
        None => {
            let port_bindings = spec
                .ports
                .iter()
                .map(|binding| {
                    (
                        port_key(binding.container, binding.protocol()),
                        Some(vec![DockerPortBinding {
                            host_ip: None,
                            host_port: Some(binding.host.to_string()),
                        }]),
                    )
                })
                .collect();
            host_config.port_bindings = Some(port_bindings);
            None
        }
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: Some(labels),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn parse_state(state: Option<&str>) -> InstanceState {
    match state {
        Some("running") | Some("restarting") => InstanceState::Running,
        Some("created") | Some("exited") | Some("paused") | Some("dead") => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

fn first_ip(networks: Option<&HashMap<String, EndpointSettings>>) -> Option<String> {
    networks?
        .values()
        .filter_map(|endpoint| endpoint.ip_address.clone())
        .find(|ip| !ip.is_empty())
}

fn display_name(labels: Option<&HashMap<String, String>>, name: Option<&str>) -> String {
    labels
        .and_then(|labels| labels.get(SERVER_ID_LABEL).cloned())
        .or_else(|| name.map(|n| n.trim_start_matches('/').to_string()))
        .unwrap_or_default()
}

fn instance_from_summary(summary: ContainerSummary) -> Option<Instance> {
    let id = summary.id.as_deref()?.parse().ok()?;

    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|port| {
            port.public_port
                .map(|public| (port.private_port.to_string(), public))
        })
        .collect();

    let ip = first_ip(
        summary
            .network_settings
            .as_ref()
            .and_then(|settings| settings.networks.as_ref()),
    );

    Some(Instance {
        id,
        name: display_name(
            summary.labels.as_ref(),
            summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(String::as_str),
        ),
        image: summary.image.unwrap_or_default(),
        ports,
        ip,
        state: parse_state(summary.state.as_deref()),
    })
}

fn instance_from_inspect(response: ContainerInspectResponse) -> Result<Instance, ProviderError> {
    let id = response
        .id
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e| ProviderError::Permanent(format!("docker returned an invalid id: {e}")))?;

    let labels = response.config.as_ref().and_then(|c| c.labels.as_ref());
    let image = response
        .config
        .as_ref()
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    let ports: BTreeMap<String, u16> = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
        .map(|port_map| {
            port_map
                .iter()
                .filter_map(|(key, bindings)| {
                    let container_port = key.split('/').next()?.to_string();
                    let host_port = bindings
                        .as_ref()?
                        .iter()
                        .find_map(|b| b.host_port.as_deref()?.parse::<u16>().ok())?;
                    Some((container_port, host_port))
                })
                .collect()
        })
        .unwrap_or_default();

    let ip = first_ip(
        response
            .network_settings
            .as_ref()
            .and_then(|settings| settings.networks.as_ref()),
    );

    let state = match response.state.as_ref().and_then(|s| s.running) {
        Some(true) => InstanceState::Running,
        Some(false) => InstanceState::Stopped,
        None => InstanceState::Unknown,
    };

    Ok(Instance {
        id,
        name: display_name(labels, response.name.as_deref()),
        image,
        ports,
        ip,
        state,
    })
}

/// Describe a freshly started container from the spec it was created with.
///
/// Used when the post-start inspect fails: the container is running and holds
/// its resource, so the caller still needs an instance to commit against.
fn instance_from_spec(id: &str, spec: &ContainerSpec) -> Result<Instance, ProviderError> {
    let id = id
        .parse()
        .map_err(|e| ProviderError::Permanent(format!("docker returned an invalid id: {e}")))?;

    let ports = match spec.overlay_network() {
        Some(_) => BTreeMap::new(),
        None => spec
            .ports
            .iter()
            .map(|binding| (binding.container.to_string(), binding.host))
            .collect(),
    };

    Ok(Instance {
        id,
        name: spec.labels.get(SERVER_ID_LABEL).cloned().unwrap_or_default(),
        image: spec.image.clone(),
        ports,
        ip: spec.ip.clone(),
        state: InstanceState::Running,
    })
}

#[async_trait]
impl Provider for DockerProvider {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>, ProviderError> {
        let mut label_filters = vec![format!("{MANAGED_LABEL}=true")];
        if let Some(template) = &filter.template {
            label_filters.push(format!("{TEMPLATE_LABEL}={template}"));
        }

        let options = ListContainersOptions {
            all: !filter.running_only,
            filters: HashMap::from([("label".to_string(), label_filters)]),
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(classify)?;

        Ok(summaries
            .into_iter()
            .filter_map(instance_from_summary)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Instance, ProviderError> {
        instance_from_inspect(self.inspect(id).await?)
    }

    async fn allocate(&self, spec: &ContainerSpec) -> Result<Instance, ProviderError> {
        self.ensure_image(&spec.image).await?;

        let options = spec
            .labels
            .get(SERVER_ID_LABEL)
            .map(|name| CreateContainerOptions {
                name: name.clone(),
                platform: None,
            });

        let created = self
            .docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| match classify(e) {
                // A 404 on create refers to the image or network, never to an instance.
                ProviderError::NotFound(message) => ProviderError::Permanent(message),
                other => other,
            })?;

        for warning in &created.warnings {
            warn!(container_id = %created.id, warning = %warning, "Docker create warning");
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            let err = classify(e);
            warn!(container_id = %created.id, error = %err, "Start failed, removing container");
            if let Err(cleanup) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                warn!(container_id = %created.id, error = %cleanup, "Failed to remove container");
            }
            return Err(err);
        }

        info!(container_id = %created.id, image = %spec.image, "Started container");
        match self.get(&created.id).await {
            Ok(instance) => Ok(instance),
            Err(e) => {
                warn!(
                    container_id = %created.id,
                    error = %e,
                    "Inspect after start failed, describing container from its spec"
                );
                instance_from_spec(&created.id, spec)
            }
        }
    }

    async fn deallocate(&self, id: &str) -> Result<(), ProviderError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(classify)?;

        info!(container_id = %id, "Removed container");
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<(), ProviderError> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: RESTART_TIMEOUT_SECS,
                }),
            )
            .await
            .map_err(classify)?;

        info!(container_id = %id, "Restarted container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PortBinding;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "lobby:latest".to_string(),
            ports: vec![PortBinding {
                host: 5521,
                container: 5521,
                protocol: Some("udp".to_string()),
            }],
            environment: BTreeMap::from([("SERVER_PORT".to_string(), "5521".to_string())]),
            volumes: BTreeMap::from([("/srv/worlds/a".to_string(), "/data".to_string())]),
            memory_limit: Some(1024),
            cpu_count: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        });
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_server_errors() {
        let transient = classify(DockerError::DockerResponseServerError {
            status_code: 503,
            message: "busy".to_string(),
        });
        assert!(transient.is_transient());

        let permanent = classify(DockerError::DockerResponseServerError {
            status_code: 409,
            message: "name in use".to_string(),
        });
        assert!(matches!(permanent, ProviderError::Permanent(_)));
    }

    #[test]
    fn test_host_mode_config_publishes_ports() {
        let config = container_config(&spec());
        let host_config = config.host_config.unwrap();

        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings["5521/udp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("5521"));
        assert!(config.networking_config.is_none());

        assert_eq!(host_config.memory, Some(1024));
        assert_eq!(host_config.nano_cpus, Some(2_000_000_000));
        assert_eq!(host_config.binds.unwrap(), vec!["/srv/worlds/a:/data"]);
        assert_eq!(config.env.unwrap(), vec!["SERVER_PORT=5521"]);
        assert_eq!(
            config.labels.unwrap().get(MANAGED_LABEL).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_overlay_mode_config_sets_static_ip() {
        let spec = ContainerSpec {
            network: Some("arena-overlay".to_string()),
            ip: Some("10.99.0.10".to_string()),
            ..spec()
        };
        let config = container_config(&spec);

        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.network_mode.as_deref(), Some("arena-overlay"));
        assert!(host_config.port_bindings.is_none());

        let endpoints = config.networking_config.unwrap().endpoints_config;
        let ipam = endpoints["arena-overlay"].ipam_config.as_ref().unwrap();
        assert_eq!(ipam.ipv4_address.as_deref(), Some("10.99.0.10"));
    }

    #[test]
    fn test_instance_from_spec_host_mode() {
        let mut spec = spec();
        spec.labels
            .insert(SERVER_ID_LABEL.to_string(), "lobby-1a2b3c4d".to_string());

        let instance = instance_from_spec("c0ffee", &spec).unwrap();

        assert_eq!(instance.id.as_str(), "c0ffee");
        assert_eq!(instance.name, "lobby-1a2b3c4d");
        assert_eq!(instance.image, "lobby:latest");
        assert_eq!(instance.ports, BTreeMap::from([("5521".to_string(), 5521)]));
        assert_eq!(instance.ip, None);
        assert_eq!(instance.state, InstanceState::Running);
    }

    #[test]
    fn test_instance_from_spec_overlay_mode() {
        let spec = ContainerSpec {
            network: Some("arena-overlay".to_string()),
            ip: Some("10.99.0.10".to_string()),
            ..spec()
        };

        let instance = instance_from_spec("c0ffee", &spec).unwrap();

        assert!(instance.ports.is_empty());
        assert_eq!(instance.ip.as_deref(), Some("10.99.0.10"));
        assert_eq!(instance.name, "");
    }

    #[test]
    fn test_instance_from_spec_rejects_empty_id() {
        assert!(matches!(
            instance_from_spec("", &spec()),
            Err(ProviderError::Permanent(_))
        ));
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state(Some("running")), InstanceState::Running);
        assert_eq!(parse_state(Some("exited")), InstanceState::Stopped);
        assert_eq!(parse_state(None), InstanceState::Unknown);
    }

    #[test]
    fn test_display_name_prefers_server_label() {
        let labels = HashMap::from([(SERVER_ID_LABEL.to_string(), "lobby-1".to_string())]);
        assert_eq!(display_name(Some(&labels), Some("/other")), "lobby-1");
        assert_eq!(display_name(None, Some("/other")), "other");
    }
}
