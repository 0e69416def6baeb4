//! In-memory provider for tests and local development.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    ContainerSpec, Instance, InstanceState, ListFilter, Provider, ProviderError, SERVER_ID_LABEL,
    TEMPLATE_LABEL,
};

#[derive(Debug, Clone)]
struct MockEntry {
    instance: Instance,
    template: Option<String>,
}

/// Mock provider that keeps instances in memory.
#[derive(Debug, Default)]
pub struct MockProvider {
    /// Counter for generating instance IDs.
    id_counter: AtomicU64,

    /// Whether allocations should fail.
    fail_allocations: AtomicBool,

    /// Whether listing should fail.
    fail_list: AtomicBool,

    /// Live instances by ID.
    instances: Mutex<BTreeMap<String, MockEntry>>,

    /// Every spec passed to `allocate`, in order.
    received: Mutex<Vec<ContainerSpec>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProvider {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provider that fails every allocation.
    pub fn failing() -> Self {
        let provider = Self::new();
        provider.set_fail_allocations(true);
        provider
    }

    /// Create a mock provider that already runs `instances`.
    pub fn with_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let provider = Self::new();
        {
            let mut map = locked(&provider.instances);
            for instance in instances {
                map.insert(
                    instance.id.to_string(),
                    MockEntry {
                        instance,
                        template: None,
                    },
                );
            }
        }
        provider
    }

    /// Make subsequent allocations fail (or succeed again).
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent list calls fail (or succeed again).
    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Specs received by `allocate`, including failed attempts.
    pub fn received_specs(&self) -> Vec<ContainerSpec> {
        locked(&self.received).clone()
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        locked(&self.instances).len()
    }

    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("mock{:012x}", counter)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Instance>, ProviderError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient(
                "mock provider configured to fail".to_string(),
            ));
        }

        let instances = locked(&self.instances);
        Ok(instances
            .values()
            .filter(|entry| match &filter.template {
                Some(template) => entry.template.as_deref() == Some(template.as_str()),
                None => true,
            })
            .filter(|entry| !filter.running_only || entry.instance.is_running())
            .map(|entry| entry.instance.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Instance, ProviderError> {
        locked(&self.instances)
            .get(id)
            .map(|entry| entry.instance.clone())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn allocate(&self, spec: &ContainerSpec) -> Result<Instance, ProviderError> {
        locked(&self.received).push(spec.clone());

        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient(
                "mock provider configured to fail".to_string(),
            ));
        }

        let id = self.next_id();

        // Like a real overlay network, containers on a named network publish no host ports.
        let ports = if spec.overlay_network().is_some() {
            BTreeMap::new()
        } else {
            spec.ports
                .iter()
                .map(|binding| (binding.container.to_string(), binding.host))
                .collect()
        };

        let instance = Instance {
            id: id.parse().map_err(|e| ProviderError::Permanent(format!("{e}")))?,
            name: spec.labels.get(SERVER_ID_LABEL).cloned().unwrap_or_default(),
            image: spec.image.clone(),
            ports,
            ip: spec.ip.clone(),
            state: InstanceState::Running,
        };

        info!(instance_id = %id, image = %spec.image, "[MOCK] Created container");

        locked(&self.instances).insert(
            id,
            MockEntry {
                instance: instance.clone(),
                template: spec.labels.get(TEMPLATE_LABEL).cloned(),
            },
        );

        Ok(instance)
    }

    async fn deallocate(&self, id: &str) -> Result<(), ProviderError> {
        match locked(&self.instances).remove(id) {
            Some(_) => {
                info!(instance_id = %id, "[MOCK] Removed container");
                Ok(())
            }
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn restart(&self, id: &str) -> Result<(), ProviderError> {
        let mut instances = locked(&self.instances);
        let entry = instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        entry.instance.state = InstanceState::Running;
        debug!(instance_id = %id, "[MOCK] Restarted container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PortBinding;

    fn host_spec() -> ContainerSpec {
        ContainerSpec {
            image: "lobby:latest".to_string(),
            ports: vec![PortBinding {
                host: 5521,
                container: 5521,
                protocol: None,
            }],
            labels: BTreeMap::from([
                (SERVER_ID_LABEL.to_string(), "lobby-1".to_string()),
                (TEMPLATE_LABEL.to_string(), "lobby".to_string()),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_allocate_and_get() {
        let provider = MockProvider::new();
        let instance = provider.allocate(&host_spec()).await.unwrap();

        assert!(instance.id.as_str().starts_with("mock"));
        assert_eq!(instance.name, "lobby-1");
        assert_eq!(instance.ports.get("5521"), Some(&5521));

        let fetched = provider.get(instance.id.as_str()).await.unwrap();
        assert_eq!(fetched, instance);
    }

    #[tokio::test]
    async fn test_mock_overlay_publishes_no_ports() {
        let provider = MockProvider::new();
        let spec = ContainerSpec {
            network: Some("arena-overlay".to_string()),
            ip: Some("10.99.0.10".to_string()),
            ..host_spec()
        };
        let instance = provider.allocate(&spec).await.unwrap();

        assert!(instance.ports.is_empty());
        assert_eq!(instance.ip.as_deref(), Some("10.99.0.10"));
    }

    #[tokio::test]
    async fn test_mock_list_filters_by_template() {
        let provider = MockProvider::new();
        provider.allocate(&host_spec()).await.unwrap();

        let all = provider.list(&ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);

        let filter = ListFilter {
            template: Some("skywars".to_string()),
            running_only: false,
        };
        assert!(provider.list(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let provider = MockProvider::failing();
        let result = provider.allocate(&host_spec()).await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(provider.received_specs().len(), 1);
        assert_eq!(provider.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_deallocate_unknown() {
        let provider = MockProvider::new();
        let err = provider.deallocate("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
