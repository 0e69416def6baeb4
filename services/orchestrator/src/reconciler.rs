//! Startup reconciliation of pool state against the provider.
//!
//! Pools live in memory only. Before the service accepts requests, every
//! resource already bound by a running container is reserved under that
//! container's ID so it cannot be handed out again.

use std::net::Ipv4Addr;
use std::sync::Arc;

use arena_networking::{IpPool, PortPool};
use tracing::{debug, info, warn};

use crate::provider::{ListFilter, Provider};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Running instances reported by the provider.
    pub instances: usize,

    /// Ports reserved in the port pool.
    pub ports_reserved: usize,

    /// Addresses reserved in the IP pool.
    pub ips_reserved: usize,
}

/// Seeds the pools from the provider's live inventory.
pub struct Reconciler {
    provider: Arc<dyn Provider>,
    ip_pool: Arc<IpPool>,
    port_pool: Arc<PortPool>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(provider: Arc<dyn Provider>, ip_pool: Arc<IpPool>, port_pool: Arc<PortPool>) -> Self {
        Self {
            provider,
            ip_pool,
            port_pool,
        }
    }

    /// Reserve every port and address held by running instances.
    ///
    /// A provider failure is logged and yields an empty summary; startup continues.
    pub async fn run_once(&self) -> ReconcileSummary {
        let filter = ListFilter {
            running_only: true,
            ..Default::default()
        };

        let instances = match self.provider.list(&filter).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Failed to list instances, skipping reconciliation");
                return ReconcileSummary::default();
            }
        };

        let mut summary = ReconcileSummary {
            instances: instances.len(),
            ..Default::default()
        };

        for instance in &instances {
            let owner = instance.id.as_str();

            for &port in instance.ports.values() {
                if self.port_pool.reserve(port, owner) {
                    summary.ports_reserved += 1;
                } else {
                    debug!(instance_id = %owner, port, "Port outside pool range, not reserved");
                }
            }

            let Some(ip) = instance.ip.as_deref().filter(|ip| !ip.is_empty()) else {
                continue;
            };

            match ip.parse::<Ipv4Addr>() {
                Ok(addr) if self.ip_pool.reserve(addr, owner) => summary.ips_reserved += 1,
                Ok(addr) => {
                    debug!(instance_id = %owner, ip = %addr, "Address outside pool range, not reserved")
                }
                Err(_) => debug!(instance_id = %owner, ip, "Unparseable instance address, skipping"),
            }
        }

        info!(
            instances = summary.instances,
            ports_reserved = summary.ports_reserved,
            ips_reserved = summary.ips_reserved,
            "Reconciled pools with provider"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::provider::{Instance, InstanceState, MockProvider};

    fn instance(id: &str, ports: &[(&str, u16)], ip: Option<&str>, state: InstanceState) -> Instance {
        Instance {
            id: id.parse().unwrap(),
            name: String::new(),
            image: "lobby:latest".to_string(),
            ports: ports
                .iter()
                .map(|(container, host)| (container.to_string(), *host))
                .collect::<BTreeMap<_, _>>(),
            ip: ip.map(str::to_string),
            state,
        }
    }

    fn pools() -> (Arc<IpPool>, Arc<PortPool>) {
        (
            Arc::new(IpPool::new(Ipv4Addr::new(10, 99, 0, 10), Ipv4Addr::new(10, 99, 0, 20)).unwrap()),
            Arc::new(PortPool::new(5521, 5530).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_reconcile_reserves_ports_and_ips() {
        let provider = Arc::new(MockProvider::with_instances([
            instance("c1", &[("5521", 5521)], None, InstanceState::Running),
            instance("c2", &[], Some("10.99.0.12"), InstanceState::Running),
        ]));
        let (ip_pool, port_pool) = pools();

        let summary = Reconciler::new(provider, ip_pool.clone(), port_pool.clone())
            .run_once()
            .await;

        assert_eq!(
            summary,
            ReconcileSummary {
                instances: 2,
                ports_reserved: 1,
                ips_reserved: 1,
            }
        );
        assert_eq!(port_pool.owner_of(5521).as_deref(), Some("c1"));
        assert_eq!(
            ip_pool.owner_of(Ipv4Addr::new(10, 99, 0, 12)).as_deref(),
            Some("c2")
        );

        // Reserved values are skipped by later allocations.
        assert_eq!(port_pool.allocate("new").unwrap(), 5522);
    }

    #[tokio::test]
    async fn test_reconcile_skips_stopped_and_out_of_range() {
        let provider = Arc::new(MockProvider::with_instances([
            instance("stopped", &[("5522", 5522)], None, InstanceState::Stopped),
            instance("web", &[("80", 8080)], Some("172.17.0.2"), InstanceState::Running),
            instance("odd", &[], Some("not-an-ip"), InstanceState::Running),
        ]));
        let (ip_pool, port_pool) = pools();

        let summary = Reconciler::new(provider, ip_pool.clone(), port_pool.clone())
            .run_once()
            .await;

        assert_eq!(summary.instances, 2);
        assert_eq!(summary.ports_reserved, 0);
        assert_eq!(summary.ips_reserved, 0);
        assert!(port_pool.is_empty());
        assert!(ip_pool.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_provider_failure_is_not_fatal() {
        let provider = Arc::new(MockProvider::with_instances([instance(
            "c1",
            &[("5521", 5521)],
            None,
            InstanceState::Running,
        )]));
        provider.set_fail_list(true);
        let (ip_pool, port_pool) = pools();

        let summary = Reconciler::new(provider, ip_pool, port_pool.clone())
            .run_once()
            .await;

        assert_eq!(summary, ReconcileSummary::default());
        assert!(port_pool.is_empty());
    }
}
