//! Type-name registry for components and named policies.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{BypassConfig, HostsConfig, ResolverConfig, ResolverType};
use crate::policy::{Bypass, BypassList, HostMapper, Resolver, StaticHosts, SystemResolver};
use crate::transport::{ComponentOptions, Connector, Dialer};

pub type ConnectorFactory = Arc<dyn Fn(ComponentOptions) -> Box<dyn Connector> + Send + Sync>;
pub type DialerFactory = Arc<dyn Fn(ComponentOptions) -> Box<dyn Dialer> + Send + Sync>;

/// Connector and dialer factories by type name, plus named policy instances.
///
/// Populated at startup and then only read.
#[derive(Clone, Default)]
pub struct Registry {
    connectors: HashMap<String, ConnectorFactory>,
    dialers: HashMap<String, DialerFactory>,
    bypasses: HashMap<String, Arc<dyn Bypass>>,
    resolvers: HashMap<String, Arc<dyn Resolver>>,
    hosts: HashMap<String, Arc<dyn HostMapper>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connector<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ComponentOptions) -> Box<dyn Connector> + Send + Sync + 'static,
    {
        self.connectors.insert(name.into(), Arc::new(factory));
    }

    pub fn register_dialer<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ComponentOptions) -> Box<dyn Dialer> + Send + Sync + 'static,
    {
        self.dialers.insert(name.into(), Arc::new(factory));
    }

    pub fn register_bypass(&mut self, name: impl Into<String>, bypass: Arc<dyn Bypass>) {
        self.bypasses.insert(name.into(), bypass);
    }

    pub fn register_resolver(&mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(name.into(), resolver);
    }

    pub fn register_hosts(&mut self, name: impl Into<String>, hosts: Arc<dyn HostMapper>) {
        self.hosts.insert(name.into(), hosts);
    }

    pub fn connector(&self, name: &str) -> Option<&ConnectorFactory> {
        self.connectors.get(name)
    }

    pub fn dialer(&self, name: &str) -> Option<&DialerFactory> {
        self.dialers.get(name)
    }

    pub fn bypass(&self, name: &str) -> Option<Arc<dyn Bypass>> {
        self.bypasses.get(name).cloned()
    }

    pub fn resolver(&self, name: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn hosts(&self, name: &str) -> Option<Arc<dyn HostMapper>> {
        self.hosts.get(name).cloned()
    }

    /// Register the policies defined in configuration.
    pub fn load_policies(
        &mut self,
        bypasses: &[BypassConfig],
        hosts: &[HostsConfig],
        resolvers: &[ResolverConfig],
    ) {
        for b in bypasses {
            let list = BypassList::new(&b.matchers, b.whitelist);
            self.register_bypass(b.name.clone(), Arc::new(list));
        }
        for h in hosts {
            let mut table = StaticHosts::new();
            for m in &h.mappings {
                table.insert(&m.hostname, m.ip);
            }
            self.register_hosts(h.name.clone(), Arc::new(table));
        }
        for r in resolvers {
            let resolver: Arc<dyn Resolver> = match r.kind {
                ResolverType::System => Arc::new(SystemResolver),
            };
            self.register_resolver(r.name.clone(), resolver);
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut connectors: Vec<_> = self.connectors.keys().collect();
        let mut dialers: Vec<_> = self.dialers.keys().collect();
        connectors.sort();
        dialers.sort();
        f.debug_struct("Registry")
            .field("connectors", &connectors)
            .field("dialers", &dialers)
            .field("bypasses", &self.bypasses.len())
            .field("resolvers", &self.resolvers.len())
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostMappingConfig;

    #[test]
    fn load_policies_registers_by_name() {
        let mut r = Registry::new();
        r.load_policies(
            &[BypassConfig {
                name: "lan".into(),
                whitelist: false,
                matchers: vec!["10.0.0.0/8".into()],
            }],
            &[HostsConfig {
                name: "static".into(),
                mappings: vec![HostMappingConfig {
                    hostname: "relay.local".into(),
                    ip: "10.0.0.5".parse().unwrap(),
                }],
            }],
            &[ResolverConfig {
                name: "sys".into(),
                kind: ResolverType::System,
            }],
        );

        assert!(r.bypass("lan").unwrap().contains("10.1.1.1:80"));
        assert!(r.bypass("wan").is_none());
        assert!(r.hosts("static").unwrap().lookup("tcp", "relay.local").is_some());
        assert!(r.resolver("sys").is_some());
        assert!(r.connector("relay").is_none());
    }
}
