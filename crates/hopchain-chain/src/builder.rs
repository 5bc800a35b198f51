//! Assemble a [`Chain`] from configuration.

use std::sync::Arc;

use tracing::{Span, debug, info_span};

use crate::chain::{Chain, NodeGroup};
use crate::config::{AuthConfig, ChainConfig, ComponentConfig, HopConfig, NodeConfig};
use crate::error::ChainError;
use crate::node::{Node, Transport};
use crate::registry::Registry;
use crate::selector::{self, RoundRobin, Selector};
use crate::tls::{ClientTls, load_client_config};
use crate::transport::{Auth, ComponentOptions, Connector, Dialer};

/// Builds chains against a registry.
///
/// A build is all-or-nothing: the first node that cannot be constructed
/// aborts it with [`ChainError::Build`].
pub struct ChainBuilder<'a> {
    registry: &'a Registry,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn build(&self, config: &ChainConfig) -> Result<Chain, ChainError> {
        let mut chain = Chain::new(config.name.clone());
        for hop in &config.hops {
            let mut nodes = Vec::with_capacity(hop.nodes.len());
            for node in &hop.nodes {
                let built = self
                    .build_node(config, hop, node)
                    .map_err(|e| ChainError::Build {
                        chain: config.name.clone(),
                        hop: hop.name.clone(),
                        node: node.name.clone(),
                        reason: e.to_string(),
                    })?;
                nodes.push(Arc::new(built));
            }

            let selector: Arc<dyn Selector> = match hop.selector.as_ref().or(config.selector.as_ref()) {
                Some(cfg) => selector::from_config(cfg),
                None => Arc::new(RoundRobin::new()),
            };
            chain.add_group(NodeGroup::new(hop.name.clone(), nodes).with_selector(selector));
        }
        Ok(chain)
    }

    fn build_node(
        &self,
        chain: &ChainConfig,
        hop: &HopConfig,
        config: &NodeConfig,
    ) -> Result<Node, ChainError> {
        let span = info_span!(
            "node",
            chain = %chain.name,
            hop = %hop.name,
            node = %config.name,
            connector = %config.connector.kind,
            dialer = %config.dialer.kind,
        );

        let connector = self.build_connector(&config.connector, span.clone())?;
        let dialer = self.build_dialer(&config.dialer, span.clone())?;

        let bypass = inherit(&config.bypass, &hop.bypass)
            .map(|name| {
                self.registry
                    .bypass(name)
                    .ok_or_else(|| unknown("bypass", name))
            })
            .transpose()?;
        let resolver = inherit(&config.resolver, &hop.resolver)
            .map(|name| {
                self.registry
                    .resolver(name)
                    .ok_or_else(|| unknown("resolver", name))
            })
            .transpose()?;
        let hosts = inherit(&config.hosts, &hop.hosts)
            .map(|name| self.registry.hosts(name).ok_or_else(|| unknown("hosts", name)))
            .transpose()?;
        let interface = inherit(&config.interface, &hop.interface).map(str::to_string);

        let transport = Transport::new(connector, dialer, config.addr.clone()).with_interface(interface);
        span.in_scope(|| debug!(addr = %config.addr, weight = config.weight, "node built"));

        Ok(Node::new(config.name.clone(), config.addr.clone(), transport)
            .with_bypass(bypass)
            .with_resolver(resolver)
            .with_hosts(hosts)
            .with_weight(config.weight)
            .with_span(span))
    }

    fn build_connector(
        &self,
        config: &ComponentConfig,
        span: Span,
    ) -> Result<Arc<dyn Connector>, ChainError> {
        let factory = self
            .registry
            .connector(&config.kind)
            .ok_or_else(|| unknown("connector", &config.kind))?;
        let mut connector = factory(component_options(config, span)?);
        connector.init(&config.metadata)?;
        Ok(Arc::from(connector))
    }

    fn build_dialer(&self, config: &ComponentConfig, span: Span) -> Result<Arc<dyn Dialer>, ChainError> {
        let factory = self
            .registry
            .dialer(&config.kind)
            .ok_or_else(|| unknown("dialer", &config.kind))?;
        let mut dialer = factory(component_options(config, span)?);
        dialer.init(&config.metadata)?;
        Ok(Arc::from(dialer))
    }
}

fn component_options(config: &ComponentConfig, span: Span) -> Result<ComponentOptions, ChainError> {
    let tls = match &config.tls {
        Some(t) => load_client_config(
            t.cert_file.as_deref(),
            t.key_file.as_deref(),
            t.ca_file.as_deref(),
            t.secure,
            t.server_name.as_deref(),
        )?,
        None => ClientTls::default(),
    };
    Ok(ComponentOptions {
        auth: config.auth.as_ref().map(auth_from_config),
        tls,
        span,
    })
}

fn auth_from_config(a: &AuthConfig) -> Auth {
    Auth {
        username: a.username.clone(),
        password: a.password.clone(),
    }
}

/// Node value if set and non-empty, else the hop's.
fn inherit<'c>(node: &'c Option<String>, hop: &'c Option<String>) -> Option<&'c str> {
    node.as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| hop.as_deref().filter(|s| !s.is_empty()))
}

fn unknown(kind: &'static str, name: &str) -> ChainError {
    ChainError::UnknownComponent {
        kind,
        name: name.to_string(),
    }
}
