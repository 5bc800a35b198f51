//! Chains of node groups.

use std::sync::Arc;

use tracing::debug;

use crate::error::ChainError;
use crate::node::Node;
use crate::route::Route;
use crate::selector::{RoundRobin, Selector};

/// One hop: candidate nodes and the selector choosing among them.
pub struct NodeGroup {
    name: String,
    nodes: Vec<Arc<Node>>,
    selector: Arc<dyn Selector>,
}

impl NodeGroup {
    /// Group with the default round-robin selector.
    pub fn new(name: impl Into<String>, nodes: Vec<Arc<Node>>) -> Self {
        Self {
            name: name.into(),
            nodes,
            selector: Arc::new(RoundRobin::new()),
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Pick one node.
    pub fn select(&self) -> Result<Arc<Node>, ChainError> {
        self.selector
            .select(&self.nodes)
            .and_then(|i| self.nodes.get(i))
            .cloned()
            .ok_or_else(|| ChainError::NoNodeAvailable(self.name.clone()))
    }
}

impl std::fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGroup")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// What a route is being built for.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    /// Final target (`host:port`), checked against node bypass policies.
    pub target: Option<String>,
}

impl RouteContext {
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }
}

/// Ordered hops. Shared read-only between connection attempts.
#[derive(Debug)]
pub struct Chain {
    name: String,
    groups: Vec<NodeGroup>,
}

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn add_group(&mut self, group: NodeGroup) {
        self.groups.push(group);
    }

    pub fn with_group(mut self, group: NodeGroup) -> Self {
        self.add_group(group);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[NodeGroup] {
        &self.groups
    }

    /// Select one node per hop.
    ///
    /// If a selected node bypasses the target, the route ends before it.
    pub fn route(&self, ctx: &RouteContext) -> Result<Route, ChainError> {
        let mut nodes = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let node = group.select()?;
            if let (Some(target), Some(bypass)) = (ctx.target.as_deref(), node.bypass())
                && bypass.contains(target)
            {
                debug!(chain = %self.name, hop = %group.name, node = %node.name(), dest = %target, "bypassed");
                break;
            }
            nodes.push(node);
        }
        Ok(Route::new(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::BypassList;
    use crate::selector::Fifo;
    use crate::selector::tests::node;

    fn names(route: &Route) -> Vec<String> {
        route.nodes().iter().map(|n| n.name().to_string()).collect()
    }

    #[test]
    fn group_select_returns_member() {
        let g = NodeGroup::new("hop", vec![node("a", 1), node("b", 1)]);
        for _ in 0..10 {
            let n = g.select().unwrap();
            assert!(["a", "b"].contains(&n.name()));
        }
    }

    #[test]
    fn empty_group_reports_hop() {
        let g = NodeGroup::new("hop-1", vec![]);
        match g.select() {
            Err(ChainError::NoNodeAvailable(hop)) => assert_eq!(hop, "hop-1"),
            other => panic!("unexpected {:?}", other.map(|n| n.name().to_string())),
        }
    }

    #[test]
    fn route_picks_one_node_per_hop() {
        let chain = Chain::new("c")
            .with_group(NodeGroup::new("h0", vec![node("a0", 1), node("a1", 1)]))
            .with_group(NodeGroup::new("h1", vec![node("b0", 1)]))
            .with_group(
                NodeGroup::new("h2", vec![node("c0", 1), node("c1", 1)])
                    .with_selector(Arc::new(Fifo::default())),
            );

        let first = chain.route(&RouteContext::default()).unwrap();
        assert_eq!(names(&first), vec!["a0", "b0", "c0"]);
        let second = chain.route(&RouteContext::default()).unwrap();
        assert_eq!(names(&second), vec!["a1", "b0", "c0"]);
    }

    #[test]
    fn route_fails_on_empty_hop() {
        let chain = Chain::new("c")
            .with_group(NodeGroup::new("h0", vec![node("a", 1)]))
            .with_group(NodeGroup::new("h1", vec![]));
        assert!(matches!(
            chain.route(&RouteContext::default()),
            Err(ChainError::NoNodeAvailable(_))
        ));
    }

    #[test]
    fn bypass_truncates_route() {
        let lan: Arc<dyn crate::policy::Bypass> = Arc::new(BypassList::new(["10.0.0.0/8"], false));
        let b = Arc::new(
            Arc::try_unwrap(node("b", 1))
                .unwrap()
                .with_bypass(Some(lan)),
        );
        let chain = Chain::new("c")
            .with_group(NodeGroup::new("h0", vec![node("a", 1)]))
            .with_group(NodeGroup::new("h1", vec![b]))
            .with_group(NodeGroup::new("h2", vec![node("c", 1)]));

        let route = chain.route(&RouteContext::for_target("10.1.2.3:22")).unwrap();
        assert_eq!(names(&route), vec!["a"]);

        let route = chain.route(&RouteContext::for_target("93.184.216.34:443")).unwrap();
        assert_eq!(names(&route), vec!["a", "b", "c"]);

        // without a target nothing is bypassed
        let route = chain.route(&RouteContext::default()).unwrap();
        assert_eq!(route.len(), 3);
    }
}
