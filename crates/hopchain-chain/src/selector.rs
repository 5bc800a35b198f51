//! Node selection strategies.
//!
//! Only [`Fifo`] looks at node failure markers; the other strategies pick
//! among all candidates.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::config::{SelectorConfig, Strategy};
use crate::node::Node;

/// Picks one node index from a hop's candidates.
pub trait Selector: Send + Sync + 'static {
    /// Returns `None` only when `nodes` is empty.
    fn select(&self, nodes: &[Arc<Node>]) -> Option<usize>;
}

/// Build the selector described by `config`.
pub fn from_config(config: &SelectorConfig) -> Arc<dyn Selector> {
    match config.strategy {
        Strategy::RoundRobin => Arc::new(RoundRobin::new()),
        Strategy::Random => Arc::new(Random),
        Strategy::Weighted => Arc::new(Weighted),
        Strategy::Fifo => Arc::new(Fifo {
            max_fails: config.max_fails,
            fail_timeout: Duration::from_secs(config.fail_timeout_secs),
        }),
    }
}

/// Cycles through nodes in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn select(&self, nodes: &[Arc<Node>]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % nodes.len())
    }
}

/// Uniformly random.
#[derive(Debug, Default)]
pub struct Random;

impl Selector for Random {
    fn select(&self, nodes: &[Arc<Node>]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..nodes.len()))
    }
}

/// Random, proportional to node weight.
#[derive(Debug, Default)]
pub struct Weighted;

impl Selector for Weighted {
    fn select(&self, nodes: &[Arc<Node>]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }
        let total: u64 = nodes.iter().map(|n| u64::from(n.weight())).sum();
        let mut pick = rand::thread_rng().gen_range(0..total);
        for (i, n) in nodes.iter().enumerate() {
            let w = u64::from(n.weight());
            if pick < w {
                return Some(i);
            }
            pick -= w;
        }
        Some(nodes.len() - 1)
    }
}

/// First node that is not failing.
///
/// A node with `max_fails` or more consecutive failures is skipped until
/// `fail_timeout` has passed since its last failure. When every node is
/// excluded the first one is returned.
#[derive(Debug)]
pub struct Fifo {
    pub max_fails: u32,
    pub fail_timeout: Duration,
}

impl Default for Fifo {
    fn default() -> Self {
        Self {
            max_fails: hopchain_core::DEFAULT_MAX_FAILS,
            fail_timeout: Duration::from_secs(hopchain_core::DEFAULT_FAIL_TIMEOUT_SECS),
        }
    }
}

impl Fifo {
    fn excluded(&self, node: &Node, now: SystemTime) -> bool {
        let marker = node.marker();
        if self.max_fails == 0 || marker.fail_count() < self.max_fails {
            return false;
        }
        match marker.last_failure() {
            Some(at) => now.duration_since(at).unwrap_or_default() < self.fail_timeout,
            None => false,
        }
    }
}

impl Selector for Fifo {
    fn select(&self, nodes: &[Arc<Node>]) -> Option<usize> {
        if nodes.is_empty() {
            return None;
        }
        let now = SystemTime::now();
        Some(
            nodes
                .iter()
                .position(|n| !self.excluded(n, now))
                .unwrap_or(0),
        )
    }
}
