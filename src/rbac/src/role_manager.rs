//! Thread-safe role manager
//!
//! Wraps a [`RoleGraph`] in a single reader-writer lock. Queries take the read
//! lock and run in parallel; mutations and rebuilds take the write lock. A
//! rebuild validates the whole policy source before touching the shared graph,
//! so a malformed source leaves the last good graph in place.
//!
//! # Example
//!
//! ```rust
//! use cretoai_rbac::RoleManager;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RoleManager::new();
//! manager.build_role_links(&[
//!     vec!["alice", "editor", "tenant1"],
//!     vec!["editor", "viewer", "tenant1"],
//! ])?;
//!
//! assert!(manager.has_link("alice", "viewer", "tenant1"));
//! assert!(!manager.has_link("alice", "viewer", "tenant2"));
//! # Ok(())
//! # }
//! ```

use crate::config::RoleManagerConfig;
use crate::error::Result;
use crate::matcher::MatchStrategy;
use crate::role_graph::RoleGraph;
use crate::types::GroupingRule;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Role manager owning one role hierarchy
#[derive(Debug)]
pub struct RoleManager {
    graph: RwLock<RoleGraph>,
}

impl RoleManager {
    /// Create a role manager with default configuration
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(RoleGraph::new()),
        }
    }

    /// Create a role manager with custom configuration
    pub fn with_config(config: RoleManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            graph: RwLock::new(RoleGraph::from_config(&config)),
        })
    }

    /// Replace the whole hierarchy with the links of a policy source.
    ///
    /// Every tuple is validated first. On the first malformed tuple the error
    /// is returned and the current hierarchy stays untouched.
    pub fn build_role_links<I, T, S>(&self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[S]>,
        S: AsRef<str>,
    {
        let rules = GroupingRule::parse_all(rules).map_err(|e| {
            warn!("Rejected role links: {}", e);
            e
        })?;
        self.rebuild(&rules);
        Ok(())
    }

    /// Replace the whole hierarchy with already validated rules
    ///
    /// The write lock is held for the whole rebuild, so strategies installed
    /// concurrently are never lost.
    pub fn rebuild(&self, rules: &[GroupingRule]) {
        let mut graph = self.graph.write();
        let mut fresh = graph.empty_like();
        for rule in rules {
            fresh.add_link(&rule.child, &rule.parent, &rule.domain);
        }

        let links = fresh.link_count();
        let pattern_links = fresh.pattern_link_count();
        let domains = fresh.domain_count();

        *graph = fresh;
        drop(graph);

        info!(
            "Rebuilt role links: {} links ({} pattern), {} domains",
            links, pattern_links, domains
        );
    }

    /// Add a single link. Returns false if it already existed.
    pub fn add_link(&self, child: &str, parent: &str, domain: &str) -> bool {
        let added = self.graph.write().add_link(child, parent, domain);
        debug!(
            "add_link {} -> {} in '{}': {}",
            child,
            parent,
            domain,
            if added { "added" } else { "exists" }
        );
        added
    }

    /// Delete a single link. Returns false if it did not exist.
    pub fn delete_link(&self, child: &str, parent: &str, domain: &str) -> bool {
        let removed = self.graph.write().delete_link(child, parent, domain);
        debug!(
            "delete_link {} -> {} in '{}': {}",
            child,
            parent,
            domain,
            if removed { "removed" } else { "missing" }
        );
        removed
    }

    /// Remove every link
    pub fn clear(&self) {
        self.graph.write().clear();
        debug!("Cleared role links");
    }

    /// Install the strategy for role-name patterns.
    ///
    /// Stored links are reclassified under the new strategy.
    pub fn set_name_matcher(&self, matcher: MatchStrategy) {
        let mut graph = self.graph.write();
        let mut fresh = RoleGraph::with_matchers(
            matcher,
            graph.domain_matcher().clone(),
            graph.max_hierarchy_level(),
        );
        reload(&mut fresh, &graph);
        *graph = fresh;
        debug!("Installed name matcher {:?}", graph.name_matcher());
    }

    /// Install the strategy for domain patterns
    pub fn set_domain_matcher(&self, matcher: MatchStrategy) {
        let mut graph = self.graph.write();
        let mut fresh = RoleGraph::with_matchers(
            graph.name_matcher().clone(),
            matcher,
            graph.max_hierarchy_level(),
        );
        reload(&mut fresh, &graph);
        *graph = fresh;
        debug!("Installed domain matcher {:?}", graph.domain_matcher());
    }

    /// Strategy currently used for domain patterns
    pub fn domain_matcher(&self) -> MatchStrategy {
        self.graph.read().domain_matcher().clone()
    }

    /// Returns true if `name2` is reachable from `name1` in `domain`
    pub fn has_link(&self, name1: &str, name2: &str, domain: &str) -> bool {
        self.graph.read().has_link(name1, name2, domain)
    }

    /// Like [`has_link`](Self::has_link), giving up after `timeout`
    pub fn has_link_with_deadline(
        &self,
        name1: &str,
        name2: &str,
        domain: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        self.graph
            .read()
            .has_link_with_deadline(name1, name2, domain, deadline)
    }

    /// Direct roles of `name` in `domain`
    pub fn get_roles(&self, name: &str, domain: &str) -> Vec<String> {
        self.graph.read().get_roles(name, domain)
    }

    /// Direct members of role `name` in `domain`
    pub fn get_users(&self, name: &str, domain: &str) -> Vec<String> {
        self.graph.read().get_users(name, domain)
    }

    /// Every role `name` inherits in `domain`, directly or transitively
    pub fn get_implicit_roles(&self, name: &str, domain: &str) -> Vec<String> {
        self.graph.read().get_implicit_roles(name, domain)
    }

    /// Domains in which `name` takes part in a link
    pub fn get_domains(&self, name: &str) -> Vec<String> {
        self.graph.read().get_domains(name)
    }

    /// Every domain holding a link
    pub fn get_all_domains(&self) -> Vec<String> {
        self.graph.read().get_all_domains()
    }

    /// Number of stored links
    pub fn link_count(&self) -> usize {
        self.graph.read().link_count()
    }
}

impl Default for RoleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn reload(target: &mut RoleGraph, source: &RoleGraph) {
    for rule in source.links() {
        target.add_link(&rule.child, &rule.parent, &rule.domain);
    }
}
