//! Role inheritance graph with lazily resolved pattern links
//!
//! The graph stores, per domain, the direct "inherits from" edges between
//! role names together with the reverse edges used by user lookups. Links
//! whose child name or domain is a pattern are never expanded against the
//! names known at insert time. They are kept apart and resolved while a query
//! walks the graph:
//!
//! - a pattern **domain** (`org*`) is a domain of its own; a query in `org1`
//!   walks `org1` together with every pattern domain covering `org1`
//! - a query **in** a pattern domain walks each known concrete domain the
//!   pattern covers and succeeds if any of them does
//! - a pattern **child** (`/book/*`) contributes its parents to every name it
//!   covers; a reached pattern **parent** satisfies a target it covers
//!
//! The three lookups above are memoised in bounded LRU indexes filled on first
//! use and dropped whenever the links they summarise change, so repeated
//! queries cost in proportion to the matching domains and names, not to the
//! whole graph. Lookups with nothing to resolve are never memoised.
//!
//! # Cycles
//!
//! User policy may introduce cycles (`a -> b -> a`). Every traversal is a
//! breadth-first search over a visited set and is additionally bounded by the
//! maximum hierarchy level.

use crate::config::RoleManagerConfig;
use crate::error::{RbacError, Result};
use crate::matcher::{MatchStrategy, Matcher};
use crate::types::GroupingRule;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

/// Entries kept by each lookup index
pub const INDEX_CAPACITY: usize = 4096;

/// Bounded memo of resolved lookups
#[derive(Debug)]
struct LookupIndex {
    entries: Mutex<LruCache<String, Arc<[String]>>>,
}

impl LookupIndex {
    fn new() -> Self {
        let capacity = NonZeroUsize::new(INDEX_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, key: &str) -> Option<Arc<[String]>> {
        self.entries.lock().get(key).cloned()
    }

    fn insert(&self, key: &str, value: Arc<[String]>) {
        self.entries.lock().put(key.to_string(), value);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for LookupIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Links of a single (literal or pattern) domain
#[derive(Debug, Default)]
struct DomainLinks {
    /// Literal child -> direct parents
    parents: HashMap<String, HashSet<String>>,

    /// Pattern child -> direct parents
    pattern_parents: HashMap<String, HashSet<String>>,

    /// Parent -> direct children (literal and pattern)
    children: HashMap<String, HashSet<String>>,

    /// Name -> parents contributed by pattern children covering it
    pattern_index: LookupIndex,
}

impl DomainLinks {
    fn is_empty(&self) -> bool {
        self.parents.is_empty() && self.pattern_parents.is_empty()
    }

    fn link_count(&self) -> usize {
        self.parents.values().map(HashSet::len).sum::<usize>() + self.pattern_link_count()
    }

    fn pattern_link_count(&self) -> usize {
        self.pattern_parents.values().map(HashSet::len).sum()
    }

    fn contains(&self, name: &str) -> bool {
        self.parents.contains_key(name)
            || self.pattern_parents.contains_key(name)
            || self.children.contains_key(name)
    }

    /// Parents reached through pattern children that cover `name`
    fn pattern_parents_of(&self, name: &str, matcher: &MatchStrategy) -> Arc<[String]> {
        if let Some(cached) = self.pattern_index.get(name) {
            return cached;
        }

        let mut found: BTreeSet<&str> = BTreeSet::new();
        for (pattern, parents) in &self.pattern_parents {
            if matcher.covers(pattern, name) {
                found.extend(parents.iter().map(String::as_str));
            }
        }

        let resolved: Arc<[String]> = found.into_iter().map(str::to_string).collect();
        self.pattern_index.insert(name, Arc::clone(&resolved));
        resolved
    }
}

/// In-memory role inheritance graph
#[derive(Debug)]
pub struct RoleGraph {
    /// Domain (literal or pattern) -> links
    domains: HashMap<String, DomainLinks>,

    /// Strategy deciding which names are patterns
    name_matcher: MatchStrategy,

    /// Strategy deciding which domains are patterns
    domain_matcher: MatchStrategy,

    /// Maximum inheritance hops followed by queries
    max_hierarchy_level: usize,

    /// Concrete domain -> domains walked by a query in it
    domain_index: LookupIndex,

    /// Pattern domain -> known concrete domains it covers
    pattern_domain_index: LookupIndex,

    /// Number of stored domains that are patterns
    pattern_domains: usize,
}

impl RoleGraph {
    /// Create an empty graph without pattern support
    pub fn new() -> Self {
        Self::with_matchers(
            MatchStrategy::default(),
            MatchStrategy::default(),
            crate::config::DEFAULT_MAX_HIERARCHY_LEVEL,
        )
    }

    /// Create an empty graph from a role manager configuration
    pub fn from_config(config: &RoleManagerConfig) -> Self {
        Self::with_matchers(
            config.name_matcher.into(),
            config.domain_matcher.into(),
            config.max_hierarchy_level,
        )
    }

    /// Create an empty graph with explicit matching strategies
    pub fn with_matchers(
        name_matcher: MatchStrategy,
        domain_matcher: MatchStrategy,
        max_hierarchy_level: usize,
    ) -> Self {
        Self {
            domains: HashMap::new(),
            name_matcher,
            domain_matcher,
            max_hierarchy_level,
            domain_index: LookupIndex::new(),
            pattern_domain_index: LookupIndex::new(),
            pattern_domains: 0,
        }
    }

    /// Create an empty graph sharing this graph's strategies and limits
    pub fn empty_like(&self) -> Self {
        Self::with_matchers(
            self.name_matcher.clone(),
            self.domain_matcher.clone(),
            self.max_hierarchy_level,
        )
    }

    /// Strategy for role-name patterns
    pub fn name_matcher(&self) -> &MatchStrategy {
        &self.name_matcher
    }

    /// Strategy for domain patterns
    pub fn domain_matcher(&self) -> &MatchStrategy {
        &self.domain_matcher
    }

    /// Maximum inheritance hops followed by queries
    pub fn max_hierarchy_level(&self) -> usize {
        self.max_hierarchy_level
    }

    /// Number of stored links, literal and pattern
    pub fn link_count(&self) -> usize {
        self.domains.values().map(DomainLinks::link_count).sum()
    }

    /// Number of links stored lazily because a side or the domain is a pattern
    pub fn pattern_link_count(&self) -> usize {
        self.domains
            .iter()
            .map(|(domain, links)| {
                if self.domain_matcher.is_pattern(domain) {
                    links.link_count()
                } else {
                    links.pattern_link_count()
                }
            })
            .sum()
    }

    /// Number of domains holding at least one link
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Add `child` inherits from `parent` in `domain`.
    ///
    /// Missing endpoints are created. Returns false if the link already existed.
    pub fn add_link(&mut self, child: &str, parent: &str, domain: &str) -> bool {
        if !self.domains.contains_key(domain) {
            if self.domain_matcher.is_pattern(domain) {
                self.pattern_domains += 1;
            }
            self.drop_domain_indexes();
        }

        let child_is_pattern = self.name_matcher.is_pattern(child);
        let links = self.domains.entry(domain.to_string()).or_default();

        let inserted = if child_is_pattern {
            let added = links
                .pattern_parents
                .entry(child.to_string())
                .or_default()
                .insert(parent.to_string());
            if added {
                links.pattern_index.clear();
            }
            added
        } else {
            links
                .parents
                .entry(child.to_string())
                .or_default()
                .insert(parent.to_string())
        };

        if inserted {
            links
                .children
                .entry(parent.to_string())
                .or_default()
                .insert(child.to_string());
        }

        inserted
    }

    /// Remove `child` inherits from `parent` in `domain`.
    ///
    /// Returns false if the link did not exist.
    pub fn delete_link(&mut self, child: &str, parent: &str, domain: &str) -> bool {
        let child_is_pattern = self.name_matcher.is_pattern(child);

        let Some(links) = self.domains.get_mut(domain) else {
            return false;
        };

        let edges = if child_is_pattern {
            &mut links.pattern_parents
        } else {
            &mut links.parents
        };

        let removed = match edges.get_mut(child) {
            Some(parents) => {
                let removed = parents.remove(parent);
                if parents.is_empty() {
                    edges.remove(child);
                }
                removed
            }
            None => false,
        };

        if !removed {
            return false;
        }

        if child_is_pattern {
            links.pattern_index.clear();
        }

        if let Some(children) = links.children.get_mut(parent) {
            children.remove(child);
            if children.is_empty() {
                links.children.remove(parent);
            }
        }

        if links.is_empty() {
            self.domains.remove(domain);
            if self.domain_matcher.is_pattern(domain) {
                self.pattern_domains -= 1;
            }
            self.drop_domain_indexes();
        }

        true
    }

    /// Remove every link
    pub fn clear(&mut self) {
        self.domains.clear();
        self.pattern_domains = 0;
        self.drop_domain_indexes();
    }

    /// Every stored link, in no particular order
    pub fn links(&self) -> Vec<GroupingRule> {
        let mut rules = Vec::with_capacity(self.link_count());
        for (domain, links) in &self.domains {
            for (child, parents) in links.parents.iter().chain(links.pattern_parents.iter()) {
                for parent in parents {
                    rules.push(GroupingRule::new(child.as_str(), parent.as_str(), domain.as_str()));
                }
            }
        }
        rules
    }

    /// Returns true if `name2` is reachable from `name1` in `domain`
    pub fn has_link(&self, name1: &str, name2: &str, domain: &str) -> bool {
        matches!(self.resolve_link(name1, name2, domain, None), Ok(true))
    }

    /// Like [`has_link`](Self::has_link), abandoning the scan once `deadline` passes.
    ///
    /// # Errors
    ///
    /// Returns [`RbacError::DeadlineExceeded`] if the deadline passed before an
    /// answer was found. The graph is never modified by a query, so an
    /// abandoned scan leaves nothing to clean up.
    pub fn has_link_with_deadline(
        &self,
        name1: &str,
        name2: &str,
        domain: &str,
        deadline: Instant,
    ) -> Result<bool> {
        self.resolve_link(name1, name2, domain, Some(deadline))
    }

    /// Direct parents of `name` in `domain` (one hop)
    pub fn get_roles(&self, name: &str, domain: &str) -> Vec<String> {
        let mut roles = BTreeSet::new();
        for scope in self.scopes(domain) {
            roles.extend(self.direct_parents(name, &scope));
        }
        roles.into_iter().collect()
    }

    /// Direct children of `name` in `domain` (one hop)
    pub fn get_users(&self, name: &str, domain: &str) -> Vec<String> {
        let mut users = BTreeSet::new();
        for scope in self.scopes(domain) {
            for dom in scope.iter() {
                if let Ok(links) = self.links_in(dom) {
                    if let Some(children) = links.children.get(name) {
                        users.extend(children.iter().cloned());
                    }
                }
            }
        }
        users.into_iter().collect()
    }

    /// Every role reachable from `name` in `domain`, excluding `name` itself
    pub fn get_implicit_roles(&self, name: &str, domain: &str) -> Vec<String> {
        let mut roles = BTreeSet::new();

        for scope in self.scopes(domain) {
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(name.to_string());
            let mut frontier = vec![name.to_string()];

            for _ in 0..self.max_hierarchy_level {
                if frontier.is_empty() {
                    break;
                }
                let mut next = Vec::new();
                for node in &frontier {
                    for parent in self.direct_parents(node, &scope) {
                        if visited.insert(parent.clone()) {
                            roles.insert(parent.clone());
                            next.push(parent);
                        }
                    }
                }
                frontier = next;
            }
        }

        roles.into_iter().collect()
    }

    /// Every domain (literal or pattern) in which `name` takes part in a link
    pub fn get_domains(&self, name: &str) -> Vec<String> {
        let mut domains: Vec<String> = self
            .domains
            .iter()
            .filter(|(_, links)| links.contains(name))
            .map(|(domain, _)| domain.clone())
            .collect();
        domains.sort();
        domains
    }

    /// Every domain holding at least one link
    pub fn get_all_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.keys().cloned().collect();
        domains.sort();
        domains
    }

    fn resolve_link(
        &self,
        name1: &str,
        name2: &str,
        domain: &str,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        if name1 == name2 {
            return Ok(true);
        }

        for scope in self.scopes(domain) {
            check_deadline(deadline)?;
            if self.reachable(name1, name2, &scope, deadline)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Breadth-first search for `target` starting at `from`, walking the
    /// links of every domain in `scope`
    fn reachable(
        &self,
        from: &str,
        target: &str,
        scope: &[String],
        deadline: Option<Instant>,
    ) -> Result<bool> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from.to_string());
        let mut frontier = vec![from.to_string()];

        for _ in 0..self.max_hierarchy_level {
            if frontier.is_empty() {
                break;
            }

            let mut next = Vec::new();
            for node in &frontier {
                check_deadline(deadline)?;

                for parent in self.direct_parents(node, scope) {
                    if self.satisfies(&parent, target) {
                        return Ok(true);
                    }
                    if visited.insert(parent.clone()) {
                        next.push(parent);
                    }
                }
            }
            frontier = next;
        }

        Ok(false)
    }

    /// A reached role satisfies the target literally or, if it is a pattern,
    /// by covering it
    fn satisfies(&self, role: &str, target: &str) -> bool {
        role == target
            || (self.name_matcher.is_pattern(role) && self.name_matcher.is_match(role, target))
    }

    /// Direct parents of `name` across the domains of one scope
    fn direct_parents(&self, name: &str, scope: &[String]) -> Vec<String> {
        let mut parents = Vec::new();

        for domain in scope {
            let Ok(links) = self.links_in(domain) else {
                continue;
            };

            if let Some(direct) = links.parents.get(name) {
                parents.extend(direct.iter().cloned());
            }

            if !links.pattern_parents.is_empty() {
                parents.extend(
                    links
                        .pattern_parents_of(name, &self.name_matcher)
                        .iter()
                        .cloned(),
                );
            }
        }

        if scope.len() > 1 {
            parents.sort();
            parents.dedup();
        }
        parents
    }

    fn links_in(&self, domain: &str) -> Result<&DomainLinks> {
        self.domains
            .get(domain)
            .ok_or_else(|| RbacError::NotFound(format!("domain '{}'", domain)))
    }

    /// Groups of domains walked together by a query in `domain`.
    ///
    /// A concrete domain yields one group: itself plus the pattern domains
    /// covering it. A pattern domain yields one group per known concrete
    /// domain it covers, plus its own literal links.
    fn scopes(&self, domain: &str) -> Vec<Arc<[String]>> {
        if !self.domain_matcher.is_pattern(domain) {
            return vec![self.effective_domains(domain)];
        }

        let mut scopes: Vec<Arc<[String]>> = self
            .concrete_domains_matching(domain)
            .iter()
            .map(|concrete| self.effective_domains(concrete))
            .collect();

        if self.domains.contains_key(domain) {
            scopes.push(Arc::from(vec![domain.to_string()]));
        }
        scopes
    }

    /// `domain` plus every pattern domain covering it
    fn effective_domains(&self, domain: &str) -> Arc<[String]> {
        if self.domain_matcher.is_exact() || self.pattern_domains == 0 {
            return Arc::from(vec![domain.to_string()]);
        }

        if let Some(cached) = self.domain_index.get(domain) {
            return cached;
        }

        let mut patterns: Vec<&String> = self
            .domains
            .keys()
            .filter(|d| {
                d.as_str() != domain
                    && self.domain_matcher.is_pattern(d)
                    && self.domain_matcher.is_match(d, domain)
            })
            .collect();
        patterns.sort();

        let effective: Arc<[String]> = std::iter::once(domain.to_string())
            .chain(patterns.into_iter().cloned())
            .collect();
        self.domain_index.insert(domain, Arc::clone(&effective));
        effective
    }

    /// Known concrete domains covered by a pattern domain
    fn concrete_domains_matching(&self, pattern: &str) -> Arc<[String]> {
        if let Some(cached) = self.pattern_domain_index.get(pattern) {
            return cached;
        }

        let mut matching: Vec<String> = self
            .domains
            .keys()
            .filter(|d| {
                !self.domain_matcher.is_pattern(d) && self.domain_matcher.is_match(pattern, d)
            })
            .cloned()
            .collect();
        matching.sort();

        let matching: Arc<[String]> = matching.into();
        self.pattern_domain_index.insert(pattern, Arc::clone(&matching));
        matching
    }

    fn drop_domain_indexes(&self) {
        self.domain_index.clear();
        self.pattern_domain_index.clear();
    }
}

impl Default for RoleGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(RbacError::DeadlineExceeded),
        _ => Ok(()),
    }
}
