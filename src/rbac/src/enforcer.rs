//! RBAC enforcer
//!
//! Ties a subject role hierarchy, a resource role hierarchy, a policy set and
//! the decision cache together. Every successful mutation invalidates the
//! cache, so a decision returned after a mutation always reflects it.

use crate::cache::{CacheStats, DecisionCache, Fingerprint};
use crate::config::{EffectMode, EnforcerConfig};
use crate::error::Result;
use crate::matcher::MatchStrategy;
use crate::role_manager::RoleManager;
use crate::types::{Decision, EnforceRequest, GroupingRule, PolicyEffect, PolicyRule};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Everything a [`RuleMatcher`] may consult besides the request and the rule
pub struct MatchContext<'a> {
    /// Subject role hierarchy
    pub roles: &'a RoleManager,

    /// Resource role hierarchy
    pub resource_roles: &'a RoleManager,

    /// Strategy for object patterns in rules
    pub object_matcher: &'a MatchStrategy,

    /// Strategy for domain patterns in rules, shared with the subject hierarchy
    pub domain_matcher: &'a MatchStrategy,
}

/// Decides whether a policy rule applies to a request
pub trait RuleMatcher: Send + Sync {
    /// Returns true if `rule` applies to `request`
    fn matches(
        &self,
        request: &EnforceRequest,
        rule: &PolicyRule,
        ctx: &MatchContext<'_>,
    ) -> Result<bool>;
}

/// Standard RBAC matching.
///
/// A rule applies when the request action equals the rule action (or the rule
/// action is `*`), the rule domain is unset or covers the request domain, the
/// request object is the rule object, inherits it through the resource
/// hierarchy or is covered by it as a pattern, and the request subject
/// inherits the rule subject in the request domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct RbacRuleMatcher;

impl RuleMatcher for RbacRuleMatcher {
    fn matches(
        &self,
        request: &EnforceRequest,
        rule: &PolicyRule,
        ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        if rule.action != "*" && rule.action != request.action {
            return Ok(false);
        }

        if let Some(rule_domain) = &rule.domain {
            match &request.domain {
                Some(domain) if ctx.domain_matcher.covers(rule_domain, domain) => {}
                _ => return Ok(false),
            }
        }

        let object_matches = ctx.object_matcher.covers(&rule.object, &request.object)
            || ctx.resource_roles.has_link(&request.object, &rule.object, "");
        if !object_matches {
            return Ok(false);
        }

        Ok(ctx
            .roles
            .has_link(&request.subject, &rule.subject, request.role_domain()))
    }
}

/// Policy rules kept in ascending priority order, with a membership index
#[derive(Debug, Default)]
struct PolicySet {
    rules: Vec<PolicyRule>,
    index: HashSet<PolicyRule>,
}

impl PolicySet {
    fn contains(&self, rule: &PolicyRule) -> bool {
        self.index.contains(rule)
    }

    /// Insert after every rule of equal or lower priority value
    fn insert(&mut self, rule: PolicyRule) {
        if !self.index.insert(rule.clone()) {
            return;
        }
        let at = self.rules.partition_point(|r| r.priority <= rule.priority);
        self.rules.insert(at, rule);
    }

    fn remove(&mut self, rule: &PolicyRule) -> bool {
        if !self.index.remove(rule) {
            return false;
        }

        // Only rules of the same priority need to be scanned
        let start = self.rules.partition_point(|r| r.priority < rule.priority);
        let end = self.rules.partition_point(|r| r.priority <= rule.priority);
        if let Some(offset) = self.rules[start..end].iter().position(|r| r == rule) {
            self.rules.remove(start + offset);
        }
        true
    }

    fn clear(&mut self) {
        self.rules.clear();
        self.index.clear();
    }

    fn len(&self) -> usize {
        self.rules.len()
    }
}

/// RBAC enforcer
pub struct Enforcer {
    config: EnforcerConfig,
    roles: RoleManager,
    resource_roles: RoleManager,
    policies: RwLock<PolicySet>,
    cache: Option<DecisionCache>,
    rule_matcher: Arc<dyn RuleMatcher>,
    object_matcher: MatchStrategy,
}

impl Enforcer {
    /// Create an enforcer with custom configuration
    pub fn new(config: EnforcerConfig) -> Result<Self> {
        config.validate()?;

        let cache = if config.enable_cache {
            Some(DecisionCache::new(config.cache.clone())?)
        } else {
            None
        };

        info!(
            "Creating enforcer: cache={}, effect={:?}",
            config.enable_cache, config.effect
        );

        Ok(Self {
            roles: RoleManager::with_config(config.roles.clone())?,
            resource_roles: RoleManager::with_config(config.resource_roles.clone())?,
            policies: RwLock::new(PolicySet::default()),
            cache,
            rule_matcher: Arc::new(RbacRuleMatcher),
            object_matcher: config.object_matcher.into(),
            config,
        })
    }

    /// Create an enforcer configured from `RBAC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(EnforcerConfig::from_env()?)
    }

    /// Replace the rule matcher
    pub fn with_rule_matcher(mut self, matcher: Arc<dyn RuleMatcher>) -> Self {
        self.rule_matcher = matcher;
        self.invalidate_cache();
        self
    }

    /// Enforcer configuration
    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Subject role hierarchy.
    ///
    /// Links changed through it directly are not seen by cached decisions
    /// until [`invalidate_cache`](Self::invalidate_cache) is called.
    pub fn role_manager(&self) -> &RoleManager {
        &self.roles
    }

    /// Resource role hierarchy
    pub fn resource_role_manager(&self) -> &RoleManager {
        &self.resource_roles
    }

    // ========================================================================
    // Enforcement
    // ========================================================================

    /// Returns true if the request is allowed
    pub async fn enforce(&self, request: &EnforceRequest) -> Result<bool> {
        Ok(self.enforce_ex(request).await?.allowed)
    }

    /// Decide a request, returning the rule that decided it
    pub async fn enforce_ex(&self, request: &EnforceRequest) -> Result<Decision> {
        debug!(
            "Enforcing: subject={}, object={}, action={}, domain={}",
            request.subject,
            request.object,
            request.action,
            request.role_domain()
        );

        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_compute(Fingerprint::of(request), || self.evaluate(request))
                    .await
            }
            None => self.evaluate(request).await,
        }
    }

    async fn evaluate(&self, request: &EnforceRequest) -> Result<Decision> {
        let policies = self.policies.read().await;
        let domain_matcher = self.roles.domain_matcher();
        let ctx = MatchContext {
            roles: &self.roles,
            resource_roles: &self.resource_roles,
            object_matcher: &self.object_matcher,
            domain_matcher: &domain_matcher,
        };

        let mut allowed_by: Option<&PolicyRule> = None;

        for rule in &policies.rules {
            if !self.rule_matcher.matches(request, rule, &ctx)? {
                continue;
            }

            match (self.config.effect, rule.effect) {
                (EffectMode::Priority, PolicyEffect::Allow) => {
                    return Ok(Decision::allow(rule.clone()))
                }
                (EffectMode::Priority | EffectMode::DenyOverride, PolicyEffect::Deny) => {
                    debug!("Denied by rule ({}, {}, {})", rule.subject, rule.object, rule.action);
                    return Ok(Decision::deny(Some(rule.clone())));
                }
                (EffectMode::AllowOverride, PolicyEffect::Allow) => {
                    return Ok(Decision::allow(rule.clone()))
                }
                (EffectMode::DenyOverride, PolicyEffect::Allow) => {
                    allowed_by.get_or_insert(rule);
                }
                (EffectMode::AllowOverride, PolicyEffect::Deny) => {}
            }
        }

        Ok(match allowed_by {
            Some(rule) => Decision::allow(rule.clone()),
            None => Decision::deny(None),
        })
    }

    // ========================================================================
    // Policy management
    // ========================================================================

    /// Add a policy rule. Returns false if it already exists.
    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool> {
        self.validate_rule(&rule)?;

        let mut policies = self.policies.write().await;
        if policies.contains(&rule) {
            return Ok(false);
        }

        info!(
            "Adding policy: ({}, {}, {}) {:?}",
            rule.subject, rule.object, rule.action, rule.effect
        );
        policies.insert(rule);
        self.invalidate_cache();
        Ok(true)
    }

    /// Add several policy rules.
    ///
    /// Nothing is added if any rule already exists or appears twice.
    pub async fn add_policies(&self, rules: Vec<PolicyRule>) -> Result<bool> {
        for rule in &rules {
            self.validate_rule(rule)?;
        }

        let mut policies = self.policies.write().await;
        for (index, rule) in rules.iter().enumerate() {
            if policies.contains(rule) || rules[..index].contains(rule) {
                return Ok(false);
            }
        }

        let added = rules.len();
        for rule in rules {
            policies.insert(rule);
        }
        info!("Added {} policies ({} total)", added, policies.len());
        self.invalidate_cache();
        Ok(true)
    }

    fn validate_rule(&self, rule: &PolicyRule) -> Result<()> {
        rule.validate()?;
        self.object_matcher.validate(&rule.object)?;
        if let Some(domain) = &rule.domain {
            self.roles.domain_matcher().validate(domain)?;
        }
        Ok(())
    }

    /// Remove a policy rule. Returns false if it did not exist.
    pub async fn remove_policy(&self, rule: &PolicyRule) -> bool {
        let removed = self.policies.write().await.remove(rule);
        if removed {
            info!(
                "Removed policy: ({}, {}, {})",
                rule.subject, rule.object, rule.action
            );
            self.invalidate_cache();
        }
        removed
    }

    /// Remove several policy rules.
    ///
    /// Nothing is removed if any rule does not exist.
    pub async fn remove_policies(&self, rules: &[PolicyRule]) -> bool {
        let mut policies = self.policies.write().await;
        if !rules.iter().all(|rule| policies.contains(rule)) {
            return false;
        }

        for rule in rules {
            policies.remove(rule);
        }
        info!("Removed {} policies", rules.len());
        self.invalidate_cache();
        true
    }

    /// Returns true if the policy rule exists
    pub async fn has_policy(&self, rule: &PolicyRule) -> bool {
        self.policies.read().await.contains(rule)
    }

    /// Every policy rule, in evaluation order
    pub async fn get_policy(&self) -> Vec<PolicyRule> {
        self.policies.read().await.rules.clone()
    }

    /// Remove every policy rule and every role link
    pub async fn clear_policy(&self) {
        self.policies.write().await.clear();
        self.roles.clear();
        self.resource_roles.clear();
        info!("Cleared all policies and role links");
        self.invalidate_cache();
    }

    // ========================================================================
    // Grouping management
    // ========================================================================

    /// Add a `(user, role)` or `(user, role, domain)` link
    pub async fn add_grouping_policy<S: AsRef<str>>(&self, tuple: &[S]) -> Result<bool> {
        let rule = GroupingRule::from_tuple(tuple)?;
        let added = self.roles.add_link(&rule.child, &rule.parent, &rule.domain);
        if added {
            self.invalidate_cache();
        }
        Ok(added)
    }

    /// Remove a `(user, role)` or `(user, role, domain)` link
    pub async fn remove_grouping_policy<S: AsRef<str>>(&self, tuple: &[S]) -> Result<bool> {
        let rule = GroupingRule::from_tuple(tuple)?;
        let removed = self
            .roles
            .delete_link(&rule.child, &rule.parent, &rule.domain);
        if removed {
            self.invalidate_cache();
        }
        Ok(removed)
    }

    /// Add an `(object, object_group)` link
    pub async fn add_resource_grouping_policy(&self, object: &str, group: &str) -> Result<bool> {
        let rule = GroupingRule::from_tuple(&[object, group])?;
        let added = self.resource_roles.add_link(&rule.child, &rule.parent, "");
        if added {
            self.invalidate_cache();
        }
        Ok(added)
    }

    /// Remove an `(object, object_group)` link
    pub async fn remove_resource_grouping_policy(&self, object: &str, group: &str) -> bool {
        let removed = self.resource_roles.delete_link(object, group, "");
        if removed {
            self.invalidate_cache();
        }
        removed
    }

    /// Replace every subject role link
    pub async fn build_role_links<I, T, S>(&self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[S]>,
        S: AsRef<str>,
    {
        self.roles.build_role_links(rules)?;
        self.invalidate_cache();
        Ok(())
    }

    /// Replace every resource role link
    pub async fn build_resource_role_links<I, T, S>(&self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[S]>,
        S: AsRef<str>,
    {
        self.resource_roles.build_role_links(rules)?;
        self.invalidate_cache();
        Ok(())
    }

    // ========================================================================
    // Role queries
    // ========================================================================

    /// Direct roles of a user
    pub fn get_roles_for_user(&self, user: &str, domain: &str) -> Vec<String> {
        self.roles.get_roles(user, domain)
    }

    /// Direct members of a role
    pub fn get_users_for_role(&self, role: &str, domain: &str) -> Vec<String> {
        self.roles.get_users(role, domain)
    }

    /// Every role a user inherits, directly or transitively
    pub fn get_implicit_roles_for_user(&self, user: &str, domain: &str) -> Vec<String> {
        self.roles.get_implicit_roles(user, domain)
    }

    /// Returns true if `role` is a direct role of `user`
    pub fn has_role_for_user(&self, user: &str, role: &str, domain: &str) -> bool {
        self.get_roles_for_user(user, domain)
            .iter()
            .any(|r| r == role)
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Drop every cached decision
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate();
        }
    }

    /// Decision cache statistics, `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RbacError;

    fn enforcer() -> Enforcer {
        Enforcer::new(EnforcerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_enforce_direct_and_inherited() {
        let e = enforcer();
        e.add_policy(PolicyRule::new("alice", "data1", "read")).await.unwrap();
        e.add_policy(PolicyRule::new("data2_admin", "data2", "write")).await.unwrap();
        e.add_grouping_policy(&["bob", "data2_admin"]).await.unwrap();

        assert!(e.enforce(&EnforceRequest::new("alice", "data1", "read")).await.unwrap());
        assert!(!e.enforce(&EnforceRequest::new("alice", "data1", "write")).await.unwrap());
        assert!(e.enforce(&EnforceRequest::new("bob", "data2", "write")).await.unwrap());
        assert!(!e.enforce(&EnforceRequest::new("bob", "data1", "read")).await.unwrap());
    }

    #[tokio::test]
    async fn test_enforce_ex_explains() {
        let e = enforcer();
        let rule = PolicyRule::new("admin", "data1", "*");
        e.add_policy(rule.clone()).await.unwrap();
        e.add_grouping_policy(&["alice", "admin"]).await.unwrap();

        let decision = e
            .enforce_ex(&EnforceRequest::new("alice", "data1", "delete"))
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.explain, Some(rule));

        let decision = e
            .enforce_ex(&EnforceRequest::new("carol", "data1", "delete"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::deny(None));
    }

    #[tokio::test]
    async fn test_add_policy_duplicate_and_invalid() {
        let e = enforcer();
        let rule = PolicyRule::new("alice", "data1", "read");

        assert!(e.add_policy(rule.clone()).await.unwrap());
        assert!(!e.add_policy(rule.clone()).await.unwrap());
        assert!(e.has_policy(&rule).await);

        let result = e.add_policy(PolicyRule::new("", "data1", "read")).await;
        assert!(matches!(result, Err(RbacError::Config(_))));
    }

    #[tokio::test]
    async fn test_add_policy_rejects_bad_pattern() {
        let config = EnforcerConfig {
            object_matcher: crate::config::MatcherKind::Regex,
            ..Default::default()
        };
        let e = Enforcer::new(config).unwrap();

        let result = e.add_policy(PolicyRule::new("alice", "data(", "read")).await;
        assert!(matches!(result, Err(RbacError::InvalidPattern(_))));
        assert!(e.get_policy().await.is_empty());

        e.add_policy(PolicyRule::new("alice", "data[0-9]+", "read")).await.unwrap();
        assert!(e.enforce(&EnforceRequest::new("alice", "data7", "read")).await.unwrap());
        assert!(!e.enforce(&EnforceRequest::new("alice", "datax", "read")).await.unwrap());
    }

    #[tokio::test]
    async fn test_policy_order_by_priority() {
        let e = enforcer();
        e.add_policy(PolicyRule::new("a", "o", "r").with_priority(10)).await.unwrap();
        e.add_policy(PolicyRule::new("b", "o", "r").with_priority(1)).await.unwrap();
        e.add_policy(PolicyRule::new("c", "o", "r").with_priority(10)).await.unwrap();

        let subjects: Vec<String> = e
            .get_policy()
            .await
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_has_role_for_user() {
        let e = enforcer();
        e.build_role_links(&[vec!["alice", "editor"], vec!["editor", "viewer"]])
            .await
            .unwrap();

        assert!(e.has_role_for_user("alice", "editor", ""));
        assert!(!e.has_role_for_user("alice", "viewer", ""));
        assert_eq!(e.get_implicit_roles_for_user("alice", ""), vec!["editor", "viewer"]);
        assert_eq!(e.get_users_for_role("editor", ""), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let config = EnforcerConfig {
            enable_cache: false,
            ..Default::default()
        };
        let e = Enforcer::new(config).unwrap();
        e.add_policy(PolicyRule::new("alice", "data1", "read")).await.unwrap();

        assert!(e.enforce(&EnforceRequest::new("alice", "data1", "read")).await.unwrap());
        assert!(e.cache_stats().is_none());
    }

    #[tokio::test]
    async fn test_rule_domains_follow_installed_domain_matcher() {
        let e = enforcer();
        e.add_policy(PolicyRule::new("admin", "data1", "read").with_domain("tenant*"))
            .await
            .unwrap();
        e.add_grouping_policy(&["alice", "admin", "tenant1"]).await.unwrap();

        let request = EnforceRequest::new("alice", "data1", "read").with_domain("tenant1");
        assert!(!e.enforce(&request).await.unwrap());

        e.role_manager()
            .set_domain_matcher(crate::config::MatcherKind::KeyMatch.into());
        e.invalidate_cache();

        assert!(e.enforce(&request).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_policy_keeps_order() {
        let e = enforcer();
        let rules = vec![
            PolicyRule::new("a", "o", "r").with_priority(5),
            PolicyRule::new("b", "o", "r").with_priority(1),
            PolicyRule::new("c", "o", "r").with_priority(5),
            PolicyRule::new("d", "o", "r").with_priority(5),
        ];
        assert!(e.add_policies(rules.clone()).await.unwrap());

        assert!(e.remove_policy(&rules[2]).await);
        assert!(!e.remove_policy(&rules[2]).await);
        assert!(!e.has_policy(&rules[2]).await);
        assert!(e.has_policy(&rules[3]).await);

        let subjects: Vec<String> = e
            .get_policy()
            .await
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["b", "a", "d"]);

        // Same rule at another priority is a different rule
        assert!(!e.has_policy(&PolicyRule::new("a", "o", "r").with_priority(1)).await);
        assert!(e.add_policy(rules[2].clone()).await.unwrap());
        assert_eq!(e.get_policy().await.len(), 4);
    }
}
