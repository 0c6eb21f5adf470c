//! Configuration for role managers, the decision cache and the enforcer
//!
//! Every section deserializes from partial documents (`#[serde(default)]`) so a
//! deployment only spells out what it changes. [`EnforcerConfig::from_env`]
//! reads the usual overrides:
//!
//! - `RBAC_ENABLE_CACHE` - enable the decision cache (default: true)
//! - `RBAC_CACHE_SIZE` - LRU capacity (default: 10000)
//! - `RBAC_CACHE_TTL_SECS` - entry time-to-live in seconds (default: none)
//! - `RBAC_MAX_HIERARCHY_LEVEL` - maximum role inheritance depth (default: 10)

use crate::error::{RbacError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum role inheritance depth
pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// Default decision cache capacity
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Serializable name of a built-in matching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    /// Plain equality, no patterns
    #[default]
    Exact,
    /// `*` suffix wildcard
    KeyMatch,
    /// `/*` and `:param` path wildcards
    KeyMatch2,
    /// `*` and `?` anywhere
    Glob,
    /// Anchored regular expressions
    Regex,
}

/// Role manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleManagerConfig {
    /// Maximum number of inheritance hops followed by a query
    pub max_hierarchy_level: usize,

    /// Strategy for role-name patterns
    pub name_matcher: MatcherKind,

    /// Strategy for domain patterns
    pub domain_matcher: MatcherKind,
}

impl Default for RoleManagerConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_level: DEFAULT_MAX_HIERARCHY_LEVEL,
            name_matcher: MatcherKind::Exact,
            domain_matcher: MatcherKind::Exact,
        }
    }
}

impl RoleManagerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_hierarchy_level == 0 {
            return Err(RbacError::Config(
                "max_hierarchy_level must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decision cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Optional time-to-live for cached decisions, in seconds
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl_secs: None,
        }
    }
}

impl CacheConfig {
    /// Cache with the given capacity and no TTL
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Time-to-live for cached decisions
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// How the outcomes of individual matching rules combine into one decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMode {
    /// Allowed if any matching rule allows
    #[default]
    AllowOverride,
    /// Allowed if any matching rule allows and none denies
    DenyOverride,
    /// The matching rule with the lowest priority value decides
    Priority,
}

/// Enforcer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    /// Enable the decision cache
    pub enable_cache: bool,

    /// Decision cache configuration
    pub cache: CacheConfig,

    /// Subject role hierarchy
    pub roles: RoleManagerConfig,

    /// Object (resource) role hierarchy
    pub resource_roles: RoleManagerConfig,

    /// Strategy for object patterns in policy rules
    pub object_matcher: MatcherKind,

    /// Effect combination
    pub effect: EffectMode,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache: CacheConfig::default(),
            roles: RoleManagerConfig::default(),
            resource_roles: RoleManagerConfig::default(),
            object_matcher: MatcherKind::Exact,
            effect: EffectMode::AllowOverride,
        }
    }
}

impl EnforcerConfig {
    /// Load defaults overridden by `RBAC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load defaults overridden by values from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = parse_var::<bool>(&lookup, "RBAC_ENABLE_CACHE")? {
            config.enable_cache = value;
        }
        if let Some(value) = parse_var::<usize>(&lookup, "RBAC_CACHE_SIZE")? {
            config.cache.capacity = value;
        }
        if let Some(value) = parse_var::<u64>(&lookup, "RBAC_CACHE_TTL_SECS")? {
            config.cache.ttl_secs = Some(value);
        }
        if let Some(value) = parse_var::<usize>(&lookup, "RBAC_MAX_HIERARCHY_LEVEL")? {
            config.roles.max_hierarchy_level = value;
            config.resource_roles.max_hierarchy_level = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RbacError::Config(format!("invalid enforcer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.enable_cache && self.cache.capacity == 0 {
            return Err(RbacError::Capacity(self.cache.capacity));
        }
        self.roles.validate()?;
        self.resource_roles.validate()
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| RbacError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EnforcerConfig::default();
        assert!(config.enable_cache);
        assert_eq!(config.cache.capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.cache.ttl(), None);
        assert_eq!(config.roles.max_hierarchy_level, DEFAULT_MAX_HIERARCHY_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EnforcerConfig::from_lookup(lookup_from(&[
            ("RBAC_CACHE_SIZE", "256"),
            ("RBAC_CACHE_TTL_SECS", "30"),
            ("RBAC_MAX_HIERARCHY_LEVEL", "4"),
        ]))
        .unwrap();

        assert_eq!(config.cache.capacity, 256);
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.roles.max_hierarchy_level, 4);
        assert_eq!(config.resource_roles.max_hierarchy_level, 4);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = EnforcerConfig::from_lookup(lookup_from(&[("RBAC_CACHE_SIZE", "lots")]));
        assert!(matches!(result, Err(RbacError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = EnforcerConfig::from_lookup(lookup_from(&[("RBAC_CACHE_SIZE", "0")]));
        assert_eq!(result.unwrap_err(), RbacError::Capacity(0));

        // A disabled cache does not care about capacity
        let config = EnforcerConfig::from_lookup(lookup_from(&[
            ("RBAC_CACHE_SIZE", "0"),
            ("RBAC_ENABLE_CACHE", "false"),
        ]));
        assert!(config.is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = EnforcerConfig::from_json(
            r#"{
                "effect": "deny_override",
                "roles": { "domain_matcher": "key_match" },
                "cache": { "capacity": 64 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.effect, EffectMode::DenyOverride);
        assert_eq!(config.roles.domain_matcher, MatcherKind::KeyMatch);
        assert_eq!(config.roles.name_matcher, MatcherKind::Exact);
        assert_eq!(config.roles.max_hierarchy_level, DEFAULT_MAX_HIERARCHY_LEVEL);
        assert_eq!(config.cache.capacity, 64);
    }
}
