//! # CretoAI RBAC
//!
//! Role hierarchy resolution and enforcement-decision caching.
//!
//! ## Features
//!
//! - **Role graph** with per-domain inheritance, cycle-safe traversal and a
//!   configurable depth limit
//! - **Lazy pattern links**: wildcard role names and domains (`org*`,
//!   `/book/:id`) are resolved at query time, never expanded
//! - **Atomic rebuilds**: a malformed policy source leaves the last good
//!   hierarchy in place
//! - **Decision cache** with BLAKE3 fingerprints, LRU eviction, optional TTL
//!   and single-flight computation
//! - **Async enforcer** combining both, invalidating the cache on every mutation
//!
//! ## Example
//!
//! ```rust
//! use cretoai_rbac::{Enforcer, EnforcerConfig, EnforceRequest, PolicyRule};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let enforcer = Enforcer::new(EnforcerConfig::default())?;
//!
//!     enforcer
//!         .add_policy(PolicyRule::new("data_admin", "data1", "read").with_domain("tenant1"))
//!         .await?;
//!     enforcer
//!         .add_grouping_policy(&["alice", "data_admin", "tenant1"])
//!         .await?;
//!
//!     let request = EnforceRequest::new("alice", "data1", "read").with_domain("tenant1");
//!     assert!(enforcer.enforce(&request).await?);
//!
//!     let request = EnforceRequest::new("alice", "data1", "read").with_domain("tenant2");
//!     assert!(!enforcer.enforce(&request).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod matcher;
pub mod role_graph;
pub mod role_manager;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheStats, DecisionCache, Fingerprint};
pub use config::{CacheConfig, EffectMode, EnforcerConfig, MatcherKind, RoleManagerConfig};
pub use enforcer::{Enforcer, MatchContext, RbacRuleMatcher, RuleMatcher};
pub use error::{RbacError, Result};
pub use matcher::{
    ExactMatcher, GlobMatcher, KeyMatch2Matcher, KeyMatcher, MatchStrategy, Matcher, RegexMatcher,
};
pub use role_graph::RoleGraph;
pub use role_manager::RoleManager;
pub use types::{Decision, EnforceRequest, GroupingRule, PolicyEffect, PolicyRule, Role};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
