//! Core role and policy types

use crate::error::{RbacError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A named subject scoped by a domain.
///
/// Roles are value-identified: two roles with the same name and domain are the
/// same entity. Deployments without tenants use the empty domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Role {
    /// Role or user name (e.g., "alice", "data_admin")
    pub name: String,

    /// Isolation scope, empty when domains are not used
    #[serde(default)]
    pub domain: String,
}

impl Role {
    /// Create a role inside a domain
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Create a role in the default (empty) domain
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}::{}", self.domain, self.name)
        }
    }
}

/// A single "inherits from" link between two roles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    /// Role that inherits
    pub child: String,

    /// Role inherited from
    pub parent: String,

    /// Domain the link applies to
    #[serde(default)]
    pub domain: String,
}

impl GroupingRule {
    /// Create a grouping rule
    pub fn new(
        child: impl Into<String>,
        parent: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
            domain: domain.into(),
        }
    }

    /// Parse a `(child, parent)` or `(child, parent, domain)` tuple.
    ///
    /// # Errors
    ///
    /// Returns [`RbacError::Config`] for any other arity or an empty field.
    pub fn from_tuple<S: AsRef<str>>(tuple: &[S]) -> Result<Self> {
        let fields: Vec<&str> = tuple.iter().map(|f| f.as_ref()).collect();

        let rule = match fields.as_slice() {
            [child, parent] => Self::new(*child, *parent, ""),
            [child, parent, domain] => {
                if domain.is_empty() {
                    return Err(RbacError::Config(format!(
                        "grouping rule {:?} has an empty domain",
                        fields
                    )));
                }
                Self::new(*child, *parent, *domain)
            }
            _ => {
                return Err(RbacError::Config(format!(
                    "grouping rule {:?} has {} fields, expected 2 or 3",
                    fields,
                    fields.len()
                )))
            }
        };

        if rule.child.is_empty() || rule.parent.is_empty() {
            return Err(RbacError::Config(format!(
                "grouping rule {:?} has an empty role name",
                fields
            )));
        }

        Ok(rule)
    }

    /// Parse a whole policy source, failing on the first malformed tuple
    pub fn parse_all<I, T, S>(rules: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[S]>,
        S: AsRef<str>,
    {
        rules
            .into_iter()
            .enumerate()
            .map(|(index, tuple)| {
                Self::from_tuple(tuple.as_ref()).map_err(|e| match e {
                    RbacError::Config(msg) => RbacError::Config(format!("rule #{}: {}", index, msg)),
                    other => other,
                })
            })
            .collect()
    }
}

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyEffect {
    /// Allow the action
    Allow,
    /// Deny the action
    Deny,
}

impl Default for PolicyEffect {
    fn default() -> Self {
        PolicyEffect::Allow
    }
}

/// Permission rule evaluated by the enforcer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Subject or role the rule grants to (e.g., "data_admin")
    pub subject: String,

    /// Object or object pattern (e.g., "data1", "/books/*")
    pub object: String,

    /// Action name, `*` for any
    pub action: String,

    /// Domain the rule is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Effect when the rule matches
    #[serde(default)]
    pub effect: PolicyEffect,

    /// Lower values win under priority effect mode
    #[serde(default)]
    pub priority: i32,
}

impl PolicyRule {
    /// Create an allow rule without a domain
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
            domain: None,
            effect: PolicyEffect::Allow,
            priority: 0,
        }
    }

    /// Scope the rule to a domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the rule effect
    pub fn with_effect(mut self, effect: PolicyEffect) -> Self {
        self.effect = effect;
        self
    }

    /// Set the rule priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Validate the rule definition
    pub fn validate(&self) -> Result<()> {
        if self.subject.is_empty() || self.object.is_empty() || self.action.is_empty() {
            return Err(RbacError::Config(format!(
                "policy rule ({}, {}, {}) has an empty field",
                self.subject, self.object, self.action
            )));
        }

        if matches!(&self.domain, Some(d) if d.is_empty()) {
            return Err(RbacError::Config(format!(
                "policy rule ({}, {}, {}) has an empty domain",
                self.subject, self.object, self.action
            )));
        }

        Ok(())
    }
}

/// Fully bound enforcement request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforceRequest {
    /// Who is making the request
    pub subject: String,

    /// What is being accessed
    pub object: String,

    /// What is being done
    pub action: String,

    /// Tenant the request is evaluated in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Extra request context (client IP, time of day, ...)
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl EnforceRequest {
    /// Create a request without domain or context
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
            domain: None,
            context: HashMap::new(),
        }
    }

    /// Evaluate the request inside a domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Domain used for role lookups (empty when unset)
    pub fn role_domain(&self) -> &str {
        self.domain.as_deref().unwrap_or("")
    }
}

/// Enforcement outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Rule that decided the outcome, if any matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<PolicyRule>,
}

impl Decision {
    /// Allow decision explained by a rule
    pub fn allow(rule: PolicyRule) -> Self {
        Self {
            allowed: true,
            explain: Some(rule),
        }
    }

    /// Deny decision, optionally explained by a deny rule
    pub fn deny(rule: Option<PolicyRule>) -> Self {
        Self {
            allowed: false,
            explain: rule,
        }
    }
}
