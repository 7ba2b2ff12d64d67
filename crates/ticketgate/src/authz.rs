//! Path-based authorization rules
//!
//! A request `(path, method, principal)` is allowed when some rule lists one
//! of the path's ancestors (most specific first), lists the method, and names
//! the principal by username, group, role or client id. A rule is skipped
//! entirely when the path contains one of its `deny_path_substrings`.
//!
//! ```text
//! /devices/123/config  →  /devices/123/config, /devices/123, /devices
//! ```
//!
//! With `enabled = false` every request is allowed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::Principal;
use crate::error::{AuthError, Result};

/// One authorization rule as configured
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Path prefixes the rule covers
    #[serde(default)]
    pub paths: Vec<String>,
    /// HTTP methods the rule covers
    #[serde(default)]
    pub methods: Vec<String>,
    /// Usernames granted access
    #[serde(default)]
    pub users: Vec<String>,
    /// Groups granted access
    #[serde(default)]
    pub groups: Vec<String>,
    /// Roles granted access
    #[serde(default)]
    pub roles: Vec<String>,
    /// Client ids granted access
    #[serde(default)]
    pub clients: Vec<String>,
    /// Any of these occurring in the request path vetoes the rule
    #[serde(default)]
    pub deny_path_substrings: Vec<String>,
}

/// Authorization configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzConfig {
    /// Global switch; `false` allows everything
    #[serde(default)]
    pub enabled: bool,
    /// Rules, evaluated in order
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl AuthzConfig {
    /// Check every rule
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRule`] for a rule without paths or methods, without
    /// any of users/groups/roles/clients, or with empty entries.
    pub fn validate(&self) -> Result<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            CompiledRule::compile(index, rule)?;
        }
        Ok(())
    }
}

/// Validated, immutable rule set
#[derive(Debug, Clone)]
pub struct Authorizer {
    enabled: bool,
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    paths: HashSet<String>,
    methods: HashSet<String>,
    users: HashSet<String>,
    groups: HashSet<String>,
    roles: HashSet<String>,
    clients: HashSet<String>,
    deny_path_substrings: Vec<String>,
}

impl CompiledRule {
    fn compile(index: usize, rule: &Rule) -> Result<Self> {
        let invalid = |reason: &str| AuthError::InvalidRule {
            index,
            reason: reason.to_string(),
        };

        if rule.paths.is_empty() {
            return Err(invalid("at least one path is required"));
        }
        if rule.methods.is_empty() {
            return Err(invalid("at least one method is required"));
        }
        if rule.users.is_empty()
            && rule.groups.is_empty()
            && rule.roles.is_empty()
            && rule.clients.is_empty()
        {
            return Err(invalid(
                "at least one of users, groups, roles or clients is required",
            ));
        }

        let mut paths = HashSet::with_capacity(rule.paths.len());
        for path in &rule.paths {
            let normalized = normalize_path(path);
            if normalized.is_empty() {
                return Err(invalid(&format!("path '{path}' names no segment")));
            }
            paths.insert(normalized);
        }

        let mut methods = HashSet::with_capacity(rule.methods.len());
        for method in &rule.methods {
            let method = method.trim();
            if method.is_empty() {
                return Err(invalid("empty method"));
            }
            methods.insert(method.to_ascii_uppercase());
        }

        let identities = |field: &str, values: &[String]| -> Result<HashSet<String>> {
            if values.iter().any(|v| v.is_empty()) {
                return Err(invalid(&format!("empty entry in {field}")));
            }
            Ok(values.iter().cloned().collect())
        };

        if rule.deny_path_substrings.iter().any(String::is_empty) {
            return Err(invalid("empty entry in deny_path_substrings"));
        }

        Ok(Self {
            paths,
            methods,
            users: identities("users", &rule.users)?,
            groups: identities("groups", &rule.groups)?,
            roles: identities("roles", &rule.roles)?,
            clients: identities("clients", &rule.clients)?,
            deny_path_substrings: rule.deny_path_substrings.clone(),
        })
    }

    fn vetoes(&self, path: &str) -> bool {
        self.deny_path_substrings
            .iter()
            .any(|substring| path.contains(substring.as_str()))
    }

    fn names(&self, principal: &Principal) -> bool {
        (!principal.username.is_empty() && self.users.contains(&principal.username))
            || principal.groups.iter().any(|group| self.groups.contains(group))
            || principal.roles.iter().any(|role| self.roles.contains(role))
            || (!principal.client_id.is_empty() && self.clients.contains(&principal.client_id))
    }
}

impl Authorizer {
    /// Validate `config` and build the rule set
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRule`] for the first invalid rule.
    pub fn new(config: &AuthzConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| CompiledRule::compile(index, rule))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            rules,
        })
    }

    /// An authorizer that allows everything
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rules: Vec::new(),
        }
    }

    /// Whether rules are enforced
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether `principal` may call `method` on `path`
    #[must_use]
    pub fn authorized(&self, path: &str, method: &str, principal: &Principal) -> bool {
        if !self.enabled {
            return true;
        }

        let method = method.to_ascii_uppercase();
        let prefixes = path_prefixes(path);

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.vetoes(path) {
                continue;
            }
            if !rule.methods.contains(&method) || !rule.names(principal) {
                continue;
            }
            if let Some(prefix) = prefixes.iter().find(|prefix| rule.paths.contains(*prefix)) {
                debug!(rule = index, prefix = %prefix, method = %method, "Request allowed");
                return true;
            }
        }

        debug!(path, method = %method, principal = %principal, "No rule allows request");
        false
    }

    /// Like [`authorized`](Self::authorized) but returns an error describing the refusal
    ///
    /// # Errors
    ///
    /// [`AuthError::AccessDenied`] naming the principal, method and path.
    pub fn check(&self, path: &str, method: &str, principal: &Principal) -> Result<()> {
        if self.authorized(path, method, principal) {
            Ok(())
        } else {
            Err(AuthError::AccessDenied {
                principal: principal.to_string(),
                method: method.to_ascii_uppercase(),
                path: path.to_string(),
            })
        }
    }
}

/// Every non-empty ancestor of `path`, most specific first
///
/// `/a/b/c` yields `["/a/b/c", "/a/b", "/a"]`. Empty segments (doubled or
/// trailing slashes) are ignored.
#[must_use]
pub fn path_prefixes(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    (1..=segments.len())
        .rev()
        .map(|len| format!("/{}", segments[..len].join("/")))
        .collect()
}

fn normalize_path(path: &str) -> String {
    path_prefixes(path).into_iter().next().unwrap_or_default()
}
