//! Access-control seam and the bundled pattern rule engine.
//!
//! The executor consults the configured [`AclEngine`] after registry lookup
//! and *before* the approval gate, so unauthorized callers never reach an
//! approval handler. The rule engine itself is pluggable; [`PatternAcl`]
//! covers the common first-match-wins case over module-id patterns.

use async_trait::async_trait;

use crate::identity::Identity;
use crate::pattern::match_pattern;
use crate::types::JsonMap;

/// Outcome of an ACL check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclDecision {
    allowed: bool,
    reason: Option<String>,
}

impl AclDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Identity × module permission check.
#[async_trait]
pub trait AclEngine: Send + Sync {
    async fn check(
        &self,
        identity: Option<&Identity>,
        module_id: &str,
        inputs: &JsonMap,
    ) -> AclDecision;
}

/// Whether a matched rule allows or denies the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclEffect {
    Allow,
    Deny,
}

/// One pattern rule. `roles: None` matches any caller (including anonymous);
/// otherwise the identity must hold at least one listed role.
#[derive(Clone, Debug)]
pub struct AclRule {
    pattern: String,
    effect: AclEffect,
    roles: Option<Vec<String>>,
}

impl AclRule {
    pub fn allow(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            effect: AclEffect::Allow,
            roles: None,
        }
    }

    pub fn deny(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            effect: AclEffect::Deny,
            roles: None,
        }
    }

    /// Restrict the rule to identities holding at least one of `roles`.
    #[must_use]
    pub fn for_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    fn matches(&self, identity: Option<&Identity>, module_id: &str) -> bool {
        if !match_pattern(&self.pattern, module_id) {
            return false;
        }
        match &self.roles {
            None => true,
            Some(roles) => identity
                .map(|i| roles.iter().any(|role| i.has_role(role)))
                .unwrap_or(false),
        }
    }
}

/// First-match-wins rule engine over wildcard module-id patterns.
///
/// # Examples
///
/// ```rust
/// use apcore::acl::{AclRule, PatternAcl};
///
/// let acl = PatternAcl::new(vec![
///     AclRule::deny("admin.*"),
///     AclRule::allow("admin.*").for_roles(["admin"]),
///     AclRule::allow("*"),
/// ]);
/// ```
pub struct PatternAcl {
    rules: Vec<AclRule>,
    default_effect: AclEffect,
}

impl PatternAcl {
    /// Build an engine that allows by default when no rule matches.
    #[must_use]
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self {
            rules,
            default_effect: AclEffect::Allow,
        }
    }

    /// Deny calls no rule matches.
    #[must_use]
    pub fn deny_by_default(mut self) -> Self {
        self.default_effect = AclEffect::Deny;
        self
    }
}

#[async_trait]
impl AclEngine for PatternAcl {
    async fn check(
        &self,
        identity: Option<&Identity>,
        module_id: &str,
        _inputs: &JsonMap,
    ) -> AclDecision {
        let effect = self
            .rules
            .iter()
            .find(|rule| rule.matches(identity, module_id))
            .map(|rule| rule.effect)
            .unwrap_or(self.default_effect);
        match effect {
            AclEffect::Allow => AclDecision::allow(),
            AclEffect::Deny => AclDecision::deny(format!("module {module_id} is not permitted")),
        }
    }
}
