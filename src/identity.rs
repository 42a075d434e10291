//! Caller principal attached to a [`Context`](crate::context::Context).
//!
//! An [`Identity`] is frozen at construction: fields are private, accessors
//! hand out shared references, and the record is shared as `Arc<Identity>`
//! across child contexts so every hop in a call chain observes the same
//! principal.

use serde_json::Value;

use crate::types::JsonMap;

/// Immutable caller principal.
///
/// # Examples
///
/// ```rust
/// use apcore::identity::Identity;
///
/// let identity = Identity::new("alice")
///     .with_kind("service")
///     .with_roles(["ops", "deployer"])
///     .with_attr("team", serde_json::json!("platform"));
///
/// assert_eq!(identity.id(), "alice");
/// assert_eq!(identity.kind(), "service");
/// assert!(identity.has_role("ops"));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    id: String,
    kind: String,
    roles: Vec<String>,
    attrs: JsonMap,
}

impl Identity {
    /// Default principal type assigned when none is given.
    pub const DEFAULT_KIND: &'static str = "user";

    /// Create an identity with the default `"user"` kind and no roles.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: Self::DEFAULT_KIND.to_string(),
            roles: Vec::new(),
            attrs: JsonMap::new(),
        }
    }

    /// Set the principal type (`"user"`, `"service"`, ...).
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Replace the role list, preserving order.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a single attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Replace the whole attribute mapping.
    #[must_use]
    pub fn with_attrs(mut self, attrs: JsonMap) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn attrs(&self) -> &JsonMap {
        &self.attrs
    }

    /// Whether the role list contains `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// JSON form used inside the context encoding.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.kind,
            "roles": self.roles,
            "attrs": self.attrs,
        })
    }

    /// Rebuild from the context JSON encoding. Missing `roles`/`attrs`
    /// default to empty; a missing `type` defaults to `"user"`.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = obj.get("id")?.as_str()?.to_string();
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(Self::DEFAULT_KIND)
            .to_string();
        let roles = obj
            .get("roles")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let attrs = obj
            .get("attrs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            id,
            kind,
            roles,
            attrs,
        })
    }
}
