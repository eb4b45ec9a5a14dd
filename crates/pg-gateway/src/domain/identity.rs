//! Request identity and the claims mapping derived from it.
//!
//! The JWT middleware attaches an [`AuthenticatedUser`] to verified requests.
//! An [`IdentityExtractor`] turns the per-request [`RequestContext`] into a
//! [`ClaimsMapping`], which the engine applies as transaction-local session
//! settings before executing the operation.

use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Setting that carries the requesting user's id
pub const USER_ID_SETTING: &str = "jwt.claims.user_id";

/// Prefix under which verified token claims are exposed to the database
pub const CLAIM_SETTING_PREFIX: &str = "jwt.claims.";

/// Identifier of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User state attached to a request by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: UserId,
    /// Database role requested by the token, if any
    pub role: Option<String>,
}

/// Verified JWT payload attached to a request by the authentication layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims(pub Map<String, Value>);

impl TokenClaims {
    /// The `role` claim, when it is a non-empty string
    pub fn role(&self) -> Option<&str> {
        self.0
            .get("role")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
    }

    /// The user id: `user_id` if present, otherwise `sub`
    pub fn user_id(&self) -> Option<UserId> {
        ["user_id", "sub"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(scalar_to_string)
            .filter(|id| !id.is_empty())
            .map(UserId)
    }

    /// Claims rendered as `jwt.claims.<name>` settings.
    ///
    /// Scalars are stringified; objects and arrays are passed as JSON text;
    /// `null` becomes an explicit absence.
    pub fn to_settings(&self) -> ClaimsMapping {
        let mut mapping = ClaimsMapping::new();
        for (name, value) in &self.0 {
            let rendered = match value {
                Value::Null => None,
                Value::Object(_) | Value::Array(_) => Some(value.to_string()),
                scalar => scalar_to_string(scalar),
            };
            mapping.insert(format!("{}{}", CLAIM_SETTING_PREFIX, name), rendered);
        }
        mapping
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated(UserId),
}

/// Per-request view handed to the settings hook. Borrows everything; the
/// user state is owned by the request's extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub user: Option<&'a AuthenticatedUser>,
    pub token: Option<&'a TokenClaims>,
}

impl<'a> RequestContext<'a> {
    pub fn identity(&self) -> Identity {
        match self.user {
            Some(user) => Identity::Authenticated(user.id.clone()),
            None => Identity::Anonymous,
        }
    }
}

/// Ordered mapping of session setting names to values.
///
/// `None` is an explicit "absent" value; the engine applies it as an empty
/// setting so a pooled connection never carries a previous request's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsMapping(BTreeMap<String, Option<String>>);

impl ClaimsMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0.get(name).map(|v| v.as_deref())
    }

    /// Overlay `other` on top of `self`; entries in `other` win
    pub fn merge(&mut self, other: ClaimsMapping) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for ClaimsMapping {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Per-request settings hook.
///
/// Implementations are invoked concurrently for overlapping requests and must
/// be pure functions of the context.
pub trait IdentityExtractor: Send + Sync {
    fn extract(&self, ctx: &RequestContext<'_>) -> ClaimsMapping;
}

/// Exposes the requesting user's id as `jwt.claims.user_id`
#[derive(Debug, Clone)]
pub struct SessionIdentityExtractor {
    setting: String,
}

impl SessionIdentityExtractor {
    pub fn new() -> Self {
        Self::with_setting(USER_ID_SETTING)
    }

    /// Use a different setting name for the user id
    pub fn with_setting(setting: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
        }
    }
}

impl Default for SessionIdentityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityExtractor for SessionIdentityExtractor {
    fn extract(&self, ctx: &RequestContext<'_>) -> ClaimsMapping {
        let value = match ctx.identity() {
            Identity::Authenticated(id) => Some(id.to_string()),
            Identity::Anonymous => None,
        };
        std::iter::once((self.setting.clone(), value)).collect()
    }
}

/// Returns the same mapping for every request. Single-tenant and test setups
/// only; it ignores who is calling.
#[derive(Debug, Clone, Default)]
pub struct StaticClaimsExtractor {
    claims: ClaimsMapping,
}

impl StaticClaimsExtractor {
    pub fn new(claims: ClaimsMapping) -> Self {
        Self { claims }
    }
}

impl IdentityExtractor for StaticClaimsExtractor {
    fn extract(&self, _ctx: &RequestContext<'_>) -> ClaimsMapping {
        self.claims.clone()
    }
}
