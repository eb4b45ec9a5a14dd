//! Signing of JWT composite results.
//!
//! Functions in the exposed schema that return the configured JWT type
//! (`<schema>.jwt_token` by default) hand back a row of claims. Before the
//! response leaves the gateway each such row is replaced by an HS256 token
//! signed with the gateway secret, so clients obtain tokens through ordinary
//! mutations.

use crate::domain::EngineError;
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Where JWT rows appear in a GraphQL response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JwtTargets {
    /// Response field names of functions returning the JWT type
    fields: BTreeSet<String>,
    /// Reflected GraphQL names of the JWT type, matched against `__typename`
    type_names: BTreeSet<String>,
    /// Reflected field name → composite attribute name
    attributes: BTreeMap<String, String>,
}

impl JwtTargets {
    /// Build targets from catalog names. Both the raw and the camel-cased
    /// reflections are recognized, so either inflection setting works.
    pub fn new<F, A>(type_name: &str, functions: F, attributes: A) -> Self
    where
        F: IntoIterator<Item = String>,
        A: IntoIterator<Item = String>,
    {
        let fields = functions
            .into_iter()
            .flat_map(|f| [camel_case(&f, false), f])
            .collect();
        let type_names = [type_name.to_string(), camel_case(type_name, true)]
            .into_iter()
            .collect();
        let attributes = attributes
            .into_iter()
            .flat_map(|a| [(camel_case(&a, false), a.clone()), (a.clone(), a)])
            .collect();

        Self {
            fields,
            type_names,
            attributes,
        }
    }

    fn matches(&self, field: &str, value: &Map<String, Value>) -> bool {
        self.fields.contains(field)
            || value
                .get("__typename")
                .and_then(Value::as_str)
                .is_some_and(|t| self.type_names.contains(t))
    }

    /// Claims for one JWT row, keyed by attribute name
    fn claims(&self, row: &Map<String, Value>) -> Map<String, Value> {
        row.iter()
            .filter(|(k, v)| k.as_str() != "__typename" && !v.is_null())
            .map(|(k, v)| {
                let name = self.attributes.get(k).cloned().unwrap_or_else(|| k.clone());
                (name, v.clone())
            })
            .collect()
    }
}

/// `snake_case` → `camelCase` (or `PascalCase` when `upper`)
pub fn camel_case(name: &str, upper: bool) -> String {
    let mut out = String::with_capacity(name.len());
    let mut capitalize = upper;
    for c in name.chars() {
        if c == '_' {
            capitalize = !out.is_empty() || upper;
            continue;
        }
        if capitalize {
            out.extend(c.to_uppercase());
            capitalize = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// HS256 signer for JWT rows
pub struct JwtSigner {
    key: EncodingKey,
    audience: Option<String>,
}

impl JwtSigner {
    pub fn new(secret: &SecretString, audience: Option<&str>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
            audience: audience.map(str::to_string),
        }
    }

    /// Sign a claims object, adding the configured audience unless present
    pub fn sign(&self, mut claims: Map<String, Value>) -> Result<String, EngineError> {
        if let Some(aud) = &self.audience {
            claims
                .entry("aud")
                .or_insert_with(|| Value::String(aud.clone()));
        }
        encode(&Header::default(), &claims, &self.key)
            .map_err(|e| EngineError::Signing(e.to_string()))
    }

    /// Replace every JWT row under `data` with its signed token. Returns the
    /// number of tokens issued.
    pub fn sign_response(
        &self,
        response: &mut Value,
        targets: &JwtTargets,
    ) -> Result<usize, EngineError> {
        let mut issued = 0;
        if let Some(data) = response.get_mut("data") {
            self.sign_in(data, targets, &mut issued)?;
        }
        Ok(issued)
    }

    fn sign_in(
        &self,
        value: &mut Value,
        targets: &JwtTargets,
        issued: &mut usize,
    ) -> Result<(), EngineError> {
        match value {
            Value::Object(map) => {
                for (field, child) in map.iter_mut() {
                    let claims = match &*child {
                        Value::Object(row) if targets.matches(field, row) => targets.claims(row),
                        _ => {
                            self.sign_in(child, targets, issued)?;
                            continue;
                        }
                    };
                    *child = Value::String(self.sign(claims)?);
                    *issued += 1;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.sign_in(item, targets, issued)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
