//! Request-scoped values: the caller's identity, headers, the request clock and the
//! cancellation token, plus the typed descriptors permission queries carry until execution.

use crate::error::CompileError;
use crate::settings::RuntimeConfig;
use crate::sql::SqlValue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RequestContext {
    identity: Option<Identity>,
    headers: HashMap<String, String>,
    now: DateTime<Utc>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        RequestContext {
            identity: None,
            headers: HashMap::new(),
            now: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn authenticated(identity: Identity) -> Self {
        RequestContext {
            identity: Some(identity),
            ..Self::anonymous()
        }
    }

    /// Header names are case-insensitive.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A placeholder value whose concrete argument is only known at execution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueDescriptor {
    IdentityId,
    IdentityEmail,
    IsAuthenticated,
    Now,
    Header(String),
    Secret(String),
    StringLiteral(String),
    NumberLiteral(i64),
    /// Expands to one placeholder per record id being authorized.
    RecordIds,
}

impl ValueDescriptor {
    /// Parse a `ctx.*` identifier path.
    pub fn from_context_path(path: &[String]) -> Result<Self, CompileError> {
        let parts: Vec<&str> = path.iter().map(String::as_str).collect();
        match parts.as_slice() {
            ["ctx", "identity"] | ["ctx", "identity", "id"] => Ok(ValueDescriptor::IdentityId),
            ["ctx", "identity", "email"] => Ok(ValueDescriptor::IdentityEmail),
            ["ctx", "isAuthenticated"] => Ok(ValueDescriptor::IsAuthenticated),
            ["ctx", "now"] => Ok(ValueDescriptor::Now),
            ["ctx", "headers", key] => Ok(ValueDescriptor::Header(key.to_string())),
            ["ctx", "secrets", key] => Ok(ValueDescriptor::Secret(key.to_string())),
            _ => Err(CompileError::UnresolvableIdentifier(path.join("."))),
        }
    }

    pub fn resolve(&self, ctx: &RequestContext, config: &RuntimeConfig) -> Result<SqlValue, CompileError> {
        Ok(match self {
            ValueDescriptor::IdentityId => ctx
                .identity()
                .map(|i| SqlValue::Text(i.id.clone()))
                .unwrap_or(SqlValue::Null),
            ValueDescriptor::IdentityEmail => ctx
                .identity()
                .and_then(|i| i.email.clone())
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
            ValueDescriptor::IsAuthenticated => SqlValue::Bool(ctx.is_authenticated()),
            ValueDescriptor::Now => SqlValue::Timestamp(ctx.now()),
            ValueDescriptor::Header(key) => ctx
                .header(key)
                .map(SqlValue::from)
                .unwrap_or(SqlValue::Null),
            ValueDescriptor::Secret(key) => config
                .secret(key)
                .map(SqlValue::from)
                .unwrap_or(SqlValue::Null),
            ValueDescriptor::StringLiteral(s) => SqlValue::Text(s.clone()),
            ValueDescriptor::NumberLiteral(n) => SqlValue::Int(*n),
            ValueDescriptor::RecordIds => {
                return Err(CompileError::TypeMismatch(
                    "record ids are bound per authorization batch".into(),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn path(s: &str) -> Vec<String> {
        s.split('.').map(str::to_string).collect()
    }

    #[test]
    fn context_paths_parse() {
        assert_eq!(
            ValueDescriptor::from_context_path(&path("ctx.identity")).unwrap(),
            ValueDescriptor::IdentityId
        );
        assert_eq!(
            ValueDescriptor::from_context_path(&path("ctx.headers.X-Tenant")).unwrap(),
            ValueDescriptor::Header("X-Tenant".into())
        );
        assert!(ValueDescriptor::from_context_path(&path("ctx.identity.name")).is_err());
    }

    #[test]
    fn anonymous_identity_resolves_to_null() {
        let ctx = RequestContext::anonymous().with_header("x-tenant", "acme");
        let config = RuntimeConfig::default().with_secret("KEY", "v");
        assert_eq!(ValueDescriptor::IdentityId.resolve(&ctx, &config).unwrap(), SqlValue::Null);
        assert_eq!(
            ValueDescriptor::IsAuthenticated.resolve(&ctx, &config).unwrap(),
            SqlValue::Bool(false)
        );
        assert_eq!(
            ValueDescriptor::Header("X-Tenant".into()).resolve(&ctx, &config).unwrap(),
            SqlValue::from("acme")
        );
        assert_eq!(
            ValueDescriptor::Secret("KEY".into()).resolve(&ctx, &config).unwrap(),
            SqlValue::from("v")
        );
    }
}
