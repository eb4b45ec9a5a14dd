//! Gateway configuration resolved from the process environment.
//!
//! The environment is read exactly once, at startup, into an immutable
//! [`GatewayConfig`]. Components receive it explicitly and never consult the
//! environment again.

use crate::domain::error::ConfigError;
use secrecy::SecretString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names
pub mod vars {
    pub const PORT: &str = "PORT";
    pub const HOST: &str = "HOST";
    pub const DB_USER: &str = "POSTGRES_USERNAME";
    pub const DB_PASSWORD: &str = "POSTGRES_PASSWORD";
    pub const DB_HOST: &str = "POSTGRES_HOST";
    pub const DB_PORT: &str = "POSTGRES_PORT";
    pub const DB_NAME: &str = "POSTGRES_DATABASE";
    pub const DB_MAX_CONNECTIONS: &str = "DB_MAX_CONNECTIONS";
    pub const DB_ACQUIRE_TIMEOUT_SECS: &str = "DB_ACQUIRE_TIMEOUT_SECS";
    pub const SCHEMA: &str = "POSTGRAPHILE_SCHEMA";
    pub const DEFAULT_ROLE: &str = "POSTGRAPHILE_DEFAULT_ROLE";
    pub const WATCH: &str = "POSTGRAPHILE_WATCH";
    pub const GRAPHIQL: &str = "POSTGRAPHILE_GRAPHIQL";
    pub const JWT_TYPE: &str = "POSTGRAPHILE_JWT_TYPE";
    pub const JWT_SECRET: &str = "JWT_SECRET";
    pub const JWT_AUDIENCE: &str = "JWT_AUDIENCE";
    pub const BODY_SIZE_LIMIT: &str = "BODY_SIZE_LIMIT";
    pub const CORS_ENABLED: &str = "CORS_ENABLED";
    pub const SHUTDOWN_TIMEOUT_SECS: &str = "SHUTDOWN_TIMEOUT_SECS";
}

/// Listen port used when `PORT` is unset
pub const DEFAULT_PORT: u16 = 3000;

/// Main gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP listener configuration
    pub http: HttpConfig,
    /// Database connection parameters
    pub database: DatabaseConfig,
    /// Options handed to the schema engine
    pub graphql: GraphqlConfig,
    /// Token verification
    pub jwt: JwtConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address (default: 0.0.0.0)
    pub host: IpAddr,
    /// Port (default: 3000)
    pub port: u16,
    /// Max request body size in bytes (default: 100 KiB)
    pub body_limit: usize,
    /// Answer CORS preflights permissively
    pub cors_enabled: bool,
    /// Bound on graceful shutdown before in-flight requests are dropped
    pub shutdown_timeout: Duration,
}

/// PostgreSQL connection parameters
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: SecretString,
    pub host: String,
    pub port: u16,
    pub name: String,
    /// Pool size (default: 10)
    pub max_connections: u32,
    /// Time to wait for a pooled connection (default: 30s)
    pub acquire_timeout: Duration,
}

/// Schema engine options
#[derive(Debug, Clone)]
pub struct GraphqlConfig {
    /// Schema exposed through the gateway
    pub schema: String,
    /// Role applied to requests without a token role
    pub default_role: String,
    /// Watch for schema changes
    pub watch: bool,
    /// Serve the GraphiQL console
    pub graphiql: bool,
    /// Qualified composite type used for JWT payloads (`schema.type`)
    pub jwt_type: String,
}

/// Token verification configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 verification secret
    pub secret: SecretString,
    /// Required `aud` claim, if any
    pub audience: Option<String>,
}

impl GatewayConfig {
    /// Resolve configuration from the process environment.
    ///
    /// A `.env` file in the working directory, if present, is loaded first;
    /// variables already set in the environment take precedence.
    pub fn resolve() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let http = HttpConfig {
            host: env.parsed(vars::HOST)?.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: env.port(vars::PORT)?.unwrap_or(DEFAULT_PORT),
            body_limit: env.parsed(vars::BODY_SIZE_LIMIT)?.unwrap_or(100 * 1024),
            cors_enabled: env.flag(vars::CORS_ENABLED)?.unwrap_or(false),
            shutdown_timeout: Duration::from_secs(
                env.parsed(vars::SHUTDOWN_TIMEOUT_SECS)?.unwrap_or(10),
            ),
        };

        let database = DatabaseConfig {
            user: env.required(vars::DB_USER)?,
            password: SecretString::new(env.required(vars::DB_PASSWORD)?),
            host: env.required(vars::DB_HOST)?,
            port: env
                .port(vars::DB_PORT)?
                .ok_or(ConfigError::Missing(vars::DB_PORT))?,
            name: env.required(vars::DB_NAME)?,
            max_connections: env.parsed(vars::DB_MAX_CONNECTIONS)?.unwrap_or(10),
            acquire_timeout: Duration::from_secs(
                env.parsed(vars::DB_ACQUIRE_TIMEOUT_SECS)?.unwrap_or(30),
            ),
        };

        let schema = env.required(vars::SCHEMA)?;
        let jwt_type = env
            .optional(vars::JWT_TYPE)
            .unwrap_or_else(|| format!("{}.jwt_token", schema));
        let graphql = GraphqlConfig {
            default_role: env.required(vars::DEFAULT_ROLE)?,
            watch: env.flag(vars::WATCH)?.unwrap_or(true),
            graphiql: env.flag(vars::GRAPHIQL)?.unwrap_or(true),
            jwt_type,
            schema,
        };

        let jwt = JwtConfig {
            secret: SecretString::new(env.required(vars::JWT_SECRET)?),
            audience: env.optional(vars::JWT_AUDIENCE),
        };

        let config = Self {
            http,
            database,
            graphql,
            jwt,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (schema, type_name) = self.graphql.jwt_type.split_once('.').ok_or_else(|| {
            ConfigError::Invalid {
                var: vars::JWT_TYPE,
                reason: "expected a qualified name like `schema.jwt_token`".into(),
            }
        })?;
        if schema.is_empty() || type_name.is_empty() || type_name.contains('.') {
            return Err(ConfigError::Invalid {
                var: vars::JWT_TYPE,
                reason: format!("`{}` is not a qualified type name", self.graphql.jwt_type),
            });
        }

        if self.http.body_limit == 0 {
            return Err(ConfigError::Invalid {
                var: vars::BODY_SIZE_LIMIT,
                reason: "cannot be 0".into(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: vars::DB_MAX_CONNECTIONS,
                reason: "cannot be 0".into(),
            });
        }

        Ok(())
    }

    /// Get HTTP listener address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        match (self.0)(var) {
            None => Err(ConfigError::Missing(var)),
            Some(v) if v.trim().is_empty() => Err(ConfigError::Empty(var)),
            Some(v) => Ok(v),
        }
    }

    fn parsed<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(var)
            .map(|v| {
                v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn port(&self, var: &'static str) -> Result<Option<u16>, ConfigError> {
        match self.parsed::<u16>(var)? {
            Some(0) => Err(ConfigError::Invalid {
                var,
                reason: "port cannot be 0".into(),
            }),
            other => Ok(other),
        }
    }

    fn flag(&self, var: &'static str) -> Result<Option<bool>, ConfigError> {
        self.optional(var)
            .map(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::Invalid {
                    var,
                    reason: format!("`{}` is not a boolean", other),
                }),
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    const REQUIRED: [&str; 8] = [
        vars::DB_USER,
        vars::DB_PASSWORD,
        vars::DB_HOST,
        vars::DB_PORT,
        vars::DB_NAME,
        vars::SCHEMA,
        vars::JWT_SECRET,
        vars::DEFAULT_ROLE,
    ];

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            (vars::DB_USER, "gateway".to_string()),
            (vars::DB_PASSWORD, "hunter2".to_string()),
            (vars::DB_HOST, "db.internal".to_string()),
            (vars::DB_PORT, "5432".to_string()),
            (vars::DB_NAME, "app".to_string()),
            (vars::SCHEMA, "public".to_string()),
            (vars::JWT_SECRET, "s3cret".to_string()),
            (vars::DEFAULT_ROLE, "anonymous".to_string()),
        ])
    }

    fn resolve(env: &HashMap<&'static str, String>) -> Result<GatewayConfig, ConfigError> {
        GatewayConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_resolves_all_fields() {
        let mut env = base_env();
        env.insert(vars::PORT, "4000".into());

        let config = resolve(&env).unwrap();
        assert_eq!(config.http.port, 4000);
        assert_eq!(config.database.user, "gateway");
        assert_eq!(config.database.password.expose_secret(), "hunter2");
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.name, "app");
        assert_eq!(config.graphql.schema, "public");
        assert_eq!(config.jwt.secret.expose_secret(), "s3cret");
        assert_eq!(config.graphql.default_role, "anonymous");
    }

    #[test]
    fn test_default_port() {
        let config = resolve(&base_env()).unwrap();
        assert_eq!(config.http.port, DEFAULT_PORT);
        assert_eq!(config.http_addr().port(), 3000);
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&base_env()).unwrap();
        assert!(config.graphql.watch);
        assert!(config.graphql.graphiql);
        assert!(!config.http.cors_enabled);
        assert_eq!(config.graphql.jwt_type, "public.jwt_token");
        assert_eq!(config.jwt.audience, None);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.http.body_limit, 100 * 1024);
    }

    #[test]
    fn test_missing_required_variable() {
        for var in REQUIRED {
            let mut env = base_env();
            env.remove(var);
            assert_eq!(resolve(&env).unwrap_err(), ConfigError::Missing(var), "{var}");
        }
    }

    #[test]
    fn test_empty_required_variable() {
        let mut env = base_env();
        env.insert(vars::DB_HOST, "   ".into());
        assert_eq!(resolve(&env).unwrap_err(), ConfigError::Empty(vars::DB_HOST));
    }

    #[test]
    fn test_non_numeric_port() {
        let mut env = base_env();
        env.insert(vars::PORT, "http".into());
        assert!(matches!(
            resolve(&env),
            Err(ConfigError::Invalid { var: vars::PORT, .. })
        ));

        let mut env = base_env();
        env.insert(vars::DB_PORT, "70000".into());
        assert!(matches!(
            resolve(&env),
            Err(ConfigError::Invalid { var: vars::DB_PORT, .. })
        ));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut env = base_env();
        env.insert(vars::PORT, "0".into());
        assert!(matches!(resolve(&env), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_flags() {
        let mut env = base_env();
        env.insert(vars::WATCH, "false".into());
        env.insert(vars::GRAPHIQL, "0".into());
        env.insert(vars::CORS_ENABLED, "YES".into());
        let config = resolve(&env).unwrap();
        assert!(!config.graphql.watch);
        assert!(!config.graphql.graphiql);
        assert!(config.http.cors_enabled);

        env.insert(vars::WATCH, "sometimes".into());
        assert!(matches!(
            resolve(&env),
            Err(ConfigError::Invalid { var: vars::WATCH, .. })
        ));
    }

    #[test]
    fn test_jwt_type_must_be_qualified() {
        let mut env = base_env();
        env.insert(vars::JWT_TYPE, "jwt_token".into());
        assert!(matches!(
            resolve(&env),
            Err(ConfigError::Invalid { var: vars::JWT_TYPE, .. })
        ));

        env.insert(vars::JWT_TYPE, "auth.token_payload".into());
        assert_eq!(resolve(&env).unwrap().graphql.jwt_type, "auth.token_payload");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = resolve(&base_env()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cret"));
    }
}
