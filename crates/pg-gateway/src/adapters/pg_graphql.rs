//! Schema engine backed by the `pg_graphql` PostgreSQL extension.
//!
//! Introspection and execution both happen inside the database through
//! `graphql.resolve(...)`. Each operation runs in its own transaction with
//! the request's role, search path and claim settings applied locally, so
//! row-level security policies can read them with `current_setting`. The
//! exposed schema is prepended to the session's search path; schemas such as
//! `public` (where extensions like pgcrypto live) stay resolvable.

use crate::adapters::jwt_signing::{JwtSigner, JwtTargets};
use crate::adapters::schema_watch::{install_fixtures, SchemaWatcher};
use crate::domain::identity::{ClaimsMapping, IdentityExtractor, RequestContext};
use crate::domain::EngineError;
use crate::ports::{EngineOptions, GraphQLRequest, SchemaEngine};
use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Role and search path for one transaction. `$2` goes in front of the
/// inherited path.
const SESSION_SQL: &str = "SELECT set_config('role', $1, true), \
     set_config('search_path', \
         CASE WHEN current_setting('search_path') = '' THEN $2 \
              ELSE $2 || ', ' || current_setting('search_path') END, \
         true)";

/// Functions in a schema returning a given type
const JWT_FUNCTIONS_SQL: &str = "SELECT p.proname::text FROM pg_proc p \
     JOIN pg_namespace n ON n.oid = p.pronamespace \
     WHERE n.nspname = $1 AND p.prorettype = to_regtype($2)";

/// Attributes of a composite type, in declaration order
const JWT_ATTRIBUTES_SQL: &str = "SELECT a.attname::text FROM pg_attribute a \
     JOIN pg_type t ON t.typrelid = a.attrelid \
     WHERE t.oid = to_regtype($1) AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

/// Role and settings applied to one operation's transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub role: String,
    pub settings: ClaimsMapping,
}

/// Compute the session for a request.
///
/// The token's `role` claim wins over the authenticated user's role, which
/// wins over the default role. Token claims become `jwt.claims.*` settings
/// and the settings hook's mapping is overlaid last.
pub fn session_settings(
    options: &EngineOptions,
    hook: &dyn IdentityExtractor,
    ctx: &RequestContext<'_>,
) -> SessionSettings {
    let role = ctx
        .token
        .and_then(|t| t.role())
        .or_else(|| ctx.user.and_then(|u| u.role.as_deref()))
        .unwrap_or(options.default_role.as_str())
        .to_string();

    let mut settings = ctx.token.map(|t| t.to_settings()).unwrap_or_default();
    settings.merge(hook.extract(ctx));

    SessionSettings { role, settings }
}

/// Custom settings must be namespaced (`prefix.name`) and plain identifiers
fn is_valid_setting_name(name: &str) -> bool {
    name.contains('.')
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Quote an identifier for use in a `search_path` value
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `graphql.resolve` reports failures in-band; those transactions roll back
fn has_errors(response: &Value) -> bool {
    response
        .get("errors")
        .and_then(Value::as_array)
        .is_some_and(|errors| !errors.is_empty())
}

/// pg_graphql-backed engine
pub struct PgGraphqlEngine {
    options: EngineOptions,
    pool: PgPool,
    settings_hook: Arc<dyn IdentityExtractor>,
    search_path: String,
    generation: Arc<AtomicU64>,
    watcher: Mutex<Option<SchemaWatcher>>,
    signer: JwtSigner,
    /// JWT targets with the schema generation they were read at
    jwt_targets: Mutex<Option<(u64, Arc<JwtTargets>)>>,
}

impl PgGraphqlEngine {
    /// Create the engine. The pool connects lazily, so this never touches
    /// the network; must be called inside a tokio runtime.
    pub fn new(options: EngineOptions, settings_hook: Arc<dyn IdentityExtractor>) -> Self {
        let db = &options.database;
        let connect = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(&db.user)
            .password(db.password.expose_secret())
            .database(&db.name)
            .application_name(env!("CARGO_PKG_NAME"));

        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(db.acquire_timeout)
            .connect_lazy_with(connect);

        let search_path = quote_ident(&options.schema);
        let signer = JwtSigner::new(&options.jwt_secret, options.jwt_audience.as_deref());

        Self {
            options,
            pool,
            settings_hook,
            search_path,
            generation: Arc::new(AtomicU64::new(0)),
            watcher: Mutex::new(None),
            signer,
            jwt_targets: Mutex::new(None),
        }
    }

    /// Number of schema changes observed since start
    pub fn schema_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Session for a request, as it would be applied
    pub fn session_for(&self, ctx: &RequestContext<'_>) -> SessionSettings {
        session_settings(&self.options, self.settings_hook.as_ref(), ctx)
    }

    /// Where JWT rows appear in responses. Re-read from the catalog after
    /// every observed schema change.
    pub async fn jwt_targets(&self) -> Result<Arc<JwtTargets>, EngineError> {
        let generation = self.schema_generation();
        let cached = self
            .jwt_targets
            .lock()
            .as_ref()
            .filter(|(seen, _)| *seen == generation)
            .map(|(_, targets)| Arc::clone(targets));
        if let Some(targets) = cached {
            return Ok(targets);
        }

        let jwt_type = &self.options.jwt_type;
        let functions: Vec<String> = sqlx::query_scalar(JWT_FUNCTIONS_SQL)
            .bind(&self.options.schema)
            .bind(jwt_type)
            .fetch_all(&self.pool)
            .await?;
        let attributes: Vec<String> = sqlx::query_scalar(JWT_ATTRIBUTES_SQL)
            .bind(jwt_type)
            .fetch_all(&self.pool)
            .await?;
        debug!(
            jwt_type = %jwt_type,
            functions = functions.len(),
            "Loaded JWT result targets"
        );

        let type_name = jwt_type
            .rsplit_once('.')
            .map_or(jwt_type.as_str(), |(_, name)| name)
            .trim_matches('"');
        let targets = Arc::new(JwtTargets::new(type_name, functions, attributes));
        *self.jwt_targets.lock() = Some((generation, Arc::clone(&targets)));
        Ok(targets)
    }

    async fn check_database(&self) -> Result<(), EngineError> {
        let has_extension: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'pg_graphql')",
        )
        .fetch_one(&self.pool)
        .await?;
        if !has_extension {
            warn!("pg_graphql extension is not installed; operations will fail");
        }

        let has_schema: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)")
                .bind(&self.options.schema)
                .fetch_one(&self.pool)
                .await?;
        if !has_schema {
            warn!(schema = %self.options.schema, "Exposed schema does not exist");
        }

        let has_jwt_type: bool = sqlx::query_scalar("SELECT to_regtype($1) IS NOT NULL")
            .bind(&self.options.jwt_type)
            .fetch_one(&self.pool)
            .await?;
        if !has_jwt_type {
            warn!(jwt_type = %self.options.jwt_type, "JWT composite type not found");
        }

        Ok(())
    }
}

#[async_trait]
impl SchemaEngine for PgGraphqlEngine {
    fn options(&self) -> &EngineOptions {
        &self.options
    }

    async fn prepare(&self) -> Result<(), EngineError> {
        self.check_database().await?;

        if self.options.watch {
            if let Err(e) = install_fixtures(&self.pool).await {
                warn!(
                    error = %e,
                    "Could not install schema watch triggers; only manual notifications will be seen"
                );
            }
            let watcher = SchemaWatcher::spawn(&self.pool, Arc::clone(&self.generation)).await?;
            let previous = self.watcher.lock().replace(watcher);
            if let Some(previous) = previous {
                previous.stop();
            }
        }

        info!(schema = %self.options.schema, "Schema engine ready");
        Ok(())
    }

    async fn execute(
        &self,
        request: GraphQLRequest,
        ctx: &RequestContext<'_>,
    ) -> Result<Value, EngineError> {
        if request.query.trim().is_empty() {
            return Err(EngineError::InvalidOperation(
                "query must not be empty".into(),
            ));
        }
        if let Some(variables) = &request.variables {
            if !variables.is_object() && !variables.is_null() {
                return Err(EngineError::InvalidOperation(
                    "variables must be an object".into(),
                ));
            }
        }

        let session = self.session_for(ctx);
        debug!(role = %session.role, settings = session.settings.len(), "Applying session");

        let mut tx = self.pool.begin().await?;

        sqlx::query(SESSION_SQL)
            .bind(&session.role)
            .bind(&self.search_path)
            .execute(&mut *tx)
            .await?;

        for (name, value) in session.settings.iter() {
            if !is_valid_setting_name(name) {
                warn!(setting = name, "Skipping invalid session setting name");
                continue;
            }
            sqlx::query("SELECT set_config($1, coalesce($2, ''), true)")
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        let variables = match request.variables {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(v) => v,
        };
        let mut response: Value = sqlx::query_scalar("SELECT graphql.resolve($1, $2, $3, $4)")
            .bind(&request.query)
            .bind(variables)
            .bind(request.operation_name)
            .bind(request.extensions)
            .fetch_one(&mut *tx)
            .await?;

        if has_errors(&response) {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }

        let targets = self.jwt_targets().await?;
        let issued = self.signer.sign_response(&mut response, &targets)?;
        if issued > 0 {
            debug!(issued, "Signed JWT results");
        }

        Ok(response)
    }

    async fn close(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop();
        }
        self.pool.close().await;
    }
}
