//! Live schema change detection.
//!
//! [`install_fixtures`] creates DDL event triggers that publish on
//! [`WATCH_CHANNEL`]; the watcher holds a dedicated `LISTEN` connection and
//! bumps a generation counter per change. pg_graphql rebuilds its reflected
//! schema on its own; the counter invalidates what the engine caches from
//! the catalog (token type targets) and feeds logs.

use crate::domain::EngineError;
use sqlx::postgres::{PgListener, PgPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification channel carrying DDL events
pub const WATCH_CHANNEL: &str = "postgraphile_watch";

/// Event trigger functions and triggers publishing DDL on [`WATCH_CHANNEL`].
///
/// Event triggers require superuser; the whole script runs as one implicit
/// transaction so concurrent gateways never see a half-installed state.
const WATCH_FIXTURES: &str = r#"
CREATE SCHEMA IF NOT EXISTS postgraphile_watch;

CREATE OR REPLACE FUNCTION postgraphile_watch.notify_watchers_ddl() RETURNS event_trigger AS $$
BEGIN
  PERFORM pg_notify(
    'postgraphile_watch',
    json_build_object(
      'type', 'ddl_command_end',
      'payload', (SELECT json_agg(json_build_object('schema', schema_name, 'command', command_tag))
                  FROM pg_event_trigger_ddl_commands())
    )::text
  );
END;
$$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION postgraphile_watch.notify_watchers_drop() RETURNS event_trigger AS $$
BEGIN
  PERFORM pg_notify(
    'postgraphile_watch',
    json_build_object(
      'type', 'drop',
      'payload', (SELECT json_agg(DISTINCT schema_name) FROM pg_event_trigger_dropped_objects())
    )::text
  );
END;
$$ LANGUAGE plpgsql;

DROP EVENT TRIGGER IF EXISTS postgraphile_watch_ddl;
CREATE EVENT TRIGGER postgraphile_watch_ddl ON ddl_command_end
  EXECUTE PROCEDURE postgraphile_watch.notify_watchers_ddl();

DROP EVENT TRIGGER IF EXISTS postgraphile_watch_drop;
CREATE EVENT TRIGGER postgraphile_watch_drop ON sql_drop
  EXECUTE PROCEDURE postgraphile_watch.notify_watchers_drop();
"#;

/// Install (or refresh) the DDL event triggers feeding the watch channel.
pub async fn install_fixtures(pool: &PgPool) -> Result<(), EngineError> {
    sqlx::raw_sql(WATCH_FIXTURES).execute(pool).await?;
    debug!(channel = WATCH_CHANNEL, "Schema watch fixtures installed");
    Ok(())
}

/// Delay before polling again after the listen connection drops
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Background task listening for schema changes
pub struct SchemaWatcher {
    handle: JoinHandle<()>,
}

impl SchemaWatcher {
    /// Open the listen connection and start the watch task.
    pub async fn spawn(pool: &PgPool, generation: Arc<AtomicU64>) -> Result<Self, EngineError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(WATCH_CHANNEL).await?;
        info!(channel = WATCH_CHANNEL, "Watching for schema changes");

        let handle = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let current = generation.fetch_add(1, Ordering::AcqRel) + 1;
                        info!(
                            generation = current,
                            change = %describe_change(notification.payload()),
                            "Schema change detected"
                        );
                    }
                    Err(e) => {
                        // PgListener reconnects on the next recv
                        warn!(error = %e, "Schema watch connection lost");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok(Self { handle })
    }

    pub fn stop(&self) {
        debug!("Stopping schema watcher");
        self.handle.abort();
    }
}

impl Drop for SchemaWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Summarize a watch payload for logging.
///
/// Payloads are JSON objects like `{"type":"ddl_command_end","payload":[..]}`;
/// anything else is reported verbatim.
pub fn describe_change(payload: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => match value.get("type").and_then(|t| t.as_str()) {
            Some(kind) => {
                let objects = value
                    .get("payload")
                    .and_then(|p| p.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0);
                format!("{} ({} objects)", kind, objects)
            }
            None => payload.to_string(),
        },
        Err(_) if payload.is_empty() => "unspecified".to_string(),
        Err(_) => payload.to_string(),
    }
}
