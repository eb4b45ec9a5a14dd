//! HTTP routes mounted by the gateway.
//!
//! | Path        | Method | Handler                                   |
//! |-------------|--------|-------------------------------------------|
//! | `/graphql`  | POST   | operation handed to the schema engine     |
//! | `/graphiql` | GET    | GraphiQL console (when enabled)           |
//! | `/health`   | GET    | liveness                                  |

use crate::domain::config::HttpConfig;
use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::{AuthenticatedUser, RequestContext, TokenClaims};
use crate::middleware::MiddlewareStack;
use crate::ports::{GraphQLRequest, SchemaEngine};
use async_graphql::http::GraphiQLSource;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tracing::warn;

pub const GRAPHQL_PATH: &str = "/graphql";
pub const GRAPHIQL_PATH: &str = "/graphiql";
pub const HEALTH_PATH: &str = "/health";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn SchemaEngine>,
    pub body_limit: usize,
}

/// Build the gateway router around `engine`
pub fn build_router(http: &HttpConfig, engine: Arc<dyn SchemaEngine>) -> Router {
    let stack = MiddlewareStack::from_config(http, engine.options());
    let graphiql = engine.options().graphiql;

    let state = AppState {
        engine,
        body_limit: http.body_limit,
    };

    let graphql = Router::new()
        .route(GRAPHQL_PATH, post(handle_graphql))
        .route_layer(stack.auth);

    let mut router = Router::new()
        .merge(graphql)
        .route(HEALTH_PATH, get(health_check));

    if graphiql {
        router = router.route(GRAPHIQL_PATH, get(graphiql_console));
    }

    let mut router = router
        .fallback(not_found)
        .layer(stack.body_limit)
        .with_state(state);

    if let Some(cors) = stack.cors {
        router = router.layer(cors);
    }

    router.layer(stack.tracing)
}

/// Hand one GraphQL operation to the engine
async fn handle_graphql(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    user: Option<Extension<AuthenticatedUser>>,
    token: Option<Extension<TokenClaims>>,
    body: Result<Json<GraphQLRequest>, JsonRejection>,
) -> Response {
    let request = match parse_body(body, state.body_limit) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let ctx = RequestContext {
        method: &method,
        uri: &uri,
        headers: &headers,
        user: user.as_ref().map(|Extension(u)| u),
        token: token.as_ref().map(|Extension(t)| t),
    };

    match state.engine.execute(request, &ctx).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            warn!(error = %e, "Operation failed");
            e.into_response()
        }
    }
}

fn parse_body(
    body: Result<Json<GraphQLRequest>, JsonRejection>,
    limit: usize,
) -> ApiResult<GraphQLRequest> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(ApiError::payload_too_large(limit))
        }
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}

async fn graphiql_console() -> impl IntoResponse {
    Html(
        GraphiQLSource::build()
            .endpoint(GRAPHQL_PATH)
            .title("pg-gateway")
            .finish(),
    )
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("no route for {}", uri.path()))
}
