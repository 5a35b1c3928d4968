//! HTTP routes for the generated GraphQL endpoint.
//!
//! Every request resolves against the schema of the current metadata. Error-free
//! responses are kept in the [ResponseCache] tagged with the tables they read.

use async_graphql::http::{GraphiQLSource, parse_query_string};
use async_graphql::{ErrorExtensions, Pos, Request, Response, ServerError};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::Json;
use axum::response::{Html, IntoResponse, Response as HttpResponse};
use axum::routing::get;
use tracing::{debug, warn};

use super::cache::{CacheTags, ResponseCache};
use crate::AppState;

/// Routes for the endpoint at `path` plus `/health`
pub fn router(path: &str) -> Router<AppState> {
    Router::new()
        .route(path, get(graphql_get).post(graphql_post))
        .route("/health", get(health))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false)
}

/// GraphiQL for browsers, otherwise a query passed in the query string
async fn graphql_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> HttpResponse {
    let query = uri.query().unwrap_or_default();
    if accepts_html(&headers) && query.is_empty() {
        return Html(
            GraphiQLSource::build()
                .endpoint(&state.config.graphql_path)
                .finish(),
        )
        .into_response();
    }

    match parse_query_string(query) {
        Ok(request) => execute(&state, request).await,
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn graphql_post(State(state): State<AppState>, req: GraphQLRequest) -> HttpResponse {
    execute(&state, req.into_inner()).await
}

async fn execute(state: &AppState, request: Request) -> HttpResponse {
    let cached = match state.schema_cache.schema().await {
        Ok(cached) => cached,
        Err(e) => {
            warn!(error = %e, "No schema available for request");
            let error: ServerError = e.extend().into_server_error(Pos::default());
            return GraphQLResponse::from(Response::from_errors(vec![error])).into_response();
        }
    };

    let key = ResponseCache::key(&cached.hash, &request);
    if let Some(body) = state.response_cache.get(&key) {
        debug!(key = %key, "Serving cached GraphQL response");
        return Json(body).into_response();
    }

    let tags = CacheTags::new();
    let response = cached.schema.execute(request.data(tags.clone())).await;
    if state.response_cache.is_enabled() {
        state.response_cache.put(key, &response, tags.tables());
    }

    GraphQLResponse::from(response).into_response()
}
