//! Route configuration for the admin API.

use crate::{
    error::ApiError,
    handlers::{admin, auth, health, logs, users},
    middleware::{AuthLayer, RateLimitLayer, RequestLogLayer, RequireRoleLayer},
    state::AppState,
};
use axum::{
    http::HeaderName,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

const REQUEST_ID: &str = "x-request-id";

/// Build the admin API router.
///
/// Under `/api` requests pass the rate limiter, then the authentication
/// gate, then the role gate. Health checks skip all three.
pub fn create_router(state: AppState) -> Router {
    let common_middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static(REQUEST_ID),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            REQUEST_ID,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(state.config.api.request_timeout()));

    Router::new()
        .merge(health_routes())
        .nest("/api", api_routes(&state))
        .fallback(fallback_handler)
        .layer(
            RequestLogLayer::new(state.audit.clone())
                .with_trusted_proxies(state.trusted_proxies.clone()),
        )
        .layer(common_middleware)
        .with_state(state)
}

fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/readiness", get(health::readiness))
        .route("/health/liveness", get(health::liveness))
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let authenticate = AuthLayer::new(state.tokens.clone(), state.store.clone());

    let auth_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/change-password", post(users::change_password))
        // Covers only the routes above.
        .route_layer(authenticate.clone())
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout));

    let admin_routes = Router::new()
        .route("/system", get(admin::system))
        .route("/sessions/expired", delete(admin::purge_expired_sessions))
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/logs", get(logs::list_logs))
        .route("/logs/stats", get(logs::log_stats))
        .route_layer(RequireRoleLayer::admin())
        .route_layer(authenticate);

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/admin", admin_routes);

    if state.config.rate_limit.enabled {
        api.layer(
            RateLimitLayer::new(state.limiter.clone())
                .with_trusted_proxies(state.trusted_proxies.clone()),
        )
    } else {
        api
    }
}

async fn fallback_handler() -> ApiError {
    ApiError::NotFound("Route".to_string())
}
