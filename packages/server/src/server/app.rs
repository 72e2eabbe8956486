//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServiceDeps;
use crate::server::middleware::{api_key_auth, request_context};
use crate::server::routes::{
    applications, explain, health_handler, jobs, queues, schedules, subscriptions, tracker,
};

/// Build the HTTP application.
///
/// Three surfaces:
/// - public: health and self-documentation, no auth
/// - internal: schedule control, no tenant auth (single-tenant surface)
/// - protected: everything else behind `x-api-key` and rate limiting
pub fn build_app(deps: Arc<ServiceDeps>) -> Router {
    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/api/explain", get(explain::explain_index))
        .route("/api/explain/:topic", get(explain::explain_topic));

    let internal = Router::new()
        .route(
            "/api/schedules",
            post(schedules::create_schedule).get(schedules::list_schedules),
        )
        .route(
            "/api/schedules/:id",
            get(schedules::get_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route("/api/schedules/:id/toggle", post(schedules::toggle_schedule))
        .route(
            "/api/schedules/:id/execute",
            post(schedules::execute_schedule),
        );

    // Rate limiting keyed by client IP (X-Forwarded-For aware).
    let window = deps.config.rate_limit_window_secs.max(1);
    let per_second = (deps.config.rate_limit_max as u64 / window).max(1);
    let burst = deps.config.rate_limit_max.max(1);
    let rate_limit_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(per_second)
            .burst_size(burst)
            .use_headers()
            .finish()
            .expect("rate limiter configuration is valid and should never fail"),
    );

    let protected = Router::new()
        .route("/api/jobs/:queue", post(jobs::submit_job).get(jobs::list_jobs))
        .route(
            "/api/jobs/:queue/:job_id",
            get(jobs::get_job).delete(jobs::cancel_job),
        )
        .route("/api/queues", get(queues::list_queues))
        .route("/api/queues/:name/stats", get(queues::queue_stats))
        .route("/api/queues/:name/pause", post(queues::pause_queue))
        .route("/api/queues/:name/resume", post(queues::resume_queue))
        .route("/api/queues/:name/clean", post(queues::clean_queue))
        .route(
            "/api/applications",
            post(applications::create_application).get(applications::list_applications),
        )
        .route(
            "/api/applications/:id",
            get(applications::get_application)
                .patch(applications::update_application)
                .delete(applications::delete_application),
        )
        .route(
            "/api/subscriptions",
            post(subscriptions::create_subscription).get(subscriptions::list_subscriptions),
        )
        .route(
            "/api/subscriptions/:id",
            get(subscriptions::get_subscription)
                .put(subscriptions::update_subscription)
                .delete(subscriptions::delete_subscription),
        )
        .route(
            "/api/subscriptions/:id/test",
            post(subscriptions::test_subscription),
        )
        .route(
            "/api/tracker/jobs",
            post(tracker::tracker_submit).get(tracker::tracker_list),
        )
        .route(
            "/api/tracker/jobs/:job_id",
            get(tracker::tracker_status).patch(tracker::tracker_update),
        )
        .layer(middleware::from_fn(api_key_auth))
        .layer(GovernorLayer {
            config: rate_limit_config,
        });

    Router::new()
        .merge(public)
        .merge(internal)
        .merge(protected)
        .layer(middleware::from_fn(request_context))
        .layer(Extension(deps))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Minimal router for the metrics port.
pub fn build_metrics_app(deps: Arc<ServiceDeps>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(|Extension(deps): Extension<Arc<ServiceDeps>>| async move {
                match deps.metrics.render() {
                    Ok(body) => (axum::http::StatusCode::OK, body),
                    Err(e) => (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        e.to_string(),
                    ),
                }
            }),
        )
        .layer(Extension(deps))
}
