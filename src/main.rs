// Kerbside API v0.1
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod models;
mod routes;
mod services;

use config::AppConfig;
use routes::AppState;

/// Kerbside API OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kerbside API",
        version = "0.1.0",
        description = "On-street parking availability from open-data sensor feeds. \
            Normalizes live bay sensors, aggregates them into ranked hexagonal areas, \
            reconstructs hourly historical occupancy with tiered fallbacks, and \
            projects short-horizon availability forecasts.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Sensors", description = "Normalized live sensor readings"),
        (name = "Areas", description = "Hex-cell aggregation and ranking"),
        (name = "History", description = "Hourly historical occupancy"),
        (name = "Forecasts", description = "Hour-of-day availability forecasts"),
    ),
    paths(
        routes::health::health_check,
        routes::sensors::list_sensors,
        routes::areas::list_areas,
        routes::history::get_history,
        routes::forecasts::get_forecast,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::sensors::SensorsResponse,
            routes::areas::AreasResponse,
            routes::history::HistoryResponse,
            services::areas::RankStrategy,
            services::forecast::AreaForecast,
            services::forecast::ForecastSource,
            services::history::HistoryWindow,
            models::LatLng,
            models::SensorRecord,
            models::AreaCell,
            models::HourlyBucket,
            models::ForecastPoint,
            models::HistoryTier,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kerbside_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    tracing::info!(
        "Open-data portal {} (live: {}, annual: {:?}, history year {})",
        config.open_data_base_url,
        config.datasets.live_sensors,
        config.datasets.annual_events,
        config.history_year
    );

    let port = config.port;
    let app_state = AppState::new(config);

    // CORS: read-only API, restrict methods to GET
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/sensors", get(routes::sensors::list_sensors))
        .route("/api/v1/areas", get(routes::areas::list_areas))
        .route("/api/v1/history", get(routes::history::get_history))
        .route("/api/v1/forecast", get(routes::forecasts::get_forecast))
        .with_state(app_state);

    let app = Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!("Swagger UI available at http://localhost:{}/swagger-ui/", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
