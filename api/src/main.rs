use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use walkworthy_scan::Scanner;
use walkworthy_scan::config::ScanConfig;
use walkworthy_scan::secrets::PgSecretStore;
use walkworthy_scan::store::PgKvStore;
use walkworthy_scan::verses::LocalVerseLibrary;

mod auth;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "WalkWorthy API",
        version = "0.1.0",
        description = "Scan trigger, encouragement delivery and verse bridge for the WalkWorthy app."
    ),
    paths(
        routes::health::health_check,
        routes::scan::trigger_scan,
        routes::encouragements::next_encouragement,
        routes::encouragements::acknowledge,
        routes::verses::verse_rpc,
    ),
    components(schemas(
        HealthResponse,
        walkworthy_core::error::ApiError,
        walkworthy_core::records::ScanStatus,
        walkworthy_core::translation::Translation,
        routes::scan::ScanAccepted,
        routes::encouragements::NextEncouragementResponse,
        routes::encouragements::AckRequest,
        routes::encouragements::AckResponse,
    )),
    modifiers(&CallerAddon)
)]
struct ApiDoc;

struct CallerAddon;

impl utoipa::Modify for CallerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "user_sub",
            utoipa::openapi::security::SecurityScheme::ApiKey(
                utoipa::openapi::security::ApiKey::Header(
                    utoipa::openapi::security::ApiKeyValue::new(auth::USER_SUB_HEADER),
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "walkworthy_api=debug,walkworthy_scan=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = ScanConfig::from_env().expect("invalid scan configuration");
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let scanner = Scanner::from_config(
        &config,
        Arc::new(PgKvStore::new(pool.clone())),
        Arc::new(PgSecretStore::new(pool.clone())),
        reqwest::Client::new(),
    )
    .await
    .expect("Failed to build scan pipeline");

    let app_state = state::AppState {
        db: pool,
        scanner: Arc::new(scanner),
        verse_library: Arc::new(LocalVerseLibrary::new(config.verses.default_translation)),
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::scan::router().layer(middleware::rate_limit::scan_layer()))
        .merge(routes::encouragements::router().layer(middleware::rate_limit::read_layer()))
        .merge(routes::verses::router().layer(middleware::rate_limit::read_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(
        %addr,
        verse_mode = ?config.verses.mode,
        model = %config.model.model,
        "WalkWorthy API listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
