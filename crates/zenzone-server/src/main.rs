mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use zenzone_api::auth::{AppState, AppStateInner, decode_token};
use zenzone_api::error::ApiError;
use zenzone_gateway::broker::Broker;
use zenzone_gateway::connection::{self, GatewayContext};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zenzone=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(zenzone_db::Database::open(&config.db_path)?);

    // Shared state
    let broker = Broker::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        broker: broker.clone(),
    });
    let gateway = GatewayContext {
        broker,
        db,
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(zenzone_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("ZenZone server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as `?token=`. Without either the client must send `identify`.
async fn ws_upgrade(
    State(ctx): State<GatewayContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or(query.token);

    let response = match token {
        Some(token) => {
            let claims = decode_token(&ctx.jwt_secret, &token)?;
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, ctx, claims)
            })
        }
        None => ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx)),
    };

    Ok(response.into_response())
}
