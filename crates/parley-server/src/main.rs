use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::require_auth;
use parley_api::routes;
use parley_api::service::ChatService;
use parley_db::Database;
use parley_gateway::connection::{self, GatewayConfig};
use parley_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    gateway_config: GatewayConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let enforce_room_membership = std::env::var("PARLEY_ENFORCE_ROOM_MEMBERSHIP")
        .map(|v| v != "0")
        .unwrap_or(true);

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let service = ChatService::new(db.clone(), dispatcher.clone());

    let state = ServerState {
        db,
        dispatcher,
        gateway_config: GatewayConfig {
            jwt_secret,
            enforce_room_membership,
        },
    };

    // Routes
    let chat_routes = Router::new()
        .route("/chat", post(routes::create_conversation))
        .route("/chat", get(routes::list_conversations))
        .route("/chat/{conversation_id}", post(routes::send_message))
        .route("/chat/{conversation_id}", get(routes::get_conversation))
        .route("/chat/{conversation_id}/hide", delete(routes::hide_conversation))
        .route(
            "/chat/{conversation_id}/messages/{message_id}",
            delete(routes::hide_message),
        )
        .route(
            "/chat/{conversation_id}/messages/{message_id}/for-all",
            delete(routes::delete_message_for_all),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(service);

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(state);

    let app = Router::new()
        .merge(chat_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, state.gateway_config)
    })
}
