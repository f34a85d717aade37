use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use bazaar_api::middleware::require_auth;
use bazaar_api::storage::Storage;
use bazaar_api::{AppState, AppStateInner, chats, token};
use bazaar_chat::token::run_sweep_loop;
use bazaar_chat::{ChatService, TokenBroker};
use bazaar_gateway::dispatcher::Dispatcher;
use bazaar_gateway::{Gateway, connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("BAZAAR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("BAZAAR_DB_PATH").unwrap_or_else(|_| "bazaar.db".into());
    let host = std::env::var("BAZAAR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BAZAAR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let storage_dir: PathBuf = std::env::var("BAZAAR_STORAGE_DIR")
        .unwrap_or_else(|_| "./uploads".into())
        .into();
    let public_url = std::env::var("BAZAAR_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}/uploads", port));

    // Init database and upload storage
    let db = Arc::new(bazaar_db::Database::open(&PathBuf::from(&db_path))?);
    let storage = Storage::new(storage_dir.clone(), &public_url).await?;

    // Shared state: the dispatcher doubles as the chat core's event sink
    let dispatcher = Dispatcher::new();
    let tokens = Arc::new(TokenBroker::new());
    let chat_service = Arc::new(ChatService::new(db.clone(), Arc::new(dispatcher.clone())));

    // Background token sweep
    tokio::spawn(run_sweep_loop(tokens.clone()));

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        chats: chat_service.clone(),
        tokens: tokens.clone(),
        storage,
        jwt_secret,
    });

    let gateway = Gateway {
        dispatcher,
        tokens,
        chats: chat_service,
        db,
    };

    // Routes
    let message_routes = Router::new()
        .route("/messages/token", post(token::issue_token))
        .route("/messages", get(chats::list_chats).post(chats::create_chat))
        .route(
            "/messages/{chat_id}",
            get(chats::get_chat_messages).post(chats::send_chat_message),
        )
        .route("/messages/{chat_id}/read", post(chats::mark_read))
        .route("/messages/{chat_id}/image", post(chats::upload_image))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .layer(DefaultBodyLimit::max(6 * 1000 * 1000))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(message_routes)
        .merge(ws_route)
        .route("/health", get(health))
        .nest_service("/uploads", ServeDir::new(&storage_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Bazaar chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}

async fn health() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
