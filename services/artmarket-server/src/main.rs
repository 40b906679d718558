//! Artmarket Server - Art Marketplace with Live Auctions
//!
//! REST + WebSocket server wiring the auction house, the messaging stores
//! and the realtime fan-out hub together.
//!
//! # Quick Start
//!
//! ```bash
//! # Start the server
//! cargo run -p artmarket-server
//!
//! # Custom port and secret
//! cargo run -p artmarket-server -- --port 9000 --jwt-secret my-secret
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::{header, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use artmarket_auction::AuctionHouse;
use artmarket_auth::JwtService;
use artmarket_chat::{AuctionChatStore, ConversationStore};
use artmarket_realtime::{FanoutHub, DEFAULT_FANOUT_CAPACITY};

mod api;
mod ws;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "artmarket")]
#[command(about = "Artmarket - art marketplace with live auctions")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8888")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// JWT signing secret; falls back to the JWT_SECRET environment variable
    #[arg(long)]
    jwt_secret: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    /// Items, bid ledgers and orders
    pub house: AuctionHouse,
    /// Buyer/artist conversations
    pub conversations: ConversationStore,
    /// Per-auction chat rooms
    pub auction_chats: AuctionChatStore,
    /// Realtime fan-out hub
    pub hub: FanoutHub,
    /// Token service
    pub jwt: JwtService,
}

impl FromRef<AppState> for JwtService {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let secret = cli
        .jwt_secret
        .or_else(|| std::env::var("JWT_SECRET").ok())
        .unwrap_or_else(|| "artmarket-dev-secret-change-in-production".to_string());

    info!("Starting Artmarket Server");
    info!("======================================");
    info!("  Bind: {}:{}", cli.bind, cli.port);
    info!("======================================");

    let state = Arc::new(AppState {
        house: AuctionHouse::new(),
        conversations: ConversationStore::new(),
        auction_chats: AuctionChatStore::new(),
        hub: FanoutHub::new(DEFAULT_FANOUT_CAPACITY),
        jwt: JwtService::new(&secret),
    });

    let app = Router::new()
        // Health
        .route("/health", get(api::health))
        // Dev token issuing (identity lives outside this system)
        .route("/api/auth/token", post(api::issue_token))
        // Items
        .route("/api/items", post(api::create_item).get(api::list_items))
        .route("/api/items/:id", get(api::get_item))
        // Auction lifecycle
        .route("/api/items/:id/auction/start", post(api::start_auction))
        .route("/api/items/:id/auction/join", post(api::join_auction))
        .route("/api/items/:id/auction/bid", post(api::place_auction_bid))
        .route("/api/items/:id/auction", get(api::get_auction))
        .route("/api/items/:id/auction/end", post(api::end_auction))
        // Auction chat
        .route(
            "/api/items/:id/auction/chat",
            get(api::get_auction_chat).post(api::post_auction_chat),
        )
        // Bids and offers (sale-type dispatch)
        .route(
            "/api/items/:id/bids",
            post(api::submit_bid).get(api::list_bids),
        )
        .route("/api/items/:id/bids/:bid_id/accept", post(api::accept_bid))
        // Conversations
        .route(
            "/api/conversations",
            get(api::list_conversations).post(api::open_conversation),
        )
        .route(
            "/api/conversations/:id/messages",
            get(api::get_messages).post(api::send_message),
        )
        .route("/api/messages/:id/offer", patch(api::respond_to_offer))
        // WebSocket
        .route("/ws", get(ws::ws_handler))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!("Listening on http://{}", addr);
    info!("WebSocket: ws://{}/ws?token=...", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
