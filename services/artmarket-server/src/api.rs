//! REST handlers
//!
//! Every response carries the `{success, ...}` envelope. Domain errors map to
//! HTTP status codes through [`MarketError::status_code`]; fan-out publishes
//! never fail a request, and every event is published only after the write it
//! announces has committed to its store.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use artmarket_auction::StartAuction;
use artmarket_auth::AuthUser;
use artmarket_chat::{MessageType, OfferDetails};
use artmarket_realtime::{Room, ServerEvent};
use artmarket_types::{BidId, ConversationId, ItemId, MarketError, MessageId, Role, SaleType, UserId};

use crate::AppState;

// ============================================================================
// Response Envelope
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok<T: Serialize>(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: serde_json::to_value(data).ok(),
        })
    }
}

/// Domain error carrier with an HTTP mapping
pub struct ApiError(MarketError);

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = artmarket_types::ErrorBody::from(&self.0);
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Health and Tokens
// ============================================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "artmarket",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    username: String,
    role: Role,
    /// Reuse an existing identity; a fresh one is minted otherwise
    user_id: Option<String>,
}

/// Dev token issuing. Identity lives outside this system; this endpoint
/// stands in for the external identity service.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(MarketError::validation("Username is required").into());
    }
    let user_id = match req.user_id {
        Some(raw) => UserId::parse(&raw)
            .map_err(|_| MarketError::validation("Invalid user id"))?,
        None => UserId::new(),
    };

    let token = state
        .jwt
        .issue(&user_id, username, req.role)
        .map_err(|e| MarketError::Validation(e.client_message()))?;

    Ok(ApiResponse::ok(serde_json::json!({
        "token": token,
        "user_id": user_id,
        "username": username,
        "role": req.role,
    })))
}

// ============================================================================
// Items
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    title: String,
    price: Decimal,
}

pub async fn create_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let item = state
        .house
        .create_item(auth.id, &auth.username, auth.role, &req.title, req.price)?;
    info!(item = %item.id, artist = %auth.username, "item listed");
    Ok((StatusCode::CREATED, ApiResponse::ok(item)))
}

pub async fn list_items(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ApiResponse::ok(state.house.items().list())
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ItemId>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.house.items().get(&id)?))
}

// ============================================================================
// Auction Lifecycle
// ============================================================================

pub async fn start_auction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
    Json(params): Json<StartAuction>,
) -> ApiResult<impl IntoResponse> {
    let item = state.house.start_auction(&auth.id, auth.role, &id, params)?;

    // The item transition is authoritative; the chat room is a companion
    let auction = item
        .auction
        .as_ref()
        .ok_or_else(|| MarketError::not_found("Auction"))?;
    let chat_id =
        state
            .auction_chats
            .create(&id, &auth.id, &auth.username, auction.starting_price);

    if let Some(end_time) = auction.end_time {
        state.hub.publish(
            Room::Auction(id.clone()),
            ServerEvent::AuctionStarted {
                item_id: id,
                title: item.title.clone(),
                starting_price: auction.starting_price,
                end_time,
            },
        );
    }

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(serde_json::json!({
            "item": item,
            "auction_chat_id": chat_id,
        })),
    ))
}

pub async fn join_auction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
) -> ApiResult<impl IntoResponse> {
    let time_remaining = state.house.check_joinable(auth.role, &id)?;
    let chat_id = state
        .auction_chats
        .join(&id, &auth.id, &auth.username, auth.role)?;

    state.hub.publish(
        Room::Auction(id.clone()),
        ServerEvent::UserJoined {
            item_id: id.clone(),
            username: auth.username,
        },
    );

    Ok(ApiResponse::ok(serde_json::json!({
        "auction_chat_id": chat_id,
        "item": state.house.items().get(&id)?,
        "time_remaining": time_remaining,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    amount: Decimal,
}

pub async fn place_auction_bid(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
    Json(req): Json<BidRequest>,
) -> ApiResult<impl IntoResponse> {
    let receipt = state
        .house
        .place_bid(&auth.id, &auth.username, auth.role, &id, req.amount)?;

    if let Err(e) = state
        .auction_chats
        .record_bid(&id, &auth.id, &auth.username, req.amount)
    {
        warn!(item = %id, error = %e, "bid admitted but chat marker failed");
    }

    state.hub.publish(
        Room::Auction(id.clone()),
        ServerEvent::NewBid {
            item_id: id,
            bidder_name: auth.username,
            amount: req.amount,
            current_bid: receipt.current_bid,
            participant_count: receipt.participant_count,
        },
    );

    Ok(ApiResponse::ok(serde_json::json!({
        "current_bid": receipt.current_bid,
        "bid_count": receipt.bid_count,
        "time_remaining": receipt.time_remaining_ms,
    })))
}

pub async fn get_auction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ItemId>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state.house.snapshot(&id)?;
    let item = state.house.items().get(&id)?;
    Ok(ApiResponse::ok(serde_json::json!({
        "auction": snapshot.auction,
        "time_remaining": snapshot.time_remaining_ms,
        "is_expired": snapshot.is_expired,
        "auction_chat_id": state.auction_chats.room_id(&id),
        "item": {
            "id": item.id,
            "title": item.title,
            "artist_name": item.artist_name,
            "status": item.status,
            "price": item.price,
        },
    })))
}

pub async fn end_auction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.house.end_auction(&auth.id, auth.role, &id)?;

    let summary = match &outcome.winner_name {
        Some(name) => format!("Auction ended. Sold to {} for {}", name, outcome.final_bid),
        None => "Auction ended with no bids".to_string(),
    };
    if let Err(e) = state.auction_chats.close(&id, &summary) {
        warn!(item = %id, error = %e, "auction ended but chat close failed");
    }

    state.hub.publish(
        Room::Auction(id.clone()),
        ServerEvent::AuctionEnded {
            item_id: id,
            winner_name: outcome.winner_name.clone(),
            final_bid: outcome.final_bid,
        },
    );

    Ok(ApiResponse::ok(serde_json::json!({
        "winner": outcome.winner,
        "winner_name": outcome.winner_name,
        "final_bid": outcome.final_bid,
    })))
}

// ============================================================================
// Auction Chat
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    limit: Option<usize>,
}

pub async fn get_auction_chat(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<ItemId>,
    Query(params): Query<ChatQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(50);
    let messages = state.auction_chats.recent_messages(&id, limit)?;
    let chat = state.auction_chats.get(&id)?;
    Ok(ApiResponse::ok(serde_json::json!({
        "auction_chat_id": chat.id,
        "is_active": chat.is_active,
        "messages": messages,
        "participants": chat.participants,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ChatPostRequest {
    content: String,
}

pub async fn post_auction_chat(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
    Json(req): Json<ChatPostRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .auction_chats
        .post(&id, &auth.id, &auth.username, &req.content)?;

    state.hub.publish(
        Room::Auction(id.clone()),
        ServerEvent::AuctionMessage {
            item_id: id,
            message: message.clone(),
        },
    );

    Ok((StatusCode::CREATED, ApiResponse::ok(message)))
}

// ============================================================================
// Bids and Offers (sale-type dispatch)
// ============================================================================

/// Single bid endpoint dispatching on the item's sale type: auctioned items
/// take auction bids, direct-sale items take offers.
pub async fn submit_bid(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
    Json(req): Json<BidRequest>,
) -> ApiResult<Response> {
    let item = state.house.items().get(&id)?;
    match item.sale_type {
        SaleType::Auction => {
            let response =
                place_auction_bid(State(state), auth, Path(id), Json(req)).await?;
            Ok(response.into_response())
        }
        SaleType::DirectSale => {
            let receipt =
                state
                    .house
                    .submit_offer(&auth.id, &auth.username, auth.role, &id, req.amount)?;
            Ok((
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({
                    "bid_id": receipt.bid_id,
                    "current_bid": receipt.current_bid,
                    "offer_count": receipt.offer_count,
                })),
            )
                .into_response())
        }
    }
}

pub async fn list_bids(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ItemId>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.house.list_offers(&auth.id, &id)?))
}

pub async fn accept_bid(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((id, bid_id)): Path<(ItemId, BidId)>,
) -> ApiResult<impl IntoResponse> {
    let resolution = state.house.accept_offer(&auth.id, &id, &bid_id)?;

    // Tell the buyer their offer won
    state.hub.publish(
        Room::User(resolution.buyer.clone()),
        ServerEvent::AuctionEnded {
            item_id: id,
            winner_name: None,
            final_bid: resolution.amount,
        },
    );

    Ok(ApiResponse::ok(serde_json::json!({
        "order_id": resolution.order.id,
        "buyer": resolution.buyer,
        "amount": resolution.amount,
    })))
}

// ============================================================================
// Conversations
// ============================================================================

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> impl IntoResponse {
    ApiResponse::ok(state.conversations.list_for_user(&auth.id))
}

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    item_id: ItemId,
}

pub async fn open_conversation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<OpenConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let item = state.house.items().get(&req.item_id)?;
    let (conversation, created) =
        state
            .conversations
            .open(&auth.id, auth.role, &item.artist_id, &req.item_id)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, ApiResponse::ok(conversation)))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ConversationId>,
    Query(params): Query<MessagesQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state.conversations.messages(
        &id,
        &auth.id,
        params.page.unwrap_or(1),
        params.limit.unwrap_or(50),
    )?;
    Ok(ApiResponse::ok(page))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    content: String,
    #[serde(default)]
    message_type: Option<MessageType>,
    offer_details: Option<OfferDetails>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.conversations.send(
        &auth.id,
        &id,
        &req.content,
        req.message_type.unwrap_or(MessageType::Text),
        req.offer_details,
    )?;

    // The conversation room covers open clients; the receiver's personal
    // room covers everyone else
    let event = ServerEvent::NewMessage {
        conversation_id: id.clone(),
        message: message.clone(),
    };
    state.hub.publish(Room::Conversation(id), event.clone());
    state
        .hub
        .publish(Room::User(message.receiver_id.clone()), event);

    Ok((StatusCode::CREATED, ApiResponse::ok(message)))
}

#[derive(Debug, Deserialize)]
pub struct OfferResponseRequest {
    status: String,
}

pub async fn respond_to_offer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<MessageId>,
    Json(req): Json<OfferResponseRequest>,
) -> ApiResult<impl IntoResponse> {
    let accept = match req.status.as_str() {
        "accepted" => true,
        "declined" => false,
        _ => {
            return Err(
                MarketError::validation("Status must be 'accepted' or 'declined'").into(),
            )
        }
    };

    let message = state.conversations.respond_to_offer(&id, &auth.id, accept)?;
    let status = message
        .offer_details
        .as_ref()
        .map(|d| d.status)
        .ok_or_else(|| MarketError::not_found("Offer"))?;

    state.hub.publish(
        Room::Conversation(message.conversation_id.clone()),
        ServerEvent::AuctionUpdate {
            conversation_id: message.conversation_id.clone(),
            message_id: message.id.clone(),
            status,
        },
    );

    Ok(ApiResponse::ok(message))
}
