use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::ValidatedJson;
use angel_shared::types::auth::AuthUser;
use angel_shared::types::{ApiResponse, Created, Paginated, PaginationParams};

use crate::models::conversation::{
    Conversation, ConversationView, DeletionOutcome, Message, MessageView, NewMessage, SenderSummary,
};
use crate::models::user::ParticipantSummary;
use crate::routes::parse_id;
use crate::schema::{conversations, messages, users};
use crate::AppState;

const DEFAULT_MESSAGE_LIMIT: i64 = 20;

fn conversation_id(raw: &str) -> AppResult<Uuid> {
    parse_id(raw, ErrorCode::ConversationNotFound, "Conversation not found")
}

fn not_found() -> AppError {
    AppError::new(ErrorCode::ConversationNotFound, "Conversation not found")
}

/// Conversations the user takes part in, newest activity first. Includes
/// ones the user has hidden.
fn involving(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<Conversation>> {
    Ok(conversations::table
        .filter(conversations::participants.contains(vec![user_id]))
        .order(conversations::updated_at.desc())
        .select(Conversation::as_select())
        .load(conn)?)
}

/// A conversation the caller participates in and has not hidden.
fn find_visible(conn: &mut PgConnection, id: Uuid, user_id: Uuid) -> AppResult<Conversation> {
    conversations::table
        .find(id)
        .select(Conversation::as_select())
        .first(conn)
        .optional()?
        .filter(|c| c.is_visible_to(user_id))
        .ok_or_else(not_found)
}

fn save(conn: &mut PgConnection, conversation: &mut Conversation) -> AppResult<()> {
    conversation.before_save(Utc::now());
    diesel::update(conversations::table.find(conversation.id))
        .set(&*conversation)
        .execute(conn)?;
    Ok(())
}

/// Stamps `read_at` on everything addressed to `user_id` that is still unread.
fn mark_messages_read(conn: &mut PgConnection, conversation: &mut Conversation, user_id: Uuid) -> AppResult<usize> {
    let marked = diesel::update(
        messages::table
            .filter(messages::conversation_id.eq(conversation.id))
            .filter(messages::recipient_id.eq(user_id))
            .filter(messages::read_at.is_null()),
    )
    .set(messages::read_at.eq(Utc::now()))
    .execute(conn)?;

    conversation.mark_read_by(user_id);
    save(conn, conversation)?;
    Ok(marked)
}

fn with_participants(conn: &mut PgConnection, list: Vec<Conversation>) -> AppResult<Vec<ConversationView>> {
    let ids: Vec<Uuid> = list.iter().flat_map(|c| c.participants.iter().copied()).collect();
    let people: HashMap<Uuid, ParticipantSummary> = users::table
        .filter(users::id.eq_any(ids))
        .select(ParticipantSummary::as_select())
        .load::<ParticipantSummary>(conn)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    Ok(list
        .into_iter()
        .map(|c| {
            let participants = c.participants.iter().filter_map(|id| people.get(id).cloned()).collect();
            c.view(participants)
        })
        .collect())
}

fn with_senders(conn: &mut PgConnection, list: Vec<Message>) -> AppResult<Vec<MessageView>> {
    let ids: Vec<Uuid> = list.iter().map(|m| m.sender_id).collect();
    let senders: HashMap<Uuid, SenderSummary> = users::table
        .filter(users::id.eq_any(ids))
        .select(SenderSummary::as_select())
        .load::<SenderSummary>(conn)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    Ok(list
        .into_iter()
        .map(|message| {
            let sender_info = senders.get(&message.sender_id).cloned();
            MessageView { message, sender_info }
        })
        .collect())
}

// --- GET /conversations ---

pub async fn list_conversations(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConversationView>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let visible: Vec<Conversation> = involving(&mut conn, user.id)?
        .into_iter()
        .filter(|c| c.is_visible_to(user.id))
        .collect();

    Ok(Json(ApiResponse::ok(with_participants(&mut conn, visible)?)))
}

// --- POST /conversations ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub recipient_id: Uuid,
    #[validate(length(min = 1, max = 5000, message = "Initial message must be between 1 and 5000 characters"))]
    pub initial_message: String,
}

pub async fn create_conversation(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateConversationRequest>,
) -> AppResult<Created<ConversationView>> {
    if req.recipient_id == user.id {
        return Err(AppError::new(ErrorCode::CannotMessageSelf, "Cannot start a conversation with yourself"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let recipient_exists: i64 = users::table
        .filter(users::id.eq(req.recipient_id))
        .count()
        .get_result(&mut conn)?;
    if recipient_exists == 0 {
        return Err(AppError::new(ErrorCode::RecipientNotFound, "Recipient not found"));
    }

    let existing = involving(&mut conn, user.id)?
        .into_iter()
        .find(|c| c.has_participant(req.recipient_id) && c.is_visible_to(user.id));
    if let Some(existing) = existing {
        return Err(AppError::with_details(
            ErrorCode::ConversationExists,
            "Conversation already exists",
            serde_json::json!({ "conversationId": existing.id }),
        ));
    }

    let conversation = Conversation::open(user.id, req.recipient_id, &req.initial_message, Utc::now());
    let conversation: Conversation = diesel::insert_into(conversations::table)
        .values(&conversation)
        .returning(Conversation::as_returning())
        .get_result(&mut conn)?;

    let first = NewMessage::new(conversation.id, user.id, req.recipient_id, req.initial_message, Vec::new());
    diesel::insert_into(messages::table).values(&first).execute(&mut conn)?;

    tracing::info!(
        conversation_id = %conversation.id,
        sender_id = %user.id,
        recipient_id = %req.recipient_id,
        "conversation created"
    );

    let view = with_participants(&mut conn, vec![conversation])?
        .pop()
        .ok_or_else(|| AppError::internal("created conversation vanished"))?;
    Ok(Created(ApiResponse::ok(view)))
}

// --- GET /conversations/:id ---

pub async fn get_conversation(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<ConversationView>>> {
    let id = conversation_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let conversation = find_visible(&mut conn, id, user.id)?;
    let view = with_participants(&mut conn, vec![conversation])?.pop().ok_or_else(not_found)?;
    Ok(Json(ApiResponse::ok(view)))
}

// --- DELETE /conversations/:id ---

/// Hides the conversation for the caller; once both sides hid it, it is removed.
pub async fn delete_conversation(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let id = conversation_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut conversation = find_visible(&mut conn, id, user.id)?;
    match conversation.delete_for(user.id) {
        DeletionOutcome::HiddenForCaller => {
            save(&mut conn, &mut conversation)?;
            tracing::info!(conversation_id = %id, user_id = %user.id, "conversation hidden");
        }
        DeletionOutcome::Purge => {
            let flagged = diesel::update(messages::table.filter(messages::conversation_id.eq(id)))
                .set(messages::is_deleted.eq(true))
                .execute(&mut conn)?;
            diesel::delete(conversations::table.find(id)).execute(&mut conn)?;
            tracing::info!(conversation_id = %id, messages = flagged, "conversation removed");
        }
    }

    Ok(Json(ApiResponse::message("Conversation deleted")))
}

// --- GET /conversations/:id/messages ---

/// Newest first. Reading also marks the caller's messages as read.
pub async fn list_messages(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<MessageView>>>> {
    let id = conversation_id(&raw_id)?;
    let page = params.resolve(DEFAULT_MESSAGE_LIMIT)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut conversation = find_visible(&mut conn, id, user.id)?;

    let total: i64 = messages::table
        .filter(messages::conversation_id.eq(id))
        .filter(messages::is_deleted.eq(false))
        .count()
        .get_result(&mut conn)?;

    let found: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(id))
        .filter(messages::is_deleted.eq(false))
        .order((messages::created_at.desc(), messages::id.desc()))
        .limit(page.limit())
        .offset(page.offset())
        .select(Message::as_select())
        .load(&mut conn)?;

    mark_messages_read(&mut conn, &mut conversation, user.id)?;

    let items = with_senders(&mut conn, found)?;
    Ok(Json(ApiResponse::ok(Paginated::new(items, total, &page))))
}

// --- POST /conversations/:id/messages ---

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 5000, message = "Message must be between 1 and 5000 characters"))]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

pub async fn send_message(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    ValidatedJson(req): ValidatedJson<SendMessageRequest>,
) -> AppResult<Created<MessageView>> {
    let id = conversation_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut conversation: Conversation = conversations::table
        .find(id)
        .select(Conversation::as_select())
        .first(&mut conn)
        .optional()?
        .filter(|c| c.has_participant(user.id))
        .ok_or_else(not_found)?;

    let recipient_id = conversation.record_message(user.id, &req.content, Utc::now())?;

    let new_message = NewMessage::new(id, user.id, recipient_id, req.content, req.attachments);
    let message: Message = diesel::insert_into(messages::table)
        .values(&new_message)
        .returning(Message::as_returning())
        .get_result(&mut conn)?;
    save(&mut conn, &mut conversation)?;

    tracing::info!(conversation_id = %id, message_id = %message.id, sender_id = %user.id, "message sent");

    let view = with_senders(&mut conn, vec![message])?
        .pop()
        .ok_or_else(|| AppError::internal("sent message vanished"))?;
    Ok(Created(ApiResponse::ok(view)))
}

// --- PUT /conversations/:id/read ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedRead {
    pub marked_count: usize,
}

pub async fn mark_read(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<MarkedRead>>> {
    let id = conversation_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut conversation = find_visible(&mut conn, id, user.id)?;
    let marked_count = mark_messages_read(&mut conn, &mut conversation, user.id)?;

    tracing::info!(conversation_id = %id, user_id = %user.id, marked_count, "messages marked read");

    Ok(Json(ApiResponse::ok_with_message(MarkedRead { marked_count }, "Messages marked as read")))
}

// --- PUT /conversations/:id/block ---

pub async fn block(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let id = conversation_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut conversation = find_visible(&mut conn, id, user.id)?;
    conversation.block(user.id)?;
    save(&mut conn, &mut conversation)?;

    tracing::info!(conversation_id = %id, blocked_by = %user.id, "conversation blocked");

    Ok(Json(ApiResponse::message("Conversation blocked")))
}

// --- PUT /conversations/:id/unblock ---

pub async fn unblock(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let id = conversation_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut conversation = find_visible(&mut conn, id, user.id)?;
    conversation.unblock(user.id)?;
    save(&mut conn, &mut conversation)?;

    tracing::info!(conversation_id = %id, user_id = %user.id, "conversation unblocked");

    Ok(Json(ApiResponse::message("Conversation unblocked")))
}

// --- GET /unread-count ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadTotal {
    pub unread_count: i64,
}

fn unread_total(list: &[Conversation], user_id: Uuid) -> i64 {
    list.iter()
        .filter(|c| c.is_visible_to(user_id))
        .map(|c| i64::from(c.unread_count.get(user_id)))
        .sum()
}

pub async fn unread_count(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UnreadTotal>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let list = involving(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(UnreadTotal { unread_count: unread_total(&list, user.id) })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_total_skips_hidden_conversations() {
        let me = Uuid::now_v7();
        let a = Conversation::open(Uuid::now_v7(), me, "hello", Utc::now());
        let mut b = Conversation::open(Uuid::now_v7(), me, "hey", Utc::now());
        let mut c = Conversation::open(Uuid::now_v7(), me, "yo", Utc::now());
        let other = c.participants[0];
        c.record_message(other, "again", Utc::now()).unwrap();
        b.delete_for(me);

        assert_eq!(unread_total(&[a, b, c], me), 3);
    }

    #[test]
    fn send_request_rules() {
        let empty: SendMessageRequest = serde_json::from_str(r#"{"content":""}"#).unwrap();
        assert!(empty.validate().is_err());
        assert!(empty.attachments.is_empty());

        let ok: SendMessageRequest = serde_json::from_str(r#"{"content":"hi","attachments":["https://cdn/x.png"]}"#).unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn create_request_needs_a_uuid_recipient() {
        assert!(serde_json::from_str::<CreateConversationRequest>(r#"{"recipientId":"nope","initialMessage":"hi"}"#).is_err());
    }
}
