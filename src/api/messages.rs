use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

use crate::api::middleware::CurrentUser;
use crate::api::state::AppState;
use crate::db::{Message, MessageRepository, User, UserRepository};
use crate::error::AppError;
use crate::live::LiveEvent;

const MAX_TEXT_LEN: usize = 4096;

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub text: Option<String>,
}

/// Trim and drop empty strings
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_length(text: Option<&str>) -> Result<(), AppError> {
    match text {
        Some(t) if t.chars().count() > MAX_TEXT_LEN => Err(AppError::BadRequest(format!(
            "Message must be at most {} characters",
            MAX_TEXT_LEN
        ))),
        _ => Ok(()),
    }
}

/// Load a message the current user is allowed to modify
async fn owned_message(state: &AppState, id: &str, user: &User) -> Result<Message, AppError> {
    let message = MessageRepository::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

    if message.sender_id != user.id {
        return Err(AppError::Forbidden);
    }

    Ok(message)
}

/// GET /api/messages/users (requires auth)
pub async fn get_users_for_sidebar(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<User>>, AppError> {
    let users = UserRepository::list_except(&state.db, &user.id).await?;
    Ok(Json(users))
}

/// GET /api/messages/:id (requires auth)
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(peer_id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    let messages = MessageRepository::list_conversation(&state.db, &user.id, &peer_id).await?;
    Ok(Json(messages))
}

/// POST /api/messages/send/:id (requires auth)
pub async fn send_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(receiver_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let text = normalize(req.text);
    let image = normalize(req.image);

    if text.is_none() && image.is_none() {
        return Err(AppError::BadRequest(
            "Message must have text or an image".to_string(),
        ));
    }
    check_length(text.as_deref())?;

    if UserRepository::get_by_id(&state.db, &receiver_id).await?.is_none() {
        return Err(AppError::NotFound("Receiver not found".to_string()));
    }

    let message = MessageRepository::create(
        &state.db,
        &user.id,
        &receiver_id,
        text.as_deref(),
        image.as_deref(),
    )
    .await?;

    tracing::debug!(message_id = %message.id, sender = %user.id, receiver = %receiver_id, "message sent");
    state.hub.publish(LiveEvent::NewMessage { message: message.clone() });

    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /api/messages/update/:id (requires auth)
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateMessageRequest>,
) -> Result<Json<Message>, AppError> {
    let existing = owned_message(&state, &id, &user).await?;

    if existing.deleted {
        return Err(AppError::BadRequest("Cannot edit a deleted message".to_string()));
    }

    let text = normalize(req.text);
    if text.is_none() && !existing.has_image() {
        return Err(AppError::BadRequest("Message text cannot be empty".to_string()));
    }
    check_length(text.as_deref())?;

    let message = MessageRepository::update_text(&state.db, &id, text.as_deref())
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

    tracing::debug!(message_id = %message.id, "message edited");
    state.hub.publish(LiveEvent::MessageUpdated { message: message.clone() });

    Ok(Json(message))
}

/// DELETE /api/messages/delete/:id (requires auth)
///
/// Idempotent: deleting a tombstone returns it unchanged.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Message>, AppError> {
    let existing = owned_message(&state, &id, &user).await?;

    if existing.deleted {
        return Ok(Json(existing));
    }

    let message = MessageRepository::mark_deleted(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

    tracing::debug!(message_id = %message.id, "message deleted");
    state.hub.publish(LiveEvent::MessageDeleted { message: message.clone() });

    Ok(Json(message))
}
