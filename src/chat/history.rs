use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::chat::hub::ChatHub;
use crate::chat::message::{ChatMessage, MessageKind};
use crate::chat::rooms;
use crate::chat::store::HISTORY_LIMIT;
use crate::identity::UserIdentity;
use crate::AppResult;

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(rename = "type")]
    kind: Option<MessageKind>,
    target_user_id: Option<String>,
}

/// Initial-load history over plain HTTP; the socket's `fetchHistory` serves
/// the same data once connected.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_history(
    Path(room_id): Path<String>,
    Query(HistoryQuery {
        kind,
        target_user_id,
    }): Query<HistoryQuery>,
    State(hub): State<Arc<ChatHub>>,
    user: UserIdentity,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let room = match (kind, target_user_id) {
        (Some(MessageKind::Private), Some(target)) => rooms::resolve(&user.user_id, &target)?,
        _ => room_id,
    };
    let messages = hub.store().list_by_room(&room, HISTORY_LIMIT).await?;
    Ok(Json(messages))
}
