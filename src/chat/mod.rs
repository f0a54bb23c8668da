pub mod client;
pub mod error;
pub mod events;
pub mod hub;
pub mod message;
pub mod presence;
pub mod rooms;
pub mod store;

mod history;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/history/{room_id}", get(history::chat_history))
}
