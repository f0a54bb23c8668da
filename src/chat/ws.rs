use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::chat::events::ClientEvent;
use crate::chat::hub::ChatHub;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(hub): State<Arc<ChatHub>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

/// One task per connection: frames queued by the hub are drained into the
/// socket while inbound text frames are parsed and dispatched. Anything that
/// is not a well-formed event is dropped, not answered.
async fn client_session(socket: WebSocket, hub: Arc<ChatHub>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = hub.register(tx);

    let (mut sender, mut receiver) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(frame.into()).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let event: ClientEvent = match serde_json::from_str(text.as_str()) {
            Ok(event) => event,
            Err(err) => {
                debug!(%conn, error = %err, "unparseable frame dropped");
                continue;
            }
        };
        hub.handle_event(conn, event).await;
    }

    hub.disconnect(conn);
    forward.abort();
}
