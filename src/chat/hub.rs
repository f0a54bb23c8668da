use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::error::ChatError;
use crate::chat::events::{
    ClientEvent, EditRequest, DeleteRequest, FetchHistory, Join, MarkOnline, ReactRequest,
    ServerEvent, TypingNotice, TypingSignal,
};
use crate::chat::message::{ChatMessage, MessageKind, NewMessage, RoomId, MAX_ATTACHMENT_BYTES};
use crate::chat::presence::{ConnId, PresenceRegistry, ACTIVITY_TIMEOUT, SWEEP_INTERVAL};
use crate::chat::rooms::{self, PUBLIC_ROOM};
use crate::chat::store::{MessageStore, HISTORY_LIMIT};

struct ConnHandle {
    /// Set once the connection announced itself with `markOnline`.
    identity: Option<String>,
    /// Pre-serialized frames; the transport task drains this.
    tx: mpsc::UnboundedSender<String>,
}

/// The realtime session hub: owns the connection table and the
/// room-subscriber registry, routes inbound events into the store and the
/// presence registry, and fans resulting state out to subscribers.
///
/// Side effects of any one event are a unicast to the caller, a broadcast to
/// one room, or a broadcast to all connections (online-user lists), and
/// never more than one fan-out.
pub struct ChatHub {
    store: MessageStore,
    presence: PresenceRegistry,
    conns: Mutex<HashMap<ConnId, ConnHandle>>,
    rooms: Mutex<HashMap<RoomId, HashSet<ConnId>>>,
}

impl ChatHub {
    pub fn new(store: MessageStore, presence: PresenceRegistry) -> Self {
        Self {
            store,
            presence,
            conns: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Attach a connection and hand back its id. `tx` receives every frame
    /// addressed to this connection from now on.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>) -> ConnId {
        let conn = Uuid::now_v7();
        self.conns
            .lock()
            .unwrap()
            .insert(conn, ConnHandle { identity: None, tx });
        debug!(%conn, "connection registered");
        conn
    }

    /// Tear a connection down: unsubscribe it everywhere, drop its presence
    /// entry (if it still owns one) and tell everyone who is left.
    pub fn disconnect(&self, conn: ConnId) {
        let handle = self.conns.lock().unwrap().remove(&conn);
        {
            let mut rooms = self.rooms.lock().unwrap();
            for members in rooms.values_mut() {
                members.remove(&conn);
            }
            rooms.retain(|_, members| !members.is_empty());
        }
        if let Some(identity) = handle.and_then(|h| h.identity) {
            if self.presence.remove_connection(&identity, conn) {
                info!(%conn, %identity, "user went offline");
                self.broadcast_online();
            }
        } else {
            debug!(%conn, "connection closed");
        }
    }

    /// Route one inbound event. Failures are unicast back to the caller as
    /// an `errorNotice` and never reach other room members.
    pub async fn handle_event(&self, conn: ConnId, event: ClientEvent) {
        let result = match event {
            ClientEvent::MarkOnline(p) => {
                self.on_mark_online(conn, p);
                Ok(())
            }
            ClientEvent::Join(p) => {
                self.on_join(conn, p);
                Ok(())
            }
            ClientEvent::FetchHistory(p) => self.on_fetch_history(conn, p).await,
            ClientEvent::Send(p) => self.on_send(conn, p).await,
            ClientEvent::EditRequest(p) => self.on_edit(p).await,
            ClientEvent::DeleteRequest(p) => self.on_delete(p).await,
            ClientEvent::ReactRequest(p) => self.on_react(p).await,
            ClientEvent::TypingStart(p) => {
                self.on_typing(conn, p, true);
                Ok(())
            }
            ClientEvent::TypingStop(p) => {
                self.on_typing(conn, p, false);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(%conn, error = %err, "chat event failed");
            self.unicast(conn, &ServerEvent::ErrorNotice(err.to_string()));
        }
    }

    fn on_mark_online(&self, conn: ConnId, p: MarkOnline) {
        if p.identity.is_empty() {
            warn!(%conn, "markOnline without identity ignored");
            return;
        }
        if let Some(handle) = self.conns.lock().unwrap().get_mut(&conn) {
            handle.identity = Some(p.identity.clone());
        }
        self.presence.mark_online(
            &p.identity,
            &p.display_name,
            p.avatar_ref,
            conn,
            OffsetDateTime::now_utc(),
        );
        info!(identity = %p.identity, display_name = %p.display_name, "user online");
        self.broadcast_online();
    }

    fn on_join(&self, conn: ConnId, p: Join) {
        self.rooms
            .lock()
            .unwrap()
            .entry(p.room_id.clone())
            .or_default()
            .insert(conn);
        let identity = self
            .conns
            .lock()
            .unwrap()
            .get(&conn)
            .and_then(|h| h.identity.clone());
        if let Some(identity) = identity {
            self.presence.set_current_room(&identity, &p.room_id);
        }
        debug!(%conn, room = %p.room_id, "joined room");
        self.broadcast_online();
    }

    async fn on_fetch_history(&self, conn: ConnId, p: FetchHistory) -> Result<(), ChatError> {
        let room = match &p.target_identity {
            Some(target) => rooms::resolve(&p.identity, target)?,
            None => p.room_id.unwrap_or_else(|| PUBLIC_ROOM.to_owned()),
        };
        let messages = self.store.list_by_room(&room, HISTORY_LIMIT).await?;
        debug!(%conn, room = %room, count = messages.len(), "history served");
        self.unicast(conn, &ServerEvent::History(messages));
        Ok(())
    }

    async fn on_send(&self, conn: ConnId, msg: NewMessage) -> Result<(), ChatError> {
        validate_new_message(&msg)?;
        let room = rooms::room_for(msg.kind, &msg.author_id, msg.recipient_id.as_ref())?;
        let stored = self.store.append(&room, &msg).await?;

        // the send itself counts as activity; a sender we have never seen
        // gets a minimal presence entry bound to this connection
        let now = OffsetDateTime::now_utc();
        if !self.presence.touch(&msg.author_id, now) {
            self.presence.mark_online(
                &msg.author_id,
                &msg.author_display_name,
                msg.avatar_ref.clone(),
                conn,
                now,
            );
            if let Some(handle) = self.conns.lock().unwrap().get_mut(&conn) {
                handle.identity.get_or_insert_with(|| msg.author_id.clone());
            }
        }

        debug!(room = %room, id = stored.id, author = %stored.author_id, "message stored");
        self.broadcast_room(&room, &ServerEvent::NewMessage(stored));
        Ok(())
    }

    async fn on_edit(&self, p: EditRequest) -> Result<(), ChatError> {
        let updated = self.store.edit(p.id, &p.author_id, &p.new_body).await?;
        self.presence.touch(&p.author_id, OffsetDateTime::now_utc());
        let room = routed_room(&updated)?;
        info!(id = updated.id, author = %p.author_id, "message edited");
        self.broadcast_room(&room, &ServerEvent::MessageUpdated(updated));
        Ok(())
    }

    async fn on_delete(&self, p: DeleteRequest) -> Result<(), ChatError> {
        let updated = self.store.delete(p.id, &p.author_id).await?;
        self.presence.touch(&p.author_id, OffsetDateTime::now_utc());
        let room = routed_room(&updated)?;
        info!(id = updated.id, author = %p.author_id, "message deleted");
        self.broadcast_room(&room, &ServerEvent::MessageUpdated(updated));
        Ok(())
    }

    async fn on_react(&self, p: ReactRequest) -> Result<(), ChatError> {
        if p.emoji.is_empty() || p.reactor_id.is_empty() {
            return Err(ChatError::Validation("reaction needs an emoji and a reactor".to_owned()));
        }
        let updated = self
            .store
            .toggle_reaction(p.id, &p.reactor_id, &p.reactor_name, &p.emoji)
            .await?;
        self.presence.touch(&p.reactor_id, OffsetDateTime::now_utc());
        let room = routed_room(&updated)?;
        debug!(id = updated.id, reactor = %p.reactor_id, emoji = %p.emoji, "reaction toggled");
        self.broadcast_room(&room, &ServerEvent::MessageUpdated(updated));
        Ok(())
    }

    /// Relay a typing signal to everyone else in the room. The hub keeps no
    /// typing state; expiry is the client's business.
    fn on_typing(&self, conn: ConnId, sig: TypingSignal, start: bool) {
        let room = match (sig.kind, sig.recipient_id.as_ref()) {
            (MessageKind::Private, Some(recipient)) => {
                match rooms::resolve(&sig.identity, recipient) {
                    Ok(room) => room,
                    Err(_) => return,
                }
            }
            _ => sig.room_id.unwrap_or_else(|| PUBLIC_ROOM.to_owned()),
        };
        if start {
            self.presence.touch(&sig.identity, OffsetDateTime::now_utc());
        }
        let notice = TypingNotice {
            identity: sig.identity,
        };
        let event = if start {
            ServerEvent::TypingStart(notice)
        } else {
            ServerEvent::TypingStop(notice)
        };
        self.broadcast_room_except(&room, conn, &event);
    }

    fn unicast(&self, conn: ConnId, event: &ServerEvent) {
        let Ok(frame) = serde_json::to_string(event) else {
            return;
        };
        if let Some(handle) = self.conns.lock().unwrap().get(&conn) {
            let _ = handle.tx.send(frame);
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        let Ok(frame) = serde_json::to_string(event) else {
            return;
        };
        for handle in self.conns.lock().unwrap().values() {
            let _ = handle.tx.send(frame.clone());
        }
    }

    fn broadcast_room(&self, room: &str, event: &ServerEvent) {
        self.broadcast_room_filtered(room, None, event);
    }

    fn broadcast_room_except(&self, room: &str, skip: ConnId, event: &ServerEvent) {
        self.broadcast_room_filtered(room, Some(skip), event);
    }

    fn broadcast_room_filtered(&self, room: &str, skip: Option<ConnId>, event: &ServerEvent) {
        let Ok(frame) = serde_json::to_string(event) else {
            return;
        };
        let members: Vec<ConnId> = match self.rooms.lock().unwrap().get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return,
        };
        let conns = self.conns.lock().unwrap();
        for member in members {
            if skip == Some(member) {
                continue;
            }
            if let Some(handle) = conns.get(&member) {
                let _ = handle.tx.send(frame.clone());
            }
        }
    }

    pub fn broadcast_online(&self) {
        self.broadcast_all(&ServerEvent::OnlineUsers(self.presence.snapshot()));
    }
}

/// Where updates to an existing message go: private messages are routed by
/// the resolver over author and recipient, public ones by their stored room.
fn routed_room(msg: &ChatMessage) -> Result<RoomId, ChatError> {
    match (msg.kind, &msg.recipient_id) {
        (MessageKind::Private, Some(recipient)) => rooms::resolve(&msg.author_id, recipient),
        _ => Ok(msg.room_id.clone()),
    }
}

fn validate_new_message(msg: &NewMessage) -> Result<(), ChatError> {
    if msg.author_id.is_empty() {
        return Err(ChatError::Validation("message missing author identity".to_owned()));
    }
    if msg.body.trim().is_empty() && msg.attachment.is_none() {
        return Err(ChatError::Validation(
            "message needs text or an attachment".to_owned(),
        ));
    }
    if let Some(attachment) = &msg.attachment {
        if attachment.payload.len() > MAX_ATTACHMENT_BYTES {
            return Err(ChatError::Validation(
                "attachment exceeds the 5 MB limit".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Periodic eviction of silent identities. Broadcasts the online-user list
/// only when the population actually changed.
pub async fn run_sweeper(hub: Arc<ChatHub>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    let mut last_count = hub.presence.len();
    loop {
        ticker.tick().await;
        let removed = hub.presence.sweep(OffsetDateTime::now_utc(), ACTIVITY_TIMEOUT);
        for identity in &removed {
            info!(%identity, "presence expired");
        }
        let count = hub.presence.len();
        if !removed.is_empty() || count != last_count {
            hub.broadcast_online();
            last_count = count;
        }
    }
}
