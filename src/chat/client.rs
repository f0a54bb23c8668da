//! Per-client view model for the chat UI: which room is on screen, the
//! message list, typing indicators and edit-in-progress state. No I/O and no
//! wall clock in here; callers pass `now` in, and transitions hand back the
//! events to send out.

use std::collections::HashMap;

use time::{Duration, OffsetDateTime};

use crate::chat::events::{
    ClientEvent, DeleteRequest, EditRequest, FetchHistory, Join, MarkOnline, ReactRequest,
    ServerEvent, TypingSignal,
};
use crate::chat::message::{Attachment, ChatMessage, MessageKind, NewMessage, RoomId, UserId};
use crate::chat::presence::OnlineUser;
use crate::chat::rooms::{self, PUBLIC_ROOM};

/// A typing indicator (own or a peer's) lapses after this much silence.
pub const TYPING_EXPIRY: Duration = Duration::seconds(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMode {
    Public,
    Private { recipient: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub message_id: i64,
    pub draft: String,
}

pub struct ChatClientState {
    identity: UserId,
    display_name: String,
    avatar_ref: Option<String>,
    mode: ChatMode,
    messages: Vec<ChatMessage>,
    online: Vec<OnlineUser>,
    /// identity -> instant their indicator expires
    peers_typing: HashMap<UserId, OffsetDateTime>,
    /// expiry of our own composing state; `Some` while we owe a typingStop
    composing_until: Option<OffsetDateTime>,
    pending_edit: Option<PendingEdit>,
    last_notice: Option<String>,
}

impl ChatClientState {
    pub fn new(identity: UserId, display_name: String, avatar_ref: Option<String>) -> Self {
        Self {
            identity,
            display_name,
            avatar_ref,
            mode: ChatMode::Public,
            messages: Vec::new(),
            online: Vec::new(),
            peers_typing: HashMap::new(),
            composing_until: None,
            pending_edit: None,
            last_notice: None,
        }
    }

    pub fn mode(&self) -> &ChatMode {
        &self.mode
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn online(&self) -> &[OnlineUser] {
        &self.online
    }

    pub fn pending_edit(&self) -> Option<&PendingEdit> {
        self.pending_edit.as_ref()
    }

    /// Identities currently showing a typing indicator.
    pub fn typing_peers(&self) -> Vec<&UserId> {
        self.peers_typing.keys().collect()
    }

    /// Last transient error, cleared on read.
    pub fn take_notice(&mut self) -> Option<String> {
        self.last_notice.take()
    }

    /// The room this view is scoped to.
    pub fn current_room(&self) -> RoomId {
        match &self.mode {
            ChatMode::Public => PUBLIC_ROOM.to_owned(),
            ChatMode::Private { recipient } => rooms::resolve(&self.identity, recipient)
                .unwrap_or_else(|_| PUBLIC_ROOM.to_owned()),
        }
    }

    /// Events to send right after the connection opens: announce, subscribe,
    /// load history.
    pub fn startup_events(&self) -> Vec<ClientEvent> {
        vec![
            ClientEvent::MarkOnline(MarkOnline {
                identity: self.identity.clone(),
                display_name: self.display_name.clone(),
                avatar_ref: self.avatar_ref.clone(),
            }),
            ClientEvent::Join(Join {
                room_id: self.current_room(),
            }),
            self.fetch_history_event(),
        ]
    }

    /// Flip between the lobby and a private pairing. Room-scoped state is
    /// dropped; the returned events resubscribe and refetch.
    pub fn switch_mode(&mut self, mode: ChatMode) -> Vec<ClientEvent> {
        self.mode = mode;
        self.messages.clear();
        self.peers_typing.clear();
        self.pending_edit = None;
        self.composing_until = None;
        vec![
            ClientEvent::Join(Join {
                room_id: self.current_room(),
            }),
            self.fetch_history_event(),
        ]
    }

    fn fetch_history_event(&self) -> ClientEvent {
        let (room_id, target_identity) = match &self.mode {
            ChatMode::Public => (Some(PUBLIC_ROOM.to_owned()), None),
            ChatMode::Private { recipient } => (None, Some(recipient.clone())),
        };
        ClientEvent::FetchHistory(FetchHistory {
            identity: self.identity.clone(),
            room_id,
            target_identity,
        })
    }

    /// Fold a server event into the view.
    pub fn apply(&mut self, event: ServerEvent, now: OffsetDateTime) {
        match event {
            ServerEvent::History(messages) => {
                self.messages = messages;
            }
            ServerEvent::NewMessage(message) => {
                // other rooms' traffic is not ours to show
                if message.room_id == self.current_room() {
                    self.messages.push(message);
                }
            }
            ServerEvent::MessageUpdated(message) => {
                if let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) {
                    if message.deleted
                        && self
                            .pending_edit
                            .as_ref()
                            .is_some_and(|e| e.message_id == message.id)
                    {
                        self.pending_edit = None;
                    }
                    *slot = message;
                }
            }
            ServerEvent::OnlineUsers(users) => {
                self.online = users;
            }
            ServerEvent::TypingStart(notice) => {
                if notice.identity != self.identity {
                    self.peers_typing
                        .insert(notice.identity, now + TYPING_EXPIRY);
                }
            }
            ServerEvent::TypingStop(notice) => {
                self.peers_typing.remove(&notice.identity);
            }
            ServerEvent::ErrorNotice(notice) => {
                self.last_notice = Some(notice);
            }
        }
    }

    /// A keystroke in the composer. Restarts the 2 s silence timer and
    /// yields the typing signal to relay.
    pub fn on_input(&mut self, now: OffsetDateTime) -> ClientEvent {
        self.composing_until = Some(now + TYPING_EXPIRY);
        ClientEvent::TypingStart(self.typing_signal())
    }

    /// Advance time: expire peer indicators, and once our own composing
    /// timer lapses, emit the one `typingStop` we owe.
    pub fn tick(&mut self, now: OffsetDateTime) -> Option<ClientEvent> {
        self.peers_typing.retain(|_, expires| *expires > now);
        match self.composing_until {
            Some(expires) if expires <= now => {
                self.composing_until = None;
                Some(ClientEvent::TypingStop(self.typing_signal()))
            }
            _ => None,
        }
    }

    /// Build the events for sending a new message in the current mode. Also
    /// settles any open typing state.
    pub fn compose(&mut self, body: String, attachment: Option<Attachment>) -> Vec<ClientEvent> {
        let (kind, recipient_id) = match &self.mode {
            ChatMode::Public => (MessageKind::Public, None),
            ChatMode::Private { recipient } => (MessageKind::Private, Some(recipient.clone())),
        };
        let mut events = vec![ClientEvent::Send(NewMessage {
            author_id: self.identity.clone(),
            author_display_name: self.display_name.clone(),
            avatar_ref: self.avatar_ref.clone(),
            kind,
            recipient_id,
            body,
            attachment,
        })];
        if self.composing_until.take().is_some() {
            events.push(ClientEvent::TypingStop(self.typing_signal()));
        }
        events
    }

    /// Start editing one of our own live messages.
    pub fn begin_edit(&mut self, message_id: i64) -> bool {
        let editable = self
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .is_some_and(|m| m.is_editable_by(&self.identity));
        if editable {
            let body = self
                .messages
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| m.body.clone())
                .unwrap_or_default();
            self.pending_edit = Some(PendingEdit {
                message_id,
                draft: body,
            });
        }
        editable
    }

    pub fn set_edit_draft(&mut self, draft: String) {
        if let Some(edit) = self.pending_edit.as_mut() {
            edit.draft = draft;
        }
    }

    pub fn cancel_edit(&mut self) {
        self.pending_edit = None;
    }

    /// Finish the pending edit; `None` if there is nothing worth sending.
    pub fn submit_edit(&mut self) -> Option<ClientEvent> {
        let edit = self.pending_edit.take()?;
        let body = edit.draft.trim();
        if body.is_empty() {
            return None;
        }
        Some(ClientEvent::EditRequest(EditRequest {
            id: edit.message_id,
            author_id: self.identity.clone(),
            new_body: body.to_owned(),
        }))
    }

    pub fn delete_message(&self, message_id: i64) -> ClientEvent {
        ClientEvent::DeleteRequest(DeleteRequest {
            id: message_id,
            author_id: self.identity.clone(),
        })
    }

    pub fn react(&self, message_id: i64, emoji: String) -> ClientEvent {
        ClientEvent::ReactRequest(ReactRequest {
            id: message_id,
            reactor_id: self.identity.clone(),
            reactor_name: self.display_name.clone(),
            emoji,
        })
    }

    fn typing_signal(&self) -> TypingSignal {
        match &self.mode {
            ChatMode::Public => TypingSignal {
                identity: self.identity.clone(),
                room_id: Some(PUBLIC_ROOM.to_owned()),
                kind: MessageKind::Public,
                recipient_id: None,
            },
            ChatMode::Private { recipient } => TypingSignal {
                identity: self.identity.clone(),
                room_id: None,
                kind: MessageKind::Private,
                recipient_id: Some(recipient.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::events::TypingNotice;
    use time::macros::datetime;

    fn message(id: i64, room: &str, author: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id,
            room_id: room.to_owned(),
            author_id: author.to_owned(),
            author_display_name: author.to_uppercase(),
            kind: if room == PUBLIC_ROOM {
                MessageKind::Public
            } else {
                MessageKind::Private
            },
            recipient_id: None,
            body: body.to_owned(),
            attachment: None,
            reactions: Vec::new(),
            created_at: datetime!(2026-01-01 12:00 UTC),
            edited_at: None,
            deleted: false,
        }
    }

    fn state() -> ChatClientState {
        ChatClientState::new("u1".to_owned(), "One".to_owned(), None)
    }

    #[test]
    fn peer_typing_expires_after_silence_and_restarts() {
        let mut state = state();
        let t0 = datetime!(2026-01-01 12:00:00 UTC);

        state.apply(
            ServerEvent::TypingStart(TypingNotice {
                identity: "u2".to_owned(),
            }),
            t0,
        );
        state.tick(t0 + Duration::seconds(1));
        assert_eq!(state.typing_peers().len(), 1);

        // a fresh signal restarts the two-second window
        state.apply(
            ServerEvent::TypingStart(TypingNotice {
                identity: "u2".to_owned(),
            }),
            t0 + Duration::milliseconds(1500),
        );
        state.tick(t0 + Duration::seconds(3));
        assert_eq!(state.typing_peers().len(), 1);

        state.tick(t0 + Duration::seconds(4));
        assert!(state.typing_peers().is_empty());
    }

    #[test]
    fn own_typing_stops_once_after_two_seconds() {
        let mut state = state();
        let t0 = datetime!(2026-01-01 12:00:00 UTC);

        assert!(matches!(state.on_input(t0), ClientEvent::TypingStart(_)));
        assert!(state.tick(t0 + Duration::seconds(1)).is_none());

        let stop = state.tick(t0 + Duration::milliseconds(2500));
        assert!(matches!(stop, Some(ClientEvent::TypingStop(_))));
        // only one stop per composing burst
        assert!(state.tick(t0 + Duration::seconds(5)).is_none());
    }

    #[test]
    fn compose_settles_typing_state() {
        let mut state = state();
        let t0 = datetime!(2026-01-01 12:00:00 UTC);
        state.on_input(t0);

        let events = state.compose("hi".to_owned(), None);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ClientEvent::Send(_)));
        assert!(matches!(events[1], ClientEvent::TypingStop(_)));
        // the stop was sent eagerly, the timer owes nothing anymore
        assert!(state.tick(t0 + Duration::seconds(5)).is_none());
    }

    #[test]
    fn messages_from_other_rooms_are_ignored() {
        let mut state = state();
        let now = datetime!(2026-01-01 12:00:00 UTC);

        state.apply(
            ServerEvent::NewMessage(message(1, PUBLIC_ROOM, "u2", "lobby talk")),
            now,
        );
        state.apply(
            ServerEvent::NewMessage(message(2, "u2-u3", "u2", "dm elsewhere")),
            now,
        );
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].id, 1);
    }

    #[test]
    fn pending_edit_lifecycle() {
        let mut state = state();
        let now = datetime!(2026-01-01 12:00:00 UTC);
        state.apply(
            ServerEvent::History(vec![
                message(1, PUBLIC_ROOM, "u1", "mine"),
                message(2, PUBLIC_ROOM, "u2", "theirs"),
            ]),
            now,
        );

        // only own messages are editable
        assert!(!state.begin_edit(2));
        assert!(state.begin_edit(1));
        state.set_edit_draft("mine, corrected".to_owned());

        let event = state.submit_edit().unwrap();
        match event {
            ClientEvent::EditRequest(edit) => {
                assert_eq!(edit.id, 1);
                assert_eq!(edit.new_body, "mine, corrected");
                assert_eq!(edit.author_id, "u1");
            }
            other => panic!("expected edit request, got {other:?}"),
        }
        assert!(state.pending_edit().is_none());
    }

    #[test]
    fn deleting_the_message_under_edit_cancels_it() {
        let mut state = state();
        let now = datetime!(2026-01-01 12:00:00 UTC);
        state.apply(
            ServerEvent::History(vec![message(1, PUBLIC_ROOM, "u1", "mine")]),
            now,
        );
        assert!(state.begin_edit(1));

        let mut tombstone = message(1, PUBLIC_ROOM, "u1", "This message has been deleted.");
        tombstone.deleted = true;
        state.apply(ServerEvent::MessageUpdated(tombstone), now);

        assert!(state.pending_edit().is_none());
        assert!(state.messages()[0].deleted);
    }

    #[test]
    fn switch_mode_rescopes_the_view() {
        let mut state = state();
        let now = datetime!(2026-01-01 12:00:00 UTC);
        state.apply(
            ServerEvent::History(vec![message(1, PUBLIC_ROOM, "u2", "lobby")]),
            now,
        );
        assert_eq!(state.current_room(), PUBLIC_ROOM);

        let events = state.switch_mode(ChatMode::Private {
            recipient: "u2".to_owned(),
        });
        assert_eq!(state.current_room(), "u1-u2");
        assert!(state.messages().is_empty());
        assert!(matches!(&events[0], ClientEvent::Join(j) if j.room_id == "u1-u2"));
        assert!(matches!(
            &events[1],
            ClientEvent::FetchHistory(f) if f.target_identity.as_deref() == Some("u2")
        ));
    }
}
