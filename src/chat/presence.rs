use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::chat::message::{RoomId, UserId};
use crate::chat::rooms::PUBLIC_ROOM;

/// How long an identity may stay silent before the sweep drops it.
pub const ACTIVITY_TIMEOUT: Duration = Duration::minutes(5);

/// Interval between sweeps.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub type ConnId = Uuid;

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub identity: UserId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub connection_ref: ConnId,
    pub last_activity_at: OffsetDateTime,
    pub current_room_id: RoomId,
}

/// Projection of an entry broadcast in `onlineUsers` lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub identity: UserId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Who is online right now. At most one entry per identity; refreshed on
/// every authenticated event, evicted on disconnect or by the periodic
/// sweep. Best-effort state: lookups of unknown identities are no-ops.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: Mutex<HashMap<UserId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an entry. A newer connection under the same identity takes
    /// over the metadata but keeps whatever room was already tracked; fresh
    /// entries start in the public lobby.
    pub fn mark_online(
        &self,
        identity: &UserId,
        display_name: &str,
        avatar_ref: Option<String>,
        connection_ref: ConnId,
        now: OffsetDateTime,
    ) {
        let mut entries = self.entries.lock().unwrap();
        let current_room_id = entries
            .get(identity)
            .map(|e| e.current_room_id.clone())
            .unwrap_or_else(|| PUBLIC_ROOM.to_owned());
        entries.insert(
            identity.clone(),
            PresenceEntry {
                identity: identity.clone(),
                display_name: display_name.to_owned(),
                avatar_ref,
                connection_ref,
                last_activity_at: now,
                current_room_id,
            },
        );
    }

    /// Refresh the activity instant. Returns false for unknown identities.
    pub fn touch(&self, identity: &UserId, now: OffsetDateTime) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(identity) {
            Some(entry) => {
                entry.last_activity_at = now;
                true
            }
            None => false,
        }
    }

    /// Track which room the identity is looking at. Informational only;
    /// message routing goes through explicit room subscriptions.
    pub fn set_current_room(&self, identity: &UserId, room_id: &RoomId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(identity) {
            entry.current_room_id = room_id.clone();
        }
    }

    /// Drop the entry for an explicit disconnect, but only if it still
    /// belongs to the disconnecting connection. A newer connection under
    /// the same identity must survive its predecessor's teardown.
    pub fn remove_connection(&self, identity: &UserId, connection_ref: ConnId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(identity) {
            Some(entry) if entry.connection_ref == connection_ref => {
                entries.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Evict every entry silent for longer than `timeout`, returning the
    /// removed identities.
    pub fn sweep(&self, now: OffsetDateTime, timeout: Duration) -> Vec<UserId> {
        let mut entries = self.entries.lock().unwrap();
        let expired: Vec<UserId> = entries
            .values()
            .filter(|e| now - e.last_activity_at > timeout)
            .map(|e| e.identity.clone())
            .collect();
        for identity in &expired {
            entries.remove(identity);
        }
        expired
    }

    pub fn snapshot(&self) -> Vec<OnlineUser> {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .map(|e| OnlineUser {
                identity: e.identity.clone(),
                display_name: e.display_name.clone(),
                avatar_ref: e.avatar_ref.clone(),
            })
            .collect()
    }

    pub fn contains(&self, identity: &UserId) -> bool {
        self.entries.lock().unwrap().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything; process shutdown and tests.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
